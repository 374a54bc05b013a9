//! SIM slot bookkeeping.

use cellular_datacache::cellular::SimStatus;

use crate::facade::ModemError;

/// Slot tried after `current` failed, wrapping to the first one.
pub fn next_slot_index(current: usize, slot_count: usize) -> usize {
    let next = current + 1;
    if next >= slot_count { 0 } else { next }
}

/// How a SIM probe result is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimOutcome {
    /// SIM usable (a busy SIM is polled later).
    Ready,
    /// Try the next slot through the failure handler.
    Fallback,
    /// PIN rejected or PUK needed: stop before the SIM locks for good.
    Locked(SimStatus),
}

pub fn classify(result: &Result<(), ModemError>) -> SimOutcome {
    match result {
        Ok(()) | Err(ModemError::SimBusy) => SimOutcome::Ready,
        Err(ModemError::SimIncorrectPassword) => SimOutcome::Locked(SimStatus::IncorrectPassword),
        Err(ModemError::SimPinOrPukLocked) => SimOutcome::Locked(SimStatus::PinOrPukLocked),
        Err(ModemError::SimNotInserted)
        | Err(ModemError::SimError)
        | Err(ModemError::Generic)
        | Err(ModemError::Unsupported) => SimOutcome::Fallback,
    }
}

/// Status published after a terminal IMSI read error.
pub fn status_for_imsi_error(err: ModemError) -> SimStatus {
    match err {
        ModemError::SimNotInserted => SimStatus::NotInserted,
        ModemError::SimPinOrPukLocked => SimStatus::PinOrPukLocked,
        ModemError::SimIncorrectPassword => SimStatus::IncorrectPassword,
        ModemError::SimBusy => SimStatus::Busy,
        ModemError::SimError | ModemError::Generic | ModemError::Unsupported => SimStatus::Error,
    }
}
