//! Automaton states and the status the automaton publishes to other threads.
//!
//! Only the automaton task writes [`SharedStatus`]. Timer guards and the
//! application API read it without synchronization beyond the atomics; the
//! values are advisory and every decision is re-checked inside the task.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum State {
    #[default]
    Boot = 0,
    ModemInit,
    ModemReady,
    WaitingSignalQualityOk,
    WaitingNetworkStatus,
    NetworkStatusOk,
    ModemRegistered,
    ModemPdnActivating,
    ModemDataReady,
    ModemReprogramming,
    ModemFail,
    ModemSimOnly,
    ModemReset,
    ModemOff,
    ModemPowerOnOnly,
    ModemPowerDataIdle,
    ApnConfig,
    ModemSimLocked,
}

impl State {
    const ALL: [State; 18] = [
        State::Boot,
        State::ModemInit,
        State::ModemReady,
        State::WaitingSignalQualityOk,
        State::WaitingNetworkStatus,
        State::NetworkStatusOk,
        State::ModemRegistered,
        State::ModemPdnActivating,
        State::ModemDataReady,
        State::ModemReprogramming,
        State::ModemFail,
        State::ModemSimOnly,
        State::ModemReset,
        State::ModemOff,
        State::ModemPowerOnOnly,
        State::ModemPowerDataIdle,
        State::ApnConfig,
        State::ModemSimLocked,
    ];

    pub fn from_u8(raw: u8) -> Option<State> {
        Self::ALL.get(raw as usize).copied()
    }

    /// States that only an explicit command (or nothing) can leave.
    pub fn is_absorbing(self) -> bool {
        matches!(
            self,
            State::ModemFail | State::ModemSimLocked | State::ModemReprogramming
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            State::Boot => "boot",
            State::ModemInit => "modem-init",
            State::ModemReady => "modem-ready",
            State::WaitingSignalQualityOk => "waiting-signal-quality",
            State::WaitingNetworkStatus => "waiting-network-status",
            State::NetworkStatusOk => "network-status-ok",
            State::ModemRegistered => "modem-registered",
            State::ModemPdnActivating => "pdn-activating",
            State::ModemDataReady => "data-ready",
            State::ModemReprogramming => "reprogramming",
            State::ModemFail => "fail",
            State::ModemSimOnly => "sim-only",
            State::ModemReset => "reset",
            State::ModemOff => "off",
            State::ModemPowerOnOnly => "power-on-only",
            State::ModemPowerDataIdle => "power-data-idle",
            State::ApnConfig => "apn-config",
            State::ModemSimLocked => "sim-locked",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Automaton fields mirrored for foreign-context guard checks.
#[derive(Debug)]
pub struct SharedStatus {
    state: AtomicU8,
    nfmc_retry_pending: AtomicBool,
    polling_active: AtomicBool,
    polling_on_going: AtomicBool,
    low_power_target: AtomicBool,
}

impl SharedStatus {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(State::Boot as u8),
            nfmc_retry_pending: AtomicBool::new(false),
            polling_active: AtomicBool::new(true),
            polling_on_going: AtomicBool::new(false),
            low_power_target: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> State {
        State::from_u8(self.state.load(Ordering::Acquire)).unwrap_or(State::Boot)
    }

    pub fn nfmc_retry_pending(&self) -> bool {
        self.nfmc_retry_pending.load(Ordering::Acquire)
    }

    pub fn polling_active(&self) -> bool {
        self.polling_active.load(Ordering::Acquire)
    }

    pub fn polling_on_going(&self) -> bool {
        self.polling_on_going.load(Ordering::Acquire)
    }

    pub fn low_power_target(&self) -> bool {
        self.low_power_target.load(Ordering::Acquire)
    }

    pub(crate) fn publish_state(&self, state: State) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub(crate) fn publish_nfmc_retry_pending(&self, pending: bool) {
        self.nfmc_retry_pending.store(pending, Ordering::Release);
    }

    pub(crate) fn publish_polling(&self, active: bool, on_going: bool) {
        self.polling_active.store(active, Ordering::Release);
        self.polling_on_going.store(on_going, Ordering::Release);
    }

    #[cfg_attr(not(feature = "low-power"), allow(dead_code))]
    pub(crate) fn publish_low_power_target(&self, active: bool) {
        self.low_power_target.store(active, Ordering::Release);
    }
}

impl Default for SharedStatus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_roundtrips_through_u8() {
        for state in State::ALL {
            assert_eq!(State::from_u8(state as u8), Some(state));
        }
        assert_eq!(State::from_u8(200), None);
    }

    #[test]
    fn fresh_status_is_boot_with_polling() {
        let status = SharedStatus::new();
        assert_eq!(status.state(), State::Boot);
        assert!(status.polling_active());
        assert!(!status.polling_on_going());
        assert!(!status.nfmc_retry_pending());
    }

    #[test]
    fn absorbing_states() {
        assert!(State::ModemFail.is_absorbing());
        assert!(State::ModemSimLocked.is_absorbing());
        assert!(!State::ModemReset.is_absorbing());
    }
}
