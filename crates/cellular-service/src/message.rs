//! Queue items and the events the automaton dispatches on.

use cellular_datacache::EntryId;

use crate::facade::{ModemEvents, PdnEvent};

/// One item in the automaton queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Message {
    /// Follow-ups, timer expiries and modem callbacks.
    Event(Event),
    /// Application API requests.
    Command(Command),
    /// A shared-state record changed; decoded by reading the record.
    CacheChanged(EntryId),
    /// Stops the automaton task.
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    RadioOn,
    PowerOnOnly,
    Reboot,
    Wakeup,
}

impl Command {
    pub fn event(self) -> Event {
        match self {
            Command::RadioOn => Event::Boot,
            Command::PowerOnOnly => Event::ModemPowerOnOnly,
            Command::Reboot => Event::RebootModem,
            Command::Wakeup => Event::PowerWakeup,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Boot,
    ModemInit,
    ModemReady,
    SignalQualityToCheck,
    NetworkStatusToCheck,
    NetworkStatusOk,
    ModemAttached,
    PdpActivated,
    PdnStatus(PdnEvent),
    PdnActivateRetryTimer,
    CellularDataFail,
    PollingTimer,
    TargetStateCmd,
    ApnConfig,
    RebootModem,
    ModemPowerOnOnly,
    NetworkCallback,
    NwRegTimeoutTimer,
    RegisterRetryTimer,
    FotaStart,
    FotaEnd,
    FotaTimeout,
    ModemReset,
    ModemPowerDown,
    PowerSleepTimeout,
    PowerSleepRequest,
    PowerSleepComplete,
    PowerWakeup,
    PowerModemWakeup,
}

/// Automaton events for one modem lifecycle flag.
pub fn modem_event(flag: ModemEvents) -> Option<Event> {
    const MAP: [(ModemEvents, Event); 6] = [
        (ModemEvents::BOOT, Event::RebootModem),
        (ModemEvents::POWER_DOWN, Event::ModemPowerDown),
        (ModemEvents::FOTA_START, Event::FotaStart),
        (ModemEvents::FOTA_END, Event::FotaEnd),
        (ModemEvents::LP_ENTER, Event::PowerSleepComplete),
        (ModemEvents::WAKEUP_REQUEST, Event::PowerModemWakeup),
    ];
    MAP.iter()
        .find(|(bit, _)| *bit == flag)
        .map(|(_, event)| *event)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_map_to_entry_events() {
        assert_eq!(Command::RadioOn.event(), Event::Boot);
        assert_eq!(Command::PowerOnOnly.event(), Event::ModemPowerOnOnly);
        assert_eq!(Command::Reboot.event(), Event::RebootModem);
    }

    #[test]
    fn modem_flags_map_to_events() {
        let events: Vec<_> = (ModemEvents::BOOT | ModemEvents::LP_LEAVE | ModemEvents::LP_ENTER)
            .iter()
            .filter_map(modem_event)
            .collect();
        assert_eq!(events, vec![Event::RebootModem, Event::PowerSleepComplete]);
    }

    #[test]
    fn messages_stay_small() {
        assert!(std::mem::size_of::<Message>() <= 8);
    }
}
