//! Deterministic automaton harness.
//!
//! Wires an [`Automaton`] to a [`SimModem`], a [`SimPlatform`], a fresh
//! record store and [`ManualTimers`], exactly as the service runtime does,
//! but runs every queued message on the caller's thread. Timers only expire
//! when the test fires them.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use cellular_datacache::cellular::CellularEntries;
use cellular_datacache::{DataCache, DataCacheError, Entry, Record};
use cellular_service::automaton::{Automaton, Collaborators, ConnectionContext};
use cellular_service::config::ServiceConfig;
use cellular_service::message::{Command, Event, Message};
use cellular_service::queue::{EventReceiver, EventSender, event_queue};
use cellular_service::service::{install_cache_bridge, seed_records};
use cellular_service::state::{SharedStatus, State};
use cellular_service::timers::{ManualTimers, TimerId};

use crate::modem::{ModemScript, SimModem};
use crate::platform::SimPlatform;

/// Default config with SIM polling made instantaneous.
pub fn test_config() -> ServiceConfig {
    let mut config = ServiceConfig::default();
    config.timing.sim_poll_interval = Duration::ZERO;
    config.queue_capacity = 32;
    config
}

pub struct Harness {
    pub modem: Arc<SimModem>,
    pub platform: Arc<SimPlatform>,
    pub cache: DataCache,
    pub entries: CellularEntries,
    pub timers: ManualTimers,
    pub status: Arc<SharedStatus>,
    automaton: Automaton,
    sender: EventSender,
    receiver: EventReceiver,
    transitions: Arc<Mutex<Vec<(State, State)>>>,
}

impl Harness {
    pub fn new(config: ServiceConfig, script: ModemScript) -> Result<Self, DataCacheError> {
        let modem = Arc::new(SimModem::new(script));
        let platform = Arc::new(SimPlatform::new());
        let cache = DataCache::new();
        let entries = CellularEntries::attach(&cache)?;
        seed_records(&cache, &entries, &config.params)?;

        let (sender, receiver) = event_queue(config.queue_capacity);
        install_cache_bridge(&cache, &entries, sender.clone())?;
        let status = Arc::new(SharedStatus::new());
        let timers = ManualTimers::new(status.clone(), sender.clone());

        let mut automaton = Automaton::new(
            config,
            Collaborators {
                facade: modem.clone(),
                platform: platform.clone(),
                cache: cache.clone(),
                entries,
                timers: Box::new(timers.clone()),
                sender: sender.clone(),
                status: status.clone(),
            },
        );
        let transitions = Arc::new(Mutex::new(Vec::new()));
        let log = transitions.clone();
        automaton.set_transition_observer(Box::new(move |from, to| {
            log.lock().unwrap_or_else(|e| e.into_inner()).push((from, to));
        }));

        Ok(Self {
            modem,
            platform,
            cache,
            entries,
            timers,
            status,
            automaton,
            sender,
            receiver,
            transitions,
        })
    }

    /// Healthy modem, default configuration.
    pub fn healthy() -> Result<Self, DataCacheError> {
        Self::new(test_config(), ModemScript::default())
    }

    pub fn post(&self, msg: Message) -> bool {
        self.sender.post(msg)
    }

    pub fn post_event(&self, event: Event) -> bool {
        self.sender.post_event(event)
    }

    /// Posts an application command and runs until idle.
    pub fn command(&mut self, command: Command) -> usize {
        self.post(Message::Command(command));
        self.run()
    }

    /// Handles queued messages until none are left.
    pub fn run(&mut self) -> usize {
        self.automaton.run_until_idle(&self.receiver)
    }

    /// Expires an armed timer, then runs until idle.
    pub fn fire(&mut self, id: TimerId) -> bool {
        let posted = self.timers.fire(id);
        self.run();
        posted
    }

    /// Delivers an expiry of a timer that was already stopped.
    pub fn fire_stale(&mut self, id: TimerId) -> bool {
        let posted = self.timers.fire_stale(id);
        self.run();
        posted
    }

    pub fn state(&self) -> State {
        self.automaton.state()
    }

    pub fn context(&self) -> &ConnectionContext {
        self.automaton.context()
    }

    pub fn automaton(&self) -> &Automaton {
        &self.automaton
    }

    pub fn read<R: Record>(&self, entry: Entry<R>) -> R {
        self.cache.read_or_default(entry)
    }

    pub fn transitions(&self) -> Vec<(State, State)> {
        self.transitions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// States entered so far, in order.
    pub fn states_entered(&self) -> Vec<State> {
        self.transitions().into_iter().map(|(_, to)| to).collect()
    }

    pub fn clear_transitions(&self) {
        self.transitions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    pub fn dropped(&self) -> u64 {
        self.sender.dropped()
    }
}
