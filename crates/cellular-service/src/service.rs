//! # Cellular Service Runtime
//!
//! Owns the automaton task, the timer worker and the bridge from the record
//! store into the automaton queue.
//!
//! ```text
//!  application ──API──┐                 ┌── modem callbacks
//!                     ▼                 ▼
//!  record store ──▶ [ bounded queue ] ◀── timer worker
//!                     │
//!                     ▼
//!              "cellular-service" thread ──▶ Automaton ──▶ ModemFacade
//! ```
//!
//! Every producer posts without blocking; a full queue drops the message and
//! counts it.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use cellular_datacache::cellular::{
    ApnConfig, CellularConfig, CellularEntries, CellularParams, SimInfo, TargetState,
    TargetStateRequest,
};
#[cfg(feature = "low-power")]
use cellular_datacache::cellular::PowerConfig;
use cellular_datacache::{DataCache, DataCacheError, ServiceState, SubscriberId};
use thiserror::Error;
use tracing::{debug, info};

use crate::automaton::{Automaton, Collaborators, TransitionObserver};
use crate::config::ServiceConfig;
use crate::facade::{ModemError, ModemFacade, PlatformHooks};
use crate::message::{Command, Message};
use crate::queue::{EventReceiver, EventSender, event_queue};
use crate::state::{SharedStatus, State};
use crate::timers::{TimerControl, TimerId, TimerSet};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("record store: {0}")]
    DataCache(#[from] DataCacheError),
    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("modem: {0}")]
    Modem(#[from] ModemError),
}

/// Forwards changes of the records the automaton reacts to into its queue.
pub fn install_cache_bridge(
    cache: &DataCache,
    entries: &CellularEntries,
    sender: EventSender,
) -> Result<SubscriberId, DataCacheError> {
    let watched = [
        entries.data_info.id(),
        entries.target_state.id(),
        entries.apn_config.id(),
        entries.power_config.id(),
    ];
    cache.subscribe(move |id| {
        if watched.contains(&id) {
            sender.post(Message::CacheChanged(id));
        }
    })
}

/// Seeds the records the automaton expects before its first event.
pub fn seed_records(
    cache: &DataCache,
    entries: &CellularEntries,
    params: &CellularParams,
) -> Result<(), DataCacheError> {
    cache.write(
        entries.cellular_config,
        CellularConfig {
            rt_state: ServiceState::On,
            params: params.clone(),
        },
    )?;
    cache.write(
        entries.sim_info,
        SimInfo {
            active_slot: params.slot(0).map(|s| s.slot_type).unwrap_or_default(),
            ..SimInfo::default()
        },
    )
}

pub struct CellularService {
    config: ServiceConfig,
    cache: DataCache,
    entries: CellularEntries,
    facade: Arc<dyn ModemFacade>,
    platform: Arc<dyn PlatformHooks>,
    status: Arc<SharedStatus>,
    sender: EventSender,
    receiver: Option<EventReceiver>,
    observer: Option<TransitionObserver>,
    stop: Arc<AtomicBool>,
    bridge: Option<SubscriberId>,
    timers: Option<TimerSet>,
    task: Option<JoinHandle<()>>,
}

impl CellularService {
    /// Registers the cellular records in `cache` and seeds them from
    /// `config`. Nothing runs until [`start`](Self::start).
    ///
    /// Calling it again on the same cache reuses the records registered by
    /// the first call.
    pub fn init(
        config: ServiceConfig,
        facade: Arc<dyn ModemFacade>,
        platform: Arc<dyn PlatformHooks>,
        cache: DataCache,
    ) -> Result<Self, ServiceError> {
        let entries = CellularEntries::attach(&cache)?;
        seed_records(&cache, &entries, &config.params)?;
        let (sender, receiver) = event_queue(config.queue_capacity);

        Ok(Self {
            config,
            cache,
            entries,
            facade,
            platform,
            status: Arc::new(SharedStatus::new()),
            sender,
            receiver: Some(receiver),
            observer: None,
            stop: Arc::new(AtomicBool::new(false)),
            bridge: None,
            timers: None,
            task: None,
        })
    }

    /// Observes state changes. Only takes effect before `start`.
    pub fn set_transition_observer(&mut self, observer: TransitionObserver) {
        self.observer = Some(observer);
    }

    /// Spawns the timer worker and the automaton task, then arms polling.
    /// Calling it again is a no-op.
    pub fn start(&mut self) -> Result<(), ServiceError> {
        let Some(receiver) = self.receiver.take() else {
            return Ok(());
        };

        // The application may have rewritten the configuration record.
        let stored = self.cache.read_or_default(self.entries.cellular_config);
        if stored.rt_state == ServiceState::On {
            self.config.params = stored.params;
        }

        let bridge = install_cache_bridge(&self.cache, &self.entries, self.sender.clone())?;

        self.bridge = Some(bridge);
        let timers = TimerSet::spawn(self.status.clone(), self.sender.clone()).map_err(
            |source| ServiceError::Spawn {
                name: "cellular-timers",
                source,
            },
        )?;
        let control = timers.control();

        let mut automaton = Automaton::new(
            self.config.clone(),
            Collaborators {
                facade: self.facade.clone(),
                platform: self.platform.clone(),
                cache: self.cache.clone(),
                entries: self.entries,
                timers: Box::new(control.clone()),
                sender: self.sender.clone(),
                status: self.status.clone(),
            },
        );
        if let Some(observer) = self.observer.take() {
            automaton.set_transition_observer(observer);
        }

        let stop = self.stop.clone();
        let task = thread::Builder::new()
            .name("cellular-service".into())
            .spawn(move || service_task(automaton, receiver, stop))
            .map_err(|source| ServiceError::Spawn {
                name: "cellular-service",
                source,
            })?;

        control.start(TimerId::Polling, self.config.timing.polling_period);
        self.timers = Some(timers);
        self.task = Some(task);
        info!(
            target_state = ?self.config.params.target_state,
            slots = self.config.params.sim_slots.len(),
            "cellular service started"
        );
        Ok(())
    }

    // ─── Requests ────────────────────────────────────────────────────────────

    /// Starts the full connection flow. False if the queue was full.
    pub fn request_radio_on(&self) -> bool {
        self.sender.post(Message::Command(Command::RadioOn))
    }

    pub fn request_modem_power_on_only(&self) -> bool {
        self.sender.post(Message::Command(Command::PowerOnOnly))
    }

    pub fn request_reboot(&self) -> bool {
        self.sender.post(Message::Command(Command::Reboot))
    }

    pub fn request_target_state(&self, target: TargetState) -> Result<(), ServiceError> {
        self.cache.write(
            self.entries.target_state,
            TargetStateRequest {
                rt_state: ServiceState::On,
                target_state: target,
            },
        )?;
        Ok(())
    }

    /// Replaces the APN of the active SIM slot. Fields longer than the
    /// record allows are rejected.
    pub fn request_apn_config(
        &self,
        apn: &str,
        cid: u8,
        username: &str,
        password: &str,
    ) -> Result<(), ServiceError> {
        self.cache.write(
            self.entries.apn_config,
            ApnConfig {
                rt_state: ServiceState::On,
                apn: apn.to_string(),
                cid,
                username: username.to_string(),
                password: password.to_string(),
            },
        )?;
        Ok(())
    }

    #[cfg(feature = "low-power")]
    pub fn request_power_config(&self, config: PowerConfig) -> Result<(), ServiceError> {
        self.cache.write(self.entries.power_config, config)?;
        Ok(())
    }

    #[cfg(feature = "low-power")]
    pub fn request_wakeup(&self) -> bool {
        self.sender.post(Message::Command(Command::Wakeup))
    }

    // ─── Queries ─────────────────────────────────────────────────────────────

    pub fn get_ip_address(&self, cid: u8) -> Result<Ipv4Addr, ServiceError> {
        Ok(self.facade.get_dev_ip_address(cid)?)
    }

    pub fn get_current_state(&self) -> State {
        self.status.state()
    }

    pub fn cache(&self) -> &DataCache {
        &self.cache
    }

    pub fn entries(&self) -> &CellularEntries {
        &self.entries
    }

    pub fn status(&self) -> Arc<SharedStatus> {
        self.status.clone()
    }

    pub fn dropped_messages(&self) -> u64 {
        self.sender.dropped()
    }

    /// Detaches from the record store, then stops the automaton task and the
    /// timer worker. Idempotent.
    pub fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(bridge) = self.bridge.take() {
            self.cache.unsubscribe(bridge);
        }
        if let Some(task) = self.task.take() {
            self.sender.post(Message::Shutdown);
            let _ = task.join();
        }
        if let Some(mut timers) = self.timers.take() {
            timers.shutdown();
        }
    }
}

impl Drop for CellularService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn service_task(mut automaton: Automaton, receiver: EventReceiver, stop: Arc<AtomicBool>) {
    while let Some(msg) = receiver.recv() {
        if msg == Message::Shutdown || stop.load(Ordering::SeqCst) {
            break;
        }
        automaton.process(msg);
    }
    debug!(state = %automaton.state(), "cellular service task stopped");
}
