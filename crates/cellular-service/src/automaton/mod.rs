//! # Connection Automaton
//!
//! Drives the modem from power-on to data-ready and keeps it there:
//!
//! ```text
//!  Boot ─▶ ModemInit ─▶ ModemReady ─▶ WaitingSignalQualityOk ◀──────────┐
//!              ▲                               │ signal detectable     │
//!              │                               ▼                       │
//!          ModemReset                  WaitingNetworkStatus ── lost ───┘
//!              ▲                               │ registered
//!   failure ───┤ (within limits)               ▼
//!              │                        NetworkStatusOk
//!          ModemFail ◀── limits exceeded       │ attached
//!                                              ▼
//!   ModemDataReady ◀── PDN active ── ModemPdnActivating ◀── ModemRegistered
//! ```
//!
//! Side states cover target-state requests (`ModemOff`, `ModemSimOnly`),
//! application power-on (`ModemPowerOnOnly`), firmware update
//! (`ModemReprogramming`), APN reconfiguration (`ApnConfig`), modem idle
//! (`ModemPowerDataIdle`) and SIM lockout (`ModemSimLocked`).
//!
//! The automaton runs on one task and owns its context. Callbacks, timers
//! and the application reach it only through the queue; handlers never
//! block on the queue and chain steps by posting follow-up events.

mod control;
#[cfg(feature = "low-power")]
mod low_power;
mod network;
mod sim_init;

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use cellular_datacache::cellular::{CellularEntries, CellularParams, DataNetwork};
use cellular_datacache::{DataCache, Entry, EntryId, Record, ServiceState};
use tracing::{debug, error, info, warn};

use crate::apn::ApnTable;
use crate::config::{ServiceConfig, Timing};
use crate::facade::{ModemFacade, PlatformHooks, RegistrationStatus, SignalQuality};
use crate::failure::{FailCause, FailCounters, RetryLimits, Verdict};
use crate::message::{Event, Message};
use crate::nfmc::{NfmcContext, TempoCursor};
#[cfg(feature = "low-power")]
use crate::power::LowPowerCoordinator;
use crate::queue::{EventReceiver, EventSender};
use crate::state::{SharedStatus, State};
use crate::timers::{TimerControl, TimerId};

/// Upper bound on messages handled by one [`Automaton::run_until_idle`].
const IDLE_STEP_LIMIT: usize = 10_000;

/// Called with `(from, to)` on every state change.
pub type TransitionObserver = Box<dyn FnMut(State, State) + Send>;

/// Everything the automaton talks to.
pub struct Collaborators {
    pub facade: Arc<dyn ModemFacade>,
    pub platform: Arc<dyn PlatformHooks>,
    pub cache: DataCache,
    pub entries: CellularEntries,
    pub timers: Box<dyn TimerControl>,
    pub sender: EventSender,
    pub status: Arc<SharedStatus>,
}

/// Automaton-private context. Nothing outside the automaton task writes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionContext {
    pub state: State,
    /// Last failure, kept for diagnostics.
    pub fail_cause: Option<FailCause>,
    pub registration: RegistrationStatus,
    pub counters: FailCounters,
    pub csq_fail_count: u32,
    pub signal: Option<SignalQuality>,
    pub register_retry: TempoCursor,
    pub pdn_retry: TempoCursor,
    pub sim_slot_index: usize,
    pub nfmc: NfmcContext,
    pub nfmc_retry_pending: bool,
    pub polling_active: bool,
    pub polling_on_going: bool,
    /// Modem lifecycle callback registered with the facade.
    pub modem_events_subscribed: bool,
}

impl Default for ConnectionContext {
    fn default() -> Self {
        Self {
            state: State::Boot,
            fail_cause: None,
            registration: RegistrationStatus::default(),
            counters: FailCounters::default(),
            csq_fail_count: 0,
            signal: None,
            register_retry: TempoCursor::default(),
            pdn_retry: TempoCursor::default(),
            sim_slot_index: 0,
            nfmc: NfmcContext::default(),
            nfmc_retry_pending: false,
            polling_active: true,
            polling_on_going: false,
            modem_events_subscribed: false,
        }
    }
}

pub struct Automaton {
    facade: Arc<dyn ModemFacade>,
    platform: Arc<dyn PlatformHooks>,
    cache: DataCache,
    entries: CellularEntries,
    timers: Box<dyn TimerControl>,
    sender: EventSender,
    status: Arc<SharedStatus>,
    params: CellularParams,
    limits: RetryLimits,
    timing: Timing,
    apn_table: ApnTable,
    sim_pin: String,
    ctx: ConnectionContext,
    observer: Option<TransitionObserver>,
    #[cfg(feature = "low-power")]
    power: LowPowerCoordinator,
}

impl Automaton {
    pub fn new(config: ServiceConfig, deps: Collaborators) -> Self {
        let ServiceConfig {
            params,
            limits,
            timing,
            apn_table,
            sim_pin,
            ..
        } = config;
        deps.status.publish_state(State::Boot);

        Self {
            #[cfg(feature = "low-power")]
            power: LowPowerCoordinator::new(millis(params.lp_inactivity_timeout_ms)),
            facade: deps.facade,
            platform: deps.platform,
            cache: deps.cache,
            entries: deps.entries,
            timers: deps.timers,
            sender: deps.sender,
            status: deps.status,
            params,
            limits,
            timing,
            apn_table,
            sim_pin,
            ctx: ConnectionContext::default(),
            observer: None,
        }
    }

    pub fn set_transition_observer(&mut self, observer: TransitionObserver) {
        self.observer = Some(observer);
    }

    pub fn state(&self) -> State {
        self.ctx.state
    }

    pub fn context(&self) -> &ConnectionContext {
        &self.ctx
    }

    pub fn params(&self) -> &CellularParams {
        &self.params
    }

    /// Decodes one queue item and runs the handler of the current state.
    pub fn process(&mut self, msg: Message) {
        if let Some(event) = self.decode(msg) {
            self.handle(event);
        }
    }

    /// Handles queued messages until the queue is empty or a shutdown is
    /// seen. Returns how many were handled.
    pub fn run_until_idle(&mut self, rx: &EventReceiver) -> usize {
        let mut handled = 0;
        while handled < IDLE_STEP_LIMIT {
            match rx.try_recv() {
                Some(Message::Shutdown) | None => break,
                Some(msg) => {
                    self.process(msg);
                    handled += 1;
                }
            }
        }
        if handled == IDLE_STEP_LIMIT {
            warn!(handled, "automaton still busy after step limit");
        }
        handled
    }

    // ─── Decoding ────────────────────────────────────────────────────────────

    fn decode(&mut self, msg: Message) -> Option<Event> {
        match msg {
            Message::Event(event) => Some(event),
            Message::Command(command) => Some(command.event()),
            Message::CacheChanged(id) => self.decode_cache_change(id),
            Message::Shutdown => None,
        }
    }

    fn decode_cache_change(&mut self, id: EntryId) -> Option<Event> {
        let entries = self.entries;

        if id == entries.data_info.id() {
            let data = self.cache.read_or_default(entries.data_info);
            return (data.rt_state == ServiceState::Fail).then_some(Event::CellularDataFail);
        }

        if id == entries.target_state.id() {
            let request = self.cache.read_or_default(entries.target_state);
            if request.rt_state != ServiceState::On {
                return None;
            }
            info!(target = ?request.target_state, "target state requested");
            self.params.target_state = request.target_state;
            return Some(Event::TargetStateCmd);
        }

        if id == entries.apn_config.id() {
            let request = self.cache.read_or_default(entries.apn_config);
            if request.rt_state != ServiceState::On || self.ctx.state.is_absorbing() {
                return None;
            }
            let unchanged = self
                .params
                .slot(self.ctx.sim_slot_index)
                .is_some_and(|slot| slot.apn == request.apn);
            if unchanged {
                debug!(apn = %request.apn, "APN unchanged");
                return None;
            }
            self.set_state(State::ApnConfig);
            return Some(Event::ApnConfig);
        }

        #[cfg(feature = "low-power")]
        if id == entries.power_config.id() {
            self.apply_power_config();
        }

        None
    }

    // ─── Dispatch ────────────────────────────────────────────────────────────

    pub fn handle(&mut self, event: Event) {
        let state = self.ctx.state;
        debug!(state = %state, event = ?event, "automaton event");

        // Any event counts as activity.
        #[cfg(feature = "low-power")]
        self.timers.stop(TimerId::LpInactivity);

        if event == Event::RegisterRetryTimer && !state.is_absorbing() {
            self.register_retry_expired();
            return;
        }

        match state {
            State::Boot => self.on_boot(event),
            State::ModemInit => self.on_init(event),
            State::ModemReady => self.on_ready(event),
            State::WaitingSignalQualityOk => self.on_waiting_signal(event),
            State::WaitingNetworkStatus => self.on_waiting_network(event),
            State::NetworkStatusOk => self.on_network_ok(event),
            State::ModemRegistered => self.on_registered(event),
            State::ModemPdnActivating => self.on_pdn_activating(event),
            State::ModemDataReady => self.on_data_ready(event),
            #[cfg(feature = "low-power")]
            State::ModemPowerDataIdle => self.on_power_idle(event),
            #[cfg(not(feature = "low-power"))]
            State::ModemPowerDataIdle => self.ignore(event),
            State::ModemOff => self.on_off(event),
            State::ModemSimOnly => self.on_sim_only(event),
            State::ModemReset => self.reset_modem(),
            State::ModemReprogramming => self.on_reprogramming(event),
            State::ApnConfig => self.on_apn_config(event),
            State::ModemFail => self.on_fail(event),
            State::ModemPowerOnOnly | State::ModemSimLocked => self.ignore(event),
        }
    }

    fn on_boot(&mut self, event: Event) {
        match event {
            Event::Boot => {
                self.set_state(State::ModemInit);
                self.post(Event::ModemInit);
            }
            Event::ModemPowerOnOnly => {
                self.set_state(State::ModemInit);
                self.post(Event::ModemPowerOnOnly);
            }
            Event::RebootModem => self.reboot(),
            other => self.ignore(other),
        }
    }

    fn on_init(&mut self, event: Event) {
        match event {
            Event::ModemInit => self.init_modem(),
            Event::ModemPowerOnOnly => self.power_on_only(),
            other => self.on_common(other),
        }
    }

    fn on_ready(&mut self, event: Event) {
        match event {
            Event::ModemReady => self.register_network(),
            other => self.on_common(other),
        }
    }

    fn on_waiting_signal(&mut self, event: Event) {
        match event {
            Event::PollingTimer | Event::SignalQualityToCheck => self.signal_gate(),
            Event::NetworkCallback => self.network_event(),
            other => self.on_common(other),
        }
    }

    fn on_waiting_network(&mut self, event: Event) {
        match event {
            Event::PollingTimer
            | Event::NetworkCallback
            | Event::SignalQualityToCheck
            | Event::NetworkStatusToCheck => self.network_status_check(),
            Event::NwRegTimeoutTimer => self.nw_reg_timeout(),
            other => self.on_common(other),
        }
    }

    fn on_network_ok(&mut self, event: Event) {
        match event {
            Event::NetworkStatusOk => self.attach(),
            other => self.on_common(other),
        }
    }

    fn on_registered(&mut self, event: Event) {
        match event {
            Event::ModemAttached => self.activate_pdn(),
            Event::NetworkCallback => self.network_event(),
            other => self.on_common(other),
        }
    }

    fn on_pdn_activating(&mut self, event: Event) {
        match event {
            Event::PdpActivated => self.data_ready(),
            Event::PdnActivateRetryTimer => self.activate_pdn(),
            Event::NetworkCallback => self.network_event(),
            Event::PdnStatus(pdn) => self.pdn_event(pdn),
            other => self.on_common(other),
        }
    }

    fn on_data_ready(&mut self, event: Event) {
        match event {
            Event::NetworkCallback => self.data_ready_network_event(),
            Event::PollingTimer => self.poll_signal(),
            Event::CellularDataFail => self.data_fail(),
            Event::PdnStatus(pdn) => self.pdn_event(pdn),
            Event::TargetStateCmd => self.data_mode_target_state(),
            Event::RebootModem | Event::ModemPowerDown => self.reboot(),
            Event::FotaStart => self.fota_start(),
            #[cfg(feature = "low-power")]
            Event::PowerSleepRequest => self.enter_idle(),
            other => self.ignore(other),
        }

        #[cfg(feature = "low-power")]
        if self.ctx.state == State::ModemDataReady {
            self.arm_lp_inactivity();
        }
    }

    fn on_off(&mut self, event: Event) {
        match event {
            Event::TargetStateCmd => self.off_target_cmd(),
            Event::ModemInit => self.mark_modem_off(),
            Event::RebootModem => self.reboot(),
            other => self.ignore(other),
        }
    }

    fn on_sim_only(&mut self, event: Event) {
        match event {
            Event::TargetStateCmd => self.sim_only_target_cmd(),
            Event::RebootModem => self.reboot(),
            other => self.ignore(other),
        }
    }

    fn on_reprogramming(&mut self, event: Event) {
        match event {
            Event::FotaEnd => self.fota_end(),
            Event::FotaTimeout => self.fota_timeout(),
            other => self.ignore(other),
        }
    }

    fn on_apn_config(&mut self, event: Event) {
        match event {
            Event::ApnConfig => self.apply_apn_config(),
            other => self.ignore(other),
        }
    }

    fn on_fail(&mut self, event: Event) {
        match event {
            Event::RebootModem => {
                info!("reboot requested, clearing failure counters");
                self.ctx.counters.reset();
                self.ctx.fail_cause = None;
                self.reboot();
            }
            other => self.ignore(other),
        }
    }

    /// Requests most states accept alongside their own events.
    fn on_common(&mut self, event: Event) {
        match event {
            Event::TargetStateCmd => self.target_state_cmd(),
            Event::RebootModem => self.reboot(),
            Event::FotaStart => self.fota_start(),
            other => self.ignore(other),
        }
    }

    fn ignore(&self, event: Event) {
        debug!(state = %self.ctx.state, event = ?event, "event ignored");
    }

    // ─── Context ─────────────────────────────────────────────────────────────

    fn set_state(&mut self, next: State) {
        let prev = self.ctx.state;
        if prev == next {
            return;
        }
        self.ctx.state = next;
        self.status.publish_state(next);
        debug!(from = %prev, to = %next, "state transition");
        if let Some(observer) = self.observer.as_mut() {
            observer(prev, next);
        }
    }

    fn post(&self, event: Event) {
        self.sender.post_event(event);
    }

    fn set_nfmc_retry_pending(&mut self, pending: bool) {
        self.ctx.nfmc_retry_pending = pending;
        self.status.publish_nfmc_retry_pending(pending);
    }

    fn set_polling(&mut self, active: bool, on_going: bool) {
        self.ctx.polling_active = active;
        self.ctx.polling_on_going = on_going;
        self.status.publish_polling(active, on_going);
    }

    fn active_cid(&self) -> u8 {
        self.params
            .slot(self.ctx.sim_slot_index)
            .map(|slot| slot.cid)
            .unwrap_or(1)
    }

    fn lp_wakeup_complete(&mut self) {
        #[cfg(feature = "low-power")]
        self.power.wakeup_complete();
    }

    // ─── Records ─────────────────────────────────────────────────────────────

    fn publish<R: Record>(&self, entry: Entry<R>, value: R) {
        if let Err(err) = self.cache.write(entry, value) {
            warn!(error = %err, "record update rejected");
        }
    }

    /// Read-modify-write of one record.
    fn update<R: Record>(&self, entry: Entry<R>, f: impl FnOnce(&mut R)) {
        let mut value = self.cache.read_or_default(entry);
        f(&mut value);
        self.publish(entry, value);
    }

    /// Sets the data-service state on both data records, writing only the
    /// ones whose state actually changes.
    fn set_data_service(&self, state: ServiceState, ip: Option<Ipv4Addr>) {
        let nifman = self.cache.read_or_default(self.entries.nifman_info);
        if nifman.rt_state != state {
            self.update(self.entries.nifman_info, |info| {
                info.rt_state = state;
                info.network = DataNetwork::SocketModem;
                if let Some(ip) = ip {
                    info.ip_addr = ip;
                }
            });
        }

        let data = self.cache.read_or_default(self.entries.data_info);
        if data.rt_state != state {
            self.update(self.entries.data_info, |info| {
                info.rt_state = state;
                info.network = DataNetwork::SocketModem;
                if let Some(ip) = ip {
                    info.ip_addr = ip;
                }
            });
        }
    }

    // ─── Failure handling ────────────────────────────────────────────────────

    /// Records a failure and either resets the modem or gives up.
    fn fail(&mut self, cause: FailCause) {
        let verdict = self.ctx.counters.record(cause, &self.limits);
        self.ctx.fail_cause = Some(cause);
        self.set_data_service(ServiceState::Off, None);

        match verdict {
            Verdict::Retry => {
                warn!(
                    cause = ?cause,
                    count = self.ctx.counters.count(cause),
                    global = self.ctx.counters.global,
                    "modem failure, resetting"
                );
                self.set_state(State::ModemReset);
                self.post(Event::ModemInit);
            }
            Verdict::Terminal => {
                error!(
                    cause = ?cause,
                    count = self.ctx.counters.count(cause),
                    global = self.ctx.counters.global,
                    "modem failure limit reached, giving up"
                );
                self.set_state(State::ModemFail);
                self.update(self.entries.cellular_info, |info| {
                    info.rt_state = ServiceState::Fail;
                });
                self.update(self.entries.data_info, |info| {
                    info.rt_state = ServiceState::Fail;
                });
            }
        }
    }
}

fn millis(ms: u32) -> Duration {
    Duration::from_millis(ms as u64)
}

