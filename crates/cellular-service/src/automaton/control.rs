//! Power, reboot, target-state, firmware-update and APN handling.

use cellular_datacache::ServiceState;
use cellular_datacache::cellular::{CellularConfig, ModemState, TargetState};
use tracing::{error, info, warn};

use super::Automaton;
use crate::facade::{InitMode, ModemEventCallback, ModemEvents, RestartCause};
use crate::failure::FailCause;
use crate::message::{Event, modem_event};
use crate::state::State;
use crate::timers::TimerId;

impl Automaton {
    // ─── Power ───────────────────────────────────────────────────────────────

    /// `ModemInit` in `ModemInit`: power on and bring the SIM up, unless the
    /// target is off or an NFMC backoff keeps the modem down.
    pub(super) fn init_modem(&mut self) {
        if self.params.target_state == TargetState::Off {
            self.set_state(State::ModemOff);
            self.mark_modem_off();
            return;
        }
        if self.ctx.nfmc_retry_pending {
            info!("NFMC backoff pending, modem stays off");
            return;
        }
        if !self.power_on() {
            return;
        }
        self.sim_init();
    }

    /// Powers the modem on. On failure the failure handler has already run.
    fn power_on(&mut self) -> bool {
        match self.facade.power_on() {
            Ok(()) => {
                self.update(self.entries.cellular_info, |info| {
                    info.rt_state = ServiceState::Run;
                    info.modem_state = ModemState::PoweredOn;
                });
                self.subscribe_modem_events();
                true
            }
            Err(err) => {
                warn!(error = %err, "modem power on failed");
                self.fail(FailCause::PowerOnFail);
                false
            }
        }
    }

    pub(super) fn power_on_only(&mut self) {
        match self.facade.power_on() {
            Ok(()) => self.update(self.entries.cellular_info, |info| {
                info.rt_state = ServiceState::Run;
                info.modem_state = ModemState::PoweredOn;
            }),
            Err(err) => warn!(error = %err, "modem power on failed"),
        }
        self.set_state(State::ModemPowerOnOnly);
    }

    /// Registers the lifecycle callback once; it outlives power cycles.
    fn subscribe_modem_events(&mut self) {
        if self.ctx.modem_events_subscribed {
            return;
        }
        let sender = self.sender.clone();
        let callback: ModemEventCallback = Box::new(move |events| {
            for flag in events.iter() {
                if let Some(event) = modem_event(flag) {
                    sender.post_event(event);
                }
            }
        });
        match self.facade.subscribe_modem_event(ModemEvents::all(), callback) {
            Ok(()) => self.ctx.modem_events_subscribed = true,
            Err(err) => warn!(error = %err, "modem event subscription failed"),
        }
    }

    pub(super) fn mark_modem_off(&self) {
        self.update(self.entries.cellular_info, |info| {
            info.modem_state = ModemState::Off;
        });
    }

    /// Powers off and restarts from init. A reboot during init is a no-op.
    pub(super) fn reboot(&mut self) {
        if self.ctx.state == State::ModemInit {
            return;
        }
        info!(state = %self.ctx.state, "modem reboot");
        if let Err(err) = self.facade.power_off() {
            warn!(error = %err, "modem power off failed during reboot");
        }
        self.set_state(State::ModemInit);
        self.set_data_service(ServiceState::Off, None);
        self.update(self.entries.cellular_info, |info| {
            info.rt_state = ServiceState::Off;
            info.modem_state = ModemState::Off;
        });
        self.post(Event::ModemInit);
    }

    /// Any event in `ModemReset`: power off, then start over.
    pub(super) fn reset_modem(&mut self) {
        match self.facade.power_off() {
            Ok(()) => {
                self.set_data_service(ServiceState::Off, None);
                self.update(self.entries.cellular_info, |info| {
                    info.rt_state = ServiceState::Off;
                    info.modem_state = ModemState::Off;
                });
                self.set_state(State::ModemInit);
                self.post(Event::ModemInit);
            }
            Err(err) => {
                warn!(error = %err, "modem reset failed");
                self.fail(FailCause::ResetFail);
            }
        }
    }

    // ─── Target state ────────────────────────────────────────────────────────

    pub(super) fn target_state_cmd(&mut self) {
        match self.params.target_state {
            TargetState::SimOnly => {
                if let Err(err) = self.facade.init_modem(InitMode::SimOnly, false, &self.sim_pin) {
                    warn!(error = %err, "SIM-only init failed");
                }
                self.update(self.entries.cellular_info, |info| {
                    info.modem_state = ModemState::SimConnected;
                });
                self.set_state(State::ModemSimOnly);
            }
            TargetState::Off => self.switch_off(),
            TargetState::Full => {}
        }
    }

    fn switch_off(&mut self) {
        self.update(self.entries.sim_info, |info| {
            info.rt_state = ServiceState::Off;
        });
        if let Err(err) = self.facade.init_modem(InitMode::Minimal, false, &self.sim_pin) {
            warn!(error = %err, "minimal init failed");
        }
        if let Err(err) = self.facade.power_off() {
            warn!(error = %err, "modem power off failed");
        }
        self.set_state(State::ModemOff);
        self.post(Event::ModemInit);
    }

    /// Target change while data is up; data goes down unless the target
    /// stays full.
    pub(super) fn data_mode_target_state(&mut self) {
        if self.params.target_state != TargetState::Full {
            self.set_data_service(ServiceState::Off, None);
            self.target_state_cmd();
        }
    }

    pub(super) fn off_target_cmd(&mut self) {
        if self.params.target_state == TargetState::Off || self.ctx.nfmc_retry_pending {
            return;
        }
        if !self.power_on() {
            return;
        }
        self.sim_init();
    }

    pub(super) fn sim_only_target_cmd(&mut self) {
        match self.params.target_state {
            TargetState::Full => self.sim_init(),
            TargetState::Off => self.switch_off(),
            TargetState::SimOnly => {}
        }
    }

    // ─── Firmware update ─────────────────────────────────────────────────────

    pub(super) fn fota_start(&mut self) {
        info!("modem firmware update started");
        self.update(self.entries.data_info, |info| {
            info.rt_state = ServiceState::ShuttingDown;
        });
        self.set_state(State::ModemReprogramming);
        self.timers.start(TimerId::FotaTimeout, self.timing.fota_timeout);
    }

    pub(super) fn fota_end(&mut self) {
        self.timers.stop(TimerId::FotaTimeout);
        error!("modem firmware update complete, restarting platform");
        self.platform.restart(RestartCause::FotaComplete);
    }

    pub(super) fn fota_timeout(&mut self) {
        self.ctx.fail_cause = Some(FailCause::FotaTimeout);
        error!(
            timeout_ms = self.timing.fota_timeout.as_millis() as u64,
            "modem firmware update timed out, restarting platform"
        );
        self.platform.restart(RestartCause::FotaTimeout);
    }

    // ─── APN reconfiguration ─────────────────────────────────────────────────

    /// Copies the requested APN into the active slot and resets the modem so
    /// the new context is defined on the next init.
    pub(super) fn apply_apn_config(&mut self) {
        let request = self.cache.read_or_default(self.entries.apn_config);
        let index = self.ctx.sim_slot_index;
        if let Some(slot) = self.params.sim_slots.get_mut(index) {
            slot.apn = request.apn.clone();
            slot.cid = request.cid.clamp(1, 9);
            slot.username = request.username;
            slot.password = request.password;
        }
        self.publish(
            self.entries.cellular_config,
            CellularConfig {
                rt_state: ServiceState::On,
                params: self.params.clone(),
            },
        );
        info!(slot = index, apn = %request.apn, "APN reconfigured, resetting modem");
        self.set_state(State::ModemReset);
        self.post(Event::ModemReset);
    }
}
