//! Modem idle while data is up.

use tracing::{debug, info, warn};

use super::Automaton;
use crate::facade::WakeupOrigin;
use crate::message::Event;
use crate::state::State;
use crate::timers::TimerId;

impl Automaton {
    /// Power configuration record changed.
    pub(super) fn apply_power_config(&mut self) {
        let config = self.cache.read_or_default(self.entries.power_config);
        self.power.apply(&config);
        let target = self.power.low_power_target();
        self.status.publish_low_power_target(target);
        info!(mode = ?self.power.mode(), "power configuration applied");

        if self.ctx.state == State::ModemDataReady {
            if target {
                self.arm_lp_inactivity();
            } else {
                self.timers.stop(TimerId::LpInactivity);
            }
        }
    }

    pub(super) fn arm_lp_inactivity(&self) {
        if self.power.low_power_target() {
            self.timers.start(TimerId::LpInactivity, self.power.inactivity());
        }
    }

    /// Inactivity elapsed in data mode: ask the modem to idle.
    pub(super) fn enter_idle(&mut self) {
        if !self.power.request_idle() {
            debug!(phase = ?self.power.phase(), "idle request not allowed");
            return;
        }
        match self.facade.power_idle() {
            Ok(()) => {
                info!(mode = ?self.power.mode(), "modem entering idle");
                self.set_state(State::ModemPowerDataIdle);
                let timeout = self.power.sleep_request_timeout();
                if !timeout.is_zero() {
                    self.timers.start(TimerId::SleepRequest, timeout);
                }
            }
            Err(err) => {
                warn!(error = %err, "modem idle request failed");
                self.power.wakeup_complete();
            }
        }
    }

    pub(super) fn on_power_idle(&mut self, event: Event) {
        match event {
            Event::PowerSleepComplete => {
                self.timers.stop(TimerId::SleepRequest);
                self.power.sleep_complete();
                debug!("modem idle confirmed");
            }
            Event::PowerSleepTimeout => {
                warn!("modem did not confirm idle, resuming data mode");
                self.resume_data();
            }
            Event::PowerWakeup => self.wake(WakeupOrigin::Host),
            Event::PowerModemWakeup => self.wake(WakeupOrigin::Modem),
            Event::RebootModem | Event::ModemPowerDown => {
                self.power.wakeup_complete();
                self.reboot();
            }
            Event::FotaStart => {
                self.power.wakeup_complete();
                self.fota_start();
            }
            Event::PdnStatus(pdn) => self.pdn_event(pdn),
            other => self.ignore(other),
        }
    }

    fn wake(&mut self, origin: WakeupOrigin) {
        if let Err(err) = self.facade.power_wakeup(origin) {
            warn!(origin = ?origin, error = %err, "modem wakeup failed");
        }
        info!(origin = ?origin, "modem awake");
        self.resume_data();
    }

    fn resume_data(&mut self) {
        self.timers.stop(TimerId::SleepRequest);
        self.power.wakeup_complete();
        self.set_state(State::ModemDataReady);
        self.arm_lp_inactivity();
    }
}
