//! Registration, signal quality, attach and PDN activation.

use std::net::Ipv4Addr;

use cellular_datacache::ServiceState;
use cellular_datacache::cellular::{MAX_OPERATOR_NAME_LEN, ModemState, rssi_to_dbm};
use tracing::{debug, info, trace, warn};

use super::{Automaton, millis};
use crate::config::clip;
use crate::facade::{
    AttachState, NetworkRegState, PdnEvent, PdnEventCallback, PdnProfile, RegistrationStatus,
};
use crate::failure::FailCause;
use crate::message::Event;
use crate::state::State;
use crate::timers::TimerId;

/// Outcome of one network-status read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum NetworkStatus {
    /// Packet-switched registration is up.
    Registered,
    NotRegistered,
    /// The modem does not know yet.
    Unknown,
    Error,
}

impl Automaton {
    // ─── Registration ────────────────────────────────────────────────────────

    pub(super) fn register_network(&mut self) {
        match self.facade.register_network(&self.params.operator) {
            Ok(registration) => {
                self.ctx.registration = registration;
                if let Err(err) = self.facade.attach_ps_domain() {
                    debug!(error = %err, "PS attach request failed, waiting for network");
                }
                self.set_state(State::WaitingSignalQualityOk);
                self.post(Event::SignalQualityToCheck);
            }
            Err(err) => {
                warn!(error = %err, "network registration request failed");
                self.ctx.registration = RegistrationStatus::searching();
                self.fail(FailCause::RegisterFail);
            }
        }
    }

    pub(super) fn read_network_status(&mut self) -> NetworkStatus {
        match self.facade.get_net_status() {
            Ok(registration) => {
                let status = if registration.ps_registered() {
                    NetworkStatus::Registered
                } else if registration.cs == NetworkRegState::Unknown {
                    NetworkStatus::Unknown
                } else {
                    NetworkStatus::NotRegistered
                };
                if status == NetworkStatus::Registered {
                    self.publish_operator(&registration);
                }
                self.ctx.registration = registration;
                status
            }
            Err(err) => {
                debug!(error = %err, "network status read failed");
                self.ctx.registration = RegistrationStatus::searching();
                NetworkStatus::Error
            }
        }
    }

    fn publish_operator(&self, registration: &RegistrationStatus) {
        let Some(name) = registration.operator_name.as_deref() else {
            return;
        };
        let access_techno = registration.access_techno;
        self.update(self.entries.cellular_info, |info| {
            info.rt_state = ServiceState::On;
            info.mno_name = clip(name, MAX_OPERATOR_NAME_LEN);
            if let Some(act) = access_techno {
                info.access_techno = act;
            }
        });
    }

    // ─── Signal quality ──────────────────────────────────────────────────────

    /// Reads and publishes signal quality. True when a signal is detectable.
    /// Enough consecutive read failures run the failure handler.
    pub(super) fn refresh_signal_quality(&mut self) -> bool {
        match self.facade.get_signal_quality() {
            Ok(quality) => {
                self.ctx.csq_fail_count = 0;
                if self.ctx.signal != Some(quality) {
                    self.ctx.signal = Some(quality);
                    let (level, db) = if quality.detectable() {
                        (quality.rssi, rssi_to_dbm(quality.rssi))
                    } else {
                        (0, 0)
                    };
                    trace!(rssi = quality.rssi, ber = quality.ber, dbm = db, "signal quality");
                    self.update(self.entries.cellular_info, |info| {
                        info.signal_level = level;
                        info.signal_level_db = db;
                    });
                }
                quality.detectable()
            }
            Err(err) => {
                self.ctx.csq_fail_count += 1;
                debug!(
                    error = %err,
                    failures = self.ctx.csq_fail_count,
                    "signal quality read failed"
                );
                if self.ctx.csq_fail_count >= self.timing.csq_fail_threshold {
                    self.ctx.csq_fail_count = 0;
                    self.fail(FailCause::CsqFail);
                }
                false
            }
        }
    }

    /// `WaitingSignalQualityOk`: move on once a signal is detectable.
    pub(super) fn signal_gate(&mut self) {
        if self.refresh_signal_quality() {
            self.timers.start(
                TimerId::NwRegTimeout,
                millis(self.params.attachment_timeout_ms),
            );
            self.set_state(State::WaitingNetworkStatus);
            self.post(Event::NetworkStatusToCheck);
        }
    }

    /// Periodic refresh while data is up.
    pub(super) fn poll_signal(&mut self) {
        if !self.ctx.polling_active || self.ctx.polling_on_going {
            return;
        }
        self.set_polling(true, true);
        self.refresh_signal_quality();
        self.set_polling(self.ctx.polling_active, false);
    }

    // ─── Network status ──────────────────────────────────────────────────────

    /// `WaitingNetworkStatus`: wait for PS registration while the signal
    /// holds.
    pub(super) fn network_status_check(&mut self) {
        match self.read_network_status() {
            NetworkStatus::Registered => {
                self.timers.stop(TimerId::NwRegTimeout);
                self.ctx.register_retry.reset();
                self.set_state(State::NetworkStatusOk);
                self.post(Event::NetworkStatusOk);
            }
            NetworkStatus::NotRegistered => {
                let detected = self.refresh_signal_quality();
                if self.ctx.state != State::WaitingNetworkStatus || detected {
                    return;
                }
                self.timers.stop(TimerId::NwRegTimeout);
                self.ctx.register_retry.reset();
                self.set_state(State::WaitingSignalQualityOk);
                self.post(Event::SignalQualityToCheck);
            }
            NetworkStatus::Unknown => trace!("network status unknown"),
            NetworkStatus::Error => self.fail(FailCause::NetworkFail),
        }
    }

    /// Registration URC outside data mode.
    pub(super) fn network_event(&mut self) {
        match self.read_network_status() {
            NetworkStatus::Registered => {
                self.set_state(State::NetworkStatusOk);
                self.post(Event::NetworkStatusOk);
            }
            NetworkStatus::NotRegistered => {
                self.set_data_service(ServiceState::Off, None);
                self.set_state(State::WaitingNetworkStatus);
                self.lp_wakeup_complete();
            }
            NetworkStatus::Unknown => {}
            NetworkStatus::Error => {
                self.set_data_service(ServiceState::Off, None);
                self.fail(FailCause::NetworkFail);
            }
        }
    }

    /// Registration URC in data mode: only a lost registration matters.
    pub(super) fn data_ready_network_event(&mut self) {
        match self.read_network_status() {
            NetworkStatus::Registered | NetworkStatus::Unknown => {}
            NetworkStatus::NotRegistered => {
                info!("network registration lost");
                self.set_data_service(ServiceState::Off, None);
                self.set_state(State::WaitingNetworkStatus);
            }
            NetworkStatus::Error => {
                self.set_data_service(ServiceState::Off, None);
                self.fail(FailCause::NetworkFail);
            }
        }
    }

    /// Registration did not complete in time. With NFMC the modem is powered
    /// down and retried after the next tempo.
    pub(super) fn nw_reg_timeout(&mut self) {
        if !self.ctx.nfmc.active {
            warn!(
                timeout_ms = self.params.attachment_timeout_ms,
                "network registration timed out, NFMC inactive: no automatic retry"
            );
            return;
        }
        self.set_nfmc_retry_pending(true);
        if let Err(err) = self.facade.power_off() {
            warn!(error = %err, "modem power off failed before NFMC backoff");
        }
        let slot = self.ctx.register_retry.advance();
        let delay = self.ctx.nfmc.tempo_at(slot);
        info!(slot = slot.index(), delay_ms = delay, "registration timed out, NFMC backoff");
        self.timers.start(TimerId::RegisterRetry, millis(delay));
    }

    pub(super) fn register_retry_expired(&mut self) {
        info!("NFMC backoff elapsed, restarting modem");
        self.set_nfmc_retry_pending(false);
        self.set_state(State::ModemInit);
        self.post(Event::ModemInit);
    }

    // ─── Attach and PDN ──────────────────────────────────────────────────────

    pub(super) fn attach(&mut self) {
        match self.facade.get_net_status() {
            Ok(registration) => {
                self.publish_operator(&registration);
                self.ctx.registration = registration;
            }
            Err(err) => debug!(error = %err, "network status read failed before attach"),
        }

        match self.facade.get_attach_status() {
            Ok(AttachState::Attached) => {
                self.set_state(State::ModemRegistered);
                self.post(Event::ModemAttached);
            }
            Ok(AttachState::Detached) => {
                debug!("PS domain not attached yet");
                self.set_state(State::WaitingSignalQualityOk);
            }
            Err(err) => {
                warn!(error = %err, "attach status read failed");
                self.fail(FailCause::AttachFail);
            }
        }
    }

    pub(super) fn activate_pdn(&mut self) {
        self.set_state(State::ModemPdnActivating);
        let cid = self.active_cid();

        if let Err(err) = self.facade.set_default_pdn(cid) {
            debug!(cid, error = %err, "set default PDN failed");
        }
        let sender = self.sender.clone();
        let callback: PdnEventCallback = Box::new(move |_cid, pdn| {
            sender.post_event(Event::PdnStatus(pdn));
        });
        if let Err(err) = self.facade.register_pdn_event_callback(cid, callback) {
            debug!(cid, error = %err, "PDN event registration failed");
        }

        match self.facade.activate_pdn(PdnProfile::Default) {
            Ok(()) => {
                self.ctx.pdn_retry.reset();
                self.post(Event::PdpActivated);
            }
            Err(err) => {
                let slot = self.ctx.pdn_retry.advance();
                let delay = if self.ctx.nfmc.active {
                    millis(self.ctx.nfmc.tempo_at(slot))
                } else {
                    self.timing.pdn_retry_delay
                };
                warn!(
                    cid,
                    error = %err,
                    retry_ms = delay.as_millis() as u64,
                    "PDN activation failed, retrying"
                );
                self.timers.start(TimerId::PdnActivateRetry, delay);
            }
        }
    }

    pub(super) fn data_ready(&mut self) {
        self.ctx.counters.reset();
        self.ctx.csq_fail_count = 0;
        self.set_state(State::ModemDataReady);
        self.update(self.entries.cellular_info, |info| {
            info.modem_state = ModemState::DataOk;
        });

        let cid = self.active_cid();
        let ip = match self.facade.get_dev_ip_address(cid) {
            Ok(ip) => ip,
            Err(err) => {
                warn!(cid, error = %err, "device IP address unavailable");
                Ipv4Addr::UNSPECIFIED
            }
        };
        self.set_data_service(ServiceState::On, Some(ip));
        info!(cid, ip = %ip, "data ready");

        #[cfg(feature = "low-power")]
        self.arm_lp_inactivity();
    }

    /// The data path reported a failure; wait for signal and network again.
    pub(super) fn data_fail(&mut self) {
        warn!("data path failure reported");
        self.set_data_service(ServiceState::Off, None);
        self.set_state(State::WaitingSignalQualityOk);
    }

    pub(super) fn pdn_event(&mut self, pdn: PdnEvent) {
        info!(event = ?pdn, "PDN status event");
        self.set_data_service(ServiceState::Off, None);
        self.lp_wakeup_complete();
        match pdn {
            PdnEvent::NwDetach => {
                self.set_state(State::WaitingNetworkStatus);
                self.post(Event::NetworkStatusToCheck);
            }
            PdnEvent::NwDeact | PdnEvent::NwPdnDeact => {
                self.set_state(State::ModemRegistered);
                self.post(Event::ModemAttached);
            }
            PdnEvent::Other => {
                self.set_state(State::WaitingNetworkStatus);
                self.post(Event::NetworkCallback);
            }
        }
    }
}
