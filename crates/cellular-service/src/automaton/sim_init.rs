//! SIM bring-up: slot selection, PDN definition, device identity and IMSI.

use std::thread;

use cellular_datacache::ServiceState;
use cellular_datacache::cellular::{
    ApnConfig, MAX_FIELD_LEN, MAX_SIM_SLOTS, ModemState, NfmcInfo, SimSlotConfig, SimStatus,
    TargetState,
};
use tracing::{debug, error, info, trace, warn};

use super::Automaton;
use crate::apn;
use crate::config::clip;
use crate::facade::{
    DeviceInfoField, InitMode, ModemError, ModemResult, NetUrc, NetUrcCallback, PdnCredentials,
};
use crate::failure::FailCause;
use crate::message::Event;
use crate::nfmc::NfmcContext;
use crate::sim::{self, SimOutcome};
use crate::state::State;

/// Result of probing the selected SIM.
enum SimProbe {
    Done(ModemResult<()>),
    /// The failure handler already ran.
    Aborted,
}

impl Automaton {
    /// Selects the current slot, initializes the modem for the target state
    /// and classifies the SIM.
    pub(super) fn sim_init(&mut self) {
        #[cfg(feature = "low-power")]
        self.power.reset();

        let index = self.ctx.sim_slot_index;
        let slot = self.params.slot(index).cloned().unwrap_or_default();
        if let Err(err) = self.facade.select_sim(slot.slot_type) {
            debug!(slot = index, error = %err, "SIM slot selection failed");
        }

        let probe = match self.params.target_state {
            TargetState::SimOnly => {
                SimProbe::Done(self.facade.init_modem(InitMode::SimOnly, false, &self.sim_pin))
            }
            TargetState::Full => self.init_full(&slot),
            TargetState::Off => {
                debug!("target is off, SIM left alone");
                return;
            }
        };
        let result = match probe {
            SimProbe::Done(result) => result,
            SimProbe::Aborted => return,
        };

        match sim::classify(&result) {
            SimOutcome::Ready => self.sim_ready(),
            SimOutcome::Fallback => self.sim_fallback(index, result.err()),
            SimOutcome::Locked(status) => self.sim_locked(index, status),
        }
    }

    /// SIM-only init, IMSI probe, PDN definition, then full init.
    fn init_full(&mut self, slot: &SimSlotConfig) -> SimProbe {
        let status = self.facade.init_modem(InitMode::SimOnly, false, &self.sim_pin);
        if status.is_err() {
            return SimProbe::Done(status);
        }

        let imsi = match self.facade.get_device_info(DeviceInfoField::Imsi) {
            Ok(imsi) => imsi,
            Err(ModemError::SimBusy) => String::new(),
            Err(err) => return SimProbe::Done(Err(err)),
        };

        if self.params.set_pdn_mode && !self.configure_pdn(slot, &imsi) {
            return SimProbe::Aborted;
        }

        SimProbe::Done(self.facade.init_modem(InitMode::Full, false, &self.sim_pin))
    }

    /// Defines the PDN context for `slot`. An empty slot APN is resolved
    /// from the operator table using the IMSI's MCC/MNC.
    fn configure_pdn(&mut self, slot: &SimSlotConfig, imsi: &str) -> bool {
        let resolved = if slot.apn.is_empty() {
            apn::mcc_mnc(imsi).and_then(|prefix| self.apn_table.lookup(prefix).cloned())
        } else {
            None
        };

        let (apn, credentials) = match resolved {
            Some(entry) => {
                info!(mcc_mnc = %entry.mcc_mnc, apn = %entry.apn, "APN resolved from operator table");
                self.publish(
                    self.entries.apn_config,
                    ApnConfig {
                        rt_state: ServiceState::Run,
                        apn: clip(&entry.apn, MAX_FIELD_LEN),
                        cid: slot.cid,
                        username: clip(&entry.username, MAX_FIELD_LEN),
                        password: clip(&entry.password, MAX_FIELD_LEN),
                    },
                );
                (
                    entry.apn,
                    PdnCredentials {
                        username: entry.username,
                        password: entry.password,
                    },
                )
            }
            None => (
                slot.apn.clone(),
                PdnCredentials {
                    username: slot.username.clone(),
                    password: slot.password.clone(),
                },
            ),
        };

        match self.facade.define_pdn(slot.cid, &apn, &credentials) {
            Ok(()) => true,
            Err(err) => {
                warn!(cid = slot.cid, apn = %apn, error = %err, "PDN definition failed");
                self.fail(FailCause::PdnDefineFail);
                false
            }
        }
    }

    fn sim_ready(&mut self) {
        self.subscribe_network_urcs();
        self.collect_device_info();

        if self.params.target_state == TargetState::SimOnly {
            self.update(self.entries.cellular_info, |info| {
                info.rt_state = ServiceState::On;
                info.modem_state = ModemState::SimConnected;
            });
            self.set_state(State::ModemSimOnly);
        } else {
            self.set_state(State::ModemReady);
            self.post(Event::ModemReady);
        }
    }

    /// Marks the slot failed, moves to the next one and lets the failure
    /// handler reset the modem.
    fn sim_fallback(&mut self, index: usize, err: Option<ModemError>) {
        let next = sim::next_slot_index(index, self.params.sim_slots.len());
        let next_type = self
            .params
            .slot(next)
            .map(|slot| slot.slot_type)
            .unwrap_or_default();
        self.ctx.sim_slot_index = next;
        self.update(self.entries.sim_info, |info| {
            info.rt_state = ServiceState::On;
            if let Some(status) = info.sim_status.get_mut(index) {
                *status = SimStatus::Error;
            }
            info.index_slot = next as u8;
            info.active_slot = next_type;
        });
        warn!(slot = index, next_slot = next, error = ?err, "SIM unusable, trying next slot");
        self.fail(FailCause::SimFail);
    }

    /// PIN rejected or PUK required. Nothing is retried, since each attempt
    /// brings the SIM closer to a permanent lock.
    fn sim_locked(&mut self, index: usize, status: SimStatus) {
        error!(slot = index, status = ?status, "SIM locked, automatic retries stopped");
        self.update(self.entries.sim_info, |info| {
            info.rt_state = ServiceState::On;
            if let Some(slot_status) = info.sim_status.get_mut(index) {
                *slot_status = status;
            }
        });
        self.set_data_service(ServiceState::Off, None);
        self.set_state(State::ModemSimLocked);
    }

    fn subscribe_network_urcs(&self) {
        for kind in [
            NetUrc::CsRegistration,
            NetUrc::GprsRegistration,
            NetUrc::EpsRegistration,
        ] {
            let sender = self.sender.clone();
            let callback: NetUrcCallback = Box::new(move |_| {
                sender.post_event(Event::NetworkCallback);
            });
            if let Err(err) = self.facade.subscribe_net_urc(kind, callback) {
                warn!(urc = ?kind, error = %err, "network URC subscription failed");
            }
        }

        let location: NetUrcCallback = Box::new(|kind| trace!(urc = ?kind, "location info"));
        if let Err(err) = self.facade.subscribe_net_urc(NetUrc::LocationInfo, location) {
            debug!(error = %err, "location URC subscription failed");
        }
    }

    // ─── Device identity ─────────────────────────────────────────────────────

    fn device_field(&self, field: DeviceInfoField) -> String {
        match self.facade.get_device_info(field) {
            Ok(value) => clip(&value, MAX_FIELD_LEN),
            Err(err) => {
                debug!(field = ?field, error = %err, "device info unavailable");
                String::new()
            }
        }
    }

    /// Publishes modem identity and, for a full target, the IMSI and the
    /// NFMC tempos derived from it.
    fn collect_device_info(&mut self) {
        let mut info = self.cache.read_or_default(self.entries.cellular_info);
        info.imei = self.device_field(DeviceInfoField::Imei);
        info.manufacturer = self.device_field(DeviceInfoField::Manufacturer);
        info.model = self.device_field(DeviceInfoField::Model);
        info.revision = self.device_field(DeviceInfoField::Revision);
        info.serial_number = self.device_field(DeviceInfoField::SerialNumber);
        info.iccid = self.device_field(DeviceInfoField::Iccid);
        self.publish(self.entries.cellular_info, info);

        if self.params.target_state != TargetState::Full {
            return;
        }

        let index = self.ctx.sim_slot_index.min(MAX_SIM_SLOTS - 1);
        let active_slot = self
            .params
            .slot(index)
            .map(|slot| slot.slot_type)
            .unwrap_or_default();
        let mut sim = self.cache.read_or_default(self.entries.sim_info);
        sim.rt_state = ServiceState::On;
        sim.index_slot = index as u8;
        sim.active_slot = active_slot;
        sim.sim_status[index] = SimStatus::ConnectionOnGoing;
        self.publish(self.entries.sim_info, sim.clone());

        let (status, imsi) = self.poll_imsi();
        sim.sim_status[index] = status;
        if let Some(imsi) = imsi {
            sim.imsi = clip(&imsi, MAX_FIELD_LEN);
        }
        self.publish(self.entries.sim_info, sim);
    }

    /// Reads the IMSI, polling while the SIM reports busy.
    fn poll_imsi(&mut self) -> (SimStatus, Option<String>) {
        let max = self.timing.sim_poll_max;
        for attempt in 1..=max {
            match self.facade.get_device_info(DeviceInfoField::Imsi) {
                Ok(imsi) => {
                    self.ctx.nfmc = NfmcContext::from_imsi(&self.params.nfmc, &imsi);
                    self.publish_nfmc();
                    return (SimStatus::Ok, Some(imsi));
                }
                Err(err @ (ModemError::SimBusy | ModemError::SimError)) => {
                    if attempt == max {
                        warn!(attempts = attempt, error = %err, "SIM still not ready");
                        return (sim::status_for_imsi_error(err), None);
                    }
                    trace!(attempt, "SIM busy, polling");
                    if !self.timing.sim_poll_interval.is_zero() {
                        thread::sleep(self.timing.sim_poll_interval);
                    }
                }
                Err(err) => {
                    warn!(error = %err, "IMSI read failed");
                    return (sim::status_for_imsi_error(err), None);
                }
            }
        }
        (SimStatus::Error, None)
    }

    fn publish_nfmc(&self) {
        let nfmc = &self.ctx.nfmc;
        let record = NfmcInfo {
            rt_state: if nfmc.active {
                ServiceState::On
            } else {
                ServiceState::Off
            },
            active: nfmc.active,
            tempo: nfmc.tempo,
        };
        if nfmc.active {
            debug!(tempo = ?nfmc.tempo, "NFMC tempos derived");
        }
        self.publish(self.entries.nfmc_info, record);
    }
}
