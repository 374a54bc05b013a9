//! Scriptable modem.
//!
//! Every facade operation answers from a [`Responses`] queue: queued results
//! are consumed first, then the fallback repeats forever. The default
//! script is a healthy modem on a registered LTE network.

use std::collections::VecDeque;
use std::net::Ipv4Addr;
use std::sync::{Mutex, MutexGuard};

use cellular_datacache::cellular::{AccessTechno, OperatorSelector, SimSlotType};
use cellular_service::facade::{
    AttachState, DeviceInfoField, InitMode, ModemError, ModemEventCallback, ModemEvents,
    ModemFacade, ModemResult, NetUrc, NetUrcCallback, NetworkRegState, PdnCredentials, PdnEvent,
    PdnEventCallback, PdnProfile, RegistrationStatus, SignalQuality, WakeupOrigin,
};

/// Scripted results for one operation.
#[derive(Debug, Clone)]
pub struct Responses<T> {
    queue: VecDeque<ModemResult<T>>,
    fallback: ModemResult<T>,
}

impl<T: Clone> Responses<T> {
    pub fn always(result: ModemResult<T>) -> Self {
        Self {
            queue: VecDeque::new(),
            fallback: result,
        }
    }

    pub fn ok(value: T) -> Self {
        Self::always(Ok(value))
    }

    /// Queues a one-time result ahead of the fallback.
    pub fn then(&mut self, result: ModemResult<T>) -> &mut Self {
        self.queue.push_back(result);
        self
    }

    /// Queues the same result `n` times.
    pub fn times(&mut self, n: usize, result: ModemResult<T>) -> &mut Self {
        for _ in 0..n {
            self.queue.push_back(result.clone());
        }
        self
    }

    pub fn set_fallback(&mut self, result: ModemResult<T>) -> &mut Self {
        self.fallback = result;
        self
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    fn next(&mut self) -> ModemResult<T> {
        self.queue
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub imei: String,
    pub manufacturer: String,
    pub model: String,
    pub revision: String,
    pub serial_number: String,
    pub iccid: String,
}

impl Default for DeviceIdentity {
    fn default() -> Self {
        Self {
            imei: "352656100000001".into(),
            manufacturer: "SimModem".into(),
            model: "SM-LTE1".into(),
            revision: "1.0.0".into(),
            serial_number: "SM0000001".into(),
            iccid: "8933150319000000001".into(),
        }
    }
}

/// Registered on EPS with a known operator.
pub fn registered_home(operator: &str) -> RegistrationStatus {
    RegistrationStatus {
        cs: NetworkRegState::RegisteredHome,
        gprs: NetworkRegState::RegisteredHome,
        eps: NetworkRegState::RegisteredHome,
        operator_name: Some(operator.to_string()),
        access_techno: Some(AccessTechno::EUtran),
    }
}

pub fn searching() -> RegistrationStatus {
    RegistrationStatus::searching()
}

pub fn signal(rssi: u8) -> SignalQuality {
    SignalQuality { rssi, ber: 0 }
}

#[derive(Debug, Clone)]
pub struct ModemScript {
    pub power_on: Responses<()>,
    pub power_off: Responses<()>,
    pub init_modem: Responses<()>,
    pub select_sim: Responses<()>,
    pub register_network: Responses<RegistrationStatus>,
    pub attach_ps_domain: Responses<()>,
    pub attach_status: Responses<AttachState>,
    pub define_pdn: Responses<()>,
    pub activate_pdn: Responses<()>,
    pub signal_quality: Responses<SignalQuality>,
    pub net_status: Responses<RegistrationStatus>,
    pub imsi: Responses<String>,
    pub ip_address: Responses<Ipv4Addr>,
    pub power_idle: Responses<()>,
    pub power_wakeup: Responses<()>,
    pub identity: DeviceIdentity,
}

impl Default for ModemScript {
    fn default() -> Self {
        Self {
            power_on: Responses::ok(()),
            power_off: Responses::ok(()),
            init_modem: Responses::ok(()),
            select_sim: Responses::ok(()),
            register_network: Responses::ok(searching()),
            attach_ps_domain: Responses::ok(()),
            attach_status: Responses::ok(AttachState::Attached),
            define_pdn: Responses::ok(()),
            activate_pdn: Responses::ok(()),
            signal_quality: Responses::ok(signal(20)),
            net_status: Responses::ok(registered_home("SimTel")),
            imsi: Responses::ok("208101234567890".into()),
            ip_address: Responses::ok(Ipv4Addr::new(10, 64, 0, 2)),
            power_idle: Responses::ok(()),
            power_wakeup: Responses::ok(()),
            identity: DeviceIdentity::default(),
        }
    }
}

/// One facade call, as observed by the modem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    PowerOn,
    PowerOff,
    InitModem(InitMode),
    SelectSim(SimSlotType),
    RegisterNetwork,
    AttachPsDomain,
    GetAttachStatus,
    DefinePdn { cid: u8, apn: String },
    SetDefaultPdn(u8),
    ActivatePdn,
    GetSignalQuality,
    GetNetStatus,
    GetDeviceInfo(DeviceInfoField),
    GetDevIpAddress(u8),
    PowerIdle,
    PowerWakeup(WakeupOrigin),
    SubscribeModemEvent,
}

#[derive(Default)]
struct Callbacks {
    modem: Option<(ModemEvents, ModemEventCallback)>,
    net: Vec<(NetUrc, NetUrcCallback)>,
    pdn: Vec<(u8, PdnEventCallback)>,
}

struct Inner {
    script: ModemScript,
    calls: Vec<Call>,
    powered: bool,
}

pub struct SimModem {
    inner: Mutex<Inner>,
    callbacks: Mutex<Callbacks>,
}

impl SimModem {
    pub fn new(script: ModemScript) -> Self {
        Self {
            inner: Mutex::new(Inner {
                script,
                calls: Vec::new(),
                powered: false,
            }),
            callbacks: Mutex::new(Callbacks::default()),
        }
    }

    pub fn healthy() -> Self {
        Self::new(ModemScript::default())
    }

    /// Edits the script in place.
    pub fn script<R>(&self, f: impl FnOnce(&mut ModemScript) -> R) -> R {
        f(&mut self.lock().script)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub fn count(&self, call: &Call) -> usize {
        self.lock().calls.iter().filter(|c| *c == call).count()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    pub fn is_powered(&self) -> bool {
        self.lock().powered
    }

    // ─── Unsolicited notifications ───────────────────────────────────────────

    /// Delivers modem lifecycle flags the subscriber asked for.
    pub fn emit_modem_event(&self, events: ModemEvents) -> bool {
        let callbacks = self.callbacks();
        match &callbacks.modem {
            Some((mask, callback)) => {
                let wanted = ModemEvents::from_bits_truncate(events.bits() & mask.bits());
                if !wanted.is_empty() {
                    callback(wanted);
                }
                !wanted.is_empty()
            }
            None => false,
        }
    }

    pub fn emit_net_urc(&self, kind: NetUrc) -> bool {
        let callbacks = self.callbacks();
        let mut delivered = false;
        for (k, callback) in &callbacks.net {
            if *k == kind {
                callback(kind);
                delivered = true;
            }
        }
        delivered
    }

    pub fn emit_pdn_event(&self, cid: u8, event: PdnEvent) -> bool {
        let callbacks = self.callbacks();
        let mut delivered = false;
        for (c, callback) in &callbacks.pdn {
            if *c == cid {
                callback(cid, event);
                delivered = true;
            }
        }
        delivered
    }

    fn record<T: Clone>(
        &self,
        call: Call,
        pick: impl FnOnce(&mut ModemScript) -> &mut Responses<T>,
    ) -> ModemResult<T> {
        let mut inner = self.lock();
        inner.calls.push(call);
        pick(&mut inner.script).next()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn callbacks(&self) -> MutexGuard<'_, Callbacks> {
        self.callbacks.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ModemFacade for SimModem {
    fn power_on(&self) -> ModemResult<()> {
        let result = self.record(Call::PowerOn, |s| &mut s.power_on);
        if result.is_ok() {
            self.lock().powered = true;
        }
        result
    }

    fn power_off(&self) -> ModemResult<()> {
        let result = self.record(Call::PowerOff, |s| &mut s.power_off);
        if result.is_ok() {
            self.lock().powered = false;
        }
        result
    }

    fn init_modem(&self, mode: InitMode, _reset: bool, _pin: &str) -> ModemResult<()> {
        self.record(Call::InitModem(mode), |s| &mut s.init_modem)
    }

    fn select_sim(&self, slot: SimSlotType) -> ModemResult<()> {
        self.record(Call::SelectSim(slot), |s| &mut s.select_sim)
    }

    fn register_network(&self, _selector: &OperatorSelector) -> ModemResult<RegistrationStatus> {
        self.record(Call::RegisterNetwork, |s| &mut s.register_network)
    }

    fn attach_ps_domain(&self) -> ModemResult<()> {
        self.record(Call::AttachPsDomain, |s| &mut s.attach_ps_domain)
    }

    fn get_attach_status(&self) -> ModemResult<AttachState> {
        self.record(Call::GetAttachStatus, |s| &mut s.attach_status)
    }

    fn define_pdn(&self, cid: u8, apn: &str, _credentials: &PdnCredentials) -> ModemResult<()> {
        let call = Call::DefinePdn {
            cid,
            apn: apn.to_string(),
        };
        self.record(call, |s| &mut s.define_pdn)
    }

    fn set_default_pdn(&self, cid: u8) -> ModemResult<()> {
        self.lock().calls.push(Call::SetDefaultPdn(cid));
        Ok(())
    }

    fn activate_pdn(&self, _profile: PdnProfile) -> ModemResult<()> {
        self.record(Call::ActivatePdn, |s| &mut s.activate_pdn)
    }

    fn register_pdn_event_callback(&self, cid: u8, callback: PdnEventCallback) -> ModemResult<()> {
        let mut callbacks = self.callbacks();
        callbacks.pdn.retain(|(c, _)| *c != cid);
        callbacks.pdn.push((cid, callback));
        Ok(())
    }

    fn get_signal_quality(&self) -> ModemResult<SignalQuality> {
        self.record(Call::GetSignalQuality, |s| &mut s.signal_quality)
    }

    fn get_net_status(&self) -> ModemResult<RegistrationStatus> {
        self.record(Call::GetNetStatus, |s| &mut s.net_status)
    }

    fn get_device_info(&self, field: DeviceInfoField) -> ModemResult<String> {
        if field == DeviceInfoField::Imsi {
            return self.record(Call::GetDeviceInfo(field), |s| &mut s.imsi);
        }
        let mut inner = self.lock();
        inner.calls.push(Call::GetDeviceInfo(field));
        let id = &inner.script.identity;
        let value = match field {
            DeviceInfoField::Imei => &id.imei,
            DeviceInfoField::Manufacturer => &id.manufacturer,
            DeviceInfoField::Model => &id.model,
            DeviceInfoField::Revision => &id.revision,
            DeviceInfoField::SerialNumber => &id.serial_number,
            DeviceInfoField::Iccid => &id.iccid,
            DeviceInfoField::Imsi => return Err(ModemError::Generic),
        };
        Ok(value.clone())
    }

    fn subscribe_modem_event(
        &self,
        events: ModemEvents,
        callback: ModemEventCallback,
    ) -> ModemResult<()> {
        self.lock().calls.push(Call::SubscribeModemEvent);
        self.callbacks().modem = Some((events, callback));
        Ok(())
    }

    fn subscribe_net_urc(&self, kind: NetUrc, callback: NetUrcCallback) -> ModemResult<()> {
        let mut callbacks = self.callbacks();
        callbacks.net.retain(|(k, _)| *k != kind);
        callbacks.net.push((kind, callback));
        Ok(())
    }

    fn get_dev_ip_address(&self, cid: u8) -> ModemResult<Ipv4Addr> {
        self.record(Call::GetDevIpAddress(cid), |s| &mut s.ip_address)
    }

    fn power_idle(&self) -> ModemResult<()> {
        self.record(Call::PowerIdle, |s| &mut s.power_idle)
    }

    fn power_wakeup(&self, origin: WakeupOrigin) -> ModemResult<()> {
        self.record(Call::PowerWakeup(origin), |s| &mut s.power_wakeup)
    }
}
