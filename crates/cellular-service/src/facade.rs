//! # Modem Facade
//!
//! Synchronous boundary between the automaton and the modem driver. Every
//! call may fail; the automaton checks each result. Asynchronous modem
//! notifications (URCs) come back through boxed callbacks registered here,
//! which must only post into the automaton's queue.

use std::net::Ipv4Addr;

use cellular_datacache::cellular::{AccessTechno, OperatorSelector, SimSlotType};
use thiserror::Error;

/// RSSI index reported when no signal is detectable.
pub const RSSI_NOT_DETECTABLE: u8 = 99;

pub type ModemResult<T> = Result<T, ModemError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ModemError {
    #[error("modem command failed")]
    Generic,
    #[error("SIM not inserted")]
    SimNotInserted,
    #[error("SIM busy")]
    SimBusy,
    #[error("SIM error")]
    SimError,
    #[error("SIM PIN or PUK locked")]
    SimPinOrPukLocked,
    #[error("SIM rejected the PIN")]
    SimIncorrectPassword,
    #[error("operation not supported by the modem")]
    Unsupported,
}

// ─── Value types ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitMode {
    Minimal,
    SimOnly,
    Full,
}

/// Registration state of one network domain (27.007 `<stat>`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NetworkRegState {
    #[default]
    Unknown,
    NotRegisteredNotSearching,
    RegisteredHome,
    NotRegisteredSearching,
    RegistrationDenied,
    RegisteredRoaming,
}

impl NetworkRegState {
    pub fn is_registered(self) -> bool {
        matches!(
            self,
            NetworkRegState::RegisteredHome | NetworkRegState::RegisteredRoaming
        )
    }
}

/// Per-domain registration plus the serving operator when known.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrationStatus {
    pub cs: NetworkRegState,
    pub gprs: NetworkRegState,
    pub eps: NetworkRegState,
    pub operator_name: Option<String>,
    pub access_techno: Option<AccessTechno>,
}

impl RegistrationStatus {
    pub fn searching() -> Self {
        Self {
            cs: NetworkRegState::NotRegisteredSearching,
            gprs: NetworkRegState::NotRegisteredSearching,
            eps: NetworkRegState::NotRegisteredSearching,
            operator_name: None,
            access_techno: None,
        }
    }

    /// Packet-switched registration, which is what data needs.
    pub fn ps_registered(&self) -> bool {
        self.eps.is_registered() || self.gprs.is_registered()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachState {
    Detached,
    Attached,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalQuality {
    pub rssi: u8,
    pub ber: u8,
}

impl SignalQuality {
    pub fn detectable(&self) -> bool {
        self.rssi != RSSI_NOT_DETECTABLE
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PdnCredentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PdnProfile {
    Default,
    Cid(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceInfoField {
    Imei,
    Imsi,
    Manufacturer,
    Model,
    Revision,
    SerialNumber,
    Iccid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PdnEvent {
    NwDetach,
    NwDeact,
    NwPdnDeact,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetUrc {
    CsRegistration,
    GprsRegistration,
    EpsRegistration,
    LocationInfo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeupOrigin {
    Host,
    Modem,
}

// ─── Modem event mask ────────────────────────────────────────────────────────

bitflags::bitflags! {
    /// Bitmask of modem lifecycle notifications.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ModemEvents: u8 {
        const BOOT = 1 << 0;
        const POWER_DOWN = 1 << 1;
        const FOTA_START = 1 << 2;
        const FOTA_END = 1 << 3;
        const LP_ENTER = 1 << 4;
        const LP_LEAVE = 1 << 5;
        const WAKEUP_REQUEST = 1 << 6;
    }
}

// ─── Callbacks ───────────────────────────────────────────────────────────────

pub type ModemEventCallback = Box<dyn Fn(ModemEvents) + Send + Sync>;
pub type NetUrcCallback = Box<dyn Fn(NetUrc) + Send + Sync>;
pub type PdnEventCallback = Box<dyn Fn(u8, PdnEvent) + Send + Sync>;

// ─── Traits ──────────────────────────────────────────────────────────────────

/// Operations the automaton needs from the modem driver.
///
/// Calls are expected to complete in bounded time; the driver owns any
/// retries against its own transport.
pub trait ModemFacade: Send + Sync {
    fn power_on(&self) -> ModemResult<()>;

    fn power_off(&self) -> ModemResult<()>;

    /// `reset` asks the modem to reboot into `mode`; `pin` unlocks the SIM.
    fn init_modem(&self, mode: InitMode, reset: bool, pin: &str) -> ModemResult<()>;

    fn select_sim(&self, slot: SimSlotType) -> ModemResult<()>;

    fn register_network(&self, selector: &OperatorSelector) -> ModemResult<RegistrationStatus>;

    fn attach_ps_domain(&self) -> ModemResult<()>;

    fn get_attach_status(&self) -> ModemResult<AttachState>;

    fn define_pdn(&self, cid: u8, apn: &str, credentials: &PdnCredentials) -> ModemResult<()>;

    fn set_default_pdn(&self, cid: u8) -> ModemResult<()>;

    fn activate_pdn(&self, profile: PdnProfile) -> ModemResult<()>;

    fn register_pdn_event_callback(&self, cid: u8, callback: PdnEventCallback)
    -> ModemResult<()>;

    fn get_signal_quality(&self) -> ModemResult<SignalQuality>;

    fn get_net_status(&self) -> ModemResult<RegistrationStatus>;

    fn get_device_info(&self, field: DeviceInfoField) -> ModemResult<String>;

    fn subscribe_modem_event(
        &self,
        events: ModemEvents,
        callback: ModemEventCallback,
    ) -> ModemResult<()>;

    fn subscribe_net_urc(&self, kind: NetUrc, callback: NetUrcCallback) -> ModemResult<()>;

    fn get_dev_ip_address(&self, cid: u8) -> ModemResult<Ipv4Addr>;

    /// Lets the modem enter its low-power idle mode.
    fn power_idle(&self) -> ModemResult<()> {
        Ok(())
    }

    /// Brings the modem out of low-power idle.
    fn power_wakeup(&self, _origin: WakeupOrigin) -> ModemResult<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartCause {
    FotaComplete,
    FotaTimeout,
}

/// Platform services outside the modem.
pub trait PlatformHooks: Send + Sync {
    /// Restarts the host. On real hardware this does not return.
    fn restart(&self, cause: RestartCause);
}
