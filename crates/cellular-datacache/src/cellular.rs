//! Records published by the cellular connection manager.
//!
//! The automaton is the only producer of [`CellularInfo`], [`SimInfo`],
//! [`DataInfo`], [`NifmanInfo`] and [`NfmcInfo`]. The application produces
//! [`ApnConfig`], [`TargetStateRequest`] and [`PowerConfig`] to request
//! changes. [`CellularConfig`] mirrors the active [`CellularParams`].

use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::store::{DataCache, DataCacheError, Entry, Record, ServiceState, check_len};

/// Capacity of every identity/credential string field.
pub const MAX_FIELD_LEN: usize = 32;
/// Capacity of the operator name.
pub const MAX_OPERATOR_NAME_LEN: usize = 64;
/// Number of SIM slots a device can describe.
pub const MAX_SIM_SLOTS: usize = 3;
/// Number of NFMC backoff tempo values.
pub const NFMC_TEMPO_COUNT: usize = 7;

macro_rules! impl_record {
    ($ty:ty) => {
        impl_record!($ty, |_r| Ok(()));
    };
    ($ty:ty, |$r:ident| $check:expr) => {
        impl Record for $ty {
            fn rt_state(&self) -> ServiceState {
                self.rt_state
            }

            fn set_rt_state(&mut self, state: ServiceState) {
                self.rt_state = state;
            }

            fn check(&self) -> Result<(), DataCacheError> {
                let $r = self;
                $check
            }
        }
    };
}

// ─── Shared enums ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModemState {
    #[default]
    Off,
    PoweredOn,
    SimConnected,
    DataOk,
}

/// Radio access technology, numbered as in 3GPP TS 27.007 `<AcT>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessTechno {
    Gsm = 0,
    GsmCompact = 1,
    Utran = 2,
    GsmEdge = 3,
    UtranHsdpa = 4,
    UtranHsupa = 5,
    UtranHsdpaHsupa = 6,
    #[default]
    EUtran = 7,
    EcGsmIot = 8,
    EUtranNbS1 = 9,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimSlotType {
    #[default]
    ModemSocket,
    ModemEmbeddedSim,
    HostEmbeddedSim,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimStatus {
    Ok,
    NotImplemented,
    Busy,
    NotInserted,
    PinOrPukLocked,
    IncorrectPassword,
    Error,
    #[default]
    NotUsed,
    ConnectionOnGoing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataNetwork {
    #[default]
    Unavailable,
    SocketModem,
    SocketsLwip,
}

/// Connectivity level the application asks the modem to reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TargetState {
    Off,
    SimOnly,
    #[default]
    Full,
}

impl std::str::FromStr for TargetState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" => Ok(TargetState::Off),
            "sim-only" | "sim_only" | "simonly" => Ok(TargetState::SimOnly),
            "full" => Ok(TargetState::Full),
            other => Err(format!("unknown target state `{other}`")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationMode {
    #[default]
    Auto,
    Manual,
    Deregister,
    ManualThenAuto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatorNameFormat {
    Long,
    Short,
    Numeric,
    #[default]
    NotPresent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerMode {
    #[default]
    NoLowPower,
    Idle,
    IdleLowPower,
}

// ─── Configuration ───────────────────────────────────────────────────────────

/// One SIM slot as configured by the application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimSlotConfig {
    pub slot_type: SimSlotType,
    pub apn: String,
    pub cid: u8,
    pub username: String,
    pub password: String,
}

impl Default for SimSlotConfig {
    fn default() -> Self {
        Self {
            slot_type: SimSlotType::ModemSocket,
            apn: String::new(),
            cid: 1,
            username: String::new(),
            password: String::new(),
        }
    }
}

impl SimSlotConfig {
    fn check(&self) -> Result<(), DataCacheError> {
        check_len("sim_slot.apn", &self.apn, MAX_FIELD_LEN)?;
        check_len("sim_slot.username", &self.username, MAX_FIELD_LEN)?;
        check_len("sim_slot.password", &self.password, MAX_FIELD_LEN)
    }
}

/// Network selection policy handed to the modem on registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorSelector {
    pub mode: RegistrationMode,
    pub name_format: OperatorNameFormat,
    pub name: String,
    pub access_techno_present: bool,
    pub access_techno: AccessTechno,
}

impl Default for OperatorSelector {
    fn default() -> Self {
        Self {
            mode: RegistrationMode::Auto,
            name_format: OperatorNameFormat::NotPresent,
            name: "00101".to_string(),
            access_techno_present: false,
            access_techno: AccessTechno::EUtran,
        }
    }
}

/// NFMC activation plus the 7 base tempo values in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NfmcParams {
    pub active: bool,
    pub base_tempo_ms: [u32; NFMC_TEMPO_COUNT],
}

impl Default for NfmcParams {
    fn default() -> Self {
        Self {
            active: false,
            base_tempo_ms: [60_000, 120_000, 240_000, 480_000, 960_000, 1_920_000, 3_840_000],
        }
    }
}

/// Connection parameters owned by the automaton.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellularParams {
    pub set_pdn_mode: bool,
    pub sim_slots: Vec<SimSlotConfig>,
    pub target_state: TargetState,
    pub attachment_timeout_ms: u32,
    pub operator: OperatorSelector,
    pub nfmc: NfmcParams,
    pub lp_inactivity_timeout_ms: u32,
}

impl Default for CellularParams {
    fn default() -> Self {
        Self {
            set_pdn_mode: true,
            sim_slots: vec![SimSlotConfig::default()],
            target_state: TargetState::Full,
            attachment_timeout_ms: 180_000,
            operator: OperatorSelector::default(),
            nfmc: NfmcParams::default(),
            lp_inactivity_timeout_ms: 1_000,
        }
    }
}

impl CellularParams {
    pub fn check(&self) -> Result<(), DataCacheError> {
        if self.sim_slots.len() > MAX_SIM_SLOTS {
            return Err(DataCacheError::Oversized {
                field: "sim_slots",
                len: self.sim_slots.len(),
                max: MAX_SIM_SLOTS,
            });
        }
        for slot in &self.sim_slots {
            slot.check()?;
        }
        check_len("operator.name", &self.operator.name, MAX_OPERATOR_NAME_LEN)
    }

    /// Slot at `index`, falling back to the first one.
    pub fn slot(&self, index: usize) -> Option<&SimSlotConfig> {
        self.sim_slots.get(index).or_else(|| self.sim_slots.first())
    }
}

// ─── Records ─────────────────────────────────────────────────────────────────

/// Modem identity, registration and signal level.
///
/// Identity fields are significant once `rt_state >= Run`; `mno_name` only
/// once `rt_state == On`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellularInfo {
    pub rt_state: ServiceState,
    pub modem_state: ModemState,
    pub signal_level: u8,
    pub signal_level_db: i32,
    pub access_techno: AccessTechno,
    pub imei: String,
    pub mno_name: String,
    pub manufacturer: String,
    pub model: String,
    pub revision: String,
    pub serial_number: String,
    pub iccid: String,
}

impl_record!(CellularInfo, |r| {
    check_len("imei", &r.imei, MAX_FIELD_LEN)?;
    check_len("mno_name", &r.mno_name, MAX_OPERATOR_NAME_LEN)?;
    check_len("manufacturer", &r.manufacturer, MAX_FIELD_LEN)?;
    check_len("model", &r.model, MAX_FIELD_LEN)?;
    check_len("revision", &r.revision, MAX_FIELD_LEN)?;
    check_len("serial_number", &r.serial_number, MAX_FIELD_LEN)?;
    check_len("iccid", &r.iccid, MAX_FIELD_LEN)
});

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimInfo {
    pub rt_state: ServiceState,
    pub imsi: String,
    /// Position of the active slot in [`CellularParams::sim_slots`].
    pub index_slot: u8,
    pub active_slot: SimSlotType,
    pub sim_status: [SimStatus; MAX_SIM_SLOTS],
}

impl_record!(SimInfo, |r| check_len("imsi", &r.imsi, MAX_FIELD_LEN));

/// Availability of the data channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataInfo {
    pub rt_state: ServiceState,
    pub network: DataNetwork,
    pub ip_addr: Ipv4Addr,
}

impl Default for DataInfo {
    fn default() -> Self {
        Self {
            rt_state: ServiceState::Unavailable,
            network: DataNetwork::Unavailable,
            ip_addr: Ipv4Addr::UNSPECIFIED,
        }
    }
}

impl_record!(DataInfo);

/// Network interface manager view of the data channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NifmanInfo {
    pub rt_state: ServiceState,
    pub network: DataNetwork,
    pub ip_addr: Ipv4Addr,
}

impl Default for NifmanInfo {
    fn default() -> Self {
        Self {
            rt_state: ServiceState::Unavailable,
            network: DataNetwork::Unavailable,
            ip_addr: Ipv4Addr::UNSPECIFIED,
        }
    }
}

impl_record!(NifmanInfo);

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NfmcInfo {
    pub rt_state: ServiceState,
    pub active: bool,
    pub tempo: [u32; NFMC_TEMPO_COUNT],
}

impl_record!(NfmcInfo);

/// APN change request from the application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApnConfig {
    pub rt_state: ServiceState,
    pub apn: String,
    pub cid: u8,
    pub username: String,
    pub password: String,
}

impl_record!(ApnConfig, |r| {
    check_len("apn", &r.apn, MAX_FIELD_LEN)?;
    check_len("username", &r.username, MAX_FIELD_LEN)?;
    check_len("password", &r.password, MAX_FIELD_LEN)
});

/// Target-state change request from the application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetStateRequest {
    pub rt_state: ServiceState,
    pub target_state: TargetState,
}

impl Default for TargetStateRequest {
    fn default() -> Self {
        Self {
            rt_state: ServiceState::Unavailable,
            target_state: TargetState::Off,
        }
    }
}

impl_record!(TargetStateRequest);

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellularConfig {
    pub rt_state: ServiceState,
    pub params: CellularParams,
}

impl_record!(CellularConfig, |r| r.params.check());

/// Low-power policy requested by the application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerConfig {
    pub rt_state: ServiceState,
    pub mode: PowerMode,
    pub psm_enabled: bool,
    pub edrx_enabled: bool,
    pub sleep_request_timeout_ms: u32,
}

impl_record!(PowerConfig);

// ─── Registry ────────────────────────────────────────────────────────────────

/// Handles to every cellular record in one store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellularEntries {
    pub cellular_info: Entry<CellularInfo>,
    pub sim_info: Entry<SimInfo>,
    pub data_info: Entry<DataInfo>,
    pub nifman_info: Entry<NifmanInfo>,
    pub nfmc_info: Entry<NfmcInfo>,
    pub apn_config: Entry<ApnConfig>,
    pub target_state: Entry<TargetStateRequest>,
    pub cellular_config: Entry<CellularConfig>,
    pub power_config: Entry<PowerConfig>,
}

impl CellularEntries {
    /// The catalogue of `cache`, allocated on first use and shared by every
    /// later caller.
    pub fn attach(cache: &DataCache) -> Result<Self, DataCacheError> {
        cache.get_or_try_init(Self::register)
    }

    /// Allocates a fresh copy of the whole catalogue in `cache`.
    pub fn register(cache: &DataCache) -> Result<Self, DataCacheError> {
        Ok(Self {
            cellular_info: cache.register(CellularInfo::default())?,
            sim_info: cache.register(SimInfo::default())?,
            data_info: cache.register(DataInfo::default())?,
            nifman_info: cache.register(NifmanInfo::default())?,
            nfmc_info: cache.register(NfmcInfo::default())?,
            apn_config: cache.register(ApnConfig::default())?,
            target_state: cache.register(TargetStateRequest::default())?,
            cellular_config: cache.register(CellularConfig::default())?,
            power_config: cache.register(PowerConfig::default())?,
        })
    }
}

/// Signal strength in dBm for an RSSI index (27.007 `+CSQ`).
pub fn rssi_to_dbm(rssi: u8) -> i32 {
    -113 + 2 * rssi as i32
}
