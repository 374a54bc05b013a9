//! Service configuration, loaded from TOML.
//!
//! Every field is optional; whatever is missing falls back to the platform
//! defaults. Out-of-range values are clamped rather than rejected, except
//! where the record store could not hold the result.
//!
//! ```toml
//! version = 1
//! sim_pin = ""
//!
//! [cellular]
//! target_state = "full"
//! attachment_timeout_ms = 180000
//!
//! [[cellular.sim_slots]]
//! slot_type = "modem_socket"
//! apn = "iotinternet"
//! cid = 1
//!
//! [cellular.nfmc]
//! active = true
//!
//! [retry]
//! register = 3
//!
//! [timing]
//! polling_period_ms = 5000
//! ```

use std::time::Duration;

use cellular_datacache::cellular::{
    AccessTechno, CellularParams, MAX_FIELD_LEN, MAX_OPERATOR_NAME_LEN, MAX_SIM_SLOTS,
    NFMC_TEMPO_COUNT, NfmcParams, OperatorNameFormat, OperatorSelector, RegistrationMode,
    SimSlotConfig, SimSlotType, TargetState,
};
use serde::Deserialize;
use thiserror::Error;

use crate::apn::{ApnEntry, ApnTable};
use crate::failure::RetryLimits;
use crate::queue::DEFAULT_QUEUE_CAPACITY;

pub const CONFIG_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config TOML: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("unsupported config version {0}")]
    Version(u32),
    #[error("{0} SIM slots configured, at most {MAX_SIM_SLOTS} supported")]
    TooManySlots(usize),
}

// ─── Input (as written in TOML) ──────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServiceConfigInput {
    pub version: u32,
    pub cellular: CellularInput,
    pub retry: RetryLimits,
    pub timing: TimingInput,
    pub apn_table: Option<Vec<ApnEntry>>,
    pub sim_pin: Option<String>,
    pub queue_capacity: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CellularInput {
    pub set_pdn_mode: Option<bool>,
    pub target_state: Option<TargetState>,
    pub attachment_timeout_ms: Option<u32>,
    pub lp_inactivity_timeout_ms: Option<u32>,
    pub sim_slots: Vec<SimSlotInput>,
    pub operator: OperatorInput,
    pub nfmc: NfmcInput,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SimSlotInput {
    pub slot_type: Option<SimSlotType>,
    pub apn: String,
    pub cid: Option<u8>,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OperatorInput {
    pub mode: Option<RegistrationMode>,
    pub name_format: Option<OperatorNameFormat>,
    pub name: Option<String>,
    pub access_techno: Option<AccessTechno>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NfmcInput {
    pub active: Option<bool>,
    pub base_tempo_ms: Option<[u32; NFMC_TEMPO_COUNT]>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TimingInput {
    pub polling_period_ms: Option<u64>,
    pub pdn_retry_delay_ms: Option<u64>,
    pub fota_timeout_ms: Option<u64>,
    pub sim_poll_interval_ms: Option<u64>,
    pub sim_poll_max: Option<u32>,
    pub csq_fail_threshold: Option<u32>,
}

// ─── Resolved ────────────────────────────────────────────────────────────────

/// Delays and bounds the automaton applies outside [`CellularParams`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timing {
    pub polling_period: Duration,
    /// PDN retry delay when NFMC is inactive.
    pub pdn_retry_delay: Duration,
    pub fota_timeout: Duration,
    pub sim_poll_interval: Duration,
    pub sim_poll_max: u32,
    /// Consecutive signal-quality read failures before `CsqFail`.
    pub csq_fail_threshold: u32,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            polling_period: Duration::from_millis(5_000),
            pdn_retry_delay: Duration::from_millis(30_000),
            fota_timeout: Duration::from_millis(360_000),
            sim_poll_interval: Duration::from_millis(100),
            sim_poll_max: 200,
            csq_fail_threshold: 5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub version: u32,
    pub params: CellularParams,
    pub limits: RetryLimits,
    pub timing: Timing,
    pub apn_table: ApnTable,
    pub sim_pin: String,
    pub queue_capacity: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            params: CellularParams::default(),
            limits: RetryLimits::default(),
            timing: Timing::default(),
            apn_table: ApnTable::builtin(),
            sim_pin: String::new(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl ServiceConfigInput {
    pub fn resolve(self) -> Result<ServiceConfig, ConfigError> {
        let version = if self.version == 0 {
            CONFIG_VERSION
        } else {
            self.version
        };
        if version != CONFIG_VERSION {
            return Err(ConfigError::Version(version));
        }

        let defaults = ServiceConfig::default();
        let params = self.cellular.resolve(&defaults.params)?;

        let t = self.timing;
        let d = defaults.timing;
        let timing = Timing {
            polling_period: t
                .polling_period_ms
                .map(Duration::from_millis)
                .unwrap_or(d.polling_period),
            pdn_retry_delay: t
                .pdn_retry_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(d.pdn_retry_delay),
            fota_timeout: t
                .fota_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(d.fota_timeout),
            sim_poll_interval: t
                .sim_poll_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(d.sim_poll_interval),
            sim_poll_max: t.sim_poll_max.unwrap_or(d.sim_poll_max).max(1),
            csq_fail_threshold: t.csq_fail_threshold.unwrap_or(d.csq_fail_threshold).max(1),
        };

        Ok(ServiceConfig {
            version,
            params,
            limits: self.retry,
            timing,
            apn_table: self.apn_table.map(ApnTable::new).unwrap_or_default(),
            sim_pin: clip(&self.sim_pin.unwrap_or_default(), MAX_FIELD_LEN),
            queue_capacity: self.queue_capacity.unwrap_or(DEFAULT_QUEUE_CAPACITY).max(1),
        })
    }
}

impl CellularInput {
    fn resolve(self, defaults: &CellularParams) -> Result<CellularParams, ConfigError> {
        if self.sim_slots.len() > MAX_SIM_SLOTS {
            return Err(ConfigError::TooManySlots(self.sim_slots.len()));
        }
        let mut sim_slots: Vec<SimSlotConfig> = self
            .sim_slots
            .into_iter()
            .map(|slot| SimSlotConfig {
                slot_type: slot.slot_type.unwrap_or_default(),
                apn: clip(slot.apn.trim(), MAX_FIELD_LEN),
                cid: slot.cid.unwrap_or(1).clamp(1, 9),
                username: clip(&slot.username, MAX_FIELD_LEN),
                password: clip(&slot.password, MAX_FIELD_LEN),
            })
            .collect();
        if sim_slots.is_empty() {
            sim_slots = defaults.sim_slots.clone();
        }

        let op_defaults = &defaults.operator;
        let operator = OperatorSelector {
            mode: self.operator.mode.unwrap_or(op_defaults.mode),
            name_format: self.operator.name_format.unwrap_or(op_defaults.name_format),
            name: self
                .operator
                .name
                .map(|n| clip(&n, MAX_OPERATOR_NAME_LEN))
                .unwrap_or_else(|| op_defaults.name.clone()),
            access_techno_present: self.operator.access_techno.is_some(),
            access_techno: self.operator.access_techno.unwrap_or(op_defaults.access_techno),
        };

        let nfmc = NfmcParams {
            active: self.nfmc.active.unwrap_or(defaults.nfmc.active),
            base_tempo_ms: self.nfmc.base_tempo_ms.unwrap_or(defaults.nfmc.base_tempo_ms),
        };

        Ok(CellularParams {
            set_pdn_mode: self.set_pdn_mode.unwrap_or(defaults.set_pdn_mode),
            sim_slots,
            target_state: self.target_state.unwrap_or(defaults.target_state),
            attachment_timeout_ms: self
                .attachment_timeout_ms
                .unwrap_or(defaults.attachment_timeout_ms),
            operator,
            nfmc,
            lp_inactivity_timeout_ms: self
                .lp_inactivity_timeout_ms
                .unwrap_or(defaults.lp_inactivity_timeout_ms),
        })
    }
}

impl ServiceConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        if input.trim().is_empty() {
            return Ok(ServiceConfig::default());
        }
        let parsed: ServiceConfigInput = toml::from_str(input)?;
        parsed.resolve()
    }
}

/// Truncates to at most `max` bytes on a char boundary.
pub(crate) fn clip(value: &str, max: usize) -> String {
    if value.len() <= max {
        return value.to_string();
    }
    let mut end = max;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    value[..end].to_string()
}
