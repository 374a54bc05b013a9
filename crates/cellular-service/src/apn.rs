//! MCC/MNC → APN resolution for SIMs whose slot has no APN configured.

use serde::{Deserialize, Serialize};

/// Length of the MCC+MNC prefix of an IMSI.
pub const MCC_MNC_LEN: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApnEntry {
    pub mcc_mnc: String,
    pub apn: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

impl ApnEntry {
    fn new(mcc_mnc: &str, apn: &str, username: &str, password: &str) -> Self {
        Self {
            mcc_mnc: mcc_mnc.to_string(),
            apn: apn.to_string(),
            username: username.to_string(),
            password: password.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApnTable {
    entries: Vec<ApnEntry>,
}

impl ApnTable {
    /// Operators known out of the box.
    pub fn builtin() -> Self {
        Self::new(vec![
            ApnEntry::new("00101", "default", "", ""),
            ApnEntry::new("20810", "iotinternet", "", ""),
            ApnEntry::new("29510", "soracom.io", "sora", "sora"),
            ApnEntry::new("23425", "iot.truphone.com", "", ""),
            ApnEntry::new("29505", "EM", "", ""),
        ])
    }

    pub fn new(entries: Vec<ApnEntry>) -> Self {
        Self { entries }
    }

    /// First entry whose MCC+MNC equals `mcc_mnc` exactly.
    pub fn lookup(&self, mcc_mnc: &str) -> Option<&ApnEntry> {
        self.entries.iter().find(|e| e.mcc_mnc == mcc_mnc)
    }

    pub fn entries(&self) -> &[ApnEntry] {
        &self.entries
    }
}

impl Default for ApnTable {
    fn default() -> Self {
        Self::builtin()
    }
}

/// MCC+MNC prefix of an IMSI, if it has one.
pub fn mcc_mnc(imsi: &str) -> Option<&str> {
    let prefix = imsi.get(..MCC_MNC_LEN)?;
    prefix.bytes().all(|b| b.is_ascii_digit()).then_some(prefix)
}
