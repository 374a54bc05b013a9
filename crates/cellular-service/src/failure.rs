//! Failure accounting shared by every failing call-site.
//!
//! Each failure bumps its cause's counter and the global counter. The
//! automaton resets the modem while both stay within their limits and gives
//! up (absorbing `ModemFail`) once either is exceeded.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailCause {
    PowerOnFail,
    ResetFail,
    RegisterFail,
    NetworkFail,
    AttachFail,
    PdnDefineFail,
    PdnActivateFail,
    /// Repeated signal-quality read failures.
    CsqFail,
    SimFail,
    PppFail,
    FotaTimeout,
}

/// Maximum failures tolerated per cause, and in total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryLimits {
    pub power_on: u32,
    pub reset: u32,
    pub register: u32,
    pub network: u32,
    pub attach: u32,
    /// Shared by PDN definition and activation.
    pub pdn: u32,
    pub csq: u32,
    pub sim: u32,
    pub ppp: u32,
    pub global: u32,
}

impl Default for RetryLimits {
    fn default() -> Self {
        Self {
            power_on: 5,
            reset: 5,
            register: 5,
            network: 5,
            attach: 5,
            pdn: 5,
            csq: 5,
            sim: 5,
            ppp: 5,
            global: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Reset the modem and start over from init.
    Retry,
    /// Stop all automatic action.
    Terminal,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FailCounters {
    pub power_on: u32,
    pub reset: u32,
    pub register: u32,
    pub network: u32,
    pub attach: u32,
    pub pdn: u32,
    pub csq: u32,
    pub sim: u32,
    pub ppp: u32,
    pub fota: u32,
    pub global: u32,
}

impl FailCounters {
    /// Counts one failure and decides whether another attempt is allowed.
    pub fn record(&mut self, cause: FailCause, limits: &RetryLimits) -> Verdict {
        self.global = self.global.saturating_add(1);
        let (count, max) = match cause {
            FailCause::PowerOnFail => (&mut self.power_on, limits.power_on),
            FailCause::ResetFail => (&mut self.reset, limits.reset),
            FailCause::RegisterFail => (&mut self.register, limits.register),
            FailCause::NetworkFail => (&mut self.network, limits.network),
            FailCause::AttachFail => (&mut self.attach, limits.attach),
            FailCause::PdnDefineFail | FailCause::PdnActivateFail => (&mut self.pdn, limits.pdn),
            FailCause::CsqFail => (&mut self.csq, limits.csq),
            FailCause::SimFail => (&mut self.sim, limits.sim),
            FailCause::PppFail => (&mut self.ppp, limits.ppp),
            // no modem reset recovers an interrupted firmware update
            FailCause::FotaTimeout => (&mut self.fota, 0),
        };
        *count = count.saturating_add(1);

        if *count <= max && self.global <= limits.global {
            Verdict::Retry
        } else {
            Verdict::Terminal
        }
    }

    pub fn count(&self, cause: FailCause) -> u32 {
        match cause {
            FailCause::PowerOnFail => self.power_on,
            FailCause::ResetFail => self.reset,
            FailCause::RegisterFail => self.register,
            FailCause::NetworkFail => self.network,
            FailCause::AttachFail => self.attach,
            FailCause::PdnDefineFail | FailCause::PdnActivateFail => self.pdn,
            FailCause::CsqFail => self.csq,
            FailCause::SimFail => self.sim,
            FailCause::PppFail => self.ppp,
            FailCause::FotaTimeout => self.fota,
        }
    }

    pub fn reset(&mut self) {
        *self = FailCounters::default();
    }
}
