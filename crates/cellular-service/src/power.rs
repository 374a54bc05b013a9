//! # Low-Power Coordination
//!
//! Tracks whether the application wants the modem to idle while data is
//! up, and where an idle cycle currently stands:
//!
//! ```text
//!   Active ──inactivity──▶ IdleRequested ──modem confirms──▶ Sleeping
//!     ▲                          │                              │
//!     └──── timeout / wakeup ────┴────────── wakeup ────────────┘
//! ```
//!
//! The coordinator holds no handles; the automaton drives the modem and the
//! timers and asks the coordinator what is allowed.

use std::time::Duration;

use cellular_datacache::ServiceState;
use cellular_datacache::cellular::{PowerConfig, PowerMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PowerPhase {
    #[default]
    Active,
    IdleRequested,
    Sleeping,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LowPowerCoordinator {
    mode: PowerMode,
    phase: PowerPhase,
    inactivity: Duration,
    sleep_request_timeout: Duration,
}

impl LowPowerCoordinator {
    pub fn new(inactivity: Duration) -> Self {
        Self {
            mode: PowerMode::NoLowPower,
            phase: PowerPhase::Active,
            inactivity,
            sleep_request_timeout: Duration::ZERO,
        }
    }

    /// Adopts a power configuration record. Only records marked `On` carry
    /// a valid request; anything else disables low power.
    pub fn apply(&mut self, config: &PowerConfig) {
        self.mode = if config.rt_state == ServiceState::On {
            config.mode
        } else {
            PowerMode::NoLowPower
        };
        self.sleep_request_timeout = Duration::from_millis(config.sleep_request_timeout_ms as u64);
        if self.mode == PowerMode::NoLowPower {
            self.phase = PowerPhase::Active;
        }
    }

    pub fn low_power_target(&self) -> bool {
        self.mode != PowerMode::NoLowPower
    }

    pub fn mode(&self) -> PowerMode {
        self.mode
    }

    pub fn phase(&self) -> PowerPhase {
        self.phase
    }

    pub fn inactivity(&self) -> Duration {
        self.inactivity
    }

    /// Zero means the modem is not asked to confirm in time.
    pub fn sleep_request_timeout(&self) -> Duration {
        self.sleep_request_timeout
    }

    /// Back to `Active` without touching the requested mode (SIM re-init).
    pub fn reset(&mut self) {
        self.phase = PowerPhase::Active;
    }

    /// Starts an idle cycle. False when low power is not wanted or a cycle
    /// is already running.
    pub fn request_idle(&mut self) -> bool {
        if !self.low_power_target() || self.phase != PowerPhase::Active {
            return false;
        }
        self.phase = PowerPhase::IdleRequested;
        true
    }

    pub fn sleep_complete(&mut self) {
        if self.phase == PowerPhase::IdleRequested {
            self.phase = PowerPhase::Sleeping;
        }
    }

    pub fn wakeup_complete(&mut self) {
        self.phase = PowerPhase::Active;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idle_config() -> PowerConfig {
        PowerConfig {
            rt_state: ServiceState::On,
            mode: PowerMode::IdleLowPower,
            psm_enabled: true,
            edrx_enabled: false,
            sleep_request_timeout_ms: 2_000,
        }
    }

    #[test]
    fn disabled_until_configured() {
        let mut lp = LowPowerCoordinator::new(Duration::from_secs(10));
        assert!(!lp.low_power_target());
        assert!(!lp.request_idle());
        assert_eq!(lp.phase(), PowerPhase::Active);
    }

    #[test]
    fn full_idle_cycle() {
        let mut lp = LowPowerCoordinator::new(Duration::from_secs(10));
        lp.apply(&idle_config());
        assert!(lp.low_power_target());
        assert_eq!(lp.sleep_request_timeout(), Duration::from_secs(2));

        assert!(lp.request_idle());
        assert!(!lp.request_idle());
        lp.sleep_complete();
        assert_eq!(lp.phase(), PowerPhase::Sleeping);
        lp.wakeup_complete();
        assert_eq!(lp.phase(), PowerPhase::Active);
    }

    #[test]
    fn record_not_on_disables_low_power() {
        let mut lp = LowPowerCoordinator::new(Duration::from_secs(10));
        lp.apply(&idle_config());
        assert!(lp.request_idle());

        let mut off = idle_config();
        off.rt_state = ServiceState::Off;
        lp.apply(&off);
        assert!(!lp.low_power_target());
        assert_eq!(lp.phase(), PowerPhase::Active);
    }

    #[test]
    fn sleep_complete_without_request_is_ignored() {
        let mut lp = LowPowerCoordinator::new(Duration::from_secs(10));
        lp.apply(&idle_config());
        lp.sleep_complete();
        assert_eq!(lp.phase(), PowerPhase::Active);
    }
}
