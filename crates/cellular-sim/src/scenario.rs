//! Canned modem scripts and a seeded signal generator.

use rand::RngExt as _;
use rand::SeedableRng;
use rand::rngs::StdRng;

use cellular_service::facade::{
    AttachState, ModemError, NetworkRegState, SignalQuality, RSSI_NOT_DETECTABLE,
};

use crate::modem::{ModemScript, Responses, registered_home, searching, signal};

/// SIM rejects the PIN on the first probe.
pub fn locked_sim() -> ModemScript {
    let mut script = ModemScript::default();
    script.init_modem = Responses::always(Err(ModemError::SimIncorrectPassword));
    script
}

/// Network registration request always fails.
pub fn registration_rejected() -> ModemScript {
    let mut script = ModemScript::default();
    script.register_network = Responses::always(Err(ModemError::Generic));
    script
}

/// Signal present but the network never accepts the registration.
pub fn never_registers() -> ModemScript {
    let mut script = ModemScript::default();
    script.net_status = Responses::ok(searching());
    script
}

/// No detectable signal at all.
pub fn no_coverage() -> ModemScript {
    let mut script = ModemScript::default();
    script.signal_quality = Responses::ok(signal(RSSI_NOT_DETECTABLE));
    script.net_status = Responses::ok(searching());
    script
}

/// PS domain reports detached until `attached_after` reads have happened.
pub fn slow_attach(attached_after: usize) -> ModemScript {
    let mut script = ModemScript::default();
    script
        .attach_status
        .times(attached_after, Ok(AttachState::Detached));
    script
}

/// Healthy modem that reports a roaming operator.
pub fn roaming(operator: &str) -> ModemScript {
    let mut script = ModemScript::default();
    let mut status = registered_home(operator);
    status.eps = NetworkRegState::RegisteredRoaming;
    script.net_status = Responses::ok(status);
    script
}

// ─── Signal walk ─────────────────────────────────────────────────────────────

/// Bounds for a seeded RSSI random walk.
#[derive(Debug, Clone)]
pub struct SignalWalkConfig {
    pub seed: u64,
    pub start_rssi: u8,
    /// Largest change between two readings.
    pub max_step: u8,
    /// Chance that a reading reports no signal at all.
    pub dropout_probability: f64,
}

impl Default for SignalWalkConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            start_rssi: 18,
            max_step: 3,
            dropout_probability: 0.05,
        }
    }
}

/// Reproducible sequence of signal readings for a given seed.
#[derive(Debug)]
pub struct SignalWalk {
    cfg: SignalWalkConfig,
    rng: StdRng,
    rssi: f64,
}

impl SignalWalk {
    pub fn new(cfg: SignalWalkConfig) -> Self {
        let rng = StdRng::seed_from_u64(cfg.seed);
        let rssi = cfg.start_rssi.min(31) as f64;
        Self { cfg, rng, rssi }
    }

    pub fn next_quality(&mut self) -> SignalQuality {
        let step = self.cfg.max_step as f64;
        let delta = (self.rng.random::<f64>() * 2.0 - 1.0) * step;
        self.rssi = (self.rssi + delta).clamp(0.0, 31.0);

        if self.rng.random::<f64>() < self.cfg.dropout_probability {
            return signal(RSSI_NOT_DETECTABLE);
        }
        SignalQuality {
            rssi: self.rssi.round() as u8,
            ber: (self.rng.random::<f64>() * 8.0) as u8,
        }
    }

    pub fn take(&mut self, n: usize) -> Vec<SignalQuality> {
        (0..n).map(|_| self.next_quality()).collect()
    }

    /// Queues `n` readings into a script's signal responses.
    pub fn feed(&mut self, script: &mut ModemScript, n: usize) {
        for quality in self.take(n) {
            script.signal_quality.then(Ok(quality));
        }
    }
}
