//! # Cellular Agent
//!
//! Runs the cellular connection manager against the simulated modem and
//! reports every record change as a JSON line on stdout.
//!
//! ## Usage
//!
//! ```bash
//! # Healthy modem, default configuration, until Ctrl+C
//! cellular-agent
//!
//! # Custom configuration, fixed signal seed, stop after a minute
//! cellular-agent --config cellular.toml --seed 7 --duration-secs 60
//!
//! # SIM that rejects its PIN
//! cellular-agent --scenario locked-sim
//! ```

mod report;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::Context;
use cellular_datacache::cellular::{PowerConfig, PowerMode, TargetState};
use cellular_datacache::{DataCache, ServiceState};
use cellular_service::{CellularService, ServiceConfig};
use cellular_sim::scenario::{self, SignalWalk, SignalWalkConfig};
use cellular_sim::{ModemScript, SimModem, SimPlatform};
use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

/// Cellular connection manager on a simulated modem.
#[derive(Parser, Debug)]
#[command(name = "cellular-agent", about = "Cellular connection manager agent")]
struct Cli {
    /// TOML configuration file. Defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Seed for the simulated signal.
    #[arg(long, default_value_t = 1)]
    seed: u64,

    /// Simulated signal readings queued before the steady fallback.
    #[arg(long, default_value_t = 120)]
    signal_readings: usize,

    /// Modem behaviour to simulate.
    #[arg(long, value_enum, default_value_t = Scenario::Healthy)]
    scenario: Scenario,

    /// Target state override (off, sim-only, full).
    #[arg(long)]
    target: Option<TargetState>,

    /// Ask for idle low-power mode once data is up.
    #[arg(long, default_value_t = false)]
    low_power: bool,

    /// Stop after this many seconds. Zero runs until Ctrl+C.
    #[arg(long, default_value_t = 0)]
    duration_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Scenario {
    Healthy,
    LockedSim,
    RegistrationRejected,
    NeverRegisters,
    NoCoverage,
    Roaming,
}

impl Scenario {
    fn script(self) -> ModemScript {
        match self {
            Scenario::Healthy => ModemScript::default(),
            Scenario::LockedSim => scenario::locked_sim(),
            Scenario::RegistrationRejected => scenario::registration_rejected(),
            Scenario::NeverRegisters => scenario::never_registers(),
            Scenario::NoCoverage => scenario::no_coverage(),
            Scenario::Roaming => scenario::roaming("Partner"),
        }
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<ServiceConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            ServiceConfig::from_toml_str(&text)
                .with_context(|| format!("parsing {}", path.display()))?
        }
        None => ServiceConfig::default(),
    };
    if let Some(target) = cli.target {
        config.params.target_state = target;
    }
    Ok(config)
}

fn main() -> anyhow::Result<()> {
    // ── Logging ─────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .compact()
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    tracing::info!(
        scenario = ?cli.scenario,
        seed = cli.seed,
        target = ?config.params.target_state,
        slots = config.params.sim_slots.len(),
        "cellular-agent starting"
    );

    // ── Simulated modem ─────────────────────────────────────────
    let mut script = cli.scenario.script();
    if cli.scenario != Scenario::NoCoverage {
        SignalWalk::new(SignalWalkConfig {
            seed: cli.seed,
            ..Default::default()
        })
        .feed(&mut script, cli.signal_readings);
    }
    let modem = Arc::new(SimModem::new(script));
    let platform = Arc::new(SimPlatform::new());

    // ── Service ─────────────────────────────────────────────────
    let cache = DataCache::new();
    let mut service = CellularService::init(config, modem, platform.clone(), cache.clone())?;
    service.set_transition_observer(Box::new(|from, to| {
        tracing::info!(%from, %to, "state change");
    }));

    let (changes_tx, changes_rx) = crossbeam_channel::unbounded();
    cache.subscribe(move |id| {
        let _ = changes_tx.send(id);
    })?;

    // ── Graceful shutdown ───────────────────────────────────────
    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        ctrlc::set_handler(move || {
            tracing::info!("shutting down...");
            running.store(false, Ordering::Relaxed);
        })
        .context("installing signal handler")?;
    }

    service.start()?;
    if !service.request_radio_on() {
        anyhow::bail!("cellular queue full before start");
    }
    if cli.low_power {
        service.request_power_config(PowerConfig {
            rt_state: ServiceState::On,
            mode: PowerMode::IdleLowPower,
            psm_enabled: true,
            edrx_enabled: false,
            sleep_request_timeout_ms: 2_000,
        })?;
    }

    // ── Report loop ─────────────────────────────────────────────
    let entries = *service.entries();
    let deadline =
        (cli.duration_secs > 0).then(|| Instant::now() + Duration::from_secs(cli.duration_secs));

    while running.load(Ordering::Relaxed) {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }
        match changes_rx.recv_timeout(Duration::from_millis(100)) {
            Ok(id) => match report::record_line(&cache, &entries, id) {
                Ok(Some(line)) => println!("{line}"),
                Ok(None) => {}
                Err(e) => tracing::warn!(entry = %id, error = %e, "record report failed"),
            },
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
        }
    }

    // ── Cleanup ─────────────────────────────────────────────────
    let state = service.get_current_state();
    let dropped = service.dropped_messages();
    service.shutdown();
    tracing::info!(
        state = %state,
        dropped,
        restarts = platform.restarts().len(),
        "cellular-agent stopped"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn example_config_parses() {
        let config = ServiceConfig::from_toml_str(include_str!("../cellular.example.toml")).unwrap();
        assert_eq!(config.params.sim_slots.len(), 2);
        assert!(config.params.nfmc.active);
        assert!(config.apn_table.lookup("00101").is_some());
    }

    #[test]
    fn target_flag_overrides_config() {
        let cli = Cli::parse_from(["cellular-agent", "--target", "sim-only"]);
        let config = load_config(&cli).unwrap();
        assert_eq!(config.params.target_state, TargetState::SimOnly);
    }

    #[test]
    fn scenarios_build_scripts() {
        for scenario in Scenario::value_variants() {
            let _ = scenario.script();
        }
    }
}
