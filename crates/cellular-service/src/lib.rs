//! # cellular-service
//!
//! Connection manager for a cellular modem: an event-driven automaton that
//! powers the modem, brings up the SIM, registers on the network, attaches
//! and activates a PDN context, then keeps data available and recovers from
//! failures.
//!
//! ## Modules
//!
//! - [`automaton`]: the state machine and its handlers
//! - [`service`]: task runtime, record bridge and application API
//! - [`facade`]: modem and platform traits the automaton drives
//! - [`message`] / [`queue`]: events and the bounded queue that carries them
//! - [`timers`]: guarded one-shot and periodic timers
//! - [`failure`]: failure counters and retry limits
//! - [`nfmc`]: IMSI-derived registration backoff tempos
//! - [`apn`]: MCC/MNC to APN table
//! - [`sim`]: SIM slot fallback and probe classification
//! - [`config`]: TOML configuration
//! - `power`: low-power coordination (feature `low-power`)

pub mod apn;
pub mod automaton;
pub mod config;
pub mod facade;
pub mod failure;
pub mod message;
pub mod nfmc;
#[cfg(feature = "low-power")]
pub mod power;
pub mod queue;
pub mod service;
pub mod sim;
pub mod state;
pub mod timers;

pub use automaton::{Automaton, Collaborators, ConnectionContext, TransitionObserver};
pub use config::{ConfigError, ServiceConfig};
pub use facade::{ModemError, ModemFacade, PlatformHooks};
pub use message::{Command, Event, Message};
pub use service::{CellularService, ServiceError};
pub use state::{SharedStatus, State};
