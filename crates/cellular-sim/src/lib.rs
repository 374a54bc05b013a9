//! Modem simulation toolkit for integration testing.
//!
//! Provides a scriptable [`ModemFacade`](cellular_service::ModemFacade)
//! implementation, a platform stub that records restarts, and a harness
//! that drives the automaton synchronously with manual timers so every run
//! is reproducible.

pub mod harness;
pub mod modem;
pub mod platform;
pub mod scenario;

pub use harness::Harness;
pub use modem::{Call, ModemScript, Responses, SimModem};
pub use platform::SimPlatform;
