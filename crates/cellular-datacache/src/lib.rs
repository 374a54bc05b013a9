//! # Cellular Data Cache
//!
//! Shared-state store used for cross-task communication between the
//! connection manager and its collaborators (UI, socket layer, application).
//!
//! Producers write typed records, consumers read copies, and subscribers get
//! a synchronous callback with the entry id on every write.
//!
//! ## Modules
//!
//! - [`store`]: the store itself: entry table, typed handles, subscribers.
//! - [`cellular`]: record types published by the cellular service and the
//!   [`cellular::CellularEntries`] registry that allocates them.

pub mod cellular;
pub mod store;

pub use store::{DataCache, DataCacheError, Entry, EntryId, Record, ServiceState, SubscriberId};
