//! # Shared State Store
//!
//! A fixed-capacity table of typed records. Each record is registered once,
//! then overwritten by its single producer; any number of consumers may read
//! copies or subscribe to the write fan-out.
//!
//! ```text
//!  producer ──write──▶ [ slot table ] ──copy──▶ read()
//!                           │
//!                           └── notify(EntryId) ──▶ subscriber 0..N
//! ```
//!
//! Writes are serialized by the subscriber lock, which stays held while the
//! value is replaced and every callback runs. Reads only take the slot lock,
//! so a callback may read any record but must never write one.

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default number of record slots.
pub const DEFAULT_MAX_ENTRIES: usize = 32;

/// Entry ids are 16-bit; larger tables are capped to this.
pub const MAX_ENTRY_IDS: usize = u16::MAX as usize + 1;

/// Default number of subscriber callbacks.
pub const DEFAULT_MAX_SUBSCRIBERS: usize = 16;

// ─── Errors ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DataCacheError {
    #[error("entry table full ({0} slots)")]
    TableFull(usize),
    #[error("subscriber table full ({0} callbacks)")]
    SubscribersFull(usize),
    #[error("no entry registered at {0}")]
    UnknownEntry(EntryId),
    #[error("entry {0} holds a different record type")]
    TypeMismatch(EntryId),
    #[error("field `{field}` has size {len}, capacity is {max}")]
    Oversized {
        field: &'static str,
        len: usize,
        max: usize,
    },
}

// ─── Service state ───────────────────────────────────────────────────────────

/// Runtime availability of a record. The payload is only meaningful once the
/// producer has moved it out of `Unavailable`; what each level means is
/// record-specific.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    #[default]
    Unavailable,
    Reset,
    Off,
    ShuttingDown,
    Starting,
    Run,
    On,
    Fail,
}

impl ServiceState {
    pub fn as_str(self) -> &'static str {
        match self {
            ServiceState::Unavailable => "unavailable",
            ServiceState::Reset => "reset",
            ServiceState::Off => "off",
            ServiceState::ShuttingDown => "shutting-down",
            ServiceState::Starting => "starting",
            ServiceState::Run => "run",
            ServiceState::On => "on",
            ServiceState::Fail => "fail",
        }
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Records ─────────────────────────────────────────────────────────────────

/// A value that can live in a store slot.
///
/// `Default` must be the zero value: `rt_state = Unavailable` and empty
/// payload. It is what degraded reads hand back.
pub trait Record: Any + Clone + Default + Send + Sync {
    fn rt_state(&self) -> ServiceState;

    fn set_rt_state(&mut self, state: ServiceState);

    /// Rejects values that do not fit the slot (string or list capacity).
    fn check(&self) -> Result<(), DataCacheError> {
        Ok(())
    }
}

/// Checks a string field against its fixed capacity in bytes.
pub fn check_len(field: &'static str, value: &str, max: usize) -> Result<(), DataCacheError> {
    if value.len() > max {
        return Err(DataCacheError::Oversized {
            field,
            len: value.len(),
            max,
        });
    }
    Ok(())
}

// ─── Handles ─────────────────────────────────────────────────────────────────

/// Slot identifier, passed to subscribers on every write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryId(u16);

impl EntryId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Typed handle to a registered slot.
pub struct Entry<R> {
    id: EntryId,
    _record: PhantomData<fn() -> R>,
}

impl<R> Entry<R> {
    fn new(id: EntryId) -> Self {
        Self {
            id,
            _record: PhantomData,
        }
    }

    pub fn id(&self) -> EntryId {
        self.id
    }
}

impl<R> Clone for Entry<R> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<R> Copy for Entry<R> {}

impl<R> PartialEq for Entry<R> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<R> Eq for Entry<R> {}

impl<R> fmt::Debug for Entry<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Entry<{}>({})", short_type_name::<R>(), self.id)
    }
}

fn short_type_name<R>() -> &'static str {
    let full = std::any::type_name::<R>();
    full.rsplit("::").next().unwrap_or(full)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(usize);

// ─── Store ───────────────────────────────────────────────────────────────────

type Callback = Box<dyn Fn(EntryId) + Send + Sync>;

struct Subscriber {
    id: SubscriberId,
    callback: Callback,
}

struct Inner {
    max_entries: usize,
    max_subscribers: usize,
    slots: RwLock<Vec<Box<dyn Any + Send + Sync>>>,
    subscribers: Mutex<Vec<Subscriber>>,
    next_subscriber: AtomicUsize,
    /// Store-wide values keyed by type, e.g. a registered catalogue.
    shared: Mutex<Vec<Box<dyn Any + Send + Sync>>>,
}

/// Cloneable handle to one store instance.
#[derive(Clone)]
pub struct DataCache {
    inner: Arc<Inner>,
}

impl DataCache {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_MAX_ENTRIES, DEFAULT_MAX_SUBSCRIBERS)
    }

    /// `max_entries` is capped at [`MAX_ENTRY_IDS`].
    pub fn with_limits(max_entries: usize, max_subscribers: usize) -> Self {
        let max_entries = max_entries.min(MAX_ENTRY_IDS);
        Self {
            inner: Arc::new(Inner {
                max_entries,
                max_subscribers,
                slots: RwLock::new(Vec::with_capacity(max_entries.min(DEFAULT_MAX_ENTRIES))),
                subscribers: Mutex::new(Vec::with_capacity(max_subscribers.min(DEFAULT_MAX_SUBSCRIBERS))),
                next_subscriber: AtomicUsize::new(0),
                shared: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn max_entries(&self) -> usize {
        self.inner.max_entries
    }

    /// Allocates the next slot and stores `initial` with `rt_state = Off`.
    pub fn register<R: Record>(&self, mut initial: R) -> Result<Entry<R>, DataCacheError> {
        initial.check()?;
        initial.set_rt_state(ServiceState::Off);

        let mut slots = self.inner.slots.write().unwrap_or_else(|e| e.into_inner());
        if slots.len() >= self.inner.max_entries {
            return Err(DataCacheError::TableFull(self.inner.max_entries));
        }
        let id = u16::try_from(slots.len())
            .map(EntryId)
            .map_err(|_| DataCacheError::TableFull(self.inner.max_entries))?;
        slots.push(Box::new(initial));
        tracing::trace!(entry = %id, record = short_type_name::<R>(), "entry registered");
        Ok(Entry::new(id))
    }

    /// Replaces the slot's value, then calls every subscriber with its id.
    ///
    /// On error the stored value is left untouched and nobody is notified.
    pub fn write<R: Record>(&self, entry: Entry<R>, value: R) -> Result<(), DataCacheError> {
        value.check()?;

        let subscribers = self
            .inner
            .subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        {
            let mut slots = self.inner.slots.write().unwrap_or_else(|e| e.into_inner());
            let slot = slots
                .get_mut(entry.id.index())
                .ok_or(DataCacheError::UnknownEntry(entry.id))?;
            let stored = slot
                .downcast_mut::<R>()
                .ok_or(DataCacheError::TypeMismatch(entry.id))?;
            *stored = value;
        }
        for sub in subscribers.iter() {
            (sub.callback)(entry.id);
        }
        Ok(())
    }

    /// Returns a copy of the slot's current value.
    pub fn read<R: Record>(&self, entry: Entry<R>) -> Result<R, DataCacheError> {
        let slots = self.inner.slots.read().unwrap_or_else(|e| e.into_inner());
        let slot = slots
            .get(entry.id.index())
            .ok_or(DataCacheError::UnknownEntry(entry.id))?;
        slot.downcast_ref::<R>()
            .cloned()
            .ok_or(DataCacheError::TypeMismatch(entry.id))
    }

    /// Like [`read`](Self::read), but an invalid handle yields the zero value.
    pub fn read_or_default<R: Record>(&self, entry: Entry<R>) -> R {
        match self.read(entry) {
            Ok(value) => value,
            Err(e) => {
                tracing::debug!(entry = %entry.id, error = %e, "degraded read");
                R::default()
            }
        }
    }

    /// Registers a callback invoked on every write to any slot.
    pub fn subscribe<F>(&self, callback: F) -> Result<SubscriberId, DataCacheError>
    where
        F: Fn(EntryId) + Send + Sync + 'static,
    {
        let mut subscribers = self
            .inner
            .subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if subscribers.len() >= self.inner.max_subscribers {
            return Err(DataCacheError::SubscribersFull(self.inner.max_subscribers));
        }
        let id = SubscriberId(self.inner.next_subscriber.fetch_add(1, Ordering::Relaxed));
        subscribers.push(Subscriber {
            id,
            callback: Box::new(callback),
        });
        Ok(id)
    }

    /// Removes a callback. False if `id` was not subscribed.
    ///
    /// Must not be called from inside a callback: the fan-out holds the
    /// subscriber lock.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut subscribers = self
            .inner
            .subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let before = subscribers.len();
        subscribers.retain(|sub| sub.id != id);
        subscribers.len() != before
    }

    /// Returns the store-wide value of type `T`, building it with `init` the
    /// first time it is asked for. A failed `init` stores nothing.
    pub fn get_or_try_init<T, E, F>(&self, init: F) -> Result<T, E>
    where
        T: Any + Clone + Send + Sync,
        F: FnOnce(&DataCache) -> Result<T, E>,
    {
        let mut shared = self.inner.shared.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(value) = shared.iter().find_map(|v| v.downcast_ref::<T>()) {
            return Ok(value.clone());
        }
        let value = init(self)?;
        shared.push(Box::new(value.clone()));
        Ok(value)
    }

    /// Fans `id` out to every subscriber without touching any slot.
    pub fn notify_event(&self, id: EntryId) {
        let subscribers = self
            .inner
            .subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        for sub in subscribers.iter() {
            tracing::trace!(subscriber = sub.id.0, entry = %id, "event notify");
            (sub.callback)(id);
        }
    }

    pub fn entry_count(&self) -> usize {
        self.inner
            .slots
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

impl Default for DataCache {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DataCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataCache")
            .field("entries", &self.entry_count())
            .field("max_entries", &self.inner.max_entries)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
