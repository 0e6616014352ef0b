//! The key/value store a [`Registry`](crate::Registry) persists into.
//!
//! A store is organised as named partitions, each holding named namespaces of
//! typed entries. [`Backend`] opens partitions and hands out [`Namespace`]
//! handles; a handle reads entries, stages writes and flushes them on
//! [`commit`](Namespace::commit).
//!
//! Two backends ship with the crate:
//!
//! - [`MemoryBackend`]: process-local, shared between clones, with fault
//!   injection for exercising failure paths.
//! - [`FileBackend`](crate::FileBackend): one TOML document per partition.
use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use thiserror::Error;

use crate::value::Value;

/// Longest accepted partition, namespace or key name, in bytes.
pub const MAX_NAME_LEN: usize = 15;

/// Partition used by [`Prefs::init`](crate::Prefs::init).
pub const DEFAULT_PARTITION: &str = "nvs";

#[derive(Debug, Error)]
pub enum StoreError {
    /// The partition has no room left and must be erased before use.
    #[error("no free pages")]
    NoFreePages,

    /// The partition was written by an incompatible store format and must be
    /// erased before use.
    #[error("partition holds data in a newer or unknown format")]
    NewVersionFound,

    #[error("not enough space to write {0:?}")]
    NotEnoughSpace(String),

    #[error("invalid name {0:?}")]
    InvalidName(String),

    #[error("partition {0:?} is not initialized")]
    PartitionNotInitialized(String),

    #[error("partition {partition:?} is corrupted: {reason}")]
    Corrupted { partition: String, reason: String },

    #[error("injected failure: {0}")]
    Injected(&'static str),

    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML Serialization: {0}")]
    TomlSerialization(#[from] toml::ser::Error),
}

impl StoreError {
    /// Whether erasing the partition and initializing again may recover.
    pub fn needs_erase(&self) -> bool {
        matches!(self, StoreError::NoFreePages | StoreError::NewVersionFound)
    }
}

pub trait Backend: Send + Sync {
    fn init_partition(&self, partition: &str) -> Result<(), StoreError>;

    fn erase_partition(&self, partition: &str) -> Result<(), StoreError>;

    /// Opens `namespace` inside an initialized partition, creating it if
    /// needed. The returned handle is valid until dropped.
    fn open_namespace(
        &self,
        partition: &str,
        namespace: &str,
    ) -> Result<Box<dyn Namespace>, StoreError>;
}

pub trait Namespace: Send {
    /// Returns the entry under `key`, staged writes included.
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    fn set(&mut self, key: &str, value: Value) -> Result<(), StoreError>;

    /// Flushes staged writes.
    fn commit(&mut self) -> Result<(), StoreError>;
}

pub(crate) fn check_name(name: &str) -> Result<(), StoreError> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(StoreError::InvalidName(name.to_string()));
    }
    Ok(())
}

pub(crate) type Entries = BTreeMap<String, Value>;

#[derive(Default)]
struct Partition {
    initialized: bool,
    namespaces: HashMap<String, Entries>,
}

#[derive(Default)]
struct MemoryState {
    partitions: HashMap<String, Partition>,
    init_faults: VecDeque<StoreError>,
}

#[derive(Default)]
struct Shared {
    state: Mutex<MemoryState>,
    fail_writes: AtomicBool,
    fail_open: AtomicBool,
    reads: AtomicUsize,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// An in-process store. Clones share the same contents, so dropping every
/// registry and building a new one over a clone behaves like a restart.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    shared: Arc<Shared>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next call to [`Backend::init_partition`] fail with `error`.
    /// Queued faults are consumed in order.
    pub fn push_init_fault(&self, error: StoreError) {
        self.shared.state().init_faults.push_back(error);
    }

    /// Makes every [`Namespace::set`] fail while enabled.
    pub fn fail_writes(&self, enabled: bool) {
        self.shared.fail_writes.store(enabled, Ordering::SeqCst);
    }

    /// Makes every [`Backend::open_namespace`] fail while enabled.
    pub fn fail_open(&self, enabled: bool) {
        self.shared.fail_open.store(enabled, Ordering::SeqCst);
    }

    /// Number of [`Namespace::get`] calls served so far.
    pub fn reads(&self) -> usize {
        self.shared.reads.load(Ordering::SeqCst)
    }

    /// Returns the committed entry, bypassing any handle.
    pub fn peek(&self, partition: &str, namespace: &str, key: &str) -> Option<Value> {
        self.shared
            .state()
            .partitions
            .get(partition)?
            .namespaces
            .get(namespace)?
            .get(key)
            .cloned()
    }

    /// Writes a committed entry, bypassing any handle.
    pub fn poke(&self, partition: &str, namespace: &str, key: &str, value: Value) {
        self.shared
            .state()
            .partitions
            .entry(partition.to_string())
            .or_default()
            .namespaces
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value);
    }
}

impl Backend for MemoryBackend {
    fn init_partition(&self, partition: &str) -> Result<(), StoreError> {
        check_name(partition)?;
        let mut state = self.shared.state();
        if let Some(fault) = state.init_faults.pop_front() {
            return Err(fault);
        }
        state
            .partitions
            .entry(partition.to_string())
            .or_default()
            .initialized = true;
        Ok(())
    }

    fn erase_partition(&self, partition: &str) -> Result<(), StoreError> {
        check_name(partition)?;
        self.shared.state().partitions.remove(partition);
        Ok(())
    }

    fn open_namespace(
        &self,
        partition: &str,
        namespace: &str,
    ) -> Result<Box<dyn Namespace>, StoreError> {
        check_name(namespace)?;
        if self.shared.fail_open.load(Ordering::SeqCst) {
            return Err(StoreError::Injected("namespace open"));
        }

        let state = self.shared.state();
        match state.partitions.get(partition) {
            Some(p) if p.initialized => {}
            _ => return Err(StoreError::PartitionNotInitialized(partition.to_string())),
        }

        Ok(Box::new(MemoryNamespace {
            shared: Arc::clone(&self.shared),
            partition: partition.to_string(),
            namespace: namespace.to_string(),
            staged: Entries::new(),
        }))
    }
}

struct MemoryNamespace {
    shared: Arc<Shared>,
    partition: String,
    namespace: String,
    staged: Entries,
}

impl Namespace for MemoryNamespace {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        self.shared.reads.fetch_add(1, Ordering::SeqCst);
        if let Some(value) = self.staged.get(key) {
            return Ok(Some(value.clone()));
        }

        let state = self.shared.state();
        let partition = state
            .partitions
            .get(&self.partition)
            .ok_or_else(|| StoreError::PartitionNotInitialized(self.partition.clone()))?;

        Ok(partition
            .namespaces
            .get(&self.namespace)
            .and_then(|entries| entries.get(key))
            .cloned())
    }

    fn set(&mut self, key: &str, value: Value) -> Result<(), StoreError> {
        check_name(key)?;
        if self.shared.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Injected("write"));
        }
        self.staged.insert(key.to_string(), value);
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        if self.staged.is_empty() {
            return Ok(());
        }

        let mut state = self.shared.state();
        let partition = state
            .partitions
            .get_mut(&self.partition)
            .ok_or_else(|| StoreError::PartitionNotInitialized(self.partition.clone()))?;

        partition
            .namespaces
            .entry(self.namespace.clone())
            .or_default()
            .append(&mut self.staged);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open(backend: &MemoryBackend, namespace: &str) -> Box<dyn Namespace> {
        backend.init_partition("nvs").expect("init partition");
        backend.open_namespace("nvs", namespace).expect("open namespace")
    }

    #[test]
    fn test_writes_are_staged_until_commit() {
        let backend = MemoryBackend::new();
        let mut ns = open(&backend, "app");

        ns.set("Port", Value::U16(9090)).unwrap();
        assert_eq!(ns.get("Port").unwrap(), Some(Value::U16(9090)));
        assert_eq!(backend.peek("nvs", "app", "Port"), None);

        ns.commit().unwrap();
        assert_eq!(backend.peek("nvs", "app", "Port"), Some(Value::U16(9090)));
    }

    #[test]
    fn test_namespaces_are_isolated() {
        let backend = MemoryBackend::new();
        let mut first = open(&backend, "first");
        let second = backend.open_namespace("nvs", "second").unwrap();

        first.set("Key", Value::U8(1)).unwrap();
        first.commit().unwrap();

        assert_eq!(second.get("Key").unwrap(), None);
    }

    #[test]
    fn test_open_requires_initialized_partition() {
        let backend = MemoryBackend::new();
        let result = backend.open_namespace("nvs", "app");
        assert!(matches!(
            result,
            Err(StoreError::PartitionNotInitialized(_))
        ));
    }

    #[test]
    fn test_erase_drops_contents() {
        let backend = MemoryBackend::new();
        backend.poke("nvs", "app", "Port", Value::U16(1));
        backend.erase_partition("nvs").unwrap();
        assert_eq!(backend.peek("nvs", "app", "Port"), None);
    }

    #[test]
    fn test_init_faults_are_consumed_in_order() {
        let backend = MemoryBackend::new();
        backend.push_init_fault(StoreError::NoFreePages);

        let err = backend.init_partition("nvs").unwrap_err();
        assert!(err.needs_erase());
        assert!(backend.init_partition("nvs").is_ok());
    }

    #[test]
    fn test_long_names_are_rejected() {
        let backend = MemoryBackend::new();
        assert!(matches!(
            backend.init_partition("a_partition_name_too_long"),
            Err(StoreError::InvalidName(_))
        ));

        let mut ns = open(&backend, "app");
        assert!(ns.set("SixteenBytesLong", Value::U8(0)).is_err());
        assert!(ns.set("FifteenBytesLon", Value::U8(0)).is_ok());
    }

    #[test]
    fn test_failed_writes_leave_store_untouched() {
        let backend = MemoryBackend::new();
        let mut ns = open(&backend, "app");
        backend.fail_writes(true);

        assert!(ns.set("Port", Value::U16(1)).is_err());
        ns.commit().unwrap();
        assert_eq!(backend.peek("nvs", "app", "Port"), None);
    }
}
