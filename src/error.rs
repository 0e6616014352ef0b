use thiserror::Error;

use crate::{file::FileBackendOptionsBuilderError, store::StoreError};

#[derive(Debug, Error)]
pub enum Error {
    #[error("Store: {0}")]
    Store(#[from] StoreError),

    #[error("Backend options: {0}")]
    Options(#[from] FileBackendOptionsBuilderError),

    /// A partition, namespace or key name is empty or longer than
    /// [`MAX_NAME_LEN`](crate::MAX_NAME_LEN) bytes.
    #[error("Invalid name {0:?}: must be 1 to 15 bytes")]
    InvalidName(String),

    /// Attempted to declare a variable under the key that holds the schema
    /// version of the namespace.
    ///
    /// # How to Fix
    ///
    /// Pick any other key. `CfgVersion` is owned by the registry:
    ///
    /// ```rust
    /// use std::sync::Arc;
    /// use next_prefs::{MemoryBackend, Registry};
    ///
    /// let mut registry = Registry::new("app", 1, Arc::new(MemoryBackend::new()))?;
    /// assert!(registry.declare("CfgVersion", 0u32).is_err());
    /// assert!(registry.declare("AppVersion", 0u32).is_ok());
    /// # Ok::<(), next_prefs::Error>(())
    /// ```
    #[error("Key {0:?} is reserved")]
    ReservedKey(String),

    #[error("Key {0:?} is declared twice")]
    DuplicateKey(String),

    /// `init` was called while a store handle is still open, or from inside
    /// the migration hook. Call [`Prefs::end`](crate::Prefs::end) first.
    #[error("Namespace {0:?} is already initialized")]
    AlreadyInitialized(String),

    #[error("Partition {partition:?}: {source}")]
    Partition {
        partition: String,
        #[source]
        source: StoreError,
    },

    #[error("Namespace {namespace:?}: {source}")]
    Namespace {
        namespace: String,
        #[source]
        source: StoreError,
    },

    /// Returned by a migration hook to abort initialization. The stored schema
    /// version is left untouched so the next `init` runs the same migration.
    #[error("Migration from v{stored} to v{compiled} failed: {reason}")]
    Migration {
        stored: u32,
        compiled: u32,
        reason: String,
    },
}

impl Error {
    pub fn migration(stored: u32, compiled: u32, reason: impl Into<String>) -> Self {
        Error::Migration {
            stored,
            compiled,
            reason: reason.into(),
        }
    }
}
