//! Lifecycle, migration and string-keyed access for a settings struct.
//!
//! A settings struct embeds a [`Registry`] and declares its [`Pref`](crate::Pref)s through
//! it. Implementing [`Schema`] (usually with `#[derive(Schema)]`) tells the
//! crate where those live; implementing [`Prefs`] supplies the migration hook
//! and unlocks everything else.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use next_prefs::{Error, MemoryBackend, Pref, Prefs, Registry, Schema};
//!
//! #[derive(Schema)]
//! struct NetPrefs {
//!     registry: Registry,
//!     port: Pref<u16>,
//!     name: Pref<String>,
//! }
//!
//! impl NetPrefs {
//!     fn new(backend: Arc<MemoryBackend>) -> Result<Self, Error> {
//!         let mut registry = Registry::new("net", 1, backend)?;
//!         Ok(Self {
//!             port: registry.declare("Port", 8080)?,
//!             name: registry.declare("Name", "Device".to_string())?,
//!             registry,
//!         })
//!     }
//! }
//!
//! impl Prefs for NetPrefs {
//!     fn on_init(&mut self, stored: u32, _compiled: u32) -> Result<(), Error> {
//!         if stored == 0 {
//!             self.reset()?;
//!         }
//!         Ok(())
//!     }
//!
//!     fn reset(&mut self) -> Result<(), Error> {
//!         self.restore_defaults();
//!         Ok(())
//!     }
//! }
//!
//! let backend = Arc::new(MemoryBackend::new());
//! let mut prefs = NetPrefs::new(backend.clone())?;
//! prefs.init()?;
//!
//! prefs.port.set(9090);
//! assert_eq!(prefs.get_as_string("Name"), "Device");
//! assert_eq!(prefs.set_from_string("Name", "Sensor"), 7);
//!
//! // Same store, fresh process
//! let mut prefs = NetPrefs::new(backend)?;
//! prefs.init()?;
//! assert_eq!(*prefs.port, 9090);
//! assert_eq!(*prefs.name, "Sensor");
//! # Ok::<(), next_prefs::Error>(())
//! ```
use tracing::debug;

use crate::{
    error::Error,
    pref::Variable,
    registry::{Registry, Status},
    store::DEFAULT_PARTITION,
};

/// Where a settings struct keeps its registry and variables.
///
/// `variables` and `variables_mut` must list the same variables in the same
/// order; that order is the one reported by [`Prefs::values`].
pub trait Schema {
    fn registry(&self) -> &Registry;

    fn registry_mut(&mut self) -> &mut Registry;

    fn variables(&self) -> Vec<&dyn Variable>;

    fn variables_mut(&mut self) -> Vec<&mut dyn Variable>;
}

pub trait Prefs: Schema {
    /// Migration hook, run by every [`init`](Prefs::init) once the namespace
    /// is open, whether or not the versions differ.
    ///
    /// `stored_version` is 0 on first use or after the partition was erased.
    /// Returning an error fails the init and leaves the stored version as it
    /// was, so the next init retries the same migration.
    fn on_init(&mut self, stored_version: u32, compiled_version: u32) -> Result<(), Error> {
        let _ = (stored_version, compiled_version);
        Ok(())
    }

    /// Returns every variable to its default. Not called by the crate itself;
    /// the default does nothing. Overrides typically call
    /// [`restore_defaults`](Prefs::restore_defaults).
    fn reset(&mut self) -> Result<(), Error> {
        Ok(())
    }

    /// [`init_in`](Prefs::init_in) on the default partition.
    fn init(&mut self) -> Result<(), Error> {
        self.init_in(DEFAULT_PARTITION)
    }

    /// Opens the store and runs the migration hook.
    ///
    /// 1. Initializes `partition`, erasing it and retrying once if the store
    ///    reports it full or written by an incompatible format.
    /// 2. Opens the namespace and reads the stored schema version.
    /// 3. Calls [`on_init`](Prefs::on_init) with the stored and compiled
    ///    versions.
    /// 4. If the hook succeeded and the versions differ, records the compiled
    ///    version.
    ///
    /// Fails with [`Error::AlreadyInitialized`] while a handle is open; call
    /// [`end`](Prefs::end) before initializing again.
    fn init_in(&mut self, partition: &str) -> Result<(), Error> {
        let stored = self.registry_mut().begin(partition)?;
        let compiled = self.registry().version();
        debug!(stored, compiled, "Running migration hook");

        let outcome = self.on_init(stored, compiled);
        self.registry_mut().finish(stored, outcome)
    }

    /// Releases the store handle. Calling it again is a no-op.
    fn end(&mut self) {
        self.registry_mut().close();
    }

    fn status(&self) -> Status {
        self.registry().status()
    }

    /// Calls `set_default` on every variable and returns the total bytes
    /// written.
    fn restore_defaults(&mut self) -> usize {
        self.variables_mut()
            .into_iter()
            .map(|var| var.set_default())
            .sum()
    }

    /// The current value of `key` as text, or an empty string if no variable
    /// has that key.
    fn get_as_string(&self, key: &str) -> String {
        self.variables()
            .into_iter()
            .find(|var| var.key() == key)
            .map(|var| var.value_string())
            .unwrap_or_default()
    }

    /// Parses `text` into the variable with `key` and stores it. Returns the
    /// bytes written, 0 if no variable has that key.
    fn set_from_string(&mut self, key: &str, text: &str) -> usize {
        self.variables_mut()
            .into_iter()
            .find(|var| var.key() == key)
            .map_or(0, |var| var.set_from_str(text))
    }

    /// Writes the value of `key` into `buf` as NUL-terminated text. Returns
    /// `false` if no variable has that key or `buf` is too small.
    fn copy_as_string_into(&self, key: &str, buf: &mut [u8]) -> bool {
        self.variables()
            .into_iter()
            .find(|var| var.key() == key)
            .is_some_and(|var| var.write_str_into(buf))
    }

    fn keys(&self) -> Vec<&str> {
        self.variables().into_iter().map(|var| var.key()).collect()
    }

    /// Every variable as `(key, value)` text pairs, in declaration order.
    fn values(&self) -> Vec<(String, String)> {
        self.variables()
            .into_iter()
            .map(|var| (var.key().to_string(), var.value_string()))
            .collect()
    }
}
