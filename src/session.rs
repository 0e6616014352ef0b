use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::{store::Namespace, value::PrefValue};

/// Reads `key`, returning the given default when it cannot.
pub type Getter<T> = Box<dyn Fn(&str, T) -> T + Send + Sync>;

/// Persists `key` and returns the number of bytes written, 0 on failure.
pub type Setter<T> = Box<dyn Fn(&str, &T) -> usize + Send + Sync>;

/// Typed access to the namespace handle of one registry.
///
/// The registry opens and closes the handle; every [`Pref`](crate::Pref) it
/// declares holds accessors that reach the handle through a clone of this
/// session. None of the methods fail: while no handle is open, reads return
/// their default and writes report 0 bytes.
#[derive(Clone, Default)]
pub struct Session {
    handle: Arc<Mutex<Option<Box<dyn Namespace>>>>,
}

impl Session {
    fn lock(&self) -> MutexGuard<'_, Option<Box<dyn Namespace>>> {
        self.handle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn attach(&self, namespace: Box<dyn Namespace>) {
        *self.lock() = Some(namespace);
    }

    /// Drops the handle. Returns whether one was open.
    pub(crate) fn detach(&self) -> bool {
        self.lock().take().is_some()
    }

    pub fn is_open(&self) -> bool {
        self.lock().is_some()
    }

    pub fn get<T: PrefValue>(&self, key: &str, default: T) -> T {
        let guard = self.lock();
        let Some(handle) = guard.as_ref() else {
            debug!(key, "No open namespace, using default");
            return default;
        };

        match handle.get(key) {
            Ok(Some(value)) => T::from_value(value).unwrap_or_else(|| {
                debug!(key, "Stored type does not match, using default");
                default
            }),
            Ok(None) => default,
            Err(e) => {
                debug!(key, error = %e, "Read failed, using default");
                default
            }
        }
    }

    pub fn put<T: PrefValue>(&self, key: &str, value: &T) -> usize {
        let mut guard = self.lock();
        let Some(handle) = guard.as_mut() else {
            warn!(key, "No open namespace, write dropped");
            return 0;
        };

        let value = value.to_value();
        let written = value.encoded_len();
        match handle.set(key, value) {
            Ok(()) => written,
            Err(e) => {
                warn!(key, error = %e, "Write failed");
                0
            }
        }
    }

    /// Flushes staged writes. Failures are logged, not returned.
    pub fn commit(&self) {
        debug!("Committing changes");
        if let Some(handle) = self.lock().as_mut() {
            if let Err(e) = handle.commit() {
                warn!(error = %e, "Error committing changes");
            }
        }
    }

    pub fn getter<T: PrefValue>(&self) -> Getter<T> {
        let session = self.clone();
        Box::new(move |key: &str, default: T| session.get(key, default))
    }

    /// A setter that writes and commits in one step.
    pub fn setter<T: PrefValue>(&self) -> Setter<T> {
        let session = self.clone();
        Box::new(move |key: &str, value: &T| {
            let written = session.put(key, value);
            session.commit();
            written
        })
    }
}
