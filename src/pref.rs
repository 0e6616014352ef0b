use std::{fmt, ops::Deref, sync::OnceLock};

use crate::{
    session::{Getter, Setter},
    value::PrefValue,
};

/// A named, typed setting bound to the store of the registry that declared it.
///
/// The value is read from the store the first time it is needed and cached
/// from then on; later changes to the store made behind the registry's back
/// are not seen until the process restarts. Writes go straight through to the
/// store and always update the cache, even when the store rejects them.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use next_prefs::{MemoryBackend, Registry};
///
/// let mut registry = Registry::new("net", 1, Arc::new(MemoryBackend::new()))?;
/// let mut port = registry.declare("Port", 8080u16)?;
///
/// assert_eq!(*port.get(), 8080);
/// port.set(9090);
/// assert_eq!(*port, 9090);
/// assert_eq!(port.to_string(), "9090");
/// # Ok::<(), next_prefs::Error>(())
/// ```
pub struct Pref<T: PrefValue> {
    key: String,
    default: T,
    cache: OnceLock<T>,
    getter: Getter<T>,
    setter: Setter<T>,
}

impl<T: PrefValue> Pref<T> {
    /// Builds a variable around arbitrary storage glue.
    ///
    /// Most variables come from [`Registry::declare`](crate::Registry::declare),
    /// which wires them to the registry's store. The getter must return the
    /// default it is given whenever it cannot produce a stored value; the
    /// setter returns the number of bytes it persisted, 0 on failure.
    pub fn with_accessors<G, S>(key: impl Into<String>, default: T, getter: G, setter: S) -> Self
    where
        G: Fn(&str, T) -> T + Send + Sync + 'static,
        S: Fn(&str, &T) -> usize + Send + Sync + 'static,
    {
        Self::from_parts(key, default, Box::new(getter), Box::new(setter))
    }

    pub(crate) fn from_parts(
        key: impl Into<String>,
        default: T,
        getter: Getter<T>,
        setter: Setter<T>,
    ) -> Self {
        Self {
            key: key.into(),
            default,
            cache: OnceLock::new(),
            getter,
            setter,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn default_value(&self) -> &T {
        &self.default
    }

    /// Whether the value has been read from or written to the store yet.
    pub fn is_materialized(&self) -> bool {
        self.cache.get().is_some()
    }

    pub fn get(&self) -> &T {
        self.cache
            .get_or_init(|| (self.getter)(&self.key, self.default.clone()))
    }

    /// Persists `value` and caches it.
    ///
    /// Returns the bytes written by the store, 0 if the write failed. The
    /// cached value is replaced either way.
    pub fn set(&mut self, value: T) -> usize {
        let written = (self.setter)(&self.key, &value);
        self.cache = OnceLock::from(value);
        written
    }

    /// Persists and caches the declared default without reading the store
    /// first.
    pub fn set_default(&mut self) -> usize {
        self.set(self.default.clone())
    }

    /// Parses `text` and stores the result, see [`PrefValue::parse_text`].
    pub fn set_from_str(&mut self, text: &str) -> usize {
        self.set(T::parse_text(text))
    }

    /// Writes the rendered value into `buf` followed by a NUL byte.
    ///
    /// Returns `false` and leaves `buf` untouched when it is too small to
    /// hold both.
    pub fn write_str_into(&self, buf: &mut [u8]) -> bool {
        copy_terminated(&self.to_string(), buf)
    }
}

fn copy_terminated(text: &str, buf: &mut [u8]) -> bool {
    let bytes = text.as_bytes();
    if bytes.len() >= buf.len() {
        return false;
    }
    buf[..bytes.len()].copy_from_slice(bytes);
    buf[bytes.len()] = 0;
    true
}

impl<T: PrefValue> Deref for Pref<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.get()
    }
}

impl<T: PrefValue> fmt::Display for Pref<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self.get(), f)
    }
}

impl<T: PrefValue> fmt::Debug for Pref<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pref")
            .field("key", &self.key)
            .field("default", &self.default)
            .field("cache", &self.cache.get())
            .finish()
    }
}

/// Type-erased view of a [`Pref`], used by the string-keyed surface of
/// [`Prefs`](crate::Prefs).
pub trait Variable: Send + Sync {
    fn key(&self) -> &str;

    fn value_string(&self) -> String;

    fn set_from_str(&mut self, text: &str) -> usize;

    fn write_str_into(&self, buf: &mut [u8]) -> bool;

    fn set_default(&mut self) -> usize;
}

impl<T: PrefValue> Variable for Pref<T> {
    fn key(&self) -> &str {
        Pref::key(self)
    }

    fn value_string(&self) -> String {
        self.to_string()
    }

    fn set_from_str(&mut self, text: &str) -> usize {
        Pref::set_from_str(self, text)
    }

    fn write_str_into(&self, buf: &mut [u8]) -> bool {
        Pref::write_str_into(self, buf)
    }

    fn set_default(&mut self) -> usize {
        Pref::set_default(self)
    }
}
