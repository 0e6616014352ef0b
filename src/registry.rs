use std::{fmt, sync::Arc};

use tracing::{debug, info, warn};

use crate::{
    error::Error,
    pref::Pref,
    session::Session,
    store::{Backend, StoreError, check_name},
    value::PrefValue,
};

/// Store key holding the schema version of a namespace. It can never be
/// declared as a variable.
pub const VERSION_KEY: &str = "CfgVersion";

/// Where a registry is in its init cycle.
///
/// Within one cycle the status only moves forward:
/// `NotInitialized -> InProgress -> Ok | Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Status {
    #[default]
    NotInitialized,
    InProgress,
    Ok,
    Failed,
}

/// Store binding and bookkeeping for one namespace.
///
/// A registry is embedded in a settings struct next to the [`Pref`]s it
/// declares. The struct implements [`Schema`](crate::Schema) to expose both,
/// and gains the lifecycle and string-keyed access of
/// [`Prefs`](crate::Prefs).
pub struct Registry {
    namespace: String,
    version: u32,
    backend: Arc<dyn Backend>,
    session: Session,
    keys: Vec<String>,
    partition: Option<String>,
    status: Status,
}

impl Registry {
    /// Creates a registry for `namespace` at schema `version`. Nothing is
    /// read from `backend` until [`Prefs::init`](crate::Prefs::init).
    pub fn new(
        namespace: impl Into<String>,
        version: u32,
        backend: Arc<dyn Backend>,
    ) -> Result<Self, Error> {
        let namespace = namespace.into();
        check_name(&namespace).map_err(|_| Error::InvalidName(namespace.clone()))?;

        Ok(Self {
            namespace,
            version,
            backend,
            session: Session::default(),
            keys: Vec::new(),
            partition: None,
            status: Status::NotInitialized,
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The schema version compiled into this registry.
    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn status(&self) -> Status {
        self.status
    }

    /// The partition of the open handle, if any.
    pub fn partition(&self) -> Option<&str> {
        self.partition.as_deref()
    }

    /// Every key declared through this registry, in declaration order.
    ///
    /// This includes variables a [`Schema`](crate::Schema) leaves out with
    /// `#[schema(skip)]`. [`Prefs::keys`](crate::Prefs::keys) lists only the
    /// ones reachable by the string-keyed accessors.
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Declares a variable stored under `key` in this registry's namespace.
    ///
    /// Fails if `key` is not 1 to 15 bytes long, is [`VERSION_KEY`], or was
    /// already declared.
    pub fn declare<T: PrefValue>(&mut self, key: &str, default: T) -> Result<Pref<T>, Error> {
        self.claim(key)?;
        Ok(Pref::from_parts(
            key,
            default,
            self.session.getter(),
            self.session.setter(),
        ))
    }

    /// Like [`declare`](Registry::declare), with caller-supplied storage glue.
    pub fn declare_with<T, G, S>(
        &mut self,
        key: &str,
        default: T,
        getter: G,
        setter: S,
    ) -> Result<Pref<T>, Error>
    where
        T: PrefValue,
        G: Fn(&str, T) -> T + Send + Sync + 'static,
        S: Fn(&str, &T) -> usize + Send + Sync + 'static,
    {
        self.claim(key)?;
        Ok(Pref::with_accessors(key, default, getter, setter))
    }

    fn claim(&mut self, key: &str) -> Result<(), Error> {
        check_name(key).map_err(|_| Error::InvalidName(key.to_string()))?;
        if key == VERSION_KEY {
            return Err(Error::ReservedKey(key.to_string()));
        }
        if self.keys.iter().any(|k| k == key) {
            return Err(Error::DuplicateKey(key.to_string()));
        }
        self.keys.push(key.to_string());
        Ok(())
    }

    /// Opens `partition` and this registry's namespace, returning the stored
    /// schema version (0 when none was ever written).
    pub(crate) fn begin(&mut self, partition: &str) -> Result<u32, Error> {
        if self.status == Status::InProgress || self.session.is_open() {
            return Err(Error::AlreadyInitialized(self.namespace.clone()));
        }

        self.status = Status::InProgress;
        match self.open(partition) {
            Ok(stored) => Ok(stored),
            Err(e) => {
                warn!(namespace = %self.namespace, error = %e, "Initialization failed");
                self.status = Status::Failed;
                Err(e)
            }
        }
    }

    fn open(&mut self, partition: &str) -> Result<u32, Error> {
        self.prepare(partition)
            .map_err(|source| Error::Partition {
                partition: partition.to_string(),
                source,
            })?;

        let handle = self
            .backend
            .open_namespace(partition, &self.namespace)
            .map_err(|source| Error::Namespace {
                namespace: self.namespace.clone(),
                source,
            })?;

        self.session.attach(handle);
        self.partition = Some(partition.to_string());

        let stored = self.session.get(VERSION_KEY, 0u32);
        debug!(namespace = %self.namespace, partition, stored, "Namespace opened");
        Ok(stored)
    }

    /// Initializes the partition, erasing it once if the store asks for that.
    fn prepare(&self, partition: &str) -> Result<(), StoreError> {
        check_name(partition)?;
        match self.backend.init_partition(partition) {
            Err(e) if e.needs_erase() => {
                warn!(partition, error = %e, "Erasing partition");
                self.backend.erase_partition(partition)?;
                self.backend.init_partition(partition)
            }
            result => result,
        }
    }

    /// Settles the status once the migration hook has run and records the
    /// compiled version if the hook succeeded.
    pub(crate) fn finish(&mut self, stored: u32, outcome: Result<(), Error>) -> Result<(), Error> {
        if let Err(e) = outcome {
            warn!(
                namespace = %self.namespace,
                stored,
                compiled = self.version,
                error = %e,
                "Migration hook failed, version left unchanged"
            );
            self.status = Status::Failed;
            return Err(e);
        }

        if stored != self.version {
            if self.session.put(VERSION_KEY, &self.version) == 0 {
                warn!(namespace = %self.namespace, "Could not record schema version");
            }
            self.session.commit();
            info!(
                namespace = %self.namespace,
                from = stored,
                to = self.version,
                "Schema version updated"
            );
        }

        self.status = Status::Ok;
        Ok(())
    }

    pub(crate) fn close(&mut self) {
        if self.session.detach() {
            debug!(namespace = %self.namespace, "Namespace closed");
        }
        self.partition = None;
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("namespace", &self.namespace)
            .field("version", &self.version)
            .field("partition", &self.partition)
            .field("status", &self.status)
            .field("keys", &self.keys)
            .finish_non_exhaustive()
    }
}
