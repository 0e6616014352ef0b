//! A [`Backend`] that keeps each partition in a TOML document on disk.
//!
//! Partition `nvs` under root `/var/lib/app` lives in `/var/lib/app/nvs.toml`:
//!
//! ```toml
//! format = 1
//!
//! [namespaces.net.Port]
//! type = "u16"
//! value = 9090
//!
//! [namespaces.net.Name]
//! type = "str"
//! value = "Device"
//! ```
//!
//! Every commit rewrites the document through [`AtomicFile`], so readers never
//! observe a half-written partition.
use std::{
    collections::{BTreeMap, HashSet},
    path::PathBuf,
    sync::{Mutex, PoisonError},
};

use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    atomic::AtomicFile,
    store::{Backend, Entries, Namespace, StoreError, check_name},
    value::Value,
};

/// Version of the on-disk layout. Partitions written with any other value are
/// reported as [`StoreError::NewVersionFound`].
pub const FORMAT_VERSION: u32 = 1;

pub const DEFAULT_MAX_ENTRIES: usize = 256;

#[derive(Debug, Clone, Builder)]
#[builder(build_fn(validate = "Self::validate"))]
pub struct FileBackendOptions {
    /// Directory holding one `<partition>.toml` per partition.
    #[builder(setter(into))]
    root: PathBuf,

    /// Capacity of a partition, summed over all of its namespaces.
    #[builder(default = "DEFAULT_MAX_ENTRIES")]
    max_entries: usize,
}

impl FileBackendOptionsBuilder {
    fn validate(&self) -> Result<(), String> {
        match self.max_entries {
            Some(0) => Err("max_entries must be at least 1".to_string()),
            _ => Ok(()),
        }
    }
}

impl FileBackendOptions {
    pub fn builder() -> FileBackendOptionsBuilder {
        FileBackendOptionsBuilder::default()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct PartitionDoc {
    format: u32,
    /// Entries are kept undecoded so that one bad entry only affects its own
    /// key.
    #[serde(default)]
    namespaces: BTreeMap<String, toml::Table>,
}

#[derive(Deserialize)]
struct Header {
    format: Option<u32>,
}

impl PartitionDoc {
    fn empty() -> Self {
        Self {
            format: FORMAT_VERSION,
            namespaces: BTreeMap::new(),
        }
    }

    fn parse(partition: &str, text: Option<&str>) -> Result<Self, StoreError> {
        let Some(text) = text else {
            return Ok(Self::empty());
        };

        let corrupted = |e: toml::de::Error| StoreError::Corrupted {
            partition: partition.to_string(),
            reason: e.to_string(),
        };

        let header: Header = toml::from_str(text).map_err(corrupted)?;
        if header.format != Some(FORMAT_VERSION) {
            return Err(StoreError::NewVersionFound);
        }
        toml::from_str(text).map_err(corrupted)
    }

    fn render(&self) -> Result<String, StoreError> {
        Ok(toml::to_string_pretty(self)?)
    }

    fn len(&self) -> usize {
        self.namespaces.values().map(|entries| entries.len()).sum()
    }
}

pub struct FileBackend {
    options: FileBackendOptions,
    initialized: Mutex<HashSet<String>>,
}

impl FileBackend {
    pub fn new(options: FileBackendOptions) -> Self {
        Self {
            options,
            initialized: Mutex::new(HashSet::new()),
        }
    }

    /// A backend rooted at `root` with default options.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, crate::Error> {
        Ok(Self::new(FileBackendOptions::builder().root(root).build()?))
    }

    fn file(&self, partition: &str) -> AtomicFile {
        AtomicFile::new(self.options.root.join(format!("{partition}.toml")))
    }

    fn mark(&self, partition: &str, initialized: bool) {
        let mut set = self
            .initialized
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if initialized {
            set.insert(partition.to_string());
        } else {
            set.remove(partition);
        }
    }

    fn is_initialized(&self, partition: &str) -> bool {
        self.initialized
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(partition)
    }
}

impl Backend for FileBackend {
    fn init_partition(&self, partition: &str) -> Result<(), StoreError> {
        check_name(partition)?;
        let file = self.file(partition);

        match file.read()? {
            Some(text) => {
                let doc = PartitionDoc::parse(partition, Some(text.as_str()))?;
                if doc.len() > self.options.max_entries {
                    return Err(StoreError::NoFreePages);
                }
            }
            None => file.write(&PartitionDoc::empty().render()?)?,
        }

        debug!(path = %file.path().display(), "Partition ready");
        self.mark(partition, true);
        Ok(())
    }

    fn erase_partition(&self, partition: &str) -> Result<(), StoreError> {
        check_name(partition)?;
        self.mark(partition, false);
        let file = self.file(partition);
        file.write(&PartitionDoc::empty().render()?)?;
        debug!(path = %file.path().display(), "Partition erased");
        Ok(())
    }

    fn open_namespace(
        &self,
        partition: &str,
        namespace: &str,
    ) -> Result<Box<dyn Namespace>, StoreError> {
        check_name(namespace)?;
        if !self.is_initialized(partition) {
            return Err(StoreError::PartitionNotInitialized(partition.to_string()));
        }

        Ok(Box::new(FileNamespace {
            file: self.file(partition),
            partition: partition.to_string(),
            namespace: namespace.to_string(),
            max_entries: self.options.max_entries,
            staged: Entries::new(),
        }))
    }
}

struct FileNamespace {
    file: AtomicFile,
    partition: String,
    namespace: String,
    max_entries: usize,
    staged: Entries,
}

impl FileNamespace {
    fn load(&self) -> Result<PartitionDoc, StoreError> {
        PartitionDoc::parse(&self.partition, self.file.read()?.as_deref())
    }
}

impl Namespace for FileNamespace {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        if let Some(value) = self.staged.get(key) {
            return Ok(Some(value.clone()));
        }

        let mut doc = self.load()?;
        let Some(raw) = doc
            .namespaces
            .get_mut(&self.namespace)
            .and_then(|entries| entries.remove(key))
        else {
            return Ok(None);
        };

        raw.try_into::<Value>()
            .map(Some)
            .map_err(|e| StoreError::Corrupted {
                partition: self.partition.clone(),
                reason: format!("{}.{key}: {e}", self.namespace),
            })
    }

    fn set(&mut self, key: &str, value: Value) -> Result<(), StoreError> {
        check_name(key)?;

        let doc = self.load()?;
        let committed = doc.namespaces.get(&self.namespace);
        let is_new = |k: &str| !committed.is_some_and(|entries| entries.contains_key(k));

        let mut pending = self.staged.keys().filter(|k| is_new(k.as_str())).count();
        if is_new(key) && !self.staged.contains_key(key) {
            pending += 1;
        }
        if doc.len() + pending > self.max_entries {
            return Err(StoreError::NotEnoughSpace(key.to_string()));
        }

        self.staged.insert(key.to_string(), value);
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        if self.staged.is_empty() {
            return Ok(());
        }

        let staged = std::mem::take(&mut self.staged);
        let result = self.file.update(|text| {
            let mut doc = PartitionDoc::parse(&self.partition, text.as_deref())?;
            let entries = doc.namespaces.entry(self.namespace.clone()).or_default();
            for (key, value) in &staged {
                entries.insert(key.clone(), toml::Value::try_from(value)?);
            }
            doc.render()
        });

        if result.is_err() {
            self.staged = staged;
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(dir: &tempfile::TempDir, max_entries: usize) -> FileBackend {
        let options = FileBackendOptions::builder()
            .root(dir.path())
            .max_entries(max_entries)
            .build()
            .unwrap();
        FileBackend::new(options)
    }

    #[test]
    fn test_builder_requires_root() {
        assert!(FileBackendOptions::builder().build().is_err());
    }

    #[test]
    fn test_builder_rejects_zero_capacity() {
        let result = FileBackendOptions::builder()
            .root("/tmp")
            .max_entries(0)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_init_creates_partition_file() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(&dir, 8);
        backend.init_partition("nvs").unwrap();

        let text = std::fs::read_to_string(dir.path().join("nvs.toml")).unwrap();
        assert!(text.contains("format = 1"));
    }

    #[test]
    fn test_commit_persists_typed_entries() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(&dir, 8);
        backend.init_partition("nvs").unwrap();

        let mut ns = backend.open_namespace("nvs", "net").unwrap();
        ns.set("Port", Value::U16(9090)).unwrap();
        ns.set("Big", Value::U64(u64::MAX)).unwrap();
        ns.commit().unwrap();

        let reopened = backend.open_namespace("nvs", "net").unwrap();
        assert_eq!(reopened.get("Port").unwrap(), Some(Value::U16(9090)));
        assert_eq!(reopened.get("Big").unwrap(), Some(Value::U64(u64::MAX)));
    }

    #[test]
    fn test_unknown_format_needs_erase() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("nvs.toml"), "format = 99\n").unwrap();

        let backend = backend(&dir, 8);
        let err = backend.init_partition("nvs").unwrap_err();
        assert!(matches!(err, StoreError::NewVersionFound));

        backend.erase_partition("nvs").unwrap();
        backend.init_partition("nvs").unwrap();
    }

    #[test]
    fn test_garbage_is_corrupted_not_erasable() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("nvs.toml"), "this is [not toml").unwrap();

        let err = backend(&dir, 8).init_partition("nvs").unwrap_err();
        assert!(matches!(err, StoreError::Corrupted { .. }));
        assert!(!err.needs_erase());
    }

    #[test]
    fn test_bad_entry_only_fails_its_own_key() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("nvs.toml"),
            "format = 1\n\n[namespaces.net.Port]\ntype = \"u16\"\nvalue = 70000\n\n\
             [namespaces.net.Name]\ntype = \"str\"\nvalue = \"Sensor\"\n",
        )
        .unwrap();

        let backend = backend(&dir, 8);
        backend.init_partition("nvs").unwrap();

        let mut ns = backend.open_namespace("nvs", "net").unwrap();
        assert!(matches!(ns.get("Port"), Err(StoreError::Corrupted { .. })));
        assert_eq!(ns.get("Name").unwrap(), Some(Value::Str("Sensor".into())));

        ns.set("Port", Value::U16(9090)).unwrap();
        ns.commit().unwrap();
        assert_eq!(ns.get("Port").unwrap(), Some(Value::U16(9090)));
    }

    #[test]
    fn test_capacity_is_enforced_on_write() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(&dir, 2);
        backend.init_partition("nvs").unwrap();

        let mut ns = backend.open_namespace("nvs", "app").unwrap();
        ns.set("A", Value::U8(1)).unwrap();
        ns.set("B", Value::U8(2)).unwrap();
        ns.set("A", Value::U8(3)).unwrap();
        assert!(matches!(
            ns.set("C", Value::U8(4)),
            Err(StoreError::NotEnoughSpace(_))
        ));
    }

    #[test]
    fn test_overfull_partition_reports_no_free_pages() {
        let dir = tempfile::tempdir().unwrap();
        {
            let roomy = backend(&dir, 8);
            roomy.init_partition("nvs").unwrap();
            let mut ns = roomy.open_namespace("nvs", "app").unwrap();
            for key in ["A", "B", "C"] {
                ns.set(key, Value::U8(0)).unwrap();
            }
            ns.commit().unwrap();
        }

        let cramped = backend(&dir, 2);
        let err = cramped.init_partition("nvs").unwrap_err();
        assert!(err.needs_erase());
    }

    #[test]
    fn test_open_before_init_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = backend(&dir, 8).open_namespace("nvs", "app");
        assert!(matches!(
            result,
            Err(StoreError::PartitionNotInitialized(_))
        ));
    }
}
