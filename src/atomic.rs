use std::{
    fs::{File, OpenOptions},
    io::{ErrorKind, Read, Write},
    path::{Path, PathBuf},
};

use fs2::FileExt;
use tempfile::NamedTempFile;

/// Advisory lock held on a sidecar `.lock` file, so the lock survives the
/// rename that replaces the data file.
struct FileLock {
    _file: File,
}

impl FileLock {
    fn open(path: &Path) -> std::io::Result<File> {
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
    }

    fn exclusive(path: &Path) -> std::io::Result<Self> {
        let file = Self::open(path)?;
        // Blocks until exclusive lock is acquired
        file.lock_exclusive()?;
        Ok(Self { _file: file })
    }

    fn shared(path: &Path) -> std::io::Result<Self> {
        let file = Self::open(path)?;
        FileExt::lock_shared(&file)?;
        Ok(Self { _file: file })
    }
}

/// A file that is only ever replaced whole, never modified in place.
pub struct AtomicFile {
    path: PathBuf,
    lock_path: PathBuf,
}

impl AtomicFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut lock_path = path.clone().into_os_string();
        lock_path.push(".lock");
        Self {
            path,
            lock_path: lock_path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the contents, or `None` if the file does not exist yet.
    pub fn read(&self) -> std::io::Result<Option<String>> {
        self.ensure_dir()?;
        let _lock = FileLock::shared(&self.lock_path)?;
        self.read_unlocked()
    }

    pub fn write(&self, contents: &str) -> std::io::Result<()> {
        self.ensure_dir()?;
        let _lock = FileLock::exclusive(&self.lock_path)?;
        self.write_unlocked(contents)
    }

    /// Reads, transforms and writes back the contents under one exclusive
    /// lock. Nothing is written if `f` fails.
    pub fn update<E, F>(&self, f: F) -> Result<(), E>
    where
        E: From<std::io::Error>,
        F: FnOnce(Option<String>) -> Result<String, E>,
    {
        self.ensure_dir()?;
        let _lock = FileLock::exclusive(&self.lock_path)?;
        let contents = f(self.read_unlocked()?)?;
        self.write_unlocked(&contents)?;
        Ok(())
    }

    fn ensure_dir(&self) -> std::io::Result<()> {
        match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => std::fs::create_dir_all(dir),
            _ => Ok(()),
        }
    }

    fn read_unlocked(&self) -> std::io::Result<Option<String>> {
        let mut file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };

        let mut buf = String::new();
        file.read_to_string(&mut buf)?;
        Ok(Some(buf))
    }

    fn write_unlocked(&self, contents: &str) -> std::io::Result<()> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let mut tmp = NamedTempFile::new_in(dir)?;

        tmp.write_all(contents.as_bytes())?;
        tmp.flush()?;
        tmp.as_file().sync_all()?;

        tmp.persist(&self.path)?;

        Ok(())
    }
}
