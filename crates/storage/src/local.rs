//! File-backed local storage
//!
//! Every key maps to one file inside the device's private data directory.
//! Writes go through a temp file and a rename so a crash never leaves a
//! half-written record behind.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::error::{Result, StorageError};
use crate::provider::LocalStorage;

/// Local storage configuration
#[derive(Debug, Clone)]
pub struct FileStorageConfig {
    /// Directory holding one file per key
    pub root: PathBuf,
    /// Enable atomic writes with temp files
    pub atomic_writes: bool,
}

impl FileStorageConfig {
    /// Create a new configuration rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), atomic_writes: true }
    }

    /// Enable or disable atomic writes
    pub fn atomic_writes(mut self, enabled: bool) -> Self {
        self.atomic_writes = enabled;
        self
    }
}

/// Local storage provider writing plain files
#[derive(Debug, Clone)]
pub struct FileStorage {
    config: FileStorageConfig,
}

impl FileStorage {
    /// Open (and create if needed) the storage directory
    pub fn new(config: FileStorageConfig) -> Result<Self> {
        fs::create_dir_all(&config.root)?;
        tracing::debug!(root = %config.root.display(), "local storage ready");
        Ok(Self { config })
    }

    /// Open storage rooted at `root` with default settings
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        Self::new(FileStorageConfig::new(root))
    }

    /// Directory backing this store
    pub fn root(&self) -> &Path {
        &self.config.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty()
            || key == "."
            || key.contains("..")
            || key.contains('/')
            || key.contains('\\')
        {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.config.root.join(key))
    }

    /// Write atomically using temp file + rename
    fn write_atomic(path: &Path, contents: &str) -> Result<()> {
        let temp_path = path.with_extension("tmp");

        let mut file = fs::File::create(&temp_path)?;
        file.write_all(contents.as_bytes())?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, path)?;
        Ok(())
    }
}

impl LocalStorage for FileStorage {
    fn read(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key)?;
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, key: &str, content: &str) -> Result<()> {
        let path = self.path_for(key)?;
        if self.config.atomic_writes {
            Self::write_atomic(&path, content)
        } else {
            fs::write(&path, content)?;
            Ok(())
        }
    }

    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.path_for(key)?.is_file())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
