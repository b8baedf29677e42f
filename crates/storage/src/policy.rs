//! Storage policy table
//!
//! Maps each persisted record to the backend(s) it lives in and whether its
//! text is encrypted. The record set is closed: [`RecordKey`] names every key
//! the save system knows, so an unknown key cannot reach the providers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Every persisted record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKey {
    /// Device-wide game settings
    Settings,
    /// Per-user unlocks and achievements
    Progress,
    /// Per-user statistics and currency
    Stats,
}

impl RecordKey {
    /// All record keys, in storage order
    pub const ALL: [RecordKey; 3] = [RecordKey::Settings, RecordKey::Progress, RecordKey::Stats];

    /// Storage key / file name of the record
    pub fn file_name(&self) -> &'static str {
        match self {
            RecordKey::Settings => "settings.json",
            RecordKey::Progress => "progress.json",
            RecordKey::Stats => "stats.json",
        }
    }

    /// Whether the record belongs to the signed-in user rather than the device
    pub fn is_user_scoped(&self) -> bool {
        !matches!(self, RecordKey::Settings)
    }

    fn index(&self) -> usize {
        match self {
            RecordKey::Settings => 0,
            RecordKey::Progress => 1,
            RecordKey::Stats => 2,
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_name())
    }
}

/// Error returned when parsing an unknown record key
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown record key: {0}")]
pub struct UnknownRecordKey(pub String);

impl FromStr for RecordKey {
    type Err = UnknownRecordKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RecordKey::ALL
            .into_iter()
            .find(|key| key.file_name() == s)
            .ok_or_else(|| UnknownRecordKey(s.to_string()))
    }
}

/// Where a record is stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StorageStrategy {
    /// Device storage only
    #[default]
    LocalOnly,
    /// Cloud storage only; skipped while signed out
    CloudOnly,
    /// Written locally first, then pushed to the cloud in the background
    CloudWithCache,
}

impl StorageStrategy {
    /// Whether records with this strategy are pushed to the cloud
    pub fn uses_cloud(&self) -> bool {
        !matches!(self, StorageStrategy::LocalOnly)
    }
}

impl fmt::Display for StorageStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageStrategy::LocalOnly => write!(f, "local-only"),
            StorageStrategy::CloudOnly => write!(f, "cloud-only"),
            StorageStrategy::CloudWithCache => write!(f, "cloud-with-cache"),
        }
    }
}

/// Storage configuration of one record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Record this entry applies to
    pub key: RecordKey,
    /// Backend dispatch strategy
    pub strategy: StorageStrategy,
    /// Encrypt the serialized text before writing
    pub encrypt: bool,
}

impl StorageConfig {
    /// Create a new entry
    pub fn new(key: RecordKey, strategy: StorageStrategy, encrypt: bool) -> Self {
        Self { key, strategy, encrypt }
    }

    /// Entry used for records nobody configured
    pub fn local_only(key: RecordKey) -> Self {
        Self::new(key, StorageStrategy::LocalOnly, false)
    }
}

/// Fixed table of storage configurations, one per [`RecordKey`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoragePolicy {
    entries: [StorageConfig; 3],
}

impl Default for StoragePolicy {
    /// Everything local, nothing encrypted
    fn default() -> Self {
        Self { entries: RecordKey::ALL.map(StorageConfig::local_only) }
    }
}

impl StoragePolicy {
    /// Shipping configuration: settings stay on the device, user progress and
    /// stats are cached locally, synced to the cloud and encrypted
    pub fn standard() -> Self {
        Self::default()
            .with(RecordKey::Progress, StorageStrategy::CloudWithCache, true)
            .with(RecordKey::Stats, StorageStrategy::CloudWithCache, true)
    }

    /// Register or replace the configuration of `key`
    pub fn with(mut self, key: RecordKey, strategy: StorageStrategy, encrypt: bool) -> Self {
        self.entries[key.index()] = StorageConfig::new(key, strategy, encrypt);
        self
    }

    /// Same strategies with encryption turned off for every record
    pub fn without_encryption(mut self) -> Self {
        for entry in &mut self.entries {
            entry.encrypt = false;
        }
        self
    }

    /// Configuration of `key`
    pub fn config(&self, key: RecordKey) -> StorageConfig {
        self.entries[key.index()]
    }

    /// Records whose strategy involves the cloud
    pub fn cloud_keys(&self) -> impl Iterator<Item = RecordKey> + '_ {
        self.entries
            .iter()
            .filter(|config| config.strategy.uses_cloud())
            .map(|config| config.key)
    }
}
