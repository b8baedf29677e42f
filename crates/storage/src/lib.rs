//! Storage layer for the save system
//!
//! This crate provides the local and cloud storage providers, the optional
//! encryption transform, the per-record storage policy and cloud sync status
//! tracking.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cloud;
pub mod encryption;
pub mod error;
pub mod local;
pub mod policy;
pub mod provider;
pub mod sync;

pub use cloud::{DisabledCloud, MemoryCloudConfig, MemoryCloudStorage};
pub use encryption::{Encryption, EncryptionError, XorCipher};
pub use error::{Result, StorageError};
pub use local::{FileStorage, FileStorageConfig};
pub use policy::{RecordKey, StorageConfig, StoragePolicy, StorageStrategy, UnknownRecordKey};
pub use provider::{CloudStorage, LocalStorage};
pub use sync::{SyncStatus, SyncTicket, SyncTracker};
