//! Storage provider errors

use std::time::Duration;
use thiserror::Error;

/// Errors returned by local and cloud storage providers
#[derive(Debug, Error)]
pub enum StorageError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Key cannot be mapped onto the backing store
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Provider has no authenticated session
    #[error("Storage provider unavailable: {0}")]
    Unavailable(String),

    /// Remote backend rejected or failed the request
    #[error("Remote storage error: {0}")]
    Remote(String),

    /// Operation exceeded its deadline
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),
}

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;
