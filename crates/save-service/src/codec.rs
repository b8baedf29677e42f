//! Record text format
//!
//! Records are stored as pretty-printed JSON. When a cipher is supplied the
//! whole text is transformed before writing and restored before parsing.

use serde::{de::DeserializeOwned, Serialize};
use storage::{Encryption, EncryptionError};
use thiserror::Error;

/// Codec error types
#[derive(Debug, Error)]
pub enum CodecError {
    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Stored text could not be decrypted
    #[error("Encryption error: {0}")]
    Encryption(#[from] EncryptionError),
}

/// Result type for codec operations
pub type Result<T> = std::result::Result<T, CodecError>;

/// Serialize `value`, encrypting the text when `cipher` is given
pub fn encode<T: Serialize>(value: &T, cipher: Option<&dyn Encryption>) -> Result<String> {
    let json = serde_json::to_string_pretty(value)?;
    Ok(match cipher {
        Some(cipher) => cipher.encrypt(&json),
        None => json,
    })
}

/// Reverse [`encode`]
pub fn decode<T: DeserializeOwned>(content: &str, cipher: Option<&dyn Encryption>) -> Result<T> {
    match cipher {
        Some(cipher) => {
            let json = cipher.decrypt(content)?;
            Ok(serde_json::from_str(&json)?)
        }
        None => Ok(serde_json::from_str(content)?),
    }
}
