//! Reversible string transforms applied to stored record text

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use thiserror::Error;

/// Encryption error types
#[derive(Debug, Error)]
pub enum EncryptionError {
    /// Ciphertext is not valid base64
    #[error("Invalid ciphertext encoding: {0}")]
    InvalidEncoding(#[from] base64::DecodeError),

    /// Decrypted bytes are not valid UTF-8
    #[error("Decrypted content is not valid UTF-8")]
    InvalidUtf8,

    /// Cipher constructed without key material
    #[error("Encryption key must not be empty")]
    EmptyKey,
}

/// Result type for encryption operations
pub type Result<T> = std::result::Result<T, EncryptionError>;

/// A pure, stateless, reversible transform: `decrypt(encrypt(x)) == x`
pub trait Encryption: Send + Sync {
    /// Transform plaintext into storable ciphertext
    fn encrypt(&self, plaintext: &str) -> String;

    /// Reverse [`Encryption::encrypt`]
    fn decrypt(&self, ciphertext: &str) -> Result<String>;
}

/// Repeating-key XOR over the UTF-8 bytes, base64 encoded
///
/// This is obfuscation against casual save editing, not confidentiality.
#[derive(Clone)]
pub struct XorCipher {
    key: Vec<u8>,
}

impl XorCipher {
    /// Create a cipher from key material supplied by the caller
    pub fn new(key: impl AsRef<[u8]>) -> Result<Self> {
        let key = key.as_ref().to_vec();
        if key.is_empty() {
            return Err(EncryptionError::EmptyKey);
        }
        Ok(Self { key })
    }

    fn apply(&self, bytes: &mut [u8]) {
        for (byte, k) in bytes.iter_mut().zip(self.key.iter().cycle()) {
            *byte ^= k;
        }
    }
}

impl std::fmt::Debug for XorCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XorCipher").field("key_len", &self.key.len()).finish()
    }
}

impl Encryption for XorCipher {
    fn encrypt(&self, plaintext: &str) -> String {
        let mut bytes = plaintext.as_bytes().to_vec();
        self.apply(&mut bytes);
        STANDARD.encode(bytes)
    }

    fn decrypt(&self, ciphertext: &str) -> Result<String> {
        let mut bytes = STANDARD.decode(ciphertext.trim())?;
        self.apply(&mut bytes);
        String::from_utf8(bytes).map_err(|_| EncryptionError::InvalidUtf8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let cipher = XorCipher::new("RecipeRage").unwrap();
        let plaintext = "{\n  \"coins\": 50,\n  \"playerName\": \"Çhef ✓\"\n}";

        let ciphertext = cipher.encrypt(plaintext);
        assert_ne!(ciphertext, plaintext);
        assert_eq!(cipher.decrypt(&ciphertext).unwrap(), plaintext);
    }

    #[test]
    fn test_empty_plaintext() {
        let cipher = XorCipher::new("k").unwrap();
        assert_eq!(cipher.decrypt(&cipher.encrypt("")).unwrap(), "");
    }

    #[test]
    fn test_empty_key_rejected() {
        assert!(matches!(XorCipher::new(""), Err(EncryptionError::EmptyKey)));
    }

    #[test]
    fn test_wrong_key_does_not_round_trip() {
        let a = XorCipher::new("alpha").unwrap();
        let b = XorCipher::new("bravo").unwrap();

        let ciphertext = a.encrypt("{\"level\":3}");
        let decrypted = b.decrypt(&ciphertext);
        assert!(decrypted.map(|s| s != "{\"level\":3}").unwrap_or(true));
    }

    #[test]
    fn test_plaintext_is_not_ciphertext() {
        let cipher = XorCipher::new("key").unwrap();
        let result = cipher.decrypt("{ not base64 }");
        assert!(matches!(result, Err(EncryptionError::InvalidEncoding(_))));
    }

    #[test]
    fn test_debug_hides_key() {
        let cipher = XorCipher::new("secret").unwrap();
        let debug = format!("{:?}", cipher);
        assert!(!debug.contains("secret"));
    }
}
