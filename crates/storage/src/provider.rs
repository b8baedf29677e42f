//! Storage provider contracts
//!
//! Two variants share the same key/content shape:
//! - [`LocalStorage`] is synchronous and always present (device directory)
//! - [`CloudStorage`] is asynchronous and only usable once a user session exists

use async_trait::async_trait;

use crate::error::Result;

/// Synchronous device-local storage for named text blobs
pub trait LocalStorage: Send + Sync {
    /// Read the content stored under `key`, `None` if nothing is stored
    fn read(&self, key: &str) -> Result<Option<String>>;

    /// Replace the content stored under `key`
    fn write(&self, key: &str, content: &str) -> Result<()>;

    /// Check whether `key` has stored content
    fn exists(&self, key: &str) -> Result<bool>;

    /// Remove `key`. Removing a missing key is not an error.
    fn delete(&self, key: &str) -> Result<()>;
}

/// Asynchronous, session-bound remote storage
#[async_trait]
pub trait CloudStorage: Send + Sync {
    /// Whether an authenticated session is active
    fn is_available(&self) -> bool;

    /// Read the content stored under `key` for the current user
    async fn read(&self, key: &str) -> Result<Option<String>>;

    /// Replace the content stored under `key` for the current user
    async fn write(&self, key: &str, content: &str) -> Result<()>;

    /// Check whether `key` exists for the current user
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Remove `key` for the current user
    async fn delete(&self, key: &str) -> Result<()>;

    /// Called by the save service once authentication succeeded
    fn on_user_logged_in(&self) {}

    /// Called by the save service on logout; drops any user-bound cache
    fn on_user_logged_out(&self) {}
}
