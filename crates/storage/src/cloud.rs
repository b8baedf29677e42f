//! In-process cloud storage backend
//!
//! `MemoryCloudStorage` behaves like a remote per-user file store:
//! - Content is namespaced by the signed-in user id
//! - The provider only becomes available after the platform sign-in *and* the
//!   save service's login hook, mirroring how a real SDK needs a file-list refresh
//! - Downloaded content is kept in a session-bound cache that logout clears
//!
//! Latency and outages can be simulated for offline and slow-network behaviour.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Result, StorageError};
use crate::provider::CloudStorage;

type RemoteFiles = HashMap<String, HashMap<String, String>>;

/// Configuration for the in-process cloud backend
#[derive(Debug, Clone, Default)]
pub struct MemoryCloudConfig {
    /// Simulated round-trip time for every remote call
    pub latency: Duration,
}

impl MemoryCloudConfig {
    /// Create a configuration without latency
    pub fn new() -> Self {
        Self::default()
    }

    /// Set simulated round-trip time
    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }
}

#[derive(Debug, Default)]
struct Session {
    /// Set by the login hook, cleared by the logout hook
    initialized: bool,
    /// User the session was opened for
    user: Option<String>,
    /// Files downloaded or written during this session
    cache: HashMap<String, String>,
}

/// Cloud provider backed by process memory
pub struct MemoryCloudStorage {
    config: MemoryCloudConfig,
    remote: Arc<RwLock<RemoteFiles>>,
    signed_in_user: RwLock<Option<String>>,
    session: Mutex<Session>,
    offline: AtomicBool,
}

impl Default for MemoryCloudStorage {
    fn default() -> Self {
        Self::new(MemoryCloudConfig::default())
    }
}

impl MemoryCloudStorage {
    /// Create an empty backend
    pub fn new(config: MemoryCloudConfig) -> Self {
        Self {
            config,
            remote: Arc::new(RwLock::new(HashMap::new())),
            signed_in_user: RwLock::new(None),
            session: Mutex::new(Session::default()),
            offline: AtomicBool::new(false),
        }
    }

    /// Create another client sharing this backend's remote files,
    /// as a second device would
    pub fn connect_device(&self) -> Self {
        Self {
            config: self.config.clone(),
            remote: Arc::clone(&self.remote),
            signed_in_user: RwLock::new(None),
            session: Mutex::new(Session::default()),
            offline: AtomicBool::new(false),
        }
    }

    /// Record a successful platform sign-in for `user_id`
    pub fn sign_in(&self, user_id: impl Into<String>) {
        *self.signed_in_user.write() = Some(user_id.into());
    }

    /// Drop the platform sign-in
    pub fn sign_out(&self) {
        *self.signed_in_user.write() = None;
    }

    /// Currently signed-in user id
    pub fn current_user(&self) -> Option<String> {
        self.signed_in_user.read().clone()
    }

    /// Simulate loss (or recovery) of network connectivity
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Content held remotely for `user_id`, bypassing the session
    pub fn remote_content(&self, user_id: &str, key: &str) -> Option<String> {
        self.remote
            .read()
            .get(user_id)
            .and_then(|files| files.get(key))
            .cloned()
    }

    /// Number of files held remotely for `user_id`
    pub fn remote_file_count(&self, user_id: &str) -> usize {
        self.remote.read().get(user_id).map(HashMap::len).unwrap_or(0)
    }

    fn session_user(&self) -> Result<String> {
        let session = self.session.lock();
        if !session.initialized {
            return Err(StorageError::Unavailable("cloud session not initialized".to_string()));
        }
        let user = self
            .current_user()
            .ok_or_else(|| StorageError::Unavailable("user not logged in".to_string()))?;
        if session.user.as_deref() != Some(user.as_str()) {
            return Err(StorageError::Unavailable("cloud session belongs to another user".to_string()));
        }
        Ok(user)
    }

    /// Run `f` on the session cache if the session still belongs to `user`
    ///
    /// Calls that finish after a logout or an account switch leave the new
    /// session's cache alone.
    fn update_session_cache(&self, user: &str, f: impl FnOnce(&mut HashMap<String, String>)) {
        let mut session = self.session.lock();
        if session.initialized && session.user.as_deref() == Some(user) {
            f(&mut session.cache);
        }
    }

    async fn round_trip(&self) -> Result<()> {
        if !self.config.latency.is_zero() {
            tokio::time::sleep(self.config.latency).await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(StorageError::Remote("network unreachable".to_string()));
        }
        Ok(())
    }

    fn refresh_file_list(&self, user_id: &str) {
        let files = self.remote.read().get(user_id).cloned().unwrap_or_default();
        tracing::debug!(user = %user_id, files = files.len(), "cloud file list refreshed");

        let mut session = self.session.lock();
        session.user = Some(user_id.to_string());
        session.cache = files;
    }
}

#[async_trait]
impl CloudStorage for MemoryCloudStorage {
    fn is_available(&self) -> bool {
        self.session_user().is_ok()
    }

    async fn read(&self, key: &str) -> Result<Option<String>> {
        let user = self.session_user()?;

        if let Some(cached) = self.session.lock().cache.get(key) {
            return Ok(Some(cached.clone()));
        }

        self.round_trip().await?;

        let content = self.remote.read().get(&user).and_then(|files| files.get(key)).cloned();
        if let Some(content) = &content {
            self.update_session_cache(&user, |cache| {
                cache.insert(key.to_string(), content.clone());
            });
        }
        Ok(content)
    }

    async fn write(&self, key: &str, content: &str) -> Result<()> {
        let user = self.session_user()?;

        self.round_trip().await?;

        self.remote
            .write()
            .entry(user.clone())
            .or_default()
            .insert(key.to_string(), content.to_string());

        self.update_session_cache(&user, |cache| {
            cache.insert(key.to_string(), content.to_string());
        });
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let user = self.session_user()?;

        if self.session.lock().cache.contains_key(key) {
            return Ok(true);
        }

        self.round_trip().await?;
        Ok(self
            .remote
            .read()
            .get(&user)
            .map(|files| files.contains_key(key))
            .unwrap_or(false))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let user = self.session_user()?;

        self.round_trip().await?;

        if let Some(files) = self.remote.write().get_mut(&user) {
            files.remove(key);
        }
        self.update_session_cache(&user, |cache| {
            cache.remove(key);
        });
        Ok(())
    }

    fn on_user_logged_in(&self) {
        let Some(user) = self.current_user() else {
            tracing::warn!("cloud login hook called without a signed-in user");
            return;
        };

        self.refresh_file_list(&user);
        self.session.lock().initialized = true;
    }

    fn on_user_logged_out(&self) {
        let mut session = self.session.lock();
        session.cache.clear();
        session.user = None;
        session.initialized = false;
        tracing::info!("cloud session cache cleared");
    }
}

/// Cloud provider for builds without a cloud backend; never available
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledCloud;

#[async_trait]
impl CloudStorage for DisabledCloud {
    fn is_available(&self) -> bool {
        false
    }

    async fn read(&self, _key: &str) -> Result<Option<String>> {
        Err(StorageError::Unavailable("cloud storage disabled".to_string()))
    }

    async fn write(&self, _key: &str, _content: &str) -> Result<()> {
        Err(StorageError::Unavailable("cloud storage disabled".to_string()))
    }

    async fn exists(&self, _key: &str) -> Result<bool> {
        Ok(false)
    }

    async fn delete(&self, _key: &str) -> Result<()> {
        Err(StorageError::Unavailable("cloud storage disabled".to_string()))
    }
}
