//! Save orchestrator
//!
//! `SaveService` owns the in-memory record caches and routes every read and
//! write through the storage policy:
//! - `LocalOnly` records go straight to device storage
//! - `CloudOnly` records are written to the cloud when a session exists
//! - `CloudWithCache` records are written locally first, then pushed to the
//!   cloud by a background task tracked in the [`SyncTracker`]
//!
//! No error crosses this API. Failures degrade to default records, skipped
//! writes or a failed [`SyncStatus`] that callers can poll.

use std::future::Future;
use std::sync::Arc;

use storage::{
    CloudStorage, DisabledCloud, Encryption, LocalStorage, RecordKey, StorageConfig,
    StorageError, StoragePolicy, StorageStrategy, SyncStatus, SyncTicket, SyncTracker,
};
use tokio::sync::{broadcast, Mutex};
use tokio::task::{JoinHandle, JoinSet};

use crate::cache::RecordCaches;
use crate::codec;
use crate::config::SaveServiceConfig;
use crate::events::SaveEvent;
use crate::records::{GameSettingsData, PlayerProgressData, PlayerStatsData, Record};

/// Builder for [`SaveService`]
pub struct SaveServiceBuilder {
    local: Arc<dyn LocalStorage>,
    cloud: Arc<dyn CloudStorage>,
    encryption: Option<Arc<dyn Encryption>>,
    policy: StoragePolicy,
    config: SaveServiceConfig,
}

impl SaveServiceBuilder {
    /// Attach a cloud provider (defaults to none)
    pub fn cloud(mut self, cloud: Arc<dyn CloudStorage>) -> Self {
        self.cloud = cloud;
        self
    }

    /// Encrypt records whose policy entry asks for it
    pub fn encryption(mut self, encryption: Arc<dyn Encryption>) -> Self {
        self.encryption = Some(encryption);
        self
    }

    /// Replace the storage policy (defaults to [`StoragePolicy::standard`])
    pub fn policy(mut self, policy: StoragePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Replace the service configuration
    pub fn config(mut self, config: SaveServiceConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the service
    pub fn build(self) -> SaveService {
        if self.encryption.is_none() {
            for key in RecordKey::ALL {
                if self.policy.config(key).encrypt {
                    tracing::warn!(key = %key, "encryption requested but no cipher configured, storing plain text");
                }
            }
        }

        let (events, _) = broadcast::channel(self.config.event_capacity);

        SaveService {
            inner: Arc::new(Inner {
                sync: SyncTracker::for_keys(self.policy.cloud_keys()),
                config: self.config,
                policy: self.policy,
                local: self.local,
                cloud: self.cloud,
                encryption: self.encryption,
                caches: RecordCaches::default(),
                events,
                background: parking_lot::Mutex::new(Vec::new()),
            }),
        }
    }
}

/// Typed load/save API over local and cloud storage
///
/// Cloning is cheap; clones share caches, sync state and event subscribers.
#[derive(Clone)]
pub struct SaveService {
    inner: Arc<Inner>,
}

struct Inner {
    config: SaveServiceConfig,
    policy: StoragePolicy,
    local: Arc<dyn LocalStorage>,
    cloud: Arc<dyn CloudStorage>,
    encryption: Option<Arc<dyn Encryption>>,
    caches: RecordCaches,
    sync: SyncTracker,
    events: broadcast::Sender<SaveEvent>,
    background: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl SaveService {
    /// Start building a service over `local` device storage
    pub fn builder(local: Arc<dyn LocalStorage>) -> SaveServiceBuilder {
        SaveServiceBuilder {
            local,
            cloud: Arc::new(DisabledCloud),
            encryption: None,
            policy: StoragePolicy::standard(),
            config: SaveServiceConfig::default(),
        }
    }

    /// Create a service with the standard strategies and no encryption
    ///
    /// Use [`builder`](Self::builder) with a cipher for encrypted records.
    pub fn new(local: Arc<dyn LocalStorage>, cloud: Arc<dyn CloudStorage>) -> Self {
        Self::builder(local)
            .cloud(cloud)
            .policy(StoragePolicy::standard().without_encryption())
            .build()
    }

    /// Subscribe to record change events
    pub fn subscribe(&self) -> broadcast::Receiver<SaveEvent> {
        self.inner.events.subscribe()
    }

    /// Storage policy in use
    pub fn policy(&self) -> &StoragePolicy {
        &self.inner.policy
    }

    /// Whether the cloud provider currently has a session
    pub fn is_cloud_available(&self) -> bool {
        self.inner.cloud.is_available()
    }

    /// Cached record, loading it from storage on first access
    pub async fn load_data<T: Record>(&self) -> T {
        let mut slot = T::slot(&self.inner.caches).lock().await;
        self.inner.cached_or_load(&mut *slot).await
    }

    /// Replace a record: cache, persist, announce
    pub async fn save_data<T: Record>(&self, value: T) {
        let mut slot = T::slot(&self.inner.caches).lock().await;
        self.inner.store(&mut *slot, value).await;
    }

    /// Read-modify-write a record and return the saved value
    ///
    /// The record stays locked from load to save, so concurrent updates of the
    /// same record never lose each other's changes.
    pub async fn update_data<T, F>(&self, mutator: F) -> T
    where
        T: Record,
        F: FnOnce(&mut T),
    {
        let mut slot = T::slot(&self.inner.caches).lock().await;
        let mut value = self.inner.cached_or_load(&mut *slot).await;
        mutator(&mut value);
        self.inner.store(&mut *slot, value.clone()).await;
        value
    }

    /// Warm every record cache
    pub async fn load_all(&self) {
        self.load_data::<GameSettingsData>().await;
        self.load_data::<PlayerProgressData>().await;
        self.load_data::<PlayerStatsData>().await;
    }

    /// Current game settings
    pub async fn get_settings(&self) -> GameSettingsData {
        self.load_data().await
    }

    /// Save game settings
    pub async fn save_settings(&self, settings: GameSettingsData) {
        self.save_data(settings).await;
    }

    /// Update game settings in place
    pub async fn update_settings<F>(&self, mutator: F) -> GameSettingsData
    where
        F: FnOnce(&mut GameSettingsData),
    {
        self.update_data(mutator).await
    }

    /// Current player progress
    pub async fn get_player_progress(&self) -> PlayerProgressData {
        self.load_data().await
    }

    /// Save player progress
    pub async fn save_player_progress(&self, progress: PlayerProgressData) {
        self.save_data(progress).await;
    }

    /// Update player progress in place
    pub async fn update_player_progress<F>(&self, mutator: F) -> PlayerProgressData
    where
        F: FnOnce(&mut PlayerProgressData),
    {
        self.update_data(mutator).await
    }

    /// Current player stats
    pub async fn get_player_stats(&self) -> PlayerStatsData {
        self.load_data().await
    }

    /// Save player stats
    pub async fn save_player_stats(&self, stats: PlayerStatsData) {
        self.save_data(stats).await;
    }

    /// Update player stats in place
    pub async fn update_player_stats<F>(&self, mutator: F) -> PlayerStatsData
    where
        F: FnOnce(&mut PlayerStatsData),
    {
        self.update_data(mutator).await
    }

    /// Snapshot of a record's cloud sync state; `None` for local-only records
    pub fn get_sync_status(&self, key: RecordKey) -> Option<SyncStatus> {
        self.inner.sync.status(key)
    }

    /// Push every cloud-backed record and wait for all pushes
    ///
    /// A failing record is logged and recorded in its status; the others
    /// still run.
    pub async fn sync_all_cloud_data(&self) {
        if !self.inner.cloud.is_available() {
            tracing::info!("cloud provider not available for sync");
            return;
        }

        let mut tasks = JoinSet::new();
        for key in self.inner.policy.cloud_keys() {
            if let Some(sync) = Arc::clone(&self.inner).sync_now(key) {
                tasks.spawn(sync);
            }
        }

        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                tracing::error!(error = %e, "cloud sync task failed");
            }
        }
    }

    /// Switch the cloud provider into authenticated mode and push the
    /// cached user records to it
    pub async fn on_user_logged_in(&self) {
        tracing::info!("user logged in, enabling cloud storage");
        self.inner.cloud.on_user_logged_in();

        if !self.inner.cloud.is_available() {
            tracing::warn!("cloud provider still unavailable after login");
            return;
        }

        for key in RecordKey::ALL {
            let config = self.inner.policy.config(key);
            if !key.is_user_scoped() || !config.strategy.uses_cloud() {
                continue;
            }
            if !self.inner.is_cached(key).await {
                continue;
            }
            if let Some(sync) = Arc::clone(&self.inner).sync_now(key) {
                sync.await;
            }
        }
    }

    /// Drop the signed-in user's cached records and end the cloud session
    pub async fn on_user_logged_out(&self) {
        tracing::info!("user logged out");
        self.clear_user_cache().await;
        self.inner.cloud.on_user_logged_out();
    }

    /// Forget cached user-scoped records and their sync state
    ///
    /// Durable copies are untouched; the next load reads them again.
    pub async fn clear_user_cache(&self) {
        for key in RecordKey::ALL.into_iter().filter(RecordKey::is_user_scoped) {
            self.inner.invalidate(key).await;
            self.inner.sync.reset(key);
        }
        tracing::debug!("user record cache cleared");
    }

    /// Delete every record locally and in the cloud, then reset the caches to
    /// defaults and announce them
    pub async fn delete_all_data(&self) {
        let cloud_available = self.inner.cloud.is_available();

        for key in RecordKey::ALL {
            if let Err(e) = self.inner.local.delete(key.file_name()) {
                tracing::error!(key = %key, error = %e, "failed to delete local record");
            }
            if cloud_available {
                let result = tokio::time::timeout(
                    self.inner.config.sync_timeout,
                    self.inner.cloud.delete(key.file_name()),
                )
                .await
                .unwrap_or(Err(StorageError::Timeout(self.inner.config.sync_timeout)));
                if let Err(e) = result {
                    tracing::error!(key = %key, error = %e, "failed to delete cloud record");
                }
            }
        }

        self.inner.reset_to_default::<GameSettingsData>().await;
        self.inner.reset_to_default::<PlayerProgressData>().await;
        self.inner.reset_to_default::<PlayerStatsData>().await;

        tracing::info!("all save data deleted");
    }

    /// Wait until every background sync spawned so far has finished
    pub async fn wait_for_background_syncs(&self) {
        loop {
            let handles = std::mem::take(&mut *self.inner.background.lock());
            if handles.is_empty() {
                return;
            }
            for handle in handles {
                if let Err(e) = handle.await {
                    tracing::error!(error = %e, "background sync task failed");
                }
            }
        }
    }
}

impl Inner {
    fn cipher_for(&self, config: &StorageConfig) -> Option<&dyn Encryption> {
        if config.encrypt {
            self.encryption.as_deref()
        } else {
            None
        }
    }

    async fn cached_or_load<T: Record>(&self, slot: &mut Option<T>) -> T {
        if let Some(value) = slot.as_ref() {
            return value.clone();
        }
        let value = self.read_record::<T>().await;
        *slot = Some(value.clone());
        value
    }

    async fn store<T: Record>(self: &Arc<Self>, slot: &mut Option<T>, value: T) {
        *slot = Some(value.clone());
        self.persist(&value).await;
        let _ = self.events.send(value.into_event());
    }

    async fn reset_to_default<T: Record>(&self) {
        let mut slot = T::slot(&self.caches).lock().await;
        *slot = Some(T::default());
        let _ = self.events.send(T::default().into_event());
    }

    async fn is_cached(&self, key: RecordKey) -> bool {
        match key {
            RecordKey::Settings => self.caches.settings.lock().await.is_some(),
            RecordKey::Progress => self.caches.progress.lock().await.is_some(),
            RecordKey::Stats => self.caches.stats.lock().await.is_some(),
        }
    }

    async fn invalidate(&self, key: RecordKey) {
        match key {
            RecordKey::Settings => *self.caches.settings.lock().await = None,
            RecordKey::Progress => *self.caches.progress.lock().await = None,
            RecordKey::Stats => *self.caches.stats.lock().await = None,
        }
    }

    /// Serialized form of the cached record, if it is cached
    async fn cached_content(&self, key: RecordKey) -> Option<String> {
        match key {
            RecordKey::Settings => self.encode_cached(&self.caches.settings).await,
            RecordKey::Progress => self.encode_cached(&self.caches.progress).await,
            RecordKey::Stats => self.encode_cached(&self.caches.stats).await,
        }
    }

    async fn encode_cached<T: Record>(&self, slot: &Mutex<Option<T>>) -> Option<String> {
        let slot = slot.lock().await;
        let value = slot.as_ref()?;
        self.encode(value)
    }

    fn encode<T: Record>(&self, value: &T) -> Option<String> {
        let config = self.policy.config(T::KEY);
        match codec::encode(value, self.cipher_for(&config)) {
            Ok(content) => Some(content),
            Err(e) => {
                tracing::error!(key = %T::KEY, error = %e, "failed to serialize record");
                None
            }
        }
    }

    fn decode<T: Record>(&self, content: &str) -> Option<T> {
        if content.trim().is_empty() {
            return None;
        }
        let config = self.policy.config(T::KEY);
        match codec::decode(content, self.cipher_for(&config)) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!(key = %T::KEY, error = %e, "failed to decode stored record");
                None
            }
        }
    }

    fn read_local(&self, key: RecordKey) -> Option<String> {
        match self.local.read(key.file_name()) {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "local read failed");
                None
            }
        }
    }

    fn write_local(&self, key: RecordKey, content: &str) {
        if let Err(e) = self.local.write(key.file_name(), content) {
            tracing::error!(key = %key, error = %e, "local write failed");
        }
    }

    async fn read_cloud(&self, key: RecordKey) -> Option<String> {
        let read = self.cloud.read(key.file_name());
        match tokio::time::timeout(self.config.sync_timeout, read).await {
            Ok(Ok(content)) => content,
            Ok(Err(e)) => {
                tracing::warn!(key = %key, error = %e, "cloud read failed");
                None
            }
            Err(_) => {
                tracing::warn!(key = %key, timeout = ?self.config.sync_timeout, "cloud read timed out");
                None
            }
        }
    }

    async fn read_record<T: Record>(&self) -> T {
        let key = T::KEY;
        let strategy = self.policy.config(key).strategy;
        let from_cloud = match strategy {
            StorageStrategy::LocalOnly => false,
            StorageStrategy::CloudOnly | StorageStrategy::CloudWithCache => {
                self.cloud.is_available()
            }
        };

        let primary = if from_cloud {
            self.read_cloud(key).await
        } else if strategy == StorageStrategy::CloudOnly {
            tracing::warn!(key = %key, "cloud unavailable, cannot load cloud-only record");
            None
        } else {
            self.read_local(key)
        };

        if let Some(value) = primary.as_deref().and_then(|content| self.decode::<T>(content)) {
            return value;
        }

        if from_cloud && strategy == StorageStrategy::CloudWithCache {
            if let Some(value) = self.read_local(key).as_deref().and_then(|c| self.decode::<T>(c)) {
                tracing::info!(key = %key, "using local cache");
                return value;
            }
        }

        tracing::debug!(key = %key, "no stored record, using defaults");
        T::default()
    }

    async fn persist<T: Record>(self: &Arc<Self>, value: &T) {
        let key = T::KEY;
        let Some(content) = self.encode(value) else {
            return;
        };

        match self.policy.config(key).strategy {
            StorageStrategy::LocalOnly => self.write_local(key, &content),
            StorageStrategy::CloudOnly => {
                if self.cloud.is_available() {
                    self.sync.mark_pending_changes(key);
                    match self.sync.try_begin(key) {
                        Some(ticket) => {
                            self.upload(ticket, &content).await;
                        }
                        None => {
                            tracing::debug!(key = %key, "cloud write in flight, change left pending");
                        }
                    }
                } else {
                    tracing::warn!(key = %key, "cloud unavailable, record kept in memory only");
                }
            }
            StorageStrategy::CloudWithCache => {
                self.write_local(key, &content);
                if self.cloud.is_available() {
                    self.sync.mark_pending_changes(key);
                    self.spawn_sync(key);
                } else {
                    tracing::info!(key = %key, "cloud unavailable, saved locally");
                }
            }
        }
    }

    fn spawn_sync(self: &Arc<Self>, key: RecordKey) {
        let Some(sync) = Arc::clone(self).sync_now(key) else {
            return;
        };
        let handle = tokio::spawn(sync);
        let mut background = self.background.lock();
        background.retain(|handle| !handle.is_finished());
        background.push(handle);
    }

    /// Sync of `key` bound to the current session
    ///
    /// The generation is read here, not when the future first runs, so a sync
    /// queued before a logout does nothing after it.
    fn sync_now(self: Arc<Self>, key: RecordKey) -> Option<impl Future<Output = ()> + Send> {
        let generation = self.sync.generation(key)?;
        Some(self.sync_to_cloud(key, generation))
    }

    /// Push the current content of `key` to the cloud unless a push is
    /// already running or the session it was queued in has ended
    async fn sync_to_cloud(self: Arc<Self>, key: RecordKey, generation: u64) {
        loop {
            let Some(ticket) = self.sync.try_begin_in(key, generation) else {
                tracing::debug!(key = %key, "sync in flight or session ended, skipping");
                return;
            };

            let content = match self.policy.config(key).strategy {
                StorageStrategy::CloudWithCache => self.read_local(key),
                StorageStrategy::CloudOnly => self.cached_content(key).await,
                StorageStrategy::LocalOnly => None,
            };
            let Some(content) = content.filter(|content| !content.is_empty()) else {
                ticket.complete();
                return;
            };
            if !ticket.is_current() {
                ticket.complete();
                return;
            }

            let changed_meanwhile = self.upload(ticket, &content).await;
            if !(changed_meanwhile && self.config.resync_pending && self.cloud.is_available()) {
                return;
            }
            tracing::debug!(key = %key, "record changed during sync, pushing again");
        }
    }

    /// Write `content` to the cloud under the ticket's key and settle the ticket.
    /// Returns `true` if new local writes arrived during the upload.
    async fn upload(&self, ticket: SyncTicket, content: &str) -> bool {
        let key = ticket.key();
        let write = self.cloud.write(key.file_name(), content);
        let result = tokio::time::timeout(self.config.sync_timeout, write)
            .await
            .unwrap_or(Err(StorageError::Timeout(self.config.sync_timeout)));

        match result {
            Ok(()) => {
                tracing::info!(key = %key, "synced record to cloud");
                ticket.complete()
            }
            Err(e) => {
                tracing::error!(key = %key, error = %e, "cloud sync failed");
                ticket.fail(e.to_string());
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mockall::mock;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use storage::{FileStorage, MemoryCloudConfig, MemoryCloudStorage, XorCipher};
    use tempfile::TempDir;

    mock! {
        pub Cloud {}

        #[async_trait]
        impl CloudStorage for Cloud {
            fn is_available(&self) -> bool;
            async fn read(&self, key: &str) -> storage::Result<Option<String>>;
            async fn write(&self, key: &str, content: &str) -> storage::Result<()>;
            async fn exists(&self, key: &str) -> storage::Result<bool>;
            async fn delete(&self, key: &str) -> storage::Result<()>;
            fn on_user_logged_in(&self);
            fn on_user_logged_out(&self);
        }
    }

    /// Wraps the memory backend and records how many writes overlap
    struct CountingCloud {
        inner: MemoryCloudStorage,
        active: AtomicUsize,
        max_active: AtomicUsize,
        writes: AtomicUsize,
    }

    impl CountingCloud {
        fn new(latency: Duration) -> Self {
            Self {
                inner: MemoryCloudStorage::new(MemoryCloudConfig::new().latency(latency)),
                active: AtomicUsize::new(0),
                max_active: AtomicUsize::new(0),
                writes: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl CloudStorage for CountingCloud {
        fn is_available(&self) -> bool {
            self.inner.is_available()
        }

        async fn read(&self, key: &str) -> storage::Result<Option<String>> {
            self.inner.read(key).await
        }

        async fn write(&self, key: &str, content: &str) -> storage::Result<()> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
            self.writes.fetch_add(1, Ordering::SeqCst);
            let result = self.inner.write(key, content).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            result
        }

        async fn exists(&self, key: &str) -> storage::Result<bool> {
            self.inner.exists(key).await
        }

        async fn delete(&self, key: &str) -> storage::Result<()> {
            self.inner.delete(key).await
        }

        fn on_user_logged_in(&self) {
            self.inner.on_user_logged_in();
        }

        fn on_user_logged_out(&self) {
            self.inner.on_user_logged_out();
        }
    }

    fn file_storage(dir: &TempDir) -> Arc<FileStorage> {
        Arc::new(FileStorage::open(dir.path()).unwrap())
    }

    fn signed_in_cloud(user: &str) -> Arc<MemoryCloudStorage> {
        let cloud = Arc::new(MemoryCloudStorage::default());
        cloud.sign_in(user);
        cloud.on_user_logged_in();
        cloud
    }

    fn read_local<T: Record>(local: &FileStorage) -> Option<T> {
        let content = local.read(T::KEY.file_name()).unwrap()?;
        Some(codec::decode(&content, None).unwrap())
    }

    #[tokio::test]
    async fn test_defaults_on_first_use() {
        let dir = TempDir::new().unwrap();
        let service = SaveService::builder(file_storage(&dir)).build();

        assert_eq!(service.get_settings().await, GameSettingsData::default());
        assert_eq!(service.get_player_progress().await, PlayerProgressData::default());
        assert_eq!(service.get_player_stats().await, PlayerStatsData::default());
        assert_eq!(service.get_player_stats().await.level, 1);
    }

    #[tokio::test]
    async fn test_new_stores_plain_text() {
        let dir = TempDir::new().unwrap();
        let local = file_storage(&dir);
        let service = SaveService::new(local.clone(), Arc::new(MemoryCloudStorage::default()));

        assert!(RecordKey::ALL.into_iter().all(|key| !service.policy().config(key).encrypt));
        assert_eq!(
            service.policy().config(RecordKey::Stats).strategy,
            StorageStrategy::CloudWithCache
        );

        service.update_player_stats(|s| s.add_coins(5)).await;
        let raw = local.read("stats.json").unwrap().unwrap();
        assert!(raw.contains("\"coins\": 5"));
    }

    #[tokio::test]
    async fn test_saved_value_served_from_cache() {
        let dir = TempDir::new().unwrap();
        let local = file_storage(&dir);
        let service = SaveService::builder(local.clone()).build();

        let settings = GameSettingsData { language_code: "fr".to_string(), ..Default::default() };
        service.save_settings(settings.clone()).await;

        local.delete(RecordKey::Settings.file_name()).unwrap();
        assert_eq!(service.get_settings().await, settings);
    }

    #[tokio::test]
    async fn test_reload_from_disk_in_new_service() {
        let dir = TempDir::new().unwrap();
        let local = file_storage(&dir);

        let service = SaveService::builder(local.clone()).build();
        service.update_player_progress(|p| p.unlock_character("chef_mia")).await;

        let restarted = SaveService::builder(local).build();
        assert!(restarted.get_player_progress().await.is_character_unlocked("chef_mia"));
    }

    #[tokio::test]
    async fn test_update_while_cloud_unavailable() {
        let dir = TempDir::new().unwrap();
        let local = file_storage(&dir);
        let cloud = Arc::new(MemoryCloudStorage::default());
        let service = SaveService::new(local.clone(), cloud);
        let mut events = service.subscribe();

        let stats = service.update_player_stats(|s| s.add_coins(50)).await;
        assert_eq!(stats.coins, 50);

        let stored: PlayerStatsData = read_local(&local).unwrap();
        assert_eq!(stored.coins, 50);

        let status = service.get_sync_status(RecordKey::Stats).unwrap();
        assert!(!status.is_syncing);
        assert!(!status.has_pending_changes);

        match events.try_recv().unwrap() {
            SaveEvent::PlayerStatsChanged(stats) => assert_eq!(stats.coins, 50),
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_local_write_precedes_cloud_sync() {
        let dir = TempDir::new().unwrap();
        let local = file_storage(&dir);
        let cloud = signed_in_cloud("alice");
        let service = SaveService::new(local.clone(), cloud.clone());

        service.update_player_progress(|p| p.unlock_map("harbor")).await;

        let stored: PlayerProgressData = read_local(&local).unwrap();
        assert!(stored.is_map_unlocked("harbor"));

        service.wait_for_background_syncs().await;

        let remote = cloud.remote_content("alice", "progress.json").unwrap();
        assert_eq!(Some(remote), local.read("progress.json").unwrap());

        let status = service.get_sync_status(RecordKey::Progress).unwrap();
        assert!(status.last_sync_succeeded);
        assert!(!status.has_pending_changes);
        assert!(status.last_sync_timestamp.is_some());
    }

    #[tokio::test]
    async fn test_local_only_records_are_untracked() {
        let dir = TempDir::new().unwrap();
        let cloud = signed_in_cloud("alice");
        let service = SaveService::new(file_storage(&dir), cloud.clone());

        service.update_settings(|s| s.master_volume = 0.3).await;
        service.wait_for_background_syncs().await;

        assert!(service.get_sync_status(RecordKey::Settings).is_none());
        assert_eq!(cloud.remote_content("alice", "settings.json"), None);
    }

    #[tokio::test]
    async fn test_no_cloud_calls_when_unavailable() {
        let dir = TempDir::new().unwrap();
        let mut cloud = MockCloud::new();
        cloud.expect_is_available().return_const(false);
        cloud.expect_read().never();
        cloud.expect_write().never();

        let service = SaveService::new(file_storage(&dir), Arc::new(cloud));
        service.get_player_stats().await;
        service.update_player_stats(|s| s.add_gems(3)).await;
        service.sync_all_cloud_data().await;
        service.wait_for_background_syncs().await;

        assert_eq!(service.get_player_stats().await.gems, 3);
    }

    #[tokio::test]
    async fn test_cloud_write_error_marks_sync_failed() {
        let dir = TempDir::new().unwrap();
        let mut cloud = MockCloud::new();
        cloud.expect_is_available().return_const(true);
        cloud
            .expect_write()
            .times(1)
            .returning(|_, _| Err(StorageError::Remote("quota exceeded".to_string())));

        let service = SaveService::new(file_storage(&dir), Arc::new(cloud));
        service.save_player_stats(PlayerStatsData::default()).await;
        service.wait_for_background_syncs().await;

        let status = service.get_sync_status(RecordKey::Stats).unwrap();
        assert!(!status.is_syncing);
        assert!(!status.last_sync_succeeded);
        assert!(status.has_pending_changes);
        assert!(status.last_error.unwrap().contains("quota exceeded"));
        assert!(status.last_sync_timestamp.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cloud_write_times_out() {
        let dir = TempDir::new().unwrap();
        let cloud = Arc::new(MemoryCloudStorage::new(
            MemoryCloudConfig::new().latency(Duration::from_secs(120)),
        ));
        cloud.sign_in("alice");
        cloud.on_user_logged_in();

        let service = SaveService::builder(file_storage(&dir))
            .cloud(cloud.clone())
            .config(SaveServiceConfig::new().sync_timeout(Duration::from_secs(5)))
            .build();

        service.update_player_stats(|s| s.add_coins(1)).await;
        service.wait_for_background_syncs().await;

        let status = service.get_sync_status(RecordKey::Stats).unwrap();
        assert!(!status.last_sync_succeeded);
        assert!(status.last_error.unwrap().contains("timed out"));
        assert_eq!(cloud.remote_content("alice", "stats.json"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_saves_share_one_cloud_write() {
        let dir = TempDir::new().unwrap();
        let local = file_storage(&dir);
        let cloud = Arc::new(CountingCloud::new(Duration::from_millis(100)));
        cloud.inner.sign_in("alice");
        cloud.on_user_logged_in();
        let service = SaveService::new(local.clone(), cloud.clone());

        service.update_player_progress(|p| p.unlock_recipe("ramen")).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(service.get_sync_status(RecordKey::Progress).unwrap().is_syncing);

        service.update_player_progress(|p| p.unlock_recipe("gyoza")).await;
        let stored: PlayerProgressData = read_local(&local).unwrap();
        assert!(stored.is_recipe_unlocked("gyoza"));

        service.wait_for_background_syncs().await;

        assert_eq!(cloud.max_active.load(Ordering::SeqCst), 1);
        assert_eq!(cloud.writes.load(Ordering::SeqCst), 2);

        let remote = cloud.inner.remote_content("alice", "progress.json").unwrap();
        let remote: PlayerProgressData = codec::decode(&remote, None).unwrap();
        assert!(remote.is_recipe_unlocked("ramen"));
        assert!(remote.is_recipe_unlocked("gyoza"));
        assert!(!service.get_sync_status(RecordKey::Progress).unwrap().has_pending_changes);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_changes_kept_without_resync() {
        let dir = TempDir::new().unwrap();
        let cloud = Arc::new(CountingCloud::new(Duration::from_millis(100)));
        cloud.inner.sign_in("alice");
        cloud.on_user_logged_in();
        let service = SaveService::builder(file_storage(&dir))
            .cloud(cloud.clone())
            .config(SaveServiceConfig::new().resync_pending(false))
            .build();

        service.update_player_stats(|s| s.add_coins(1)).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        service.update_player_stats(|s| s.add_coins(1)).await;
        service.wait_for_background_syncs().await;

        assert_eq!(cloud.writes.load(Ordering::SeqCst), 1);
        let status = service.get_sync_status(RecordKey::Stats).unwrap();
        assert!(status.last_sync_succeeded);
        assert!(status.has_pending_changes);
    }

    #[tokio::test]
    async fn test_concurrent_updates_are_serialized() {
        let dir = TempDir::new().unwrap();
        let service = SaveService::builder(file_storage(&dir)).build();

        let mut tasks = JoinSet::new();
        for _ in 0..10 {
            let service = service.clone();
            tasks.spawn(async move {
                service.update_player_stats(|s| s.add_coins(1)).await;
            });
        }
        while tasks.join_next().await.is_some() {}

        assert_eq!(service.get_player_stats().await.coins, 10);
    }

    #[tokio::test]
    async fn test_cloud_copy_preferred_over_local() {
        let dir = TempDir::new().unwrap();
        let local = file_storage(&dir);
        let cloud = signed_in_cloud("alice");

        let on_device = PlayerStatsData { coins: 7, ..Default::default() };
        local.write("stats.json", &codec::encode(&on_device, None).unwrap()).unwrap();
        let in_cloud = PlayerStatsData { coins: 99, ..Default::default() };
        cloud.write("stats.json", &codec::encode(&in_cloud, None).unwrap()).await.unwrap();

        let service = SaveService::new(local, cloud);
        assert_eq!(service.get_player_stats().await.coins, 99);
    }

    #[tokio::test]
    async fn test_corrupt_cloud_copy_falls_back_to_local() {
        let dir = TempDir::new().unwrap();
        let local = file_storage(&dir);
        let cloud = signed_in_cloud("alice");

        let on_device = PlayerStatsData { coins: 7, ..Default::default() };
        local.write("stats.json", &codec::encode(&on_device, None).unwrap()).unwrap();
        cloud.write("stats.json", "not json").await.unwrap();

        let service = SaveService::new(local, cloud);
        assert_eq!(service.get_player_stats().await.coins, 7);
    }

    #[tokio::test]
    async fn test_corrupt_local_file_yields_default() {
        let dir = TempDir::new().unwrap();
        let local = file_storage(&dir);
        local.write("settings.json", "{ broken").unwrap();

        let service = SaveService::builder(local).build();
        assert_eq!(service.get_settings().await, GameSettingsData::default());
    }

    #[tokio::test]
    async fn test_logout_clears_user_records_only() {
        let dir = TempDir::new().unwrap();
        let local = file_storage(&dir);
        let cloud = signed_in_cloud("alice");
        let service = SaveService::new(local.clone(), cloud.clone());

        let settings = GameSettingsData { invert_y: true, ..Default::default() };
        service.save_settings(settings.clone()).await;
        service.update_player_progress(|p| p.unlock_cosmetic("golden_apron")).await;
        service.wait_for_background_syncs().await;

        service.on_user_logged_out().await;
        cloud.sign_out();
        assert!(!service.is_cloud_available());
        assert_eq!(service.get_sync_status(RecordKey::Progress), Some(SyncStatus::default()));

        local.delete("settings.json").unwrap();
        local.delete("progress.json").unwrap();

        assert_eq!(service.get_settings().await, settings);
        assert!(!service.get_player_progress().await.is_cosmetic_unlocked("golden_apron"));
    }

    #[tokio::test]
    async fn test_login_pushes_cached_user_records() {
        let dir = TempDir::new().unwrap();
        let cloud = Arc::new(MemoryCloudStorage::default());
        let service = SaveService::new(file_storage(&dir), cloud.clone());

        service.update_player_stats(|s| s.add_coins(10)).await;
        service.update_settings(|s| s.vsync = false).await;

        cloud.sign_in("alice");
        service.on_user_logged_in().await;
        assert!(service.is_cloud_available());

        let remote = cloud.remote_content("alice", "stats.json").unwrap();
        let remote: PlayerStatsData = codec::decode(&remote, None).unwrap();
        assert_eq!(remote.coins, 10);
        assert_eq!(cloud.remote_content("alice", "progress.json"), None);
        assert_eq!(cloud.remote_content("alice", "settings.json"), None);
    }

    #[tokio::test]
    async fn test_sync_all_pushes_cloud_records() {
        let dir = TempDir::new().unwrap();
        let cloud = Arc::new(MemoryCloudStorage::default());
        let service = SaveService::new(file_storage(&dir), cloud.clone());

        service.update_player_stats(|s| s.add_gems(2)).await;
        service.update_player_progress(|p| p.complete_tutorial_step("chop")).await;
        service.update_settings(|s| s.is_muted = true).await;

        cloud.sign_in("alice");
        cloud.on_user_logged_in();
        service.sync_all_cloud_data().await;

        assert_eq!(cloud.remote_file_count("alice"), 2);
        assert!(cloud.remote_content("alice", "progress.json").is_some());
        assert!(service.get_sync_status(RecordKey::Stats).unwrap().last_sync_succeeded);
    }

    #[tokio::test]
    async fn test_delete_all_data() {
        let dir = TempDir::new().unwrap();
        let local = file_storage(&dir);
        let cloud = signed_in_cloud("alice");
        let service = SaveService::new(local.clone(), cloud.clone());

        service.update_settings(|s| s.brightness = 0.9).await;
        service.update_player_progress(|p| p.complete_achievement("first_dish")).await;
        service.update_player_stats(|s| s.add_coins(500)).await;
        service.wait_for_background_syncs().await;
        assert_eq!(cloud.remote_file_count("alice"), 2);

        let mut events = service.subscribe();
        service.delete_all_data().await;

        for key in RecordKey::ALL {
            assert!(!local.exists(key.file_name()).unwrap());
        }
        assert_eq!(cloud.remote_file_count("alice"), 0);
        assert_eq!(service.get_settings().await, GameSettingsData::default());
        assert_eq!(service.get_player_stats().await, PlayerStatsData::default());

        let mut announced = Vec::new();
        while let Ok(event) = events.try_recv() {
            announced.push(event.key());
        }
        assert_eq!(announced, RecordKey::ALL.to_vec());
    }

    #[tokio::test]
    async fn test_encrypted_records_on_disk() {
        let dir = TempDir::new().unwrap();
        let local = file_storage(&dir);
        let cipher = Arc::new(XorCipher::new("device-secret").unwrap());
        let service = SaveService::builder(local.clone()).encryption(cipher.clone()).build();

        let progress = service.update_player_progress(|p| p.unlock_recipe("ramen")).await;
        service.update_settings(|s| s.language_code = "ja".to_string()).await;

        let raw = local.read("progress.json").unwrap().unwrap();
        assert!(!raw.contains("ramen"));
        let decoded: PlayerProgressData = codec::decode(&raw, Some(&*cipher)).unwrap();
        assert_eq!(decoded, progress);

        let settings = local.read("settings.json").unwrap().unwrap();
        assert!(settings.contains("\"languageCode\": \"ja\""));
    }

    #[tokio::test]
    async fn test_cloud_only_record() {
        let dir = TempDir::new().unwrap();
        let local = file_storage(&dir);
        let cloud = Arc::new(MemoryCloudStorage::default());
        let policy = StoragePolicy::default().with(
            RecordKey::Progress,
            StorageStrategy::CloudOnly,
            false,
        );
        let service = SaveService::builder(local.clone())
            .cloud(cloud.clone())
            .policy(policy.clone())
            .build();

        // Offline: kept in memory only
        service.update_player_progress(|p| p.unlock_map("docks")).await;
        assert!(!local.exists("progress.json").unwrap());
        assert!(service.get_player_progress().await.is_map_unlocked("docks"));

        cloud.sign_in("alice");
        cloud.on_user_logged_in();
        service.sync_all_cloud_data().await;
        assert!(cloud.remote_content("alice", "progress.json").is_some());

        // Online: written straight to the cloud
        service.update_player_progress(|p| p.unlock_map("market")).await;
        let remote = cloud.remote_content("alice", "progress.json").unwrap();
        let remote: PlayerProgressData = codec::decode(&remote, None).unwrap();
        assert!(remote.is_map_unlocked("market"));
        assert!(!local.exists("progress.json").unwrap());

        let restarted = SaveService::builder(local).cloud(cloud).policy(policy).build();
        assert!(restarted.get_player_progress().await.is_map_unlocked("market"));
    }
}
