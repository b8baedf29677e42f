//! Cloud sync status tracking
//!
//! This module tracks, per record, whether a push to the cloud is in flight and
//! how the last one ended. It is also the mutual-exclusion point for a record's
//! cloud copy: [`SyncTracker::try_begin`] hands out at most one [`SyncTicket`]
//! per key at a time, and the check-then-set happens under a single lock.
//!
//! Resetting a key (logout) starts a new generation. The observable status goes
//! back to idle immediately, but the key stays locked until the outstanding
//! ticket is finished, and that ticket's result is discarded.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use crate::policy::RecordKey;

/// Observable sync state of one record
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    /// A cloud write is in flight
    pub is_syncing: bool,
    /// A local write happened that the cloud has not seen yet
    pub has_pending_changes: bool,
    /// Whether the most recent sync succeeded
    pub last_sync_succeeded: bool,
    /// Error message of the most recent failed sync
    pub last_error: Option<String>,
    /// When the last successful sync finished
    pub last_sync_timestamp: Option<SystemTime>,
}

impl SyncStatus {
    /// Record a local write the cloud has not seen
    pub fn mark_pending_changes(&mut self) {
        self.has_pending_changes = true;
    }

    /// Enter the syncing state. Returns `false` if a sync is already running.
    ///
    /// Pending changes are cleared: the sync about to run reads the latest local
    /// content, so only writes arriving after this point are still pending.
    pub fn mark_sync_started(&mut self) -> bool {
        if self.is_syncing {
            return false;
        }
        self.is_syncing = true;
        self.has_pending_changes = false;
        true
    }

    /// Leave the syncing state after a successful push
    pub fn mark_sync_completed(&mut self) {
        self.is_syncing = false;
        self.last_sync_succeeded = true;
        self.last_error = None;
        self.last_sync_timestamp = Some(SystemTime::now());
    }

    /// Leave the syncing state after a failed push; the record stays dirty
    pub fn mark_sync_failed(&mut self, error: impl Into<String>) {
        self.is_syncing = false;
        self.last_sync_succeeded = false;
        self.last_error = Some(error.into());
        self.has_pending_changes = true;
    }
}

#[derive(Debug, Default)]
struct TrackedKey {
    status: SyncStatus,
    generation: u64,
    in_flight: bool,
}

type Entries = Arc<Mutex<HashMap<RecordKey, TrackedKey>>>;

/// Per-record sync state machine shared by the save service and its
/// background sync tasks
#[derive(Debug, Clone, Default)]
pub struct SyncTracker {
    entries: Entries,
}

impl SyncTracker {
    /// Create a tracker with no keys
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a tracker following `keys`
    pub fn for_keys(keys: impl IntoIterator<Item = RecordKey>) -> Self {
        let tracker = Self::new();
        for key in keys {
            tracker.track(key);
        }
        tracker
    }

    /// Start tracking `key` (no-op if already tracked)
    pub fn track(&self, key: RecordKey) {
        self.entries.lock().entry(key).or_default();
    }

    /// Snapshot of the status of `key`, `None` if untracked
    pub fn status(&self, key: RecordKey) -> Option<SyncStatus> {
        self.entries.lock().get(&key).map(|entry| entry.status.clone())
    }

    /// Whether a ticket for `key` is outstanding
    pub fn is_syncing(&self, key: RecordKey) -> bool {
        self.entries.lock().get(&key).map(|entry| entry.in_flight).unwrap_or(false)
    }

    /// Flag a local write for `key`
    pub fn mark_pending_changes(&self, key: RecordKey) {
        if let Some(entry) = self.entries.lock().get_mut(&key) {
            entry.status.mark_pending_changes();
        }
    }

    /// Claim the right to push `key` to the cloud
    ///
    /// Returns `None` if the key is untracked or another sync holds it.
    pub fn try_begin(&self, key: RecordKey) -> Option<SyncTicket> {
        self.begin(key, None)
    }

    /// Like [`try_begin`](Self::try_begin), but only while `key` is still in
    /// `generation`
    ///
    /// A sync queued before a [`reset`](Self::reset) gets `None` here and must
    /// not push anything.
    pub fn try_begin_in(&self, key: RecordKey, generation: u64) -> Option<SyncTicket> {
        self.begin(key, Some(generation))
    }

    /// Current generation of `key`, bumped by every reset
    pub fn generation(&self, key: RecordKey) -> Option<u64> {
        self.entries.lock().get(&key).map(|entry| entry.generation)
    }

    fn begin(&self, key: RecordKey, generation: Option<u64>) -> Option<SyncTicket> {
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(&key)?;
        if generation.is_some_and(|generation| generation != entry.generation) {
            return None;
        }
        if entry.in_flight {
            return None;
        }
        entry.in_flight = true;
        entry.status.mark_sync_started();

        Some(SyncTicket {
            entries: Arc::clone(&self.entries),
            key,
            generation: entry.generation,
            finished: false,
        })
    }

    /// Return `key` to a fresh idle status, discarding the result of any
    /// sync still in flight
    pub fn reset(&self, key: RecordKey) {
        if let Some(entry) = self.entries.lock().get_mut(&key) {
            entry.generation += 1;
            entry.status = SyncStatus::default();
        }
    }
}

/// Exclusive right to push one record to the cloud
///
/// Dropping an unfinished ticket records the sync as failed so the key
/// never stays locked.
#[derive(Debug)]
pub struct SyncTicket {
    entries: Entries,
    key: RecordKey,
    generation: u64,
    finished: bool,
}

impl SyncTicket {
    /// Record held by this ticket
    pub fn key(&self) -> RecordKey {
        self.key
    }

    /// Record a successful push
    ///
    /// Returns `true` if writes arrived while the push was running, i.e. the
    /// cloud copy is already stale again.
    pub fn complete(mut self) -> bool {
        self.finish(None)
    }

    /// Record a failed push
    pub fn fail(mut self, error: impl Into<String>) {
        self.finish(Some(error.into()));
    }

    /// Whether the tracker was not reset since this ticket was issued
    pub fn is_current(&self) -> bool {
        self.entries
            .lock()
            .get(&self.key)
            .map(|entry| entry.generation == self.generation)
            .unwrap_or(false)
    }

    fn finish(&mut self, error: Option<String>) -> bool {
        self.finished = true;

        let mut entries = self.entries.lock();
        let Some(entry) = entries.get_mut(&self.key) else {
            return false;
        };
        entry.in_flight = false;

        if entry.generation != self.generation {
            tracing::debug!(key = %self.key, "discarding sync result from a previous session");
            return false;
        }

        match error {
            None => {
                entry.status.mark_sync_completed();
                entry.status.has_pending_changes
            }
            Some(error) => {
                entry.status.mark_sync_failed(error);
                false
            }
        }
    }
}

impl Drop for SyncTicket {
    fn drop(&mut self) {
        if !self.finished {
            self.finish(Some("sync abandoned before completion".to_string()));
        }
    }
}
