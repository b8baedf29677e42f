//! Save service configuration

use std::time::Duration;

/// Configuration for the save service
#[derive(Debug, Clone)]
pub struct SaveServiceConfig {
    /// Deadline for a single cloud read or write
    pub sync_timeout: Duration,

    /// Push again when writes arrived while a sync was running
    pub resync_pending: bool,

    /// Maximum number of change events buffered per subscriber
    pub event_capacity: usize,
}

impl Default for SaveServiceConfig {
    fn default() -> Self {
        Self {
            sync_timeout: Duration::from_secs(30),
            resync_pending: true,
            event_capacity: 64,
        }
    }
}

impl SaveServiceConfig {
    /// Create a new configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the cloud operation deadline
    pub fn sync_timeout(mut self, timeout: Duration) -> Self {
        self.sync_timeout = timeout;
        self
    }

    /// Enable or disable re-syncing writes that landed mid-sync
    pub fn resync_pending(mut self, enabled: bool) -> Self {
        self.resync_pending = enabled;
        self
    }

    /// Set the change event buffer size
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }
}
