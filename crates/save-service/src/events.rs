//! Record change notifications

use storage::RecordKey;

use crate::records::{GameSettingsData, PlayerProgressData, PlayerStatsData};

/// Published after a record's cache was updated and its durable write dispatched
#[derive(Debug, Clone, PartialEq)]
pub enum SaveEvent {
    /// Settings changed
    SettingsChanged(GameSettingsData),
    /// Player progress changed
    PlayerProgressChanged(PlayerProgressData),
    /// Player stats changed
    PlayerStatsChanged(PlayerStatsData),
}

impl SaveEvent {
    /// Record the event refers to
    pub fn key(&self) -> RecordKey {
        match self {
            SaveEvent::SettingsChanged(_) => RecordKey::Settings,
            SaveEvent::PlayerProgressChanged(_) => RecordKey::Progress,
            SaveEvent::PlayerStatsChanged(_) => RecordKey::Stats,
        }
    }
}
