//! In-memory record cache slots

use tokio::sync::Mutex;

use crate::records::{GameSettingsData, PlayerProgressData, PlayerStatsData};

/// One lazily populated slot per record type
///
/// A slot stays locked for a whole read-modify-write, so updates to the same
/// record are serialized.
#[derive(Debug, Default)]
pub struct RecordCaches {
    pub(crate) settings: Mutex<Option<GameSettingsData>>,
    pub(crate) progress: Mutex<Option<PlayerProgressData>>,
    pub(crate) stats: Mutex<Option<PlayerStatsData>>,
}
