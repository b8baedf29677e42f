//! One-shot import of the flat key/value preferences used before records
//! were stored as JSON files
//!
//! Volumes, brightness and sensitivity were stored as percentages and flags
//! as `0`/`1` integers. Missing entries take the old preference defaults.

use serde_json::{Map, Value};

use crate::records::{GameSettingsData, PlayerStatsData};
use crate::service::SaveService;

/// Flat preference map as exported by the old build
pub type LegacyPreferences = Map<String, Value>;

fn percent(prefs: &LegacyPreferences, name: &str, default: f64) -> f32 {
    let value = prefs.get(name).and_then(Value::as_f64).unwrap_or(default);
    (value / 100.0).clamp(0.0, 1.0) as f32
}

fn flag(prefs: &LegacyPreferences, name: &str, default: i64) -> bool {
    let value = match prefs.get(name) {
        Some(Value::Bool(value)) => return *value,
        Some(value) => value.as_i64().unwrap_or(default),
        None => default,
    };
    value != 0
}

fn text(prefs: &LegacyPreferences, name: &str, default: &str) -> String {
    prefs.get(name).and_then(Value::as_str).unwrap_or(default).to_string()
}

fn integer(prefs: &LegacyPreferences, name: &str, default: i64) -> i64 {
    prefs.get(name).and_then(Value::as_i64).unwrap_or(default)
}

fn apply_settings(prefs: &LegacyPreferences, settings: &mut GameSettingsData) {
    settings.master_volume = percent(prefs, "MasterVolume", 80.0);
    settings.music_volume = percent(prefs, "MusicVolume", 70.0);
    settings.sfx_volume = percent(prefs, "SFXVolume", 90.0);
    settings.voice_volume = percent(prefs, "VoiceVolume", 85.0);
    settings.is_muted = flag(prefs, "Mute", 0);

    settings.is_fullscreen = flag(prefs, "Fullscreen", 1);
    settings.quality_level = text(prefs, "Quality", "High");
    settings.resolution = text(prefs, "Resolution", "1920x1080");
    settings.brightness = percent(prefs, "Brightness", 50.0);
    settings.vsync = flag(prefs, "VSync", 1);

    settings.sensitivity = percent(prefs, "Sensitivity", 65.0);
    settings.invert_y = flag(prefs, "InvertY", 0);
    settings.camera_shake = flag(prefs, "CameraShake", 1);
    settings.auto_pickup = flag(prefs, "AutoPickup", 0);
    settings.vibration_enabled = flag(prefs, "Vibration", 1);

    settings.show_tutorial = flag(prefs, "Tutorial", 1);
    settings.notifications_enabled = flag(prefs, "Notifications", 1);
}

fn apply_stats(prefs: &LegacyPreferences, stats: &mut PlayerStatsData) {
    stats.player_name = text(prefs, "PlayerName", "Player");
    stats.level = u32::try_from(integer(prefs, "PlayerLevel", 1)).unwrap_or(1).max(1);
    stats.coins = integer(prefs, "PlayerCoins", 0);
    stats.gems = integer(prefs, "PlayerGems", 0);
}

impl SaveService {
    /// Copy legacy preferences into the settings and stats records and save
    /// both
    pub async fn import_legacy_preferences(&self, prefs: &LegacyPreferences) {
        self.update_settings(|settings| apply_settings(prefs, settings)).await;
        self.update_player_stats(|stats| apply_stats(prefs, stats)).await;
        tracing::info!(entries = prefs.len(), "imported legacy preferences");
    }
}
