//! Persisted record types
//!
//! Three records exist: device-wide [`GameSettingsData`] and the user-scoped
//! [`PlayerProgressData`] and [`PlayerStatsData`]. Each one deserializes
//! tolerantly: fields missing from an older file take their default.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashMap;
use storage::RecordKey;
use tokio::sync::Mutex;

use crate::cache::RecordCaches;
use crate::events::SaveEvent;

mod sealed {
    pub trait Sealed {}

    impl Sealed for super::GameSettingsData {}
    impl Sealed for super::PlayerProgressData {}
    impl Sealed for super::PlayerStatsData {}
}

/// A record the save service knows how to cache, persist and announce
///
/// The set is closed; it is implemented for the three record types only.
pub trait Record:
    sealed::Sealed + Serialize + DeserializeOwned + Default + Clone + Send + Sync + 'static
{
    /// Storage key of the record
    const KEY: RecordKey;

    /// Change notification carrying `self`
    fn into_event(self) -> SaveEvent;

    #[doc(hidden)]
    fn slot(caches: &RecordCaches) -> &Mutex<Option<Self>>;
}

/// Device-wide game settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GameSettingsData {
    /// Master volume (0.0 - 1.0)
    pub master_volume: f32,
    /// Music volume (0.0 - 1.0)
    pub music_volume: f32,
    /// Sound effects volume (0.0 - 1.0)
    pub sfx_volume: f32,
    /// Voice volume (0.0 - 1.0)
    pub voice_volume: f32,
    /// Mute all audio
    pub is_muted: bool,

    /// Run fullscreen
    pub is_fullscreen: bool,
    /// Named quality preset
    pub quality_level: String,
    /// Resolution as `WIDTHxHEIGHT`
    pub resolution: String,
    /// Brightness (0.0 - 1.0)
    pub brightness: f32,
    /// Vertical sync
    pub vsync: bool,
    /// Graphics quality tier index
    pub graphics_quality: u32,

    /// Camera sensitivity (0.0 - 1.0)
    pub sensitivity: f32,
    /// Invert the vertical camera axis
    pub invert_y: bool,
    /// Camera shake effects
    pub camera_shake: bool,
    /// Pick up items automatically
    pub auto_pickup: bool,
    /// Controller and device vibration
    pub vibration_enabled: bool,
    /// Show tutorial hints
    pub show_tutorial: bool,
    /// Push notifications
    pub notifications_enabled: bool,
    /// UI language code (e.g., "en", "fr")
    pub language_code: String,
}

impl Default for GameSettingsData {
    fn default() -> Self {
        Self {
            master_volume: 0.8,
            music_volume: 0.7,
            sfx_volume: 0.9,
            voice_volume: 0.85,
            is_muted: false,
            is_fullscreen: true,
            quality_level: "High".to_string(),
            resolution: "1920x1080".to_string(),
            brightness: 0.5,
            vsync: true,
            graphics_quality: 2,
            sensitivity: 0.65,
            invert_y: false,
            camera_shake: true,
            auto_pickup: false,
            vibration_enabled: true,
            show_tutorial: true,
            notifications_enabled: true,
            language_code: "en".to_string(),
        }
    }
}

impl GameSettingsData {
    /// Music output level after master volume and mute
    pub fn effective_music_volume(&self) -> f32 {
        self.effective(self.music_volume)
    }

    /// Sound effect output level after master volume and mute
    pub fn effective_sfx_volume(&self) -> f32 {
        self.effective(self.sfx_volume)
    }

    /// Voice output level after master volume and mute
    pub fn effective_voice_volume(&self) -> f32 {
        self.effective(self.voice_volume)
    }

    fn effective(&self, channel: f32) -> f32 {
        if self.is_muted {
            0.0
        } else {
            (self.master_volume * channel).clamp(0.0, 1.0)
        }
    }
}

/// Per-user unlocks, scores and achievements
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlayerProgressData {
    /// Unlocked character ids
    pub unlocked_characters: Vec<String>,
    /// Unlocked map ids
    pub unlocked_maps: Vec<String>,
    /// Unlocked recipe ids
    pub unlocked_recipes: Vec<String>,
    /// Unlocked cosmetic ids
    pub unlocked_cosmetics: Vec<String>,

    /// Highest level reached
    pub highest_level: u32,
    /// Best score per game mode
    pub game_mode_high_scores: HashMap<String, i64>,
    /// Best completion time per game mode, in seconds
    pub game_mode_best_times: HashMap<String, f32>,

    /// Completed achievement ids
    pub completed_achievements: Vec<String>,
    /// Progress counters for unfinished achievements
    pub achievement_progress: HashMap<String, i32>,

    /// Whether the tutorial was finished
    pub tutorial_completed: bool,
    /// Completed tutorial step ids
    pub completed_tutorial_steps: Vec<String>,
}

fn insert_unique(list: &mut Vec<String>, id: &str) {
    if !list.iter().any(|existing| existing == id) {
        list.push(id.to_string());
    }
}

fn contains(list: &[String], id: &str) -> bool {
    list.iter().any(|existing| existing == id)
}

impl PlayerProgressData {
    /// Check if a character is unlocked
    pub fn is_character_unlocked(&self, character_id: &str) -> bool {
        contains(&self.unlocked_characters, character_id)
    }

    /// Unlock a character
    pub fn unlock_character(&mut self, character_id: &str) {
        insert_unique(&mut self.unlocked_characters, character_id);
    }

    /// Check if a map is unlocked
    pub fn is_map_unlocked(&self, map_id: &str) -> bool {
        contains(&self.unlocked_maps, map_id)
    }

    /// Unlock a map
    pub fn unlock_map(&mut self, map_id: &str) {
        insert_unique(&mut self.unlocked_maps, map_id);
    }

    /// Check if a recipe is unlocked
    pub fn is_recipe_unlocked(&self, recipe_id: &str) -> bool {
        contains(&self.unlocked_recipes, recipe_id)
    }

    /// Unlock a recipe
    pub fn unlock_recipe(&mut self, recipe_id: &str) {
        insert_unique(&mut self.unlocked_recipes, recipe_id);
    }

    /// Check if a cosmetic is unlocked
    pub fn is_cosmetic_unlocked(&self, cosmetic_id: &str) -> bool {
        contains(&self.unlocked_cosmetics, cosmetic_id)
    }

    /// Unlock a cosmetic
    pub fn unlock_cosmetic(&mut self, cosmetic_id: &str) {
        insert_unique(&mut self.unlocked_cosmetics, cosmetic_id);
    }

    /// Store `score` if it beats the mode's high score. Returns `true` on a new record.
    pub fn update_high_score(&mut self, game_mode_id: &str, score: i64) -> bool {
        match self.game_mode_high_scores.get(game_mode_id) {
            Some(best) if score <= *best => false,
            _ => {
                self.game_mode_high_scores.insert(game_mode_id.to_string(), score);
                true
            }
        }
    }

    /// Store `time` if it beats the mode's best time. Returns `true` on a new record.
    pub fn update_best_time(&mut self, game_mode_id: &str, time: f32) -> bool {
        match self.game_mode_best_times.get(game_mode_id) {
            Some(best) if time >= *best => false,
            _ => {
                self.game_mode_best_times.insert(game_mode_id.to_string(), time);
                true
            }
        }
    }

    /// Complete an achievement
    pub fn complete_achievement(&mut self, achievement_id: &str) {
        insert_unique(&mut self.completed_achievements, achievement_id);
    }

    /// Set the progress counter of an achievement
    pub fn update_achievement_progress(&mut self, achievement_id: &str, progress: i32) {
        self.achievement_progress.insert(achievement_id.to_string(), progress);
    }

    /// Complete a tutorial step
    pub fn complete_tutorial_step(&mut self, step_id: &str) {
        insert_unique(&mut self.completed_tutorial_steps, step_id);
    }

    /// Check if a tutorial step is completed
    pub fn is_tutorial_step_completed(&self, step_id: &str) -> bool {
        contains(&self.completed_tutorial_steps, step_id)
    }
}

/// Per-user statistics and currency
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlayerStatsData {
    /// Display name
    pub player_name: String,
    /// How many times the display name was changed
    pub username_change_count: u32,
    /// Platform player id, empty until assigned
    pub player_id: String,
    /// Current level
    pub level: u32,
    /// Experience towards the next level
    pub experience: u32,
    /// Experience needed for the next level
    pub experience_to_next_level: u32,

    /// Soft currency
    pub coins: i64,
    /// Premium currency
    pub gems: i64,

    /// Matches played
    pub games_played: u32,
    /// Matches won
    pub games_won: u32,
    /// Matches lost
    pub games_lost: u32,
    /// Total play time in seconds
    pub total_play_time: f32,
    /// Sum of all match scores
    pub total_score: i64,
    /// Orders completed
    pub total_orders_completed: u32,
    /// Orders failed
    pub total_orders_failed: u32,
    /// Ingredients cut
    pub total_ingredients_cut: u32,
    /// Ingredients burned
    pub total_ingredients_burned: u32,
    /// Dishes served
    pub total_dishes_served: u32,
    /// Best combo reached
    pub highest_combo: u32,

    /// Matches played per character id
    pub character_usage: HashMap<String, u32>,
    /// Most played character id
    pub favorite_character: String,
    /// Matches played per game mode id
    pub game_mode_usage: HashMap<String, u32>,
    /// Most played game mode id
    pub favorite_game_mode: String,
}

impl Default for PlayerStatsData {
    fn default() -> Self {
        Self {
            player_name: String::new(),
            username_change_count: 0,
            player_id: String::new(),
            level: 1,
            experience: 0,
            experience_to_next_level: 100,
            coins: 0,
            gems: 0,
            games_played: 0,
            games_won: 0,
            games_lost: 0,
            total_play_time: 0.0,
            total_score: 0,
            total_orders_completed: 0,
            total_orders_failed: 0,
            total_ingredients_cut: 0,
            total_ingredients_burned: 0,
            total_dishes_served: 0,
            highest_combo: 0,
            character_usage: HashMap::new(),
            favorite_character: String::new(),
            game_mode_usage: HashMap::new(),
            favorite_game_mode: String::new(),
        }
    }
}

/// Experience needed to reach `level`
fn experience_for_level(level: u32) -> u32 {
    100 * level
}

/// Bump `id` in `usage` and promote it to favourite if it overtook the current one
fn record_usage(usage: &mut HashMap<String, u32>, favorite: &mut String, id: &str) {
    if id.is_empty() {
        return;
    }
    let count = {
        let count = usage.entry(id.to_string()).or_insert(0);
        *count += 1;
        *count
    };
    let favorite_count = usage.get(favorite.as_str()).copied().unwrap_or(0);
    if favorite.is_empty() || count > favorite_count {
        *favorite = id.to_string();
    }
}

impl PlayerStatsData {
    /// Add experience, carrying over into as many levels as it covers.
    /// Returns `true` if at least one level was gained.
    pub fn add_experience(&mut self, amount: u32) -> bool {
        self.experience = self.experience.saturating_add(amount);

        let mut leveled_up = false;
        while self.experience >= self.experience_to_next_level {
            self.experience -= self.experience_to_next_level;
            self.level += 1;
            self.experience_to_next_level = experience_for_level(self.level + 1);
            leveled_up = true;
        }
        leveled_up
    }

    /// Add (or with a negative amount, spend) coins
    pub fn add_coins(&mut self, amount: i64) {
        self.coins += amount;
    }

    /// Add (or with a negative amount, spend) gems
    pub fn add_gems(&mut self, amount: i64) {
        self.gems += amount;
    }

    /// Record a finished match
    pub fn record_game_played(
        &mut self,
        won: bool,
        game_mode_id: &str,
        character_id: &str,
        play_time: f32,
        score: i64,
    ) {
        self.games_played += 1;
        if won {
            self.games_won += 1;
        } else {
            self.games_lost += 1;
        }
        self.total_play_time += play_time;
        self.total_score += score;

        record_usage(&mut self.character_usage, &mut self.favorite_character, character_id);
        record_usage(&mut self.game_mode_usage, &mut self.favorite_game_mode, game_mode_id);
    }

    /// Record an order completed
    pub fn record_order_completed(&mut self) {
        self.total_orders_completed += 1;
    }

    /// Record an order failed
    pub fn record_order_failed(&mut self) {
        self.total_orders_failed += 1;
    }

    /// Record an ingredient cut
    pub fn record_ingredient_cut(&mut self) {
        self.total_ingredients_cut += 1;
    }

    /// Record an ingredient burned
    pub fn record_ingredient_burned(&mut self) {
        self.total_ingredients_burned += 1;
    }

    /// Record a dish served
    pub fn record_dish_served(&mut self) {
        self.total_dishes_served += 1;
    }

    /// Keep the best combo
    pub fn record_combo(&mut self, combo: u32) {
        self.highest_combo = self.highest_combo.max(combo);
    }
}

impl Record for GameSettingsData {
    const KEY: RecordKey = RecordKey::Settings;

    fn into_event(self) -> SaveEvent {
        SaveEvent::SettingsChanged(self)
    }

    fn slot(caches: &RecordCaches) -> &Mutex<Option<Self>> {
        &caches.settings
    }
}

impl Record for PlayerProgressData {
    const KEY: RecordKey = RecordKey::Progress;

    fn into_event(self) -> SaveEvent {
        SaveEvent::PlayerProgressChanged(self)
    }

    fn slot(caches: &RecordCaches) -> &Mutex<Option<Self>> {
        &caches.progress
    }
}

impl Record for PlayerStatsData {
    const KEY: RecordKey = RecordKey::Stats;

    fn into_event(self) -> SaveEvent {
        SaveEvent::PlayerStatsChanged(self)
    }

    fn slot(caches: &RecordCaches) -> &Mutex<Option<Self>> {
        &caches.stats
    }
}
