//! Typed save API with cloud sync
//!
//! [`SaveService`] caches the three persisted records, writes them through the
//! storage policy to local and cloud providers, tracks per-record cloud sync
//! state and broadcasts a [`SaveEvent`] after every change.
//!
//! ```no_run
//! use std::sync::Arc;
//! use save_service::SaveService;
//! use storage::{FileStorage, MemoryCloudStorage};
//!
//! # async fn example() -> storage::Result<()> {
//! let local = Arc::new(FileStorage::open("saves")?);
//! let service = SaveService::new(local, Arc::new(MemoryCloudStorage::default()));
//!
//! let stats = service.update_player_stats(|s| s.add_coins(50)).await;
//! assert_eq!(stats.coins, 50);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod cache;
pub mod codec;
pub mod config;
pub mod events;
pub mod legacy;
pub mod records;
pub mod service;

pub use codec::CodecError;
pub use config::SaveServiceConfig;
pub use events::SaveEvent;
pub use legacy::LegacyPreferences;
pub use records::{GameSettingsData, PlayerProgressData, PlayerStatsData, Record};
pub use service::{SaveService, SaveServiceBuilder};
