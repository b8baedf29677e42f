//! Save persistence and cloud sync
//!
//! Re-exports the storage providers and the typed save service, plus a
//! logging bootstrap for binaries and tests.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub use save_service;
pub use storage;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install a `tracing` subscriber filtered by `RUST_LOG` (default `info`)
///
/// Does nothing if a global subscriber is already set, so it is safe to call
/// from every test.
pub fn init_logging() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}
