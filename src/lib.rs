//! CSE Ingest - daily price and FX rate ingestion
//!
//! Stores daily equity bars, exchange rates and per-source watermarks in
//! SQLite, and records upstream feeds into them one date at a time.

pub mod config;
pub mod db;
pub mod error;
pub mod feeds;
pub mod services;
pub mod state;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing/logging
///
/// `RUST_LOG` overrides the default filter.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cse_ingest=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
