//! Application state management

use crate::config::Config;
use crate::db::Database;
use crate::error::{AppError, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Holder of a source's write lease
#[derive(Debug, Clone)]
pub struct LeaseInfo {
    pub run_id: Uuid,
    pub acquired_at: chrono::DateTime<chrono::Utc>,
}

/// In-process registry of sources currently being ingested
#[derive(Debug, Default, Clone)]
pub struct SourceLeases {
    active: Arc<DashMap<String, LeaseInfo>>,
}

impl SourceLeases {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim exclusive write access to a source
    pub fn acquire(&self, source_name: &str, run_id: Uuid) -> Result<SourceLease> {
        match self.active.entry(source_name.to_string()) {
            Entry::Occupied(held) => Err(AppError::Conflict(format!(
                "source {} is already being ingested by run {} (started {})",
                source_name,
                held.get().run_id,
                held.get().acquired_at.to_rfc3339()
            ))),
            Entry::Vacant(slot) => {
                slot.insert(LeaseInfo {
                    run_id,
                    acquired_at: chrono::Utc::now(),
                });
                Ok(SourceLease {
                    source_name: source_name.to_string(),
                    active: Arc::clone(&self.active),
                })
            }
        }
    }

    pub fn holder(&self, source_name: &str) -> Option<LeaseInfo> {
        self.active.get(source_name).map(|r| r.clone())
    }
}

/// Released when dropped
#[derive(Debug)]
pub struct SourceLease {
    source_name: String,
    active: Arc<DashMap<String, LeaseInfo>>,
}

impl Drop for SourceLease {
    fn drop(&mut self) {
        self.active.remove(&self.source_name);
    }
}

/// Application state shared across commands
pub struct AppState {
    /// SQLite database pool
    pub db: Arc<Database>,

    /// Sources with a running recorder
    pub leases: SourceLeases,

    pub config: Config,
}

impl AppState {
    /// Create new application state
    pub fn new(config: Config) -> Result<Self> {
        tracing::info!("Database path: {:?}", config.db_path);
        let db = Arc::new(Database::open(&config.db_path)?);

        Ok(Self {
            db,
            leases: SourceLeases::new(),
            config,
        })
    }
}
