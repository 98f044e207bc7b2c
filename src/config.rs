//! Runtime configuration
//!
//! Values are resolved by the binary from flags, the environment and `.env`;
//! the library only consumes the resulting structs.

use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_DB_PATH: &str = "data/cse_ingest.db";
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Upstream HTTP feed settings
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Base URL of the CSE site; `None` uses the public endpoint
    pub api_base: Option<String>,
    pub access_token: Option<String>,
    pub timeout: Duration,
    /// Directory that receives every raw chart response; `None` disables it
    pub raw_dir: Option<PathBuf>,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            api_base: None,
            access_token: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            raw_dir: None,
        }
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: PathBuf,
    pub feed: FeedConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            feed: FeedConfig::default(),
        }
    }
}
