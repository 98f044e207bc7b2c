//! Upstream feed adapters

pub mod cse;
pub mod file;

use crate::db::models::{FxRate, PriceBar};
use crate::error::Result;
use async_trait::async_trait;
use chrono::NaiveDate;

pub use cse::CseChartFeed;
pub use file::JsonFileFeed;

/// Feed trait that all upstream providers must implement
#[async_trait]
pub trait Feed: Send + Sync {
    /// Feed ID used in logs (e.g., "cse", "file")
    fn id(&self) -> &str;

    /// Fetch every record dated within `from..=to`
    async fn fetch(&self, from: NaiveDate, to: NaiveDate) -> Result<FeedBatch>;
}

/// Rows returned by one fetch
#[derive(Debug, Clone, Default)]
pub struct FeedBatch {
    pub prices: Vec<PriceBar>,
    pub rates: Vec<FxRate>,
}

impl FeedBatch {
    pub fn len(&self) -> usize {
        self.prices.len() + self.rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop rows dated outside `from..=to`
    pub fn retain_window(&mut self, from: NaiveDate, to: NaiveDate) {
        self.prices.retain(|p| p.trade_date >= from && p.trade_date <= to);
        self.rates.retain(|r| r.rate_date >= from && r.rate_date <= to);
    }
}
