//! JSON file feed for offline loads and FX rates

use super::{Feed, FeedBatch};
use crate::db::models::{FxRate, PriceBar};
use crate::error::{AppError, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// File layout: `{ "prices": [...], "rates": [...] }`
#[derive(Debug, Default, Deserialize)]
struct FeedFile {
    #[serde(default)]
    prices: Vec<PriceRecord>,
    #[serde(default)]
    rates: Vec<RateRecord>,
}

#[derive(Debug, Deserialize)]
struct PriceRecord {
    #[serde(default)]
    ticker: String,
    trade_date: Option<NaiveDate>,
    open: Option<Decimal>,
    high: Option<Decimal>,
    low: Option<Decimal>,
    close: Option<Decimal>,
    adj_close: Option<Decimal>,
    volume: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RateRecord {
    rate_date: Option<NaiveDate>,
    base_currency: String,
    quote_currency: String,
    rate: Option<Decimal>,
}

impl PriceRecord {
    fn into_bar(self, index: usize) -> Result<PriceBar> {
        let trade_date = self.trade_date.ok_or_else(|| {
            AppError::Validation(format!("price record {} ({}) has no trade_date", index, self.ticker))
        })?;

        Ok(PriceBar {
            ticker: self.ticker,
            trade_date,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            adj_close: self.adj_close,
            volume: self.volume,
        })
    }
}

impl RateRecord {
    fn into_rate(self, index: usize) -> Result<FxRate> {
        let rate_date = self.rate_date.ok_or_else(|| {
            AppError::Validation(format!(
                "rate record {} ({}/{}) has no rate_date",
                index, self.base_currency, self.quote_currency
            ))
        })?;

        Ok(FxRate::new(rate_date, self.base_currency, self.quote_currency, self.rate))
    }
}

/// Reads prices and rates from a JSON document on disk
pub struct JsonFileFeed {
    path: PathBuf,
}

impl JsonFileFeed {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Feed for JsonFileFeed {
    fn id(&self) -> &str {
        "file"
    }

    async fn fetch(&self, from: NaiveDate, to: NaiveDate) -> Result<FeedBatch> {
        let content = tokio::fs::read_to_string(&self.path).await?;
        let file: FeedFile = serde_json::from_str(&content)?;

        let mut batch = FeedBatch {
            prices: file
                .prices
                .into_iter()
                .enumerate()
                .map(|(i, record)| record.into_bar(i))
                .collect::<Result<Vec<_>>>()?,
            rates: file
                .rates
                .into_iter()
                .enumerate()
                .map(|(i, record)| record.into_rate(i))
                .collect::<Result<Vec<_>>>()?,
        };

        batch.retain_window(from, to);
        tracing::debug!("Read {} rows from {:?}", batch.len(), self.path);
        Ok(batch)
    }
}
