//! Ingestion Recorder
//!
//! Pulls rows from a feed and commits them one date at a time, oldest first,
//! starting the day after the source's watermark. Each date is a single
//! transaction that also advances the watermark, so a failed or interrupted
//! run can simply be re-invoked.

use crate::db::models::{FxKey, FxRate, PriceBar, PriceKey};
use crate::db::Database;
use crate::error::{AppError, Result};
use crate::feeds::Feed;
use crate::state::SourceLeases;
use chrono::{Datelike, Days, NaiveDate};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Recorder settings for one source
#[derive(Debug, Clone)]
pub struct RecorderOptions {
    /// Watermark key
    pub source_name: String,
    /// First date to ingest when the source has no watermark yet
    pub initial_date: Option<NaiveDate>,
    /// Calendar years fetched per feed request
    pub batch_years: u32,
}

impl RecorderOptions {
    pub fn new(source_name: impl Into<String>) -> Self {
        Self {
            source_name: source_name.into(),
            initial_date: None,
            batch_years: 1,
        }
    }
}

/// All rows for one date
#[derive(Debug, Clone, Serialize)]
pub struct DateBatch {
    pub date: NaiveDate,
    pub prices: Vec<PriceBar>,
    pub rates: Vec<FxRate>,
}

impl DateBatch {
    fn new(date: NaiveDate) -> Self {
        Self {
            date,
            prices: Vec::new(),
            rates: Vec::new(),
        }
    }

    /// Fail fast on the first invalid row
    ///
    /// Two rows with the same key are accepted only when they are identical;
    /// otherwise which one lands in the store would depend on feed order.
    pub fn validate(&self) -> Result<()> {
        let checks = self
            .prices
            .iter()
            .map(PriceBar::validate)
            .chain(self.rates.iter().map(FxRate::validate))
            .chain(std::iter::once(self.check_duplicate_keys()));

        for check in checks {
            check.map_err(|e| match e {
                AppError::Validation(msg) => {
                    AppError::Validation(format!("batch {} rejected: {}", self.date, msg))
                }
                other => other,
            })?;
        }
        Ok(())
    }

    fn check_duplicate_keys(&self) -> Result<()> {
        let mut prices: HashMap<PriceKey, &PriceBar> = HashMap::new();
        for bar in &self.prices {
            if let Some(seen) = prices.insert(bar.key(), bar) {
                if seen != bar {
                    return Err(AppError::Validation(format!(
                        "conflicting price rows for {} {}",
                        bar.ticker, bar.trade_date
                    )));
                }
            }
        }

        let mut rates: HashMap<FxKey, &FxRate> = HashMap::new();
        for rate in &self.rates {
            if let Some(seen) = rates.insert(rate.key(), rate) {
                if seen != rate {
                    return Err(AppError::Validation(format!(
                        "conflicting {}/{} rate rows for {}",
                        rate.base_currency, rate.quote_currency, rate.rate_date
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Outcome of a recorder run
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub run_id: Uuid,
    pub source: String,
    pub dates_committed: usize,
    pub prices_written: usize,
    pub rates_written: usize,
    pub last_date: Option<NaiveDate>,
}

/// Writes feed rows into the stores and advances the source watermark
pub struct IngestionRecorder {
    db: Arc<Database>,
    leases: SourceLeases,
    feed: Arc<dyn Feed>,
    options: RecorderOptions,
}

impl IngestionRecorder {
    pub fn new(
        db: Arc<Database>,
        leases: SourceLeases,
        feed: Arc<dyn Feed>,
        options: RecorderOptions,
    ) -> Self {
        Self {
            db,
            leases,
            feed,
            options,
        }
    }

    /// Ingest every date from the resume point up to `target`
    ///
    /// Stops at the first failing date; dates committed before it stay
    /// committed and the watermark reflects them.
    pub async fn run(&self, target: NaiveDate) -> Result<IngestReport> {
        let source = self.options.source_name.as_str();
        let run_id = Uuid::new_v4();
        let _lease = self.leases.acquire(source, run_id)?;

        let mut watermark = self.db.get_watermark(source)?;
        let mut report = IngestReport {
            run_id,
            source: source.to_string(),
            dates_committed: 0,
            prices_written: 0,
            rates_written: 0,
            last_date: watermark,
        };

        let start = self.resume_date(watermark)?;
        if start > target {
            info!("{} is up to date (watermark {:?}, target {})", source, watermark, target);
            return Ok(report);
        }

        info!(
            "Ingest run {} for {} via {}: {} to {}",
            run_id,
            source,
            self.feed.id(),
            start,
            target
        );

        for (from, to) in chunk_windows(start, target, self.options.batch_years) {
            for batch in self.fetch_batches(from, to).await? {
                batch.validate()?;
                self.db.commit_date_batch(source, watermark, batch.date, &batch.prices, &batch.rates)?;

                watermark = Some(batch.date);
                report.dates_committed += 1;
                report.prices_written += batch.prices.len();
                report.rates_written += batch.rates.len();
                report.last_date = watermark;

                info!(
                    "Committed {} for {}: {} prices, {} rates",
                    batch.date,
                    source,
                    batch.prices.len(),
                    batch.rates.len()
                );
            }
        }

        Ok(report)
    }

    /// Fetch and validate what `run` would write, without writing
    pub async fn preview(&self, target: NaiveDate) -> Result<Vec<DateBatch>> {
        let watermark = self.db.get_watermark(&self.options.source_name)?;
        let start = self.resume_date(watermark)?;

        let mut batches = Vec::new();
        if start > target {
            return Ok(batches);
        }

        for (from, to) in chunk_windows(start, target, self.options.batch_years) {
            for batch in self.fetch_batches(from, to).await? {
                batch.validate()?;
                batches.push(batch);
            }
        }
        Ok(batches)
    }

    fn resume_date(&self, watermark: Option<NaiveDate>) -> Result<NaiveDate> {
        match watermark {
            Some(last) => last.succ_opt().ok_or_else(|| {
                AppError::Validation(format!("watermark {} cannot be advanced further", last))
            }),
            None => self.options.initial_date.ok_or_else(|| {
                AppError::Validation(format!(
                    "source {} has never been ingested; an initial date is required",
                    self.options.source_name
                ))
            }),
        }
    }

    /// One batch per calendar date in `from..=to`, including empty dates
    async fn fetch_batches(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<DateBatch>> {
        let fetched = self.feed.fetch(from, to).await?;
        if fetched.is_empty() {
            info!("{} returned no rows for {}..={}", self.feed.id(), from, to);
        } else {
            info!("{} returned {} rows for {}..={}", self.feed.id(), fetched.len(), from, to);
        }

        let mut by_date: BTreeMap<NaiveDate, DateBatch> = from
            .iter_days()
            .take_while(|d| *d <= to)
            .map(|d| (d, DateBatch::new(d)))
            .collect();

        for bar in fetched.prices {
            match by_date.get_mut(&bar.trade_date) {
                Some(batch) => batch.prices.push(bar),
                None => warn!("Skipping {} price for {} outside {}..={}", bar.ticker, bar.trade_date, from, to),
            }
        }
        for rate in fetched.rates {
            match by_date.get_mut(&rate.rate_date) {
                Some(batch) => batch.rates.push(rate),
                None => warn!(
                    "Skipping {}/{} rate for {} outside {}..={}",
                    rate.base_currency, rate.quote_currency, rate.rate_date, from, to
                ),
            }
        }

        Ok(by_date.into_values().collect())
    }
}

/// Split `start..=end` into windows of `years` calendar years
///
/// A window ends the day before the same calendar day `years` later; when that
/// day does not exist (29 February) it spans `365 * years` days instead. A
/// span reaching past the last representable date runs to `end`.
pub fn chunk_windows(start: NaiveDate, end: NaiveDate, years: u32) -> Vec<(NaiveDate, NaiveDate)> {
    let years = years.max(1);
    let mut windows = Vec::new();
    let mut cursor = start;

    while cursor <= end {
        let next_start = i32::try_from(years)
            .ok()
            .and_then(|y| cursor.year().checked_add(y))
            .and_then(|year| NaiveDate::from_ymd_opt(year, cursor.month(), cursor.day()))
            .or_else(|| cursor.checked_add_days(Days::new(365 * u64::from(years))));

        let window_end = next_start
            .and_then(|d| d.pred_opt())
            .map_or(end, |d| d.min(end));

        windows.push((cursor, window_end));

        match window_end.succ_opt() {
            Some(next) if window_end < end => cursor = next,
            _ => break,
        }
    }

    windows
}
