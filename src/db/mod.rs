//! SQLite storage for prices, FX rates and ingest watermarks

pub mod models;
mod migrations;
mod prices;
mod fx_rates;
mod watermarks;

use crate::error::Result;
use chrono::NaiveDate;
use models::*;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::TransactionBehavior;
use std::path::Path;
use std::time::Duration;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Pooled SQLite database handle
///
/// Readers take their own pooled connection and see a WAL snapshot, so they
/// are not blocked by a batch being written.
pub struct Database {
    pool: Pool<SqliteConnectionManager>,
}

impl Database {
    /// Open (or create) the database file and run migrations
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let manager = SqliteConnectionManager::file(path).with_init(|conn| {
            conn.busy_timeout(BUSY_TIMEOUT)?;
            // Enable WAL mode for concurrent readers
            conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
        });

        let pool = Pool::builder().build(manager)?;
        let db = Self { pool };
        db.run_migrations()?;

        tracing::info!("Opened database at {:?}", path);
        Ok(db)
    }

    /// Private in-memory database backed by a single connection
    pub fn open_in_memory() -> Result<Self> {
        let manager = SqliteConnectionManager::memory();
        // The data lives only as long as this one connection
        let pool = Pool::builder()
            .max_size(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .build(manager)?;
        let db = Self { pool };
        db.run_migrations()?;
        Ok(db)
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    /// Run database migrations
    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn()?;
        migrations::run_migrations(&conn)
    }

    // ========== Price Methods ==========

    /// Insert or replace a price bar
    pub fn upsert_price(&self, bar: &PriceBar) -> Result<()> {
        let conn = self.conn()?;
        prices::upsert_price(&conn, bar)
    }

    /// Bars for a ticker in a date range, oldest first
    pub fn query_prices(&self, ticker: &str, from_date: NaiveDate, to_date: NaiveDate) -> Result<Vec<PriceBar>> {
        let conn = self.conn()?;
        prices::query_range(&conn, ticker, from_date, to_date)
    }

    pub fn get_price(&self, ticker: &str, trade_date: NaiveDate) -> Result<Option<PriceBar>> {
        let conn = self.conn()?;
        prices::get_price(&conn, ticker, trade_date)
    }

    pub fn count_prices(&self) -> Result<i64> {
        let conn = self.conn()?;
        prices::count_prices(&conn)
    }

    pub fn list_tickers(&self) -> Result<Vec<String>> {
        let conn = self.conn()?;
        prices::list_tickers(&conn)
    }

    // ========== FX Rate Methods ==========

    /// Insert or replace an FX rate
    pub fn upsert_rate(&self, rate: &FxRate) -> Result<()> {
        let conn = self.conn()?;
        fx_rates::upsert_rate(&conn, rate)
    }

    /// Rate for an exact date and pair, `NotFound` if absent
    pub fn lookup_rate(&self, date: NaiveDate, base: &str, quote: &str) -> Result<FxRate> {
        let conn = self.conn()?;
        fx_rates::lookup_rate(&conn, date, base, quote)
    }

    pub fn rates_on(&self, date: NaiveDate) -> Result<Vec<FxRate>> {
        let conn = self.conn()?;
        fx_rates::rates_on(&conn, date)
    }

    pub fn count_rates(&self) -> Result<i64> {
        let conn = self.conn()?;
        fx_rates::count_rates(&conn)
    }

    // ========== Watermark Methods ==========

    /// Last ingested date for a source
    pub fn get_watermark(&self, source_name: &str) -> Result<Option<NaiveDate>> {
        let conn = self.conn()?;
        watermarks::get_watermark(&conn, source_name)
    }

    /// Move a source's watermark forward
    pub fn advance_watermark(&self, source_name: &str, new_date: NaiveDate) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        watermarks::advance_watermark(&tx, source_name, new_date)?;
        tx.commit()?;
        Ok(())
    }

    pub fn list_watermarks(&self) -> Result<Vec<IngestWatermark>> {
        let conn = self.conn()?;
        watermarks::list_watermarks(&conn)
    }

    // ========== Batch Methods ==========

    /// Write one date's rows and advance the watermark in a single transaction
    ///
    /// `expected` is the watermark the caller last observed. The transaction
    /// takes the write lock up front, so the check and the update cannot
    /// interleave with another writer. Any failure rolls the whole date back.
    pub fn commit_date_batch(
        &self,
        source_name: &str,
        expected: Option<NaiveDate>,
        date: NaiveDate,
        bars: &[PriceBar],
        rates: &[FxRate],
    ) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        for bar in bars {
            prices::upsert_price(&tx, bar)?;
        }
        for rate in rates {
            fx_rates::upsert_rate(&tx, rate)?;
        }
        watermarks::compare_and_advance(&tx, source_name, expected, date)?;

        tx.commit()?;
        Ok(())
    }
}
