//! Daily price bars (`cse_prices`)
//!
//! Rows are keyed by (ticker, trade_date). Writes are upserts so replaying a
//! feed overwrites corrected values without creating duplicates.

use super::models::{decimal_from_sql, decimal_to_sql, PriceBar};
use crate::error::Result;
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, Row};

const SELECT_COLUMNS: &str =
    "SELECT ticker, trade_date, open, high, low, close, adj_close, volume FROM cse_prices";

/// Insert or replace the bar matching (ticker, trade_date)
pub fn upsert_price(conn: &Connection, bar: &PriceBar) -> Result<()> {
    bar.validate()?;

    conn.execute(
        "INSERT INTO cse_prices (ticker, trade_date, open, high, low, close, adj_close, volume)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT (ticker, trade_date) DO UPDATE SET
           open = excluded.open, high = excluded.high, low = excluded.low,
           close = excluded.close, adj_close = excluded.adj_close, volume = excluded.volume",
        params![
            bar.ticker,
            bar.trade_date,
            decimal_to_sql(bar.open),
            decimal_to_sql(bar.high),
            decimal_to_sql(bar.low),
            decimal_to_sql(bar.close),
            decimal_to_sql(bar.adj_close),
            bar.volume,
        ],
    )?;

    tracing::debug!("Upserted price {} {}", bar.ticker, bar.trade_date);
    Ok(())
}

/// Bars for a ticker between two dates (inclusive), oldest first
pub fn query_range(
    conn: &Connection,
    ticker: &str,
    from_date: NaiveDate,
    to_date: NaiveDate,
) -> Result<Vec<PriceBar>> {
    let mut stmt = conn.prepare(&format!(
        "{} WHERE ticker = ?1 AND trade_date >= ?2 AND trade_date <= ?3 ORDER BY trade_date ASC",
        SELECT_COLUMNS
    ))?;

    let bars = stmt
        .query_map(params![ticker, from_date, to_date], row_to_bar)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(bars)
}

/// Single bar by key
pub fn get_price(conn: &Connection, ticker: &str, trade_date: NaiveDate) -> Result<Option<PriceBar>> {
    let bar = conn
        .query_row(
            &format!("{} WHERE ticker = ?1 AND trade_date = ?2", SELECT_COLUMNS),
            params![ticker, trade_date],
            row_to_bar,
        )
        .optional()?;
    Ok(bar)
}

pub fn count_prices(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM cse_prices", [], |row| row.get(0))?;
    Ok(count)
}

/// Distinct tickers with at least one stored bar
pub fn list_tickers(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT DISTINCT ticker FROM cse_prices ORDER BY ticker")?;
    let tickers = stmt
        .query_map([], |row| row.get(0))?
        .collect::<std::result::Result<Vec<String>, _>>()?;
    Ok(tickers)
}

fn row_to_bar(row: &Row<'_>) -> rusqlite::Result<PriceBar> {
    Ok(PriceBar {
        ticker: row.get(0)?,
        trade_date: row.get(1)?,
        open: decimal_from_sql(row.get(2)?, 2)?,
        high: decimal_from_sql(row.get(3)?, 3)?,
        low: decimal_from_sql(row.get(4)?, 4)?,
        close: decimal_from_sql(row.get(5)?, 5)?,
        adj_close: decimal_from_sql(row.get(6)?, 6)?,
        volume: row.get(7)?,
    })
}
