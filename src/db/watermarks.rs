//! Per-source ingest watermarks (`ingest_state`)
//!
//! A watermark only ever moves forward. Callers that must not race another
//! writer use [`compare_and_advance`] inside an immediate transaction.

use super::models::IngestWatermark;
use crate::error::{AppError, Result};
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};

/// Last ingested date for a source, `None` if never ingested
pub fn get_watermark(conn: &Connection, source_name: &str) -> Result<Option<NaiveDate>> {
    let last_date: Option<Option<NaiveDate>> = conn
        .query_row(
            "SELECT last_date FROM ingest_state WHERE source_name = ?1",
            params![source_name],
            |row| row.get(0),
        )
        .optional()?;

    Ok(last_date.flatten())
}

/// Move the watermark to `new_date`; equal dates are accepted
pub fn advance_watermark(conn: &Connection, source_name: &str, new_date: NaiveDate) -> Result<()> {
    validate_source(source_name)?;

    if let Some(current) = get_watermark(conn, source_name)? {
        if new_date < current {
            return Err(AppError::Regression {
                source_name: source_name.to_string(),
                current,
                attempted: new_date,
            });
        }
    }

    conn.execute(
        "INSERT INTO ingest_state (source_name, last_date) VALUES (?1, ?2)
         ON CONFLICT (source_name) DO UPDATE SET last_date = excluded.last_date",
        params![source_name, new_date],
    )?;

    tracing::debug!("Watermark for {} advanced to {}", source_name, new_date);
    Ok(())
}

/// Advance only if the stored watermark still equals `expected`
///
/// A mismatch means another writer committed for this source since
/// `expected` was read.
pub fn compare_and_advance(
    conn: &Connection,
    source_name: &str,
    expected: Option<NaiveDate>,
    new_date: NaiveDate,
) -> Result<()> {
    let current = get_watermark(conn, source_name)?;
    if current != expected {
        return Err(AppError::Conflict(format!(
            "watermark for {} moved from {} to {} during ingestion",
            source_name,
            display_date(expected),
            display_date(current)
        )));
    }

    advance_watermark(conn, source_name, new_date)
}

/// All watermarks ordered by source name
pub fn list_watermarks(conn: &Connection) -> Result<Vec<IngestWatermark>> {
    let mut stmt =
        conn.prepare("SELECT source_name, last_date FROM ingest_state ORDER BY source_name")?;

    let watermarks = stmt
        .query_map([], |row| {
            Ok(IngestWatermark {
                source_name: row.get(0)?,
                last_date: row.get(1)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(watermarks)
}

fn validate_source(source_name: &str) -> Result<()> {
    if source_name.trim().is_empty() {
        return Err(AppError::Validation("source name is required".to_string()));
    }
    Ok(())
}

fn display_date(date: Option<NaiveDate>) -> String {
    date.map(|d| d.to_string()).unwrap_or_else(|| "none".to_string())
}
