//! Daily exchange rates (`exchange_rates`)

use super::models::{decimal_from_sql, decimal_to_sql, normalize_currency, FxRate};
use crate::error::{AppError, Result};
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, Row};

/// Insert or replace the rate matching (rate_date, base, quote)
pub fn upsert_rate(conn: &Connection, rate: &FxRate) -> Result<()> {
    rate.validate()?;

    conn.execute(
        "INSERT INTO exchange_rates (rate_date, base_currency, quote_currency, rate)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT (rate_date, base_currency, quote_currency) DO UPDATE SET
           rate = excluded.rate",
        params![
            rate.rate_date,
            rate.base_currency,
            rate.quote_currency,
            decimal_to_sql(rate.rate),
        ],
    )?;

    tracing::debug!(
        "Upserted rate {}/{} {}",
        rate.base_currency,
        rate.quote_currency,
        rate.rate_date
    );
    Ok(())
}

/// Rate for an exact date and pair
pub fn lookup_rate(conn: &Connection, date: NaiveDate, base: &str, quote: &str) -> Result<FxRate> {
    let base = normalize_currency(base);
    let quote = normalize_currency(quote);

    conn.query_row(
        "SELECT rate_date, base_currency, quote_currency, rate
         FROM exchange_rates
         WHERE rate_date = ?1 AND base_currency = ?2 AND quote_currency = ?3",
        params![date, base, quote],
        row_to_rate,
    )
    .optional()?
    .ok_or_else(|| AppError::NotFound(format!("no {}/{} rate on {}", base, quote, date)))
}

/// All rates recorded for a date
pub fn rates_on(conn: &Connection, date: NaiveDate) -> Result<Vec<FxRate>> {
    let mut stmt = conn.prepare(
        "SELECT rate_date, base_currency, quote_currency, rate
         FROM exchange_rates
         WHERE rate_date = ?1
         ORDER BY base_currency, quote_currency",
    )?;

    let rates = stmt
        .query_map(params![date], row_to_rate)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rates)
}

pub fn count_rates(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM exchange_rates", [], |row| row.get(0))?;
    Ok(count)
}

fn row_to_rate(row: &Row<'_>) -> rusqlite::Result<FxRate> {
    Ok(FxRate {
        rate_date: row.get(0)?,
        base_currency: row.get(1)?,
        quote_currency: row.get(2)?,
        rate: decimal_from_sql(row.get(3)?, 3)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrations::run_migrations;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn create_test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_upsert_and_lookup() {
        let conn = create_test_db();
        let rate = FxRate::new(date(2024, 1, 2), "USD", "LKR", Some(Decimal::new(32450, 2)));

        upsert_rate(&conn, &rate).unwrap();

        let found = lookup_rate(&conn, date(2024, 1, 2), "usd", "lkr").unwrap();
        assert_eq!(found, rate);
    }

    #[test]
    fn test_high_precision_rate_is_exact() {
        let conn = create_test_db();
        let precise = Decimal::from_str("324.5012345678901234").unwrap();
        let rate = FxRate::new(date(2024, 1, 2), "USD", "LKR", Some(precise));

        upsert_rate(&conn, &rate).unwrap();

        let found = lookup_rate(&conn, date(2024, 1, 2), "USD", "LKR").unwrap();
        assert_eq!(found.rate, Some(precise));
        assert_eq!(found.rate.unwrap().to_string(), "324.5012345678901234");
    }

    #[test]
    fn test_upsert_replaces_rate() {
        let conn = create_test_db();

        upsert_rate(&conn, &FxRate::new(date(2024, 1, 2), "USD", "LKR", Some(Decimal::from(320)))).unwrap();
        upsert_rate(&conn, &FxRate::new(date(2024, 1, 2), "USD", "LKR", Some(Decimal::from(325)))).unwrap();

        assert_eq!(count_rates(&conn).unwrap(), 1);
        let found = lookup_rate(&conn, date(2024, 1, 2), "USD", "LKR").unwrap();
        assert_eq!(found.rate, Some(Decimal::from(325)));
    }

    #[test]
    fn test_lookup_missing_is_not_found() {
        let conn = create_test_db();
        upsert_rate(&conn, &FxRate::new(date(2024, 1, 2), "USD", "LKR", None)).unwrap();

        let result = lookup_rate(&conn, date(2024, 1, 3), "USD", "LKR");
        assert!(matches!(result, Err(AppError::NotFound(_))));

        let result = lookup_rate(&conn, date(2024, 1, 2), "LKR", "USD");
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[test]
    fn test_degenerate_pair_rejected() {
        let conn = create_test_db();

        let result = upsert_rate(&conn, &FxRate::new(date(2024, 1, 2), "LKR", "LKR", Some(Decimal::ONE)));
        assert!(matches!(result, Err(AppError::Validation(_))));
        assert_eq!(count_rates(&conn).unwrap(), 0);
    }

    #[test]
    fn test_rates_on_date_sorted_by_pair() {
        let conn = create_test_db();
        let day = date(2024, 1, 2);

        upsert_rate(&conn, &FxRate::new(day, "USD", "LKR", Some(Decimal::from(300)))).unwrap();
        upsert_rate(&conn, &FxRate::new(day, "EUR", "LKR", Some(Decimal::from(330)))).unwrap();
        upsert_rate(&conn, &FxRate::new(date(2024, 1, 3), "GBP", "LKR", None)).unwrap();

        let rates = rates_on(&conn, day).unwrap();
        let pairs: Vec<(&str, &str)> = rates
            .iter()
            .map(|r| (r.base_currency.as_str(), r.quote_currency.as_str()))
            .collect();
        assert_eq!(pairs, vec![("EUR", "LKR"), ("USD", "LKR")]);
    }
}
