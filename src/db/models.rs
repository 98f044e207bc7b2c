//! Stored data models and their validation rules

use crate::error::{AppError, Result};
use chrono::NaiveDate;
use rusqlite::types::Value;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Daily OHLCV bar for one ticker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub ticker: String,
    pub trade_date: NaiveDate,
    pub open: Option<Decimal>,
    pub high: Option<Decimal>,
    pub low: Option<Decimal>,
    pub close: Option<Decimal>,
    pub adj_close: Option<Decimal>,
    pub volume: Option<i64>,
}

/// Natural key of a price bar
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PriceKey(pub String, pub NaiveDate);

impl PriceBar {
    /// Bar with only the key set
    pub fn new(ticker: impl Into<String>, trade_date: NaiveDate) -> Self {
        Self {
            ticker: ticker.into(),
            trade_date,
            open: None,
            high: None,
            low: None,
            close: None,
            adj_close: None,
            volume: None,
        }
    }

    pub fn key(&self) -> PriceKey {
        PriceKey(self.ticker.clone(), self.trade_date)
    }

    pub fn validate(&self) -> Result<()> {
        if self.ticker.trim().is_empty() {
            return Err(AppError::Validation(format!(
                "price bar on {} has an empty ticker",
                self.trade_date
            )));
        }
        if let Some(volume) = self.volume {
            if volume < 0 {
                return Err(AppError::Validation(format!(
                    "price bar {} {} has negative volume {}",
                    self.ticker, self.trade_date, volume
                )));
            }
        }
        Ok(())
    }
}

/// Daily exchange rate for one currency pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FxRate {
    pub rate_date: NaiveDate,
    pub base_currency: String,
    pub quote_currency: String,
    pub rate: Option<Decimal>,
}

/// Natural key of an FX rate
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FxKey(pub NaiveDate, pub String, pub String);

impl FxRate {
    pub fn new(
        rate_date: NaiveDate,
        base_currency: impl Into<String>,
        quote_currency: impl Into<String>,
        rate: Option<Decimal>,
    ) -> Self {
        Self {
            rate_date,
            base_currency: normalize_currency(&base_currency.into()),
            quote_currency: normalize_currency(&quote_currency.into()),
            rate,
        }
    }

    pub fn key(&self) -> FxKey {
        FxKey(
            self.rate_date,
            self.base_currency.clone(),
            self.quote_currency.clone(),
        )
    }

    /// Currency codes must be three ASCII letters and the pair must not be degenerate
    pub fn validate(&self) -> Result<()> {
        for code in [&self.base_currency, &self.quote_currency] {
            if !is_currency_code(code) {
                return Err(AppError::Validation(format!(
                    "invalid currency code '{}' on {}",
                    code, self.rate_date
                )));
            }
        }
        if self.base_currency == self.quote_currency {
            return Err(AppError::Validation(format!(
                "degenerate currency pair {}/{} on {}",
                self.base_currency, self.quote_currency, self.rate_date
            )));
        }
        Ok(())
    }
}

/// Last fully ingested date for a source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestWatermark {
    pub source_name: String,
    pub last_date: Option<NaiveDate>,
}

pub fn normalize_currency(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

fn is_currency_code(code: &str) -> bool {
    code.len() == 3 && code.chars().all(|c| c.is_ascii_uppercase())
}

/// Canonical decimal string as stored in a decimal column
pub(crate) fn decimal_to_sql(value: Option<Decimal>) -> Option<String> {
    value.map(|d| d.normalize().to_string())
}

/// Read a decimal column
///
/// Values written by this crate are text; integer and real storage classes
/// are accepted for rows loaded by other tools.
pub(crate) fn decimal_from_sql(value: Value, idx: usize) -> rusqlite::Result<Option<Decimal>> {
    let conversion_error = |msg: String| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            Box::new(AppError::Validation(msg)),
        )
    };

    match value {
        Value::Null => Ok(None),
        Value::Integer(i) => Ok(Some(Decimal::from(i))),
        Value::Real(f) => Decimal::from_f64(f)
            .map(Some)
            .ok_or_else(|| conversion_error(format!("{} is not a representable decimal", f))),
        Value::Text(s) => Decimal::from_str(&s)
            .map(Some)
            .map_err(|e| conversion_error(format!("'{}' is not a decimal: {}", s, e))),
        Value::Blob(_) => Err(rusqlite::Error::InvalidColumnType(
            idx,
            "numeric".to_string(),
            rusqlite::types::Type::Blob,
        )),
    }
}
