//! Daily close-to-close returns over stored bars

use crate::db::models::PriceBar;
use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;

/// Return from the previous bar's close to this bar's close
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyReturn {
    pub ticker: String,
    pub trade_date: NaiveDate,
    pub close: Option<f64>,
    pub pct_return: Option<f64>,
    pub log_return: Option<f64>,
}

/// Returns for bars of one ticker, which must be sorted by date
///
/// The first bar, a bar with a missing close, and a bar following a missing
/// or zero close have no return. A close of zero is a -100% return with no
/// log return.
pub fn daily_returns(bars: &[PriceBar]) -> Vec<DailyReturn> {
    let mut previous: Option<f64> = None;

    bars.iter()
        .map(|bar| {
            let close = bar.close.and_then(|c| c.to_f64());

            let ratio = match (previous, close) {
                (Some(prev), Some(cur)) if prev != 0.0 => Some(cur / prev),
                _ => None,
            };
            previous = close;

            DailyReturn {
                ticker: bar.ticker.clone(),
                trade_date: bar.trade_date,
                close,
                pct_return: ratio.map(|r| r - 1.0),
                log_return: ratio.filter(|r| *r > 0.0).map(f64::ln),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn bar(day: u32, close: Option<i64>) -> PriceBar {
        PriceBar {
            close: close.map(Decimal::from),
            ..PriceBar::new("ABC", NaiveDate::from_ymd_opt(2024, 1, day).unwrap())
        }
    }

    #[test]
    fn test_simple_and_log_returns() {
        let returns = daily_returns(&[bar(1, Some(100)), bar(2, Some(110)), bar(3, Some(99))]);

        assert_eq!(returns.len(), 3);
        assert_eq!(returns[0].pct_return, None);
        assert_eq!(returns[0].log_return, None);

        let pct = returns[1].pct_return.unwrap();
        assert!((pct - 0.10).abs() < 1e-12);
        assert!((returns[1].log_return.unwrap() - 1.1f64.ln()).abs() < 1e-12);

        assert!((returns[2].pct_return.unwrap() + 0.10).abs() < 1e-12);
    }

    #[test]
    fn test_missing_close_breaks_chain() {
        let returns = daily_returns(&[bar(1, Some(100)), bar(2, None), bar(3, Some(50))]);

        assert_eq!(returns[1].pct_return, None);
        assert_eq!(returns[2].pct_return, None);
        assert_eq!(returns[2].close, Some(50.0));
    }

    #[test]
    fn test_zero_close() {
        let returns = daily_returns(&[bar(1, Some(100)), bar(2, Some(0)), bar(3, Some(50))]);

        // Falling to zero is a total loss
        assert_eq!(returns[1].pct_return, Some(-1.0));
        assert_eq!(returns[1].log_return, None);
        // Nothing is defined relative to a zero close
        assert_eq!(returns[2].pct_return, None);
        assert_eq!(returns[2].log_return, None);
    }

    #[test]
    fn test_empty_input() {
        assert!(daily_returns(&[]).is_empty());
    }
}
