//! Colombo Stock Exchange chart feed
//!
//! Pulls daily OHLC bars from the public `/api/charts` endpoint, one request
//! per ticker for the whole window.

use super::{Feed, FeedBatch};
use crate::config::FeedConfig;
use crate::db::models::PriceBar;
use crate::error::{AppError, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::Client;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use url::Url;

const DEFAULT_BASE_URL: &str = "https://www.cse.lk";
const RECORD_KEYS: [&str; 5] = ["data", "chartData", "series", "items", "rows"];
const ERROR_BODY_LIMIT: usize = 1000;
const RAW_BODY_LIMIT: usize = 200_000;

/// CSE chart feed implementation
pub struct CseChartFeed {
    client: Client,
    base_url: String,
    access_token: Option<String>,
    raw_dir: Option<PathBuf>,
    tickers: Vec<String>,
}

impl CseChartFeed {
    pub fn new(config: &FeedConfig, tickers: Vec<String>) -> Result<Self> {
        if tickers.is_empty() {
            return Err(AppError::Config("at least one ticker is required".to_string()));
        }

        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            client,
            base_url: normalize_base_url(config.api_base.as_deref().unwrap_or(DEFAULT_BASE_URL))?,
            access_token: config.access_token.clone(),
            raw_dir: config.raw_dir.clone(),
            tickers,
        })
    }

    fn charts_endpoint(&self) -> String {
        format!("{}/api/charts", self.base_url)
    }

    async fn fetch_ticker(&self, ticker: &str, from: NaiveDate, to: NaiveDate) -> Result<Vec<PriceBar>> {
        let mut request = self
            .client
            .post(self.charts_endpoint())
            .header("Referer", format!("https://www.cse.lk/company-profile?symbol={}", ticker))
            .header("User-Agent", "Mozilla/5.0")
            .form(&chart_form(ticker, from, to));

        if let Some(token) = &self.access_token {
            request = request.header("Cookie", format!("accessToken={}", token));
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        let parsed = serde_json::from_str::<Value>(&body);

        if let Some(dir) = &self.raw_dir {
            let path = archive_response(dir, ticker, parsed.as_ref().ok(), &body).await?;
            tracing::debug!("Archived {} chart response to {:?}", ticker, path);
        }

        if !status.is_success() {
            let preview: String = body.chars().take(ERROR_BODY_LIMIT).collect();
            return Err(AppError::Feed(format!(
                "CSE charts request for {} failed with {}: {}",
                ticker, status, preview
            )));
        }

        let payload = parsed
            .map_err(|e| AppError::Feed(format!("CSE returned non-JSON response for {}: {}", ticker, e)))?;

        let bars = parse_chart_response(ticker, &payload);
        tracing::debug!("CSE returned {} bars for {}", bars.len(), ticker);
        Ok(bars)
    }
}

#[async_trait]
impl Feed for CseChartFeed {
    fn id(&self) -> &str {
        "cse"
    }

    async fn fetch(&self, from: NaiveDate, to: NaiveDate) -> Result<FeedBatch> {
        let mut batch = FeedBatch::default();

        for ticker in &self.tickers {
            let bars = self.fetch_ticker(ticker, from, to).await?;
            batch.prices.extend(bars);
        }

        batch.retain_window(from, to);
        Ok(batch)
    }
}

/// Form fields of a daily chart request; both bounds are UTC midnight
pub fn chart_form(ticker: &str, from: NaiveDate, to: NaiveDate) -> [(&'static str, String); 5] {
    [
        ("symbol", ticker.to_string()),
        ("chartId", "1".to_string()),
        ("period", "1".to_string()),
        ("fromDate", start_of_day_millis(from).to_string()),
        ("toDate", start_of_day_millis(to).to_string()),
    ]
}

/// Write a raw chart response to `dir/charts_<ticker>_<unix ms>.json`
///
/// JSON bodies are pretty-printed, anything else is kept as text (truncated).
pub async fn archive_response(dir: &Path, ticker: &str, parsed: Option<&Value>, body: &str) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;

    let safe_ticker: String = ticker
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect();
    let path = dir.join(format!("charts_{}_{}.json", safe_ticker, Utc::now().timestamp_millis()));

    let contents = match parsed {
        Some(json) => serde_json::to_string_pretty(json)?,
        None => body.chars().take(RAW_BODY_LIMIT).collect(),
    };
    tokio::fs::write(&path, contents).await?;
    Ok(path)
}

/// Strip trailing slashes and a trailing `/api` segment
pub fn normalize_base_url(raw: &str) -> Result<String> {
    let trimmed = raw.trim().trim_end_matches('/');
    let trimmed = trimmed.strip_suffix("/api").unwrap_or(trimmed);

    Url::parse(trimmed).map_err(|e| AppError::Config(format!("invalid CSE API base '{}': {}", raw, e)))?;
    Ok(trimmed.to_string())
}

/// Convert a chart payload into bars, oldest first
///
/// Accepts a bare array or an object whose first known key holds one.
/// Records without a usable trade date are dropped.
pub fn parse_chart_response(ticker: &str, payload: &Value) -> Vec<PriceBar> {
    let records = match payload {
        Value::Array(items) => items.as_slice(),
        Value::Object(map) => match RECORD_KEYS.iter().find_map(|k| map.get(*k).and_then(Value::as_array)) {
            Some(items) => items.as_slice(),
            None => return Vec::new(),
        },
        _ => return Vec::new(),
    };

    let mut bars: Vec<PriceBar> = records
        .iter()
        .filter_map(|record| {
            let record = record.as_object()?;
            let trade_date = ["tradeDate", "d", "date"]
                .iter()
                .find_map(|k| record.get(*k).filter(|v| !v.is_null()))
                .and_then(millis_to_date)?;

            let close = record
                .get("close")
                .and_then(json_decimal)
                .or_else(|| record.get("v").and_then(json_decimal));

            Some(PriceBar {
                ticker: ticker.to_string(),
                trade_date,
                open: record.get("open").and_then(json_decimal),
                high: record.get("high").and_then(json_decimal),
                low: record.get("low").and_then(json_decimal),
                close,
                adj_close: close,
                volume: record.get("shareVolume").and_then(json_i64),
            })
        })
        .collect();

    bars.sort_by(|a, b| a.trade_date.cmp(&b.trade_date));
    bars
}

fn start_of_day_millis(date: NaiveDate) -> i64 {
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp_millis())
        .unwrap_or_default()
}

fn millis_to_date(value: &Value) -> Option<NaiveDate> {
    let millis = json_i64(value)?;
    DateTime::from_timestamp_millis(millis).map(|dt| dt.date_naive())
}

fn json_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => match n.as_i64() {
            Some(i) => Some(Decimal::from(i)),
            None => n.as_f64().and_then(Decimal::from_f64),
        },
        Value::String(s) => Decimal::from_str(s.trim()).ok(),
        _ => None,
    }
}

fn json_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_normalize_base_url() {
        assert_eq!(normalize_base_url("https://www.cse.lk/api/").unwrap(), "https://www.cse.lk");
        assert_eq!(normalize_base_url("https://www.cse.lk").unwrap(), "https://www.cse.lk");
        assert_eq!(
            normalize_base_url("http://localhost:8080/proxy").unwrap(),
            "http://localhost:8080/proxy"
        );
        assert!(normalize_base_url("not a url").is_err());
    }

    #[test]
    fn test_parse_bare_array() {
        // 1704153600000 = 2024-01-02T00:00:00Z
        let payload = json!([
            {"tradeDate": 1704240000000i64, "open": 10, "high": 11.5, "low": 9.75, "close": "11.0", "shareVolume": 1500},
            {"tradeDate": 1704153600000i64, "open": 9.5, "high": 10.25, "low": 9.5, "close": 10.5, "shareVolume": "900"}
        ]);

        let bars = parse_chart_response("ABAN.N0000", &payload);
        assert_eq!(bars.len(), 2);

        assert_eq!(bars[0].trade_date, date(2024, 1, 2));
        assert_eq!(bars[0].close, Some(Decimal::new(105, 1)));
        assert_eq!(bars[0].adj_close, bars[0].close);
        assert_eq!(bars[0].volume, Some(900));

        assert_eq!(bars[1].trade_date, date(2024, 1, 3));
        assert_eq!(bars[1].open, Some(Decimal::from(10)));
        assert_eq!(bars[1].low, Some(Decimal::new(975, 2)));
        assert_eq!(bars[1].close, Some(Decimal::from(11)));
        assert!(bars.iter().all(|b| b.ticker == "ABAN.N0000"));
    }

    #[test]
    fn test_parse_wrapped_records_and_fallbacks() {
        let payload = json!({
            "status": "ok",
            "chartData": [
                {"d": 1704153600000i64, "v": 42.5},
                {"date": null, "close": 1},
                {"open": 3},
                "garbage"
            ]
        });

        let bars = parse_chart_response("JKH", &payload);
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].trade_date, date(2024, 1, 2));
        assert_eq!(bars[0].close, Some(Decimal::new(425, 1)));
        assert_eq!(bars[0].open, None);
        assert_eq!(bars[0].volume, None);
    }

    #[test]
    fn test_parse_unrecognised_payload_is_empty() {
        assert!(parse_chart_response("JKH", &json!({"message": "denied"})).is_empty());
        assert!(parse_chart_response("JKH", &json!("oops")).is_empty());
        assert!(parse_chart_response("JKH", &json!([])).is_empty());
    }

    #[test]
    fn test_day_boundaries_in_millis() {
        assert_eq!(start_of_day_millis(date(2024, 1, 2)), 1_704_153_600_000);
        assert_eq!(millis_to_date(&json!(1_704_239_999_999i64)), Some(date(2024, 1, 2)));
    }

    #[test]
    fn test_chart_form_uses_midnight_bounds() {
        let form = chart_form("ABAN.N0000", date(2024, 1, 2), date(2024, 1, 5));
        assert_eq!(
            form,
            [
                ("symbol", "ABAN.N0000".to_string()),
                ("chartId", "1".to_string()),
                ("period", "1".to_string()),
                ("fromDate", "1704153600000".to_string()),
                ("toDate", "1704412800000".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_archive_keeps_json_and_raw_text() {
        let dir = tempfile::tempdir().unwrap();
        let raw_dir = dir.path().join("raw");

        let body = r#"[{"tradeDate":1704153600000,"close":10.5}]"#;
        let parsed: Value = serde_json::from_str(body).unwrap();
        let path = archive_response(&raw_dir, "ABAN.N0000", Some(&parsed), body).await.unwrap();

        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("charts_ABAN.N0000_") && name.ends_with(".json"), "{}", name);
        let saved: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(saved, parsed);

        let html = "<html>login required</html>";
        let path = archive_response(&raw_dir, "A/B", None, html).await.unwrap();
        assert!(path.file_name().unwrap().to_string_lossy().starts_with("charts_A_B_"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), html);
    }

    #[test]
    fn test_new_requires_tickers() {
        let config = FeedConfig {
            api_base: None,
            access_token: None,
            timeout: Duration::from_secs(5),
            raw_dir: None,
        };
        assert!(matches!(CseChartFeed::new(&config, vec![]), Err(AppError::Config(_))));

        let feed = CseChartFeed::new(&config, vec!["JKH".to_string()]).unwrap();
        assert_eq!(feed.charts_endpoint(), "https://www.cse.lk/api/charts");
    }
}
