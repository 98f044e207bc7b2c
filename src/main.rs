//! cse-ingest CLI
//!
//! Commands:
//! - `ingest` - record a feed into the stores up to a target date
//! - `watermark get|set|list` - inspect or move source watermarks
//! - `prices` - stored bars for a ticker and date range
//! - `fx` - a stored exchange rate
//! - `returns` - daily returns computed from stored bars

use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use cse_ingest::config::{Config, FeedConfig, DEFAULT_DB_PATH, DEFAULT_TIMEOUT_SECS};
use cse_ingest::error::{AppError, ErrorResponse, Result};
use cse_ingest::feeds::{CseChartFeed, Feed, JsonFileFeed};
use cse_ingest::services::{daily_returns, IngestionRecorder, RecorderOptions};
use cse_ingest::state::AppState;
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "cse-ingest", about = "Daily price, FX rate and watermark ingestion")]
struct Cli {
    /// SQLite database file.
    #[arg(long, env = "CSE_INGEST_DB", default_value = DEFAULT_DB_PATH, global = true)]
    db: PathBuf,

    /// CSE site base URL (a trailing /api is ignored).
    #[arg(long, env = "CSE_API_BASE", global = true)]
    api_base: Option<String>,

    /// CSE accessToken cookie value.
    #[arg(long, env = "CSE_ACCESS_TOKEN", hide_env_values = true, global = true)]
    access_token: Option<String>,

    /// Archive raw CSE chart responses into this directory (e.g., data/raw).
    #[arg(long, env = "CSE_RAW_DIR", global = true)]
    raw_dir: Option<PathBuf>,

    /// HTTP timeout in seconds.
    #[arg(long, env = "CSE_TIMEOUT_SECS", default_value_t = DEFAULT_TIMEOUT_SECS, global = true)]
    timeout_secs: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record a feed into the stores, resuming after the source watermark.
    Ingest {
        /// Source name the watermark is kept under.
        #[arg(long)]
        source: String,

        /// Last date to ingest (YYYY-MM-DD). Defaults to today (UTC).
        #[arg(long)]
        to: Option<NaiveDate>,

        /// First date to ingest when the source has no watermark yet.
        #[arg(long)]
        from: Option<NaiveDate>,

        /// CSE tickers to pull (e.g., ABAN.N0000,JKH.N0000).
        #[arg(long, value_delimiter = ',', conflicts_with = "file", required_unless_present = "file")]
        tickers: Vec<String>,

        /// Read prices and rates from a JSON file instead of the CSE API.
        #[arg(long)]
        file: Option<PathBuf>,

        /// Calendar years fetched per feed request.
        #[arg(long, default_value_t = 1)]
        batch_years: u32,

        /// Fetch and validate without writing.
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
    /// Watermark commands.
    Watermark {
        #[command(subcommand)]
        action: WatermarkAction,
    },
    /// Stored bars for a ticker, oldest first.
    Prices {
        #[arg(long)]
        ticker: String,
        #[arg(long)]
        from: NaiveDate,
        #[arg(long)]
        to: NaiveDate,
    },
    /// Stored exchange rate for a date and pair.
    Fx {
        #[arg(long)]
        date: NaiveDate,
        #[arg(long)]
        base: String,
        #[arg(long)]
        quote: String,
    },
    /// Daily close-to-close returns for a ticker.
    Returns {
        #[arg(long)]
        ticker: String,
        #[arg(long)]
        from: NaiveDate,
        #[arg(long)]
        to: NaiveDate,
    },
}

#[derive(Subcommand)]
enum WatermarkAction {
    /// Last ingested date for a source.
    Get { source: String },
    /// Move a source's watermark forward.
    Set { source: String, date: NaiveDate },
    /// All sources and their watermarks.
    List,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    cse_ingest::init_tracing();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{}", err);
            let response = ErrorResponse::from(&err);
            match serde_json::to_string(&response) {
                Ok(json) => eprintln!("{}", json),
                Err(_) => eprintln!("{}: {}", response.code, response.message),
            }
            exit_code(&err)
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config {
        db_path: cli.db,
        feed: FeedConfig {
            api_base: cli.api_base,
            access_token: cli.access_token,
            timeout: Duration::from_secs(cli.timeout_secs),
            raw_dir: cli.raw_dir,
        },
    };
    let state = AppState::new(config)?;

    match cli.command {
        Commands::Ingest {
            source,
            to,
            from,
            tickers,
            file,
            batch_years,
            dry_run,
        } => {
            let feed: Arc<dyn Feed> = match file {
                Some(path) => {
                    let feed = JsonFileFeed::new(path);
                    tracing::info!("Using file feed {:?}", feed.path());
                    Arc::new(feed)
                }
                None => Arc::new(CseChartFeed::new(&state.config.feed, tickers)?),
            };

            let options = RecorderOptions {
                source_name: source,
                initial_date: from,
                batch_years,
            };
            let recorder = IngestionRecorder::new(Arc::clone(&state.db), state.leases.clone(), feed, options);
            let target = to.unwrap_or_else(|| Utc::now().date_naive());

            if dry_run {
                let batches: Vec<_> = recorder
                    .preview(target)
                    .await?
                    .into_iter()
                    .filter(|b| !b.prices.is_empty() || !b.rates.is_empty())
                    .collect();
                print_json(&batches)
            } else {
                print_json(&recorder.run(target).await?)
            }
        }
        Commands::Watermark { action } => match action {
            WatermarkAction::Get { source } => print_json(&state.db.get_watermark(&source)?),
            WatermarkAction::Set { source, date } => {
                state.db.advance_watermark(&source, date)?;
                print_json(&state.db.get_watermark(&source)?)
            }
            WatermarkAction::List => print_json(&state.db.list_watermarks()?),
        },
        Commands::Prices { ticker, from, to } => {
            check_range(from, to)?;
            print_json(&state.db.query_prices(&ticker, from, to)?)
        }
        Commands::Fx { date, base, quote } => print_json(&state.db.lookup_rate(date, &base, &quote)?),
        Commands::Returns { ticker, from, to } => {
            check_range(from, to)?;
            let bars = state.db.query_prices(&ticker, from, to)?;
            print_json(&daily_returns(&bars))
        }
    }
}

/// 2 for storage failures, which a scheduler may retry; 1 for everything else
fn exit_code(err: &AppError) -> ExitCode {
    if err.is_storage() {
        ExitCode::from(2)
    } else {
        ExitCode::FAILURE
    }
}

fn check_range(from: NaiveDate, to: NaiveDate) -> Result<()> {
    if from > to {
        return Err(AppError::Validation(format!("from {} is after to {}", from, to)));
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
