//! Services Layer
//!
//! Business logic on top of the stores, called by the CLI.

pub mod recorder;
pub mod returns;

pub use recorder::{chunk_windows, DateBatch, IngestReport, IngestionRecorder, RecorderOptions};
pub use returns::{daily_returns, DailyReturn};
