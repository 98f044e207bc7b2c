//! Application error types

use chrono::NaiveDate;
use serde::Serialize;
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Watermark regression for {source_name}: {attempted} is before {current}")]
    Regression {
        source_name: String,
        current: NaiveDate,
        attempted: NaiveDate,
    },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Feed error: {0}")]
    Feed(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    /// Stable code for the error kind
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Database(_) => "DATABASE_ERROR",
            AppError::Pool(_) => "POOL_ERROR",
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
            AppError::Http(_) => "HTTP_ERROR",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Regression { .. } => "REGRESSION_ERROR",
            AppError::Conflict(_) => "CONFLICT_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Feed(_) => "FEED_ERROR",
            AppError::Config(_) => "CONFIG_ERROR",
            AppError::Io(_) => "IO_ERROR",
        }
    }

    /// Whether the error came from the storage engine
    pub fn is_storage(&self) -> bool {
        matches!(self, AppError::Database(_) | AppError::Pool(_))
    }
}

/// Serializable error response for CLI output
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<&AppError> for ErrorResponse {
    fn from(err: &AppError) -> Self {
        ErrorResponse {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = AppError::Validation("ticker is required".to_string());
        assert_eq!(err.code(), "VALIDATION_ERROR");
        assert!(!err.is_storage());

        let err = AppError::Database(rusqlite::Error::QueryReturnedNoRows);
        assert_eq!(err.code(), "DATABASE_ERROR");
        assert!(err.is_storage());
    }

    #[test]
    fn test_regression_message() {
        let err = AppError::Regression {
            source_name: "TSX".to_string(),
            current: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            attempted: NaiveDate::from_ymd_opt(2023, 12, 31).unwrap(),
        };

        let response = ErrorResponse::from(&err);
        assert_eq!(response.code, "REGRESSION_ERROR");
        assert_eq!(
            response.message,
            "Watermark regression for TSX: 2023-12-31 is before 2024-01-02"
        );
    }
}
