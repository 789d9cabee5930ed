//! Error types module
//!
//! All core failures are unified under [`AppError`]. The variants follow the
//! gateway's error taxonomy: lookups that miss (or that the caller may not
//! see) are `NotFound`, images whose every copy is unreachable are
//! `Unavailable`, malformed input and constraint clashes are
//! `InvalidInput`/`Conflict`, and a failing storage backend is `Upstream`.
//!
//! The `Database` variant and `From<sqlx::Error>` are gated behind the `sqlx` feature.

use std::io;

#[cfg(feature = "sqlx")]
use sqlx::Error as SqlxError;

/// Severity at which a failure should be logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Warn,
    Error,
}

/// How a failure is presented to whatever sits in front of the core.
pub trait ErrorMetadata {
    fn http_status_code(&self) -> u16;

    /// Stable machine-readable code, e.g. `UNAVAILABLE`.
    fn error_code(&self) -> &'static str;

    /// Whether retrying the same request later may succeed.
    fn is_recoverable(&self) -> bool;

    /// Message safe to show to a caller; never carries backend internals.
    fn client_message(&self) -> String;

    fn log_level(&self) -> LogLevel;
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[cfg(feature = "sqlx")]
    #[error("Database error: {0}")]
    Database(#[source] SqlxError),

    #[cfg(not(feature = "sqlx"))]
    #[error("Database error: {0}")]
    Database(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unavailable: {0}")]
    Unavailable(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("File too large: {0}")]
    PayloadTooLarge(String),

    #[error("Backend {backend_id} failed: {message}")]
    Upstream { backend_id: i64, message: String },

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Internal error with source")]
    InternalWithSource {
        message: String,
        #[source]
        source: anyhow::Error,
    },
}

#[cfg(feature = "sqlx")]
impl From<SqlxError> for AppError {
    fn from(err: SqlxError) -> Self {
        if let SqlxError::Database(ref db_err) = err {
            if db_err.is_unique_violation() {
                return AppError::Conflict(db_err.message().to_string());
            }
            if db_err.is_foreign_key_violation() {
                return AppError::Conflict(db_err.message().to_string());
            }
        }
        AppError::Database(err)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::InternalWithSource {
            message: err.to_string(),
            source: err,
        }
    }
}

impl From<io::Error> for AppError {
    fn from(err: io::Error) -> Self {
        AppError::Internal(format!("IO error: {}", err))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::InvalidInput(format!("JSON parsing error: {}", err))
    }
}

impl From<uuid::Error> for AppError {
    fn from(err: uuid::Error) -> Self {
        AppError::InvalidInput(format!("UUID parsing error: {}", err))
    }
}

struct Presentation {
    status: u16,
    code: &'static str,
    recoverable: bool,
    level: LogLevel,
}

impl AppError {
    fn presentation(&self) -> Presentation {
        let (status, code, recoverable, level) = match self {
            AppError::Database(_) => (500, "DATABASE_ERROR", true, LogLevel::Error),
            AppError::NotFound(_) => (404, "NOT_FOUND", false, LogLevel::Debug),
            AppError::Unavailable(_) => (503, "UNAVAILABLE", true, LogLevel::Warn),
            AppError::Conflict(_) => (409, "CONFLICT", false, LogLevel::Debug),
            AppError::InvalidInput(_) => (400, "INVALID_INPUT", false, LogLevel::Debug),
            AppError::PayloadTooLarge(_) => (413, "PAYLOAD_TOO_LARGE", false, LogLevel::Debug),
            AppError::Upstream { .. } => (502, "UPSTREAM_FAILURE", true, LogLevel::Warn),
            AppError::Internal(_) | AppError::InternalWithSource { .. } => {
                (500, "INTERNAL_ERROR", true, LogLevel::Error)
            }
        };
        Presentation {
            status,
            code,
            recoverable,
            level,
        }
    }

    /// Display text followed by every `source()` below it, one per line.
    pub fn detailed_message(&self) -> String {
        let mut details = self.to_string();
        let chain = std::iter::successors(std::error::Error::source(self), |e| e.source());
        for cause in chain {
            details.push_str("\n  caused by: ");
            details.push_str(&cause.to_string());
        }
        details
    }
}

impl ErrorMetadata for AppError {
    fn http_status_code(&self) -> u16 {
        self.presentation().status
    }

    fn error_code(&self) -> &'static str {
        self.presentation().code
    }

    fn is_recoverable(&self) -> bool {
        self.presentation().recoverable
    }

    fn log_level(&self) -> LogLevel {
        self.presentation().level
    }

    fn client_message(&self) -> String {
        match self {
            AppError::NotFound(msg)
            | AppError::Unavailable(msg)
            | AppError::Conflict(msg)
            | AppError::InvalidInput(msg)
            | AppError::PayloadTooLarge(msg) => msg.clone(),
            AppError::Database(_) => "Failed to access database".to_string(),
            AppError::Upstream { .. } => "Storage backend request failed".to_string(),
            AppError::Internal(_) | AppError::InternalWithSource { .. } => {
                "Internal server error".to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_metadata_database() {
        #[cfg(feature = "sqlx")]
        let err = AppError::from(sqlx::Error::PoolClosed);
        #[cfg(not(feature = "sqlx"))]
        let err = AppError::Database("pool closed".to_string());
        assert_eq!(err.http_status_code(), 500);
        assert_eq!(err.error_code(), "DATABASE_ERROR");
        assert!(err.is_recoverable());
        assert_eq!(err.client_message(), "Failed to access database");
        assert_eq!(err.log_level(), LogLevel::Error);
    }

    #[test]
    fn test_error_metadata_not_found() {
        let err = AppError::NotFound("Image not found".to_string());
        assert_eq!(err.http_status_code(), 404);
        assert_eq!(err.error_code(), "NOT_FOUND");
        assert!(!err.is_recoverable());
        assert_eq!(err.client_message(), "Image not found");
        assert_eq!(err.log_level(), LogLevel::Debug);
    }

    #[test]
    fn test_unavailable_is_transient_and_distinct_from_not_found() {
        let unreachable = AppError::Unavailable("all locations unreachable".to_string());
        let missing = AppError::NotFound("image not found".to_string());
        assert_eq!(unreachable.http_status_code(), 503);
        assert!(unreachable.is_recoverable());
        assert_ne!(unreachable.error_code(), missing.error_code());
        assert!(!missing.is_recoverable());
    }

    #[test]
    fn test_upstream_hides_backend_detail() {
        let err = AppError::Upstream {
            backend_id: 7,
            message: "connection refused".to_string(),
        };
        assert_eq!(err.http_status_code(), 502);
        assert!(!err.client_message().contains("refused"));
        assert!(err.to_string().contains("Backend 7"));
    }

    #[test]
    fn test_detailed_message_includes_source_chain() {
        let err = AppError::from(anyhow::anyhow!("root cause").context("while committing"));
        let details = err.detailed_message();
        assert!(details.contains("while committing"));
        assert!(details.contains("caused by: root cause"));
    }
}
