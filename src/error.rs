//! Domain error types for the import server.
//!
//! Uses thiserror for ergonomic error handling with automatic Display implementations.
//! [`ImportError`] is the pipeline taxonomy; [`AppError`] is what HTTP handlers return.

use std::fmt;
use std::path::PathBuf;

use actix_web::{HttpResponse, ResponseError};

use crate::models::{EventStatus, InvalidTransition};

/// Errors raised while staging, converting, cataloging or uploading a file set.
#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    /// File extension is not accepted. Never retried.
    #[error("File type is not supported: {0}")]
    UnsupportedFormat(String),

    /// Same name and acquisition time already exist in the target dataset. Never retried.
    #[error("Duplicate file exists: {0}")]
    DuplicateFileExists(String),

    /// Writing the staged copy failed (usually out of disk space).
    #[error("Failed to store temporary file {}: {source}", path.display())]
    StagingIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The repository rejected the uploaded digests.
    #[error("Upload verification failed: {0}")]
    Verification(String),

    /// Upload verification kept failing until the attempt budget ran out.
    #[error("Import failed after {attempts} attempts: {last_error}")]
    AttemptsExhausted { attempts: u32, last_error: String },

    /// Container lookup or creation failed.
    #[error("Catalog error: {0}")]
    Catalog(String),

    /// The repository could not be reached or refused the session.
    #[error("Repository connection error: {0}")]
    RemoteConnection(String),

    /// Metadata could not be extracted or is missing required values.
    #[error("Metadata error for {file}: {message}")]
    Conversion { file: String, message: String },

    /// Local file handling after staging failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    State(#[from] InvalidTransition),
}

impl ImportError {
    /// Only verification failures are retried by the uploader.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Verification(_))
    }

    /// The terminal event status reported for this error.
    pub fn terminal_status(&self) -> EventStatus {
        match self {
            Self::UnsupportedFormat(_) => EventStatus::UnsupportedFormat,
            Self::DuplicateFileExists(_) => EventStatus::Duplicate,
            _ => EventStatus::Error,
        }
    }

    /// Shorthand for a conversion error.
    pub fn conversion(file: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Conversion {
            file: file.into(),
            message: message.into(),
        }
    }
}

/// Application-level errors.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Database operation failed
    #[error("Database error: {0}")]
    Database(String),

    /// Invalid input data
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Caller identity missing
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Staging area is out of space
    #[error("Insufficient storage: {0}")]
    InsufficientStorage(String),

    /// Import pipeline failure surfaced synchronously
    #[error("Import error: {0}")]
    Import(String),
}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let (status, error_code, response_message) = match self {
            AppError::Database(err_str) => {
                tracing::error!("Database error: {}", err_str);
                (
                    actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    "An internal database error occurred".to_string(),
                )
            }
            AppError::InvalidInput(_) => (
                actix_web::http::StatusCode::BAD_REQUEST,
                "INVALID_INPUT",
                self.to_string(),
            ),
            AppError::Unauthorized(_) => (
                actix_web::http::StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                self.to_string(),
            ),
            AppError::InsufficientStorage(_) => (
                actix_web::http::StatusCode::INSUFFICIENT_STORAGE,
                "INSUFFICIENT_STORAGE",
                self.to_string(),
            ),
            AppError::Import(_) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "IMPORT_ERROR",
                self.to_string(),
            ),
        };

        HttpResponse::build(status).json(ErrorResponse {
            error: error_code.to_string(),
            message: response_message,
        })
    }
}

/// Error response body.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.error, self.message)
    }
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::InvalidInput(format!("JSON parsing error: {}", err))
    }
}

impl From<sea_orm::DbErr> for AppError {
    fn from(err: sea_orm::DbErr) -> Self {
        AppError::Database(err.to_string())
    }
}

impl From<ImportError> for AppError {
    fn from(err: ImportError) -> Self {
        match err {
            ImportError::UnsupportedFormat(_) => AppError::InvalidInput(err.to_string()),
            ImportError::StagingIo { .. } => AppError::InsufficientStorage(err.to_string()),
            other => AppError::Import(other.to_string()),
        }
    }
}
