//! Error types module
//!
//! This module provides the core error types used throughout mediastash.
//! All errors are unified under the `AppError` enum which can represent
//! database, storage, fetch, and validation errors.
//!
//! The `Database` variant with a `sqlx` source is gated behind the `sqlx`
//! feature; without it the variant carries a plain string.

use std::io;

#[cfg(feature = "sqlx")]
use sqlx::Error as SqlxError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[cfg(feature = "sqlx")]
    #[error("Database error: {0}")]
    Database(#[source] SqlxError),

    #[cfg(not(feature = "sqlx"))]
    #[error("Database error: {0}")]
    Database(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Fetch error: {0}")]
    Fetch(String),

    #[error("Image processing error: {0}")]
    ImageProcessing(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[cfg(feature = "sqlx")]
impl From<SqlxError> for AppError {
    fn from(err: SqlxError) -> Self {
        AppError::Database(err)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<io::Error> for AppError {
    fn from(err: io::Error) -> Self {
        AppError::Internal(format!("IO error: {}", err))
    }
}

impl From<uuid::Error> for AppError {
    fn from(err: uuid::Error) -> Self {
        AppError::InvalidInput(format!("UUID parsing error: {}", err))
    }
}

impl AppError {
    /// Whether a retry of the failed operation could plausibly succeed.
    /// Fetch/storage/database errors are transient by default; validation
    /// errors are not.
    pub fn is_recoverable(&self) -> bool {
        match self {
            AppError::Database(_) | AppError::Storage(_) | AppError::Fetch(_) => true,
            AppError::Internal(_) => true,
            AppError::ImageProcessing(_) | AppError::InvalidInput(_) | AppError::NotFound(_) => {
                false
            }
        }
    }
}
