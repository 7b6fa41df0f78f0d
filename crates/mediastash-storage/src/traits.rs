//! Storage abstraction trait
//!
//! This module defines the [`ObjectStore`] trait that all storage backends
//! implement. It is a pure I/O primitive: no caching logic lives here.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use mediastash_core::StorageBackend;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("URL signing failed: {0}")]
    SignFailed(String),

    #[error("Storage backend error: {0}")]
    BackendError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Bucket-style storage backend.
///
/// All backends (S3-compatible, local filesystem) implement this trait so
/// the pipeline and resolver can work against any of them without coupling
/// to implementation details. Methods return/raise on transport errors only.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload bytes under a key and return the public URL for the object.
    async fn put(&self, key: &str, data: Vec<u8>, content_type: &str) -> StorageResult<String>;

    /// Download an object by its key.
    async fn download(&self, key: &str) -> StorageResult<Vec<u8>>;

    /// Delete an object by its key. Deleting a missing object is not an error.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Generate a time-limited signed GET URL for an object.
    ///
    /// Signing failures surface as [`StorageError::SignFailed`]; they are
    /// configuration problems, never retried — callers degrade to
    /// [`ObjectStore::public_url`].
    async fn signed_get_url(&self, key: &str, expires_in: Duration) -> StorageResult<String>;

    /// Derive the public/CDN URL for a key. Pure derivation, no I/O.
    fn public_url(&self, key: &str) -> StorageResult<String>;

    /// Check whether an object exists.
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Get the storage backend type
    fn backend_type(&self) -> StorageBackend;
}
