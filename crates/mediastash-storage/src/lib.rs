//! Mediastash Storage Library
//!
//! Object-store abstraction and backends for the cache subsystem: the
//! [`ObjectStore`] trait plus S3-compatible and local-filesystem
//! implementations.
//!
//! # Cache key format
//!
//! Cached objects are stored under `{folder}/{unix_millis}-{random}.{ext}`.
//! Keys must not contain `..` or a leading `/`. Key generation is centralized
//! in the `keys` module so all producers stay consistent.

pub mod factory;
pub mod keys;
#[cfg(feature = "storage-local")]
pub mod local;
#[cfg(feature = "storage-s3")]
pub mod s3;
pub mod traits;

// Re-export commonly used types
pub use factory::create_object_store;
pub use keys::generate_cache_key;
#[cfg(feature = "storage-local")]
pub use local::LocalObjectStore;
pub use mediastash_core::StorageBackend;
#[cfg(feature = "storage-s3")]
pub use s3::S3ObjectStore;
pub use traits::{ObjectStore, StorageError, StorageResult};
