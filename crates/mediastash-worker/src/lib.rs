//! Mediastash Worker Library
//!
//! The asynchronous caching pipeline: a bounded worker pool drains the
//! durable job queue, fetches origin URLs, uploads the bytes to object
//! storage, and drives each asset to a terminal status.

pub mod fetch;
pub mod queue;
pub mod telemetry;

pub use fetch::{FetchedMedia, HttpOriginFetcher, OriginFetcher};
pub use queue::{CacheQueue, CacheQueueConfig};
