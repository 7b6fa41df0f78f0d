//! Store traits for the cache subsystem.
//!
//! The authoritative state (assets, jobs, upload records) lives behind these
//! traits so the pipeline and resolver never touch a concrete database.
//! `mediastash-db` provides the Postgres implementations; [`MemoryStore`]
//! here implements all three traits for tests and embedded use.

mod memory;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{CacheAsset, CacheJob, UploadRecord};

pub use memory::MemoryStore;

/// Counts of jobs by queue status, for operator visibility.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub queued: i64,
    pub running: i64,
    pub done: i64,
}

/// CRUD and status transitions for [`CacheAsset`] rows.
///
/// Creation is idempotent on `original_url`: creating with a URL that already
/// has an asset returns the existing row instead of duplicating it. Status
/// mutation goes through the transition methods only; `claim_for_caching` is
/// a conditional update whose `false` return means "already claimed or
/// terminal" and must abort the caller's attempt.
#[async_trait]
pub trait CacheAssetStore: Send + Sync {
    /// Create a `Pending` asset for an origin URL, or return the existing
    /// asset for that URL whatever its status.
    async fn create_pending(&self, original_url: &str) -> Result<CacheAsset, AppError>;

    /// Create an asset that is already `Cached` (direct-upload bookkeeping),
    /// or return the existing asset for that URL.
    async fn insert_cached(
        &self,
        original_url: &str,
        cache_key: &str,
        content_type: &str,
        file_size: i64,
    ) -> Result<CacheAsset, AppError>;

    async fn get(&self, id: Uuid) -> Result<Option<CacheAsset>, AppError>;

    async fn get_by_original_url(&self, original_url: &str)
        -> Result<Option<CacheAsset>, AppError>;

    /// Conditionally move `Pending -> Caching`. Returns `false` when the row
    /// is not claimable (someone else claimed it, or it already finished).
    async fn claim_for_caching(&self, id: Uuid) -> Result<bool, AppError>;

    async fn mark_cached(
        &self,
        id: Uuid,
        cache_key: &str,
        content_type: &str,
        file_size: i64,
    ) -> Result<(), AppError>;

    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<(), AppError>;

    /// Operator recovery: move `Failed -> Pending` so the asset can be
    /// re-enqueued. Returns `false` when the asset is not in `Failed`.
    async fn reset_failed(&self, id: Uuid) -> Result<bool, AppError>;
}

/// Durable job queue, keyed by asset id.
///
/// At most one job row exists per asset; a duplicate enqueue is absorbed and
/// reported via the `bool` return. Claiming hands out a job at most once
/// concurrently.
#[async_trait]
pub trait CacheJobQueue: Send + Sync {
    /// Insert a job unless one already exists for the asset. Returns `true`
    /// when the job was inserted, `false` when absorbed.
    async fn enqueue(&self, job: CacheJob) -> Result<bool, AppError>;

    /// Claim the next ready job (queued, scheduled time reached), marking it
    /// running.
    async fn claim_next(&self) -> Result<Option<CacheJob>, AppError>;

    /// Push a failed attempt back to `Queued` with an incremented retry
    /// count, delayed by `delay_secs`.
    async fn reschedule(
        &self,
        cache_asset_id: Uuid,
        delay_secs: u64,
        error: &str,
    ) -> Result<(), AppError>;

    /// Delete the job row after a successful upload.
    async fn complete(&self, cache_asset_id: Uuid) -> Result<(), AppError>;

    /// Mark the job `Done` with a terminal error after the retry budget is
    /// exhausted. The row is kept for auditing.
    async fn finish_failed(&self, cache_asset_id: Uuid, error: &str) -> Result<(), AppError>;

    /// Manual recovery: reset an existing job to `Queued` with a fresh retry
    /// budget. Returns `false` when no job row exists for the asset.
    async fn requeue(&self, cache_asset_id: Uuid) -> Result<bool, AppError>;

    /// Return `Running` jobs older than `grace_secs` back to `Queued`
    /// (crashed-worker recovery). Returns the number of jobs reaped.
    async fn reap_stale(&self, grace_secs: i64) -> Result<u64, AppError>;

    async fn stats(&self) -> Result<QueueStats, AppError>;
}

/// Store for the direct-upload referencing entities carrying fingerprints.
#[async_trait]
pub trait UploadRecordStore: Send + Sync {
    async fn insert(&self, record: UploadRecord) -> Result<UploadRecord, AppError>;

    /// All records with a non-null fingerprint, for the duplicate scan.
    async fn list_fingerprinted(&self) -> Result<Vec<UploadRecord>, AppError>;

    async fn get(&self, id: Uuid) -> Result<Option<UploadRecord>, AppError>;
}
