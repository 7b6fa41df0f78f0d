//! In-memory store backend.
//!
//! Implements all three store traits over `RwLock`-guarded maps. Used by unit
//! and pipeline tests in place of Postgres; honors the same idempotency and
//! transition rules as the real implementations.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{CacheAsset, CacheJob, CacheStatus, JobStatus, UploadRecord};
use crate::store::{CacheAssetStore, CacheJobQueue, QueueStats, UploadRecordStore};

#[derive(Default)]
pub struct MemoryStore {
    assets: RwLock<HashMap<Uuid, CacheAsset>>,
    jobs: RwLock<HashMap<Uuid, CacheJob>>,
    uploads: RwLock<HashMap<Uuid, UploadRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn find_by_url(&self, original_url: &str) -> Option<CacheAsset> {
        self.assets
            .read()
            .await
            .values()
            .find(|a| a.original_url == original_url)
            .cloned()
    }
}

#[async_trait]
impl CacheAssetStore for MemoryStore {
    async fn create_pending(&self, original_url: &str) -> Result<CacheAsset, AppError> {
        if let Some(existing) = self.find_by_url(original_url).await {
            return Ok(existing);
        }
        let asset = CacheAsset::pending(original_url);
        self.assets.write().await.insert(asset.id, asset.clone());
        Ok(asset)
    }

    async fn insert_cached(
        &self,
        original_url: &str,
        cache_key: &str,
        content_type: &str,
        file_size: i64,
    ) -> Result<CacheAsset, AppError> {
        if let Some(existing) = self.find_by_url(original_url).await {
            return Ok(existing);
        }
        let asset = CacheAsset::cached(original_url, cache_key, content_type, file_size);
        self.assets.write().await.insert(asset.id, asset.clone());
        Ok(asset)
    }

    async fn get(&self, id: Uuid) -> Result<Option<CacheAsset>, AppError> {
        Ok(self.assets.read().await.get(&id).cloned())
    }

    async fn get_by_original_url(
        &self,
        original_url: &str,
    ) -> Result<Option<CacheAsset>, AppError> {
        Ok(self.find_by_url(original_url).await)
    }

    async fn claim_for_caching(&self, id: Uuid) -> Result<bool, AppError> {
        let mut assets = self.assets.write().await;
        match assets.get_mut(&id) {
            Some(asset) if asset.status == CacheStatus::Pending => {
                asset.status = CacheStatus::Caching;
                asset.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_cached(
        &self,
        id: Uuid,
        cache_key: &str,
        content_type: &str,
        file_size: i64,
    ) -> Result<(), AppError> {
        let mut assets = self.assets.write().await;
        let asset = assets
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("cache asset {}", id)))?;
        if asset.status.is_terminal() {
            tracing::warn!(asset_id = %id, status = %asset.status, "Ignoring mark_cached on terminal asset");
            return Ok(());
        }
        asset.status = CacheStatus::Cached;
        asset.cache_key = Some(cache_key.to_string());
        asset.content_type = Some(content_type.to_string());
        asset.file_size = Some(file_size);
        asset.last_error = None;
        asset.cached_at = Some(Utc::now());
        asset.updated_at = Utc::now();
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<(), AppError> {
        let mut assets = self.assets.write().await;
        let asset = assets
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("cache asset {}", id)))?;
        if asset.status.is_terminal() {
            tracing::warn!(asset_id = %id, status = %asset.status, "Ignoring mark_failed on terminal asset");
            return Ok(());
        }
        asset.status = CacheStatus::Failed;
        asset.last_error = Some(error.to_string());
        asset.updated_at = Utc::now();
        Ok(())
    }

    async fn reset_failed(&self, id: Uuid) -> Result<bool, AppError> {
        let mut assets = self.assets.write().await;
        match assets.get_mut(&id) {
            Some(asset) if asset.status == CacheStatus::Failed => {
                asset.status = CacheStatus::Pending;
                asset.last_error = None;
                asset.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl CacheJobQueue for MemoryStore {
    async fn enqueue(&self, job: CacheJob) -> Result<bool, AppError> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.cache_asset_id) {
            return Ok(false);
        }
        jobs.insert(job.cache_asset_id, job);
        Ok(true)
    }

    async fn claim_next(&self) -> Result<Option<CacheJob>, AppError> {
        let mut jobs = self.jobs.write().await;
        let next_id = jobs
            .values()
            .filter(|j| j.is_ready())
            .min_by_key(|j| j.scheduled_at)
            .map(|j| j.cache_asset_id);
        if let Some(job) = next_id.and_then(|id| jobs.get_mut(&id)) {
            job.status = JobStatus::Running;
            job.started_at = Some(Utc::now());
            job.updated_at = Utc::now();
            return Ok(Some(job.clone()));
        }
        Ok(None)
    }

    async fn reschedule(
        &self,
        cache_asset_id: Uuid,
        delay_secs: u64,
        error: &str,
    ) -> Result<(), AppError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(&cache_asset_id)
            .ok_or_else(|| AppError::NotFound(format!("cache job {}", cache_asset_id)))?;
        job.status = JobStatus::Queued;
        job.retry_count += 1;
        job.scheduled_at = Utc::now() + ChronoDuration::seconds(delay_secs as i64);
        job.started_at = None;
        job.last_error = Some(error.to_string());
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn complete(&self, cache_asset_id: Uuid) -> Result<(), AppError> {
        self.jobs.write().await.remove(&cache_asset_id);
        Ok(())
    }

    async fn finish_failed(&self, cache_asset_id: Uuid, error: &str) -> Result<(), AppError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(&cache_asset_id)
            .ok_or_else(|| AppError::NotFound(format!("cache job {}", cache_asset_id)))?;
        job.status = JobStatus::Done;
        job.last_error = Some(error.to_string());
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn requeue(&self, cache_asset_id: Uuid) -> Result<bool, AppError> {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(&cache_asset_id) {
            Some(job) => {
                job.status = JobStatus::Queued;
                job.retry_count = 0;
                job.scheduled_at = Utc::now();
                job.started_at = None;
                job.last_error = None;
                job.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn reap_stale(&self, grace_secs: i64) -> Result<u64, AppError> {
        let cutoff = Utc::now() - ChronoDuration::seconds(grace_secs);
        let mut reaped = 0;
        let mut jobs = self.jobs.write().await;
        for job in jobs.values_mut() {
            if job.status == JobStatus::Running
                && job.started_at.map(|t| t < cutoff).unwrap_or(true)
            {
                job.status = JobStatus::Queued;
                job.started_at = None;
                job.scheduled_at = Utc::now();
                job.updated_at = Utc::now();
                reaped += 1;
            }
        }
        Ok(reaped)
    }

    async fn stats(&self) -> Result<QueueStats, AppError> {
        let jobs = self.jobs.read().await;
        let mut stats = QueueStats::default();
        for job in jobs.values() {
            match job.status {
                JobStatus::Queued => stats.queued += 1,
                JobStatus::Running => stats.running += 1,
                JobStatus::Done => stats.done += 1,
            }
        }
        Ok(stats)
    }
}

#[async_trait]
impl UploadRecordStore for MemoryStore {
    async fn insert(&self, record: UploadRecord) -> Result<UploadRecord, AppError> {
        self.uploads
            .write()
            .await
            .insert(record.id, record.clone());
        Ok(record)
    }

    async fn list_fingerprinted(&self) -> Result<Vec<UploadRecord>, AppError> {
        let mut records: Vec<UploadRecord> = self
            .uploads
            .read()
            .await
            .values()
            .filter(|r| r.fingerprint.is_some())
            .cloned()
            .collect();
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }

    async fn get(&self, id: Uuid) -> Result<Option<UploadRecord>, AppError> {
        Ok(self.uploads.read().await.get(&id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_pending_is_idempotent_per_url() {
        let store = MemoryStore::new();
        let a = store
            .create_pending("https://cdn.example.com/a.jpg")
            .await
            .unwrap();
        let b = store
            .create_pending("https://cdn.example.com/a.jpg")
            .await
            .unwrap();
        assert_eq!(a.id, b.id);

        let c = store
            .create_pending("https://cdn.example.com/other.jpg")
            .await
            .unwrap();
        assert_ne!(a.id, c.id);
    }

    #[tokio::test]
    async fn insert_cached_reuses_existing_url() {
        let store = MemoryStore::new();
        let a = store
            .create_pending("https://cdn.example.com/a.jpg")
            .await
            .unwrap();
        let b = store
            .insert_cached("https://cdn.example.com/a.jpg", "cache/k.jpg", "image/jpeg", 10)
            .await
            .unwrap();
        // The existing (still pending) row wins; no duplicate is created.
        assert_eq!(a.id, b.id);
        assert_eq!(b.status, CacheStatus::Pending);
    }

    #[tokio::test]
    async fn claim_is_conditional() {
        let store = MemoryStore::new();
        let asset = store
            .create_pending("https://cdn.example.com/a.jpg")
            .await
            .unwrap();

        assert!(store.claim_for_caching(asset.id).await.unwrap());
        // Second claim observes Caching and is refused.
        assert!(!store.claim_for_caching(asset.id).await.unwrap());

        store
            .mark_cached(asset.id, "cache/k.jpg", "image/jpeg", 10)
            .await
            .unwrap();
        assert!(!store.claim_for_caching(asset.id).await.unwrap());
    }

    #[tokio::test]
    async fn terminal_states_stick() {
        let store = MemoryStore::new();
        let asset = store
            .create_pending("https://cdn.example.com/a.jpg")
            .await
            .unwrap();
        store.claim_for_caching(asset.id).await.unwrap();
        store
            .mark_cached(asset.id, "cache/k.jpg", "image/jpeg", 10)
            .await
            .unwrap();

        // A stale failure arriving after success must not clobber Cached.
        store.mark_failed(asset.id, "late failure").await.unwrap();
        let current = CacheAssetStore::get(&store, asset.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(current.status, CacheStatus::Cached);
        assert!(current.last_error.is_none());
    }

    #[tokio::test]
    async fn reset_failed_only_from_failed() {
        let store = MemoryStore::new();
        let asset = store
            .create_pending("https://cdn.example.com/a.jpg")
            .await
            .unwrap();
        assert!(!store.reset_failed(asset.id).await.unwrap());

        store.claim_for_caching(asset.id).await.unwrap();
        store.mark_failed(asset.id, "origin 404").await.unwrap();
        assert!(store.reset_failed(asset.id).await.unwrap());

        let current = CacheAssetStore::get(&store, asset.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(current.status, CacheStatus::Pending);
    }

    #[tokio::test]
    async fn duplicate_enqueue_is_absorbed() {
        let store = MemoryStore::new();
        let id = Uuid::new_v4();
        let job = CacheJob::new(id, "https://example.com/x.png", "cache", 3);
        assert!(store.enqueue(job.clone()).await.unwrap());
        assert!(!store.enqueue(job).await.unwrap());

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.queued, 1);
    }

    #[tokio::test]
    async fn claim_next_marks_running_and_skips_future_jobs() {
        let store = MemoryStore::new();
        let ready = CacheJob::new(Uuid::new_v4(), "https://example.com/a.png", "cache", 3);
        let mut later = CacheJob::new(Uuid::new_v4(), "https://example.com/b.png", "cache", 3);
        later.scheduled_at = Utc::now() + ChronoDuration::seconds(3600);
        store.enqueue(ready.clone()).await.unwrap();
        store.enqueue(later).await.unwrap();

        let claimed = store.claim_next().await.unwrap().unwrap();
        assert_eq!(claimed.cache_asset_id, ready.cache_asset_id);
        assert_eq!(claimed.status, JobStatus::Running);

        // Only the future job remains, and it is not ready.
        assert!(store.claim_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reap_stale_requeues_old_running_jobs() {
        let store = MemoryStore::new();
        let job = CacheJob::new(Uuid::new_v4(), "https://example.com/a.png", "cache", 3);
        store.enqueue(job.clone()).await.unwrap();
        let claimed = store.claim_next().await.unwrap().unwrap();

        // Fresh claim is within the grace period; nothing to reap.
        assert_eq!(store.reap_stale(300).await.unwrap(), 0);
        // Zero grace period reaps it immediately.
        assert_eq!(store.reap_stale(-1).await.unwrap(), 1);

        let reclaimed = store.claim_next().await.unwrap().unwrap();
        assert_eq!(reclaimed.cache_asset_id, claimed.cache_asset_id);
    }

    #[tokio::test]
    async fn fingerprint_listing_excludes_nulls() {
        let store = MemoryStore::new();
        store
            .insert(UploadRecord::new(
                Uuid::new_v4(),
                Some("00ff00ff00ff00ff".to_string()),
                "image/png",
            ))
            .await
            .unwrap();
        store
            .insert(UploadRecord::new(Uuid::new_v4(), None, "image/png"))
            .await
            .unwrap();

        let listed = store.list_fingerprinted().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed[0].fingerprint.is_some());
    }
}
