//! Caching pipeline: worker pool, LISTEN/NOTIFY or polling, retry, and
//! manual recovery.
//!
//! Shutdown: [`CacheQueue::shutdown`] signals the pool to stop; it does not
//! wait for in-flight jobs. For graceful shutdown, coordinate with your
//! runtime and allow time for running jobs to finish before process exit.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::sleep;
use uuid::Uuid;

use mediastash_core::models::{CacheJob, CacheStatus};
use mediastash_core::store::{CacheAssetStore, CacheJobQueue, QueueStats};
use mediastash_core::Config;
use mediastash_db::JOB_NOTIFY_CHANNEL;
use mediastash_storage::{generate_cache_key, ObjectStore};

use crate::fetch::OriginFetcher;

/// Maximum delay in seconds before retrying a failed job. Caps exponential
/// backoff so that high retry counts do not produce excessively long delays.
pub const MAX_RETRY_BACKOFF_SECS: u64 = 300;

/// Computes backoff in seconds for a given retry count (exponential with cap).
#[inline]
pub(crate) fn compute_retry_backoff_seconds(retry_count: i32) -> u64 {
    (2_u64.pow(retry_count as u32)).min(MAX_RETRY_BACKOFF_SECS)
}

#[derive(Clone)]
pub struct CacheQueueConfig {
    pub max_workers: usize,
    pub poll_interval_ms: u64,
    pub max_retries: i32,
    /// Interval in seconds between runs of the stale job reaper. 0 = disabled.
    pub stale_job_reap_interval_secs: u64,
    /// Grace period in seconds before a running job is considered stale.
    pub stale_job_grace_period_secs: i64,
    /// Destination folder for objects cached by this pool.
    pub destination_folder: String,
}

impl Default for CacheQueueConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            poll_interval_ms: 1000,
            max_retries: 3,
            stale_job_reap_interval_secs: 60,
            stale_job_grace_period_secs: 300,
            destination_folder: "cache".to_string(),
        }
    }
}

impl From<&Config> for CacheQueueConfig {
    fn from(config: &Config) -> Self {
        Self {
            max_workers: config.queue_max_workers,
            poll_interval_ms: config.queue_poll_interval_ms,
            max_retries: config.queue_max_retries,
            stale_job_reap_interval_secs: config.stale_job_reap_interval_secs,
            stale_job_grace_period_secs: config.stale_job_grace_period_secs,
            destination_folder: config.cache_folder.clone(),
        }
    }
}

/// The caching pipeline's consumer side.
///
/// Owns a worker pool that drains the job queue: fetch the origin, upload
/// the bytes, flip the asset to `Cached` or `Failed`. Jobs for different
/// assets run in parallel up to `max_workers`; jobs for the same asset never
/// run concurrently because at most one job row exists per asset.
pub struct CacheQueue {
    assets: Arc<dyn CacheAssetStore>,
    jobs: Arc<dyn CacheJobQueue>,
    config: CacheQueueConfig,
    shutdown_tx: mpsc::Sender<()>,
}

impl CacheQueue {
    /// Create a new CacheQueue and spawn its worker pool.
    ///
    /// If `pool` is `Some`, the workers use PostgreSQL LISTEN/NOTIFY to wake
    /// immediately when jobs are enqueued, in addition to polling at
    /// `poll_interval_ms`. If `pool` is `None`, only polling is used.
    pub fn new(
        assets: Arc<dyn CacheAssetStore>,
        jobs: Arc<dyn CacheJobQueue>,
        fetcher: Arc<dyn OriginFetcher>,
        storage: Arc<dyn ObjectStore>,
        config: CacheQueueConfig,
        pool: Option<sqlx::PgPool>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let assets_clone = assets.clone();
        let jobs_clone = jobs.clone();
        let config_clone = config.clone();

        tokio::spawn(async move {
            Self::worker_pool(
                assets_clone,
                jobs_clone,
                fetcher,
                storage,
                config_clone,
                shutdown_rx,
                pool,
            )
            .await;
        });

        Self {
            assets,
            jobs,
            config,
            shutdown_tx,
        }
    }

    /// Creates a CacheQueue that does not spawn a worker. Jobs enqueued
    /// through the shared queue are picked up by the real pool elsewhere.
    pub fn new_no_worker(
        assets: Arc<dyn CacheAssetStore>,
        jobs: Arc<dyn CacheJobQueue>,
        config: CacheQueueConfig,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        drop(shutdown_rx);
        Self {
            assets,
            jobs,
            config,
            shutdown_tx,
        }
    }

    /// Manual recovery for a `Failed` asset: reset it to `Pending` and put
    /// its job back in the queue. Returns `false` when the asset is missing
    /// or not in `Failed`.
    #[tracing::instrument(skip(self))]
    pub async fn requeue_failed(&self, asset_id: Uuid) -> Result<bool> {
        if !self.assets.reset_failed(asset_id).await? {
            return Ok(false);
        }

        if !self.jobs.requeue(asset_id).await? {
            // The job row is gone (e.g. pruned); rebuild it from the asset.
            let asset = self
                .assets
                .get(asset_id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("cache asset {} disappeared", asset_id))?;
            self.jobs
                .enqueue(CacheJob::new(
                    asset_id,
                    asset.original_url,
                    self.config.destination_folder.clone(),
                    self.config.max_retries,
                ))
                .await?;
        }

        tracing::info!(asset_id = %asset_id, "Failed asset requeued for caching");
        Ok(true)
    }

    /// Queue depth counts for operators.
    pub async fn stats(&self) -> Result<QueueStats> {
        Ok(self.jobs.stats().await?)
    }

    async fn worker_pool(
        assets: Arc<dyn CacheAssetStore>,
        jobs: Arc<dyn CacheJobQueue>,
        fetcher: Arc<dyn OriginFetcher>,
        storage: Arc<dyn ObjectStore>,
        config: CacheQueueConfig,
        mut shutdown_rx: mpsc::Receiver<()>,
        pool: Option<sqlx::PgPool>,
    ) {
        let use_listen = pool.is_some();
        tracing::info!(
            max_workers = config.max_workers,
            poll_interval_ms = config.poll_interval_ms,
            listen_notify = use_listen,
            "Cache queue worker pool started"
        );

        let semaphore = Arc::new(Semaphore::new(config.max_workers));
        let poll_interval = Duration::from_millis(config.poll_interval_ms);

        // Channel to wake the main loop when LISTEN receives a NOTIFY
        // (avoids blocking on recv when no pool is available).
        let (notify_tx, mut notify_rx) = mpsc::channel::<()>(16);
        if let Some(pool) = pool {
            let tx = notify_tx.clone();
            tokio::spawn(async move {
                loop {
                    match sqlx::postgres::PgListener::connect_with(&pool).await {
                        Ok(mut listener) => {
                            if let Err(e) = listener.listen(JOB_NOTIFY_CHANNEL).await {
                                tracing::warn!(error = %e, "LISTEN failed, will retry");
                                tokio::time::sleep(Duration::from_secs(5)).await;
                                continue;
                            }
                            while listener.recv().await.is_ok() {
                                let _ = tx.send(()).await;
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "PgListener connect failed, will retry");
                            tokio::time::sleep(Duration::from_secs(5)).await;
                        }
                    }
                }
            });
        }

        // Spawn stale job reaper (if interval > 0)
        let (reaper_shutdown_tx, mut reaper_shutdown_rx) = mpsc::channel::<()>(1);
        if config.stale_job_reap_interval_secs > 0 {
            let jobs_for_reaper = jobs.clone();
            let reap_interval = Duration::from_secs(config.stale_job_reap_interval_secs);
            let grace_period = config.stale_job_grace_period_secs;
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(reap_interval);
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            if let Err(e) = jobs_for_reaper.reap_stale(grace_period).await {
                                tracing::error!(error = %e, "Stale job reaper failed");
                            }
                        }
                        _ = reaper_shutdown_rx.recv() => break,
                    }
                }
            });
        }

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("Cache queue worker pool shutting down");
                    let _ = reaper_shutdown_tx.send(()).await;
                    break;
                }
                _ = notify_rx.recv() => {
                    Self::claim_and_dispatch_one(&assets, &jobs, &fetcher, &storage, &semaphore).await;
                }
                _ = sleep(poll_interval) => {
                    Self::claim_and_dispatch_one(&assets, &jobs, &fetcher, &storage, &semaphore).await;
                }
            }
        }

        tracing::info!("Cache queue worker pool stopped");
    }

    async fn claim_and_dispatch_one(
        assets: &Arc<dyn CacheAssetStore>,
        jobs: &Arc<dyn CacheJobQueue>,
        fetcher: &Arc<dyn OriginFetcher>,
        storage: &Arc<dyn ObjectStore>,
        semaphore: &Arc<Semaphore>,
    ) {
        let permit = match semaphore.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                tracing::debug!("No workers available, skipping claim");
                return;
            }
        };

        match jobs.claim_next().await {
            Ok(Some(job)) => {
                let assets = assets.clone();
                let jobs = jobs.clone();
                let fetcher = fetcher.clone();
                let storage = storage.clone();

                tokio::spawn(async move {
                    let _permit = permit;
                    Self::process_job(job, assets, jobs, fetcher, storage).await;
                });
            }
            Ok(None) => {
                drop(permit);
                tracing::trace!("No jobs available in queue");
            }
            Err(e) => {
                drop(permit);
                tracing::error!(error = %e, "Failed to claim job from queue");
            }
        }
    }

    /// Run one caching attempt for a claimed job.
    ///
    /// Errors never escape: every outcome is recorded on the job and asset
    /// rows. A failed attempt is rescheduled with exponential backoff until
    /// the attempt budget is exhausted, at which point the asset goes to
    /// `Failed` and stays there until an operator requeues it.
    #[tracing::instrument(
        skip_all,
        fields(asset_id = %job.cache_asset_id, url = %job.original_url, attempt = job.retry_count + 1)
    )]
    pub(crate) async fn process_job(
        job: CacheJob,
        assets: Arc<dyn CacheAssetStore>,
        jobs: Arc<dyn CacheJobQueue>,
        fetcher: Arc<dyn OriginFetcher>,
        storage: Arc<dyn ObjectStore>,
    ) {
        let asset_id = job.cache_asset_id;

        // Claim the asset row before touching the network. The conditional
        // update is what protects against a manual requeue racing a stale
        // retry: whoever loses sees a no-op and drops the attempt.
        let claimable = match assets.get(asset_id).await {
            Ok(Some(asset)) => match asset.status {
                CacheStatus::Pending => match assets.claim_for_caching(asset_id).await {
                    Ok(claimed) => claimed,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to claim asset, leaving job for retry");
                        return;
                    }
                },
                // Already ours: a retry in this job's own attempt chain.
                CacheStatus::Caching => true,
                CacheStatus::Cached => {
                    tracing::debug!("Asset already cached, dropping job");
                    if let Err(e) = jobs.complete(asset_id).await {
                        tracing::error!(error = %e, "Failed to remove finished job");
                    }
                    return;
                }
                CacheStatus::Failed => {
                    tracing::warn!("Asset already failed, dropping stale job");
                    if let Err(e) = jobs.finish_failed(asset_id, "asset already failed").await {
                        tracing::error!(error = %e, "Failed to finish stale job");
                    }
                    return;
                }
            },
            Ok(None) => {
                tracing::warn!("Asset row missing, dropping orphaned job");
                if let Err(e) = jobs.complete(asset_id).await {
                    tracing::error!(error = %e, "Failed to remove orphaned job");
                }
                return;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to read asset, leaving job for retry");
                return;
            }
        };

        if !claimable {
            tracing::debug!("Asset claimed elsewhere, dropping attempt");
            return;
        }

        let attempt_result = Self::fetch_and_upload(&job, &fetcher, &storage, &assets).await;

        match attempt_result {
            Ok(cache_key) => {
                if let Err(e) = jobs.complete(asset_id).await {
                    tracing::error!(error = %e, "Failed to remove completed job");
                }
                tracing::info!(cache_key = %cache_key, "Asset cached successfully");
            }
            Err(e) => {
                let error = e.to_string();
                if job.can_retry() {
                    let backoff_seconds = compute_retry_backoff_seconds(job.retry_count);
                    tracing::warn!(
                        error = %error,
                        retry_count = job.retry_count + 1,
                        backoff_seconds = backoff_seconds,
                        "Caching attempt failed, scheduling retry"
                    );
                    if let Err(e) = jobs.reschedule(asset_id, backoff_seconds, &error).await {
                        tracing::error!(error = %e, "Failed to reschedule job");
                    }
                } else {
                    tracing::error!(error = %error, "Caching failed after maximum retries");
                    if let Err(e) = jobs.finish_failed(asset_id, &error).await {
                        tracing::error!(error = %e, "Failed to finish exhausted job");
                    }
                    if let Err(e) = assets.mark_failed(asset_id, &error).await {
                        tracing::error!(error = %e, "Failed to mark asset failed");
                    }
                }
            }
        }
    }

    /// The happy path of one attempt: fetch origin bytes, upload them under a
    /// fresh key, record the outcome on the asset.
    async fn fetch_and_upload(
        job: &CacheJob,
        fetcher: &Arc<dyn OriginFetcher>,
        storage: &Arc<dyn ObjectStore>,
        assets: &Arc<dyn CacheAssetStore>,
    ) -> Result<String> {
        let media = fetcher.fetch(&job.original_url).await?;

        let cache_key = generate_cache_key(&job.destination_folder, &media.content_type);
        let file_size = media.bytes.len() as i64;

        storage
            .put(&cache_key, media.bytes, &media.content_type)
            .await
            .map_err(|e| anyhow::anyhow!("Upload failed: {}", e))?;

        assets
            .mark_cached(job.cache_asset_id, &cache_key, &media.content_type, file_size)
            .await?;

        Ok(cache_key)
    }

    /// Signals the worker pool to stop claiming new jobs and exit the main
    /// loop. Returns immediately; already-spawned job handlers continue
    /// running until they complete.
    pub async fn shutdown(&self) {
        tracing::info!("Initiating cache queue shutdown");
        let _ = self.shutdown_tx.send(()).await;
    }
}

impl Clone for CacheQueue {
    fn clone(&self) -> Self {
        Self {
            assets: self.assets.clone(),
            jobs: self.jobs.clone(),
            config: self.config.clone(),
            shutdown_tx: self.shutdown_tx.clone(),
        }
    }
}
