use async_trait::async_trait;
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

use mediastash_core::models::CacheJob;
use mediastash_core::store::{CacheJobQueue, QueueStats};
use mediastash_core::AppError;

/// Channel name for PostgreSQL LISTEN/NOTIFY when a new caching job is queued.
pub const JOB_NOTIFY_CHANNEL: &str = "mediastash_new_job";

const JOB_COLUMNS: &str = r#"
    cache_asset_id,
    original_url,
    destination_folder,
    status,
    retry_count,
    max_retries,
    scheduled_at,
    started_at,
    last_error,
    created_at,
    updated_at
"#;

/// Postgres-backed [`CacheJobQueue`].
///
/// The primary key on `cache_asset_id` is what absorbs duplicate enqueues:
/// at most one job row exists per asset, so the same asset can never have
/// two caching attempts in flight.
#[derive(Clone)]
pub struct PgCacheJobQueue {
    pool: PgPool,
}

impl PgCacheJobQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CacheJobQueue for PgCacheJobQueue {
    #[tracing::instrument(
        skip(self, job),
        fields(db.table = "cache_jobs", asset_id = %job.cache_asset_id)
    )]
    async fn enqueue(&self, job: CacheJob) -> Result<bool, AppError> {
        // Insert and notify in one transaction so a worker woken by the
        // NOTIFY always sees the committed row.
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO cache_jobs (
                cache_asset_id, original_url, destination_folder,
                status, retry_count, max_retries, scheduled_at
            )
            VALUES ($1, $2, $3, 'queued', 0, $4, NOW())
            ON CONFLICT (cache_asset_id) DO NOTHING
            "#,
        )
        .bind(job.cache_asset_id)
        .bind(&job.original_url)
        .bind(&job.destination_folder)
        .bind(job.max_retries)
        .execute(&mut *tx)
        .await?;

        let inserted = result.rows_affected() == 1;

        if inserted {
            // Non-fatal: workers fall back to polling when NOTIFY fails.
            if let Err(e) = sqlx::query("SELECT pg_notify($1, '')")
                .bind(JOB_NOTIFY_CHANNEL)
                .execute(&mut *tx)
                .await
            {
                tracing::warn!(
                    error = %e,
                    asset_id = %job.cache_asset_id,
                    "Failed to send pg_notify for new job, workers will discover it via polling"
                );
            }
        }

        tx.commit().await?;

        if inserted {
            tracing::info!(asset_id = %job.cache_asset_id, "Caching job enqueued");
        } else {
            tracing::debug!(asset_id = %job.cache_asset_id, "Duplicate enqueue absorbed");
        }

        Ok(inserted)
    }

    /// Atomically claim the next ready job.
    ///
    /// Uses `FOR UPDATE SKIP LOCKED` so concurrent workers never block on or
    /// double-claim the same row.
    #[tracing::instrument(skip(self), fields(db.table = "cache_jobs"))]
    async fn claim_next(&self) -> Result<Option<CacheJob>, AppError> {
        let mut tx = self.pool.begin().await?;

        let job = sqlx::query_as::<Postgres, CacheJob>(&format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM cache_jobs
            WHERE status = 'queued' AND scheduled_at <= NOW()
            ORDER BY scheduled_at ASC
            LIMIT 1
            FOR UPDATE SKIP LOCKED
            "#
        ))
        .fetch_optional(&mut *tx)
        .await?;

        let claimed = match job {
            Some(job) => {
                let updated = sqlx::query_as::<Postgres, CacheJob>(&format!(
                    r#"
                    UPDATE cache_jobs
                    SET status = 'running', started_at = NOW(), updated_at = NOW()
                    WHERE cache_asset_id = $1
                    RETURNING {JOB_COLUMNS}
                    "#
                ))
                .bind(job.cache_asset_id)
                .fetch_one(&mut *tx)
                .await?;
                Some(updated)
            }
            None => None,
        };

        tx.commit().await?;
        Ok(claimed)
    }

    #[tracing::instrument(skip(self, error), fields(db.table = "cache_jobs"))]
    async fn reschedule(
        &self,
        cache_asset_id: Uuid,
        delay_secs: u64,
        error: &str,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE cache_jobs
            SET status = 'queued',
                retry_count = retry_count + 1,
                scheduled_at = NOW() + ($2 * interval '1 second'),
                started_at = NULL,
                last_error = $3,
                updated_at = NOW()
            WHERE cache_asset_id = $1
            "#,
        )
        .bind(cache_asset_id)
        .bind(delay_secs as i64)
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn complete(&self, cache_asset_id: Uuid) -> Result<(), AppError> {
        sqlx::query("DELETE FROM cache_jobs WHERE cache_asset_id = $1")
            .bind(cache_asset_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn finish_failed(&self, cache_asset_id: Uuid, error: &str) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE cache_jobs
            SET status = 'done', last_error = $2, updated_at = NOW()
            WHERE cache_asset_id = $1
            "#,
        )
        .bind(cache_asset_id)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(db.table = "cache_jobs"))]
    async fn requeue(&self, cache_asset_id: Uuid) -> Result<bool, AppError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE cache_jobs
            SET status = 'queued',
                retry_count = 0,
                scheduled_at = NOW(),
                started_at = NULL,
                last_error = NULL,
                updated_at = NOW()
            WHERE cache_asset_id = $1
            "#,
        )
        .bind(cache_asset_id)
        .execute(&mut *tx)
        .await?;

        let requeued = result.rows_affected() == 1;
        if requeued {
            if let Err(e) = sqlx::query("SELECT pg_notify($1, '')")
                .bind(JOB_NOTIFY_CHANNEL)
                .execute(&mut *tx)
                .await
            {
                tracing::warn!(error = %e, asset_id = %cache_asset_id, "Failed to notify for requeued job");
            }
        }

        tx.commit().await?;
        Ok(requeued)
    }

    #[tracing::instrument(skip(self), fields(db.table = "cache_jobs"))]
    async fn reap_stale(&self, grace_secs: i64) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE cache_jobs
            SET status = 'queued', started_at = NULL, scheduled_at = NOW(), updated_at = NOW()
            WHERE status = 'running'
              AND (started_at IS NULL OR started_at < NOW() - ($1 * interval '1 second'))
            "#,
        )
        .bind(grace_secs)
        .execute(&self.pool)
        .await?;

        let reaped = result.rows_affected();
        if reaped > 0 {
            tracing::warn!(reaped = reaped, "Requeued stale running jobs");
        }
        Ok(reaped)
    }

    async fn stats(&self) -> Result<QueueStats, AppError> {
        let row: (i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'queued'),
                COUNT(*) FILTER (WHERE status = 'running'),
                COUNT(*) FILTER (WHERE status = 'done')
            FROM cache_jobs
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(QueueStats {
            queued: row.0,
            running: row.1,
            done: row.2,
        })
    }
}
