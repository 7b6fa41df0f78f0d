use async_trait::async_trait;
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

use mediastash_core::models::CacheAsset;
use mediastash_core::store::CacheAssetStore;
use mediastash_core::AppError;

const ASSET_COLUMNS: &str = r#"
    id,
    original_url,
    cache_key,
    status,
    content_type,
    file_size,
    last_error,
    cached_at,
    created_at,
    updated_at
"#;

/// Postgres-backed [`CacheAssetStore`].
///
/// `original_url` uniqueness is enforced by the table constraint; creation
/// races resolve through `ON CONFLICT DO NOTHING` followed by a read of the
/// winning row, so concurrent imports of the same URL converge on one asset.
#[derive(Clone)]
pub struct PgCacheAssetStore {
    pool: PgPool,
}

impl PgCacheAssetStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_by_url(&self, original_url: &str) -> Result<Option<CacheAsset>, AppError> {
        let asset = sqlx::query_as::<Postgres, CacheAsset>(&format!(
            "SELECT {ASSET_COLUMNS} FROM cache_assets WHERE original_url = $1"
        ))
        .bind(original_url)
        .fetch_optional(&self.pool)
        .await?;
        Ok(asset)
    }
}

#[async_trait]
impl CacheAssetStore for PgCacheAssetStore {
    #[tracing::instrument(skip(self), fields(db.table = "cache_assets", db.operation = "insert"))]
    async fn create_pending(&self, original_url: &str) -> Result<CacheAsset, AppError> {
        let inserted = sqlx::query_as::<Postgres, CacheAsset>(&format!(
            r#"
            INSERT INTO cache_assets (id, original_url, status)
            VALUES ($1, $2, 'pending')
            ON CONFLICT (original_url) DO NOTHING
            RETURNING {ASSET_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(original_url)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(asset) = inserted {
            tracing::info!(asset_id = %asset.id, original_url = %original_url, "Cache asset created");
            return Ok(asset);
        }

        // Lost the insert race or the URL was already known; return the
        // existing row whatever its status.
        self.fetch_by_url(original_url).await?.ok_or_else(|| {
            AppError::Internal(format!(
                "cache asset for {} vanished between insert and read",
                original_url
            ))
        })
    }

    #[tracing::instrument(
        skip(self),
        fields(db.table = "cache_assets", db.operation = "insert")
    )]
    async fn insert_cached(
        &self,
        original_url: &str,
        cache_key: &str,
        content_type: &str,
        file_size: i64,
    ) -> Result<CacheAsset, AppError> {
        let inserted = sqlx::query_as::<Postgres, CacheAsset>(&format!(
            r#"
            INSERT INTO cache_assets (
                id, original_url, cache_key, status, content_type, file_size, cached_at
            )
            VALUES ($1, $2, $3, 'cached', $4, $5, NOW())
            ON CONFLICT (original_url) DO NOTHING
            RETURNING {ASSET_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(original_url)
        .bind(cache_key)
        .bind(content_type)
        .bind(file_size)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(asset) = inserted {
            tracing::info!(
                asset_id = %asset.id,
                cache_key = %cache_key,
                file_size = file_size,
                "Cache asset created in cached state"
            );
            return Ok(asset);
        }

        self.fetch_by_url(original_url).await?.ok_or_else(|| {
            AppError::Internal(format!(
                "cache asset for {} vanished between insert and read",
                original_url
            ))
        })
    }

    async fn get(&self, id: Uuid) -> Result<Option<CacheAsset>, AppError> {
        let asset = sqlx::query_as::<Postgres, CacheAsset>(&format!(
            "SELECT {ASSET_COLUMNS} FROM cache_assets WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(asset)
    }

    async fn get_by_original_url(
        &self,
        original_url: &str,
    ) -> Result<Option<CacheAsset>, AppError> {
        self.fetch_by_url(original_url).await
    }

    /// Conditional claim: only a `pending` row can move to `caching`. A no-op
    /// update means another worker (or a stale retry) got there first, and
    /// the caller must drop the attempt.
    #[tracing::instrument(skip(self), fields(db.table = "cache_assets", db.operation = "update"))]
    async fn claim_for_caching(&self, id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE cache_assets
            SET status = 'caching', updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    #[tracing::instrument(skip(self), fields(db.table = "cache_assets", db.operation = "update"))]
    async fn mark_cached(
        &self,
        id: Uuid,
        cache_key: &str,
        content_type: &str,
        file_size: i64,
    ) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE cache_assets
            SET status = 'cached',
                cache_key = $2,
                content_type = $3,
                file_size = $4,
                last_error = NULL,
                cached_at = NOW(),
                updated_at = NOW()
            WHERE id = $1 AND status NOT IN ('cached', 'failed')
            "#,
        )
        .bind(id)
        .bind(cache_key)
        .bind(content_type)
        .bind(file_size)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            tracing::warn!(asset_id = %id, "mark_cached skipped: asset missing or already terminal");
        }

        Ok(())
    }

    #[tracing::instrument(skip(self), fields(db.table = "cache_assets", db.operation = "update"))]
    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE cache_assets
            SET status = 'failed', last_error = $2, updated_at = NOW()
            WHERE id = $1 AND status NOT IN ('cached', 'failed')
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            tracing::warn!(asset_id = %id, "mark_failed skipped: asset missing or already terminal");
        }

        Ok(())
    }

    #[tracing::instrument(skip(self), fields(db.table = "cache_assets", db.operation = "update"))]
    async fn reset_failed(&self, id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE cache_assets
            SET status = 'pending', last_error = NULL, updated_at = NOW()
            WHERE id = $1 AND status = 'failed'
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}
