use async_trait::async_trait;
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

use mediastash_core::models::UploadRecord;
use mediastash_core::store::UploadRecordStore;
use mediastash_core::AppError;

const RECORD_COLUMNS: &str = r#"
    id,
    cache_asset_id,
    fingerprint,
    content_type,
    created_at
"#;

/// Postgres-backed [`UploadRecordStore`].
#[derive(Clone)]
pub struct PgUploadRecordStore {
    pool: PgPool,
}

impl PgUploadRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UploadRecordStore for PgUploadRecordStore {
    #[tracing::instrument(
        skip(self, record),
        fields(db.table = "upload_records", db.operation = "insert")
    )]
    async fn insert(&self, record: UploadRecord) -> Result<UploadRecord, AppError> {
        let inserted = sqlx::query_as::<Postgres, UploadRecord>(&format!(
            r#"
            INSERT INTO upload_records (id, cache_asset_id, fingerprint, content_type, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {RECORD_COLUMNS}
            "#
        ))
        .bind(record.id)
        .bind(record.cache_asset_id)
        .bind(&record.fingerprint)
        .bind(&record.content_type)
        .bind(record.created_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(inserted)
    }

    async fn list_fingerprinted(&self) -> Result<Vec<UploadRecord>, AppError> {
        let records = sqlx::query_as::<Postgres, UploadRecord>(&format!(
            r#"
            SELECT {RECORD_COLUMNS}
            FROM upload_records
            WHERE fingerprint IS NOT NULL
            ORDER BY created_at ASC
            "#
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn get(&self, id: Uuid) -> Result<Option<UploadRecord>, AppError> {
        let record = sqlx::query_as::<Postgres, UploadRecord>(&format!(
            "SELECT {RECORD_COLUMNS} FROM upload_records WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }
}
