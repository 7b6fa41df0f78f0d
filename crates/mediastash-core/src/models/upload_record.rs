use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The referencing entity created for a direct (non-scraped) upload.
///
/// `fingerprint` is the 64-bit perceptual hash encoded as 16 lowercase hex
/// digits, computed once at ingestion. It is `None` when hashing failed
/// (corrupt or unsupported image); such records are stored but excluded from
/// duplicate scans.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct UploadRecord {
    pub id: Uuid,
    pub cache_asset_id: Uuid,
    pub fingerprint: Option<String>,
    pub content_type: String,
    pub created_at: DateTime<Utc>,
}

impl UploadRecord {
    pub fn new(
        cache_asset_id: Uuid,
        fingerprint: Option<String>,
        content_type: impl Into<String>,
    ) -> Self {
        UploadRecord {
            id: Uuid::new_v4(),
            cache_asset_id,
            fingerprint,
            content_type: content_type.into(),
            created_at: Utc::now(),
        }
    }
}
