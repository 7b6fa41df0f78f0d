use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

#[cfg(feature = "sqlx")]
use sqlx::FromRow;

/// Lifecycle status of a cached asset.
///
/// Transitions are one-directional: `Pending -> Caching -> Cached | Failed`.
/// `Cached` and `Failed` are terminal; nothing ever moves back to `Pending`
/// except an explicit operator requeue of a failed asset.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(
    feature = "sqlx",
    sqlx(type_name = "cache_status", rename_all = "lowercase")
)]
#[serde(rename_all = "lowercase")]
pub enum CacheStatus {
    Pending,
    Caching,
    Cached,
    Failed,
}

impl CacheStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CacheStatus::Cached | CacheStatus::Failed)
    }

    /// Whether the state machine permits moving from `self` to `next`.
    pub fn can_transition_to(&self, next: CacheStatus) -> bool {
        matches!(
            (self, next),
            (CacheStatus::Pending, CacheStatus::Caching)
                | (CacheStatus::Caching, CacheStatus::Cached)
                | (CacheStatus::Caching, CacheStatus::Failed)
        )
    }
}

impl Display for CacheStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            CacheStatus::Pending => write!(f, "pending"),
            CacheStatus::Caching => write!(f, "caching"),
            CacheStatus::Cached => write!(f, "cached"),
            CacheStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for CacheStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(CacheStatus::Pending),
            "caching" => Ok(CacheStatus::Caching),
            "cached" => Ok(CacheStatus::Cached),
            "failed" => Ok(CacheStatus::Failed),
            _ => Err(anyhow::anyhow!("Invalid cache status: {}", s)),
        }
    }
}

/// The owned record of a piece of cached media.
///
/// `original_url` is unique across all assets; repeated imports of the same
/// origin return the existing row. `cache_key`, `content_type`, `file_size`
/// and `cached_at` are populated once bytes have been durably stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(FromRow))]
pub struct CacheAsset {
    pub id: Uuid,
    pub original_url: String,
    pub cache_key: Option<String>,
    pub status: CacheStatus,
    pub content_type: Option<String>,
    pub file_size: Option<i64>,
    /// Terminal failure reason; operator-visible, never surfaced to end users.
    pub last_error: Option<String>,
    pub cached_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CacheAsset {
    /// Build a fresh `Pending` asset for an origin URL.
    pub fn pending(original_url: impl Into<String>) -> Self {
        let now = Utc::now();
        CacheAsset {
            id: Uuid::new_v4(),
            original_url: original_url.into(),
            cache_key: None,
            status: CacheStatus::Pending,
            content_type: None,
            file_size: None,
            last_error: None,
            cached_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Build an asset that is born `Cached` (direct-upload path, bytes
    /// already stored by the caller).
    pub fn cached(
        original_url: impl Into<String>,
        cache_key: impl Into<String>,
        content_type: impl Into<String>,
        file_size: i64,
    ) -> Self {
        let now = Utc::now();
        CacheAsset {
            id: Uuid::new_v4(),
            original_url: original_url.into(),
            cache_key: Some(cache_key.into()),
            status: CacheStatus::Cached,
            content_type: Some(content_type.into()),
            file_size: Some(file_size),
            last_error: None,
            cached_at: Some(now),
            created_at: now,
            updated_at: now,
        }
    }

    /// The storage key, but only once the asset has actually been cached.
    pub fn servable_key(&self) -> Option<&str> {
        if self.status == CacheStatus::Cached {
            self.cache_key.as_deref()
        } else {
            None
        }
    }
}
