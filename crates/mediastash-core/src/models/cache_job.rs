use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

/// Queue status of a caching job.
///
/// `Done` is kept for exhausted jobs (with `last_error` set) so operators can
/// audit failures; successfully completed jobs are deleted outright since the
/// asset row carries the durable outcome.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(
    feature = "sqlx",
    sqlx(type_name = "cache_job_status", rename_all = "lowercase")
)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Done,
}

impl Display for JobStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Done => write!(f, "done"),
        }
    }
}

impl FromStr for JobStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "done" => Ok(JobStatus::Done),
            _ => Err(anyhow::anyhow!("Invalid job status: {}", s)),
        }
    }
}

/// One caching job per asset, keyed by the asset's own id. A duplicate
/// enqueue for the same asset is absorbed by the queue, which is what keeps
/// at most one caching attempt in flight per asset.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct CacheJob {
    pub cache_asset_id: Uuid,
    pub original_url: String,
    pub destination_folder: String,
    pub status: JobStatus,
    pub retry_count: i32,
    pub max_retries: i32,
    pub scheduled_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CacheJob {
    pub fn new(
        cache_asset_id: Uuid,
        original_url: impl Into<String>,
        destination_folder: impl Into<String>,
        max_retries: i32,
    ) -> Self {
        let now = Utc::now();
        CacheJob {
            cache_asset_id,
            original_url: original_url.into(),
            destination_folder: destination_folder.into(),
            status: JobStatus::Queued,
            retry_count: 0,
            max_retries,
            scheduled_at: now,
            started_at: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether another attempt is allowed after the current one failed.
    ///
    /// `retry_count` counts completed failed attempts; `max_retries` is the
    /// total attempt budget, so the attempt that brings the count to the
    /// budget is the last one.
    pub fn can_retry(&self) -> bool {
        self.retry_count + 1 < self.max_retries
    }

    pub fn is_ready(&self) -> bool {
        self.status == JobStatus::Queued && self.scheduled_at <= Utc::now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_status_round_trip() {
        for status in [JobStatus::Queued, JobStatus::Running, JobStatus::Done] {
            assert_eq!(status.to_string().parse::<JobStatus>().unwrap(), status);
        }
        assert!("pending".parse::<JobStatus>().is_err());
    }

    #[test]
    fn fresh_job_is_ready_and_retryable() {
        let job = CacheJob::new(Uuid::new_v4(), "https://example.com/x.png", "cache", 3);
        assert!(job.is_ready());
        assert!(job.can_retry());
    }

    #[test]
    fn job_scheduled_in_future_is_not_ready() {
        let mut job = CacheJob::new(Uuid::new_v4(), "https://example.com/x.png", "cache", 3);
        job.scheduled_at = Utc::now() + chrono::Duration::seconds(30);
        assert!(!job.is_ready());
    }

    #[test]
    fn retry_budget_is_three_total_attempts() {
        let mut job = CacheJob::new(Uuid::new_v4(), "https://example.com/x.png", "cache", 3);
        // First attempt failed -> two attempts left.
        assert!(job.can_retry());
        job.retry_count = 1;
        assert!(job.can_retry());
        // Third attempt is the last one; no retry after it fails.
        job.retry_count = 2;
        assert!(!job.can_retry());
        job.retry_count = 5;
        assert!(!job.can_retry());
    }
}
