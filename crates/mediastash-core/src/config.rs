//! Configuration module
//!
//! Environment-driven configuration for the cache subsystem: database,
//! storage backend, resolver, dedup, and worker-pool settings.

use std::env;
use std::str::FromStr;

use anyhow::Context;

use crate::storage_types::StorageBackend;

const DEFAULT_DB_MAX_CONNECTIONS: u32 = 20;
const DEFAULT_DB_TIMEOUT_SECS: u64 = 30;
const DEFAULT_SIGNED_URL_TTL_SECS: u64 = 3600;
const DEFAULT_DEDUP_DISTANCE_THRESHOLD: u32 = 10;
const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 60;
const DEFAULT_MAX_FETCH_BYTES: usize = 50 * 1024 * 1024;
const DEFAULT_QUEUE_MAX_WORKERS: usize = 4;
const DEFAULT_QUEUE_POLL_INTERVAL_MS: u64 = 1000;
const DEFAULT_QUEUE_MAX_RETRIES: i32 = 3;
const DEFAULT_STALE_JOB_REAP_INTERVAL_SECS: u64 = 60;
const DEFAULT_STALE_JOB_GRACE_PERIOD_SECS: i64 = 300;

/// Application configuration for the cache subsystem.
#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub db_max_connections: u32,
    pub db_timeout_seconds: u64,

    // Storage configuration
    pub storage_backend: StorageBackend,
    pub s3_bucket: Option<String>,
    pub s3_region: Option<String>,
    /// Custom endpoint for S3-compatible providers (MinIO, Spaces, ...)
    pub s3_endpoint: Option<String>,
    pub local_storage_path: Option<String>,
    pub local_storage_base_url: Option<String>,

    /// Destination folder prefix for cached objects.
    pub cache_folder: String,
    pub signed_url_ttl_secs: u64,

    // Dedup configuration
    pub dedup_distance_threshold: u32,

    // Origin fetch configuration
    pub fetch_timeout_secs: u64,
    pub max_fetch_bytes: usize,

    // Cache queue configuration
    pub queue_max_workers: usize,
    pub queue_poll_interval_ms: u64,
    pub queue_max_retries: i32,
    /// Interval in seconds between runs of the stale job reaper. 0 = disabled.
    pub stale_job_reap_interval_secs: u64,
    /// Age in seconds after which a running job with no progress is considered stale.
    pub stale_job_grace_period_secs: i64,
}

fn env_parse<T: FromStr>(key: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("Invalid {}: {}", key, e)),
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Build configuration from environment variables.
    ///
    /// `DATABASE_URL` is required; everything else has a default or is
    /// validated by the storage factory when the backend needs it.
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url =
            env::var("DATABASE_URL").context("DATABASE_URL environment variable is required")?;

        let storage_backend = match env::var("STORAGE_BACKEND") {
            Ok(raw) => raw.parse::<StorageBackend>()?,
            Err(_) => StorageBackend::S3,
        };

        Ok(Config {
            database_url,
            db_max_connections: env_parse("DB_MAX_CONNECTIONS", DEFAULT_DB_MAX_CONNECTIONS)?,
            db_timeout_seconds: env_parse("DB_TIMEOUT_SECONDS", DEFAULT_DB_TIMEOUT_SECS)?,
            storage_backend,
            s3_bucket: env::var("S3_BUCKET").ok(),
            s3_region: env::var("S3_REGION").ok().or(env::var("AWS_REGION").ok()),
            s3_endpoint: env::var("S3_ENDPOINT").ok(),
            local_storage_path: env::var("LOCAL_STORAGE_PATH").ok(),
            local_storage_base_url: env::var("LOCAL_STORAGE_BASE_URL").ok(),
            cache_folder: env::var("CACHE_FOLDER").unwrap_or_else(|_| "cache".to_string()),
            signed_url_ttl_secs: env_parse("SIGNED_URL_TTL_SECS", DEFAULT_SIGNED_URL_TTL_SECS)?,
            dedup_distance_threshold: env_parse(
                "DEDUP_DISTANCE_THRESHOLD",
                DEFAULT_DEDUP_DISTANCE_THRESHOLD,
            )?,
            fetch_timeout_secs: env_parse("FETCH_TIMEOUT_SECS", DEFAULT_FETCH_TIMEOUT_SECS)?,
            max_fetch_bytes: env_parse("MAX_FETCH_BYTES", DEFAULT_MAX_FETCH_BYTES)?,
            queue_max_workers: env_parse("QUEUE_MAX_WORKERS", DEFAULT_QUEUE_MAX_WORKERS)?,
            queue_poll_interval_ms: env_parse(
                "QUEUE_POLL_INTERVAL_MS",
                DEFAULT_QUEUE_POLL_INTERVAL_MS,
            )?,
            queue_max_retries: env_parse("QUEUE_MAX_RETRIES", DEFAULT_QUEUE_MAX_RETRIES)?,
            stale_job_reap_interval_secs: env_parse(
                "STALE_JOB_REAP_INTERVAL_SECS",
                DEFAULT_STALE_JOB_REAP_INTERVAL_SECS,
            )?,
            stale_job_grace_period_secs: env_parse(
                "STALE_JOB_GRACE_PERIOD_SECS",
                DEFAULT_STALE_JOB_GRACE_PERIOD_SECS,
            )?,
        })
    }
}
