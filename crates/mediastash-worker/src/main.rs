//! Standalone caching worker daemon.
//!
//! Connects to the database, wires up object storage, and runs the cache
//! queue worker pool until interrupted.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;

use mediastash_core::Config;
use mediastash_db::{setup_database, PgCacheAssetStore, PgCacheJobQueue};
use mediastash_storage::create_object_store;
use mediastash_worker::{telemetry, CacheQueue, CacheQueueConfig, HttpOriginFetcher};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    telemetry::init_telemetry().map_err(|e| anyhow::anyhow!("Telemetry init failed: {}", e))?;

    let config = Config::from_env().context("Failed to load configuration")?;

    let pool = setup_database(&config).await?;
    let storage = create_object_store(&config)
        .await
        .context("Failed to create object store")?;

    let assets = Arc::new(PgCacheAssetStore::new(pool.clone()));
    let jobs = Arc::new(PgCacheJobQueue::new(pool.clone()));
    let fetcher = Arc::new(
        HttpOriginFetcher::new(
            Duration::from_secs(config.fetch_timeout_secs),
            config.max_fetch_bytes,
        )
        .context("Failed to build origin fetcher")?,
    );

    let queue = CacheQueue::new(
        assets,
        jobs,
        fetcher,
        storage,
        CacheQueueConfig::from(&config),
        Some(pool),
    );

    tracing::info!("mediastash worker started");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    tracing::info!("Shutdown signal received");
    queue.shutdown().await;

    Ok(())
}
