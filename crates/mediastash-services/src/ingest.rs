//! Ingestion and deduplication gate.
//!
//! Sits in front of direct uploads: fingerprints the bytes, scans existing
//! fingerprints for a visual duplicate, and either reuses the existing asset
//! or stores the bytes and records a new one. Also the producer entry point
//! for the asynchronous path, where only an origin URL is known.

use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use mediastash_core::models::{CacheJob, CacheStatus, UploadRecord};
use mediastash_core::store::{CacheAssetStore, CacheJobQueue, UploadRecordStore};
use mediastash_core::AppError;
use mediastash_dedup::Fingerprint;
use mediastash_storage::{generate_cache_key, ObjectStore};

/// Result of a direct upload through the gate.
#[derive(Debug, Clone, Serialize)]
pub struct UploadOutcome {
    pub record_id: Uuid,
    pub cache_asset_id: Uuid,
    pub duplicate: bool,
}

pub struct IngestGate {
    assets: Arc<dyn CacheAssetStore>,
    uploads: Arc<dyn UploadRecordStore>,
    jobs: Arc<dyn CacheJobQueue>,
    storage: Arc<dyn ObjectStore>,
    distance_threshold: u32,
    cache_folder: String,
    max_retries: i32,
}

impl IngestGate {
    pub fn new(
        assets: Arc<dyn CacheAssetStore>,
        uploads: Arc<dyn UploadRecordStore>,
        jobs: Arc<dyn CacheJobQueue>,
        storage: Arc<dyn ObjectStore>,
        distance_threshold: u32,
        cache_folder: impl Into<String>,
        max_retries: i32,
    ) -> Self {
        Self {
            assets,
            uploads,
            jobs,
            storage,
            distance_threshold,
            cache_folder: cache_folder.into(),
            max_retries,
        }
    }

    /// Direct upload: bytes already in hand.
    ///
    /// On a fingerprint match against an existing record the upload
    /// short-circuits: no storage write, no new rows, `duplicate: true` with
    /// the existing identities. Otherwise the bytes are stored and the asset
    /// is created already `Cached`.
    ///
    /// The duplicate scan is a linear pass over fingerprinted records; it
    /// only runs on explicit uploads, never on scrape-derived imports.
    #[tracing::instrument(skip(self, data), fields(size = data.len(), content_type = %content_type))]
    pub async fn upload_image(
        &self,
        data: Vec<u8>,
        content_type: &str,
    ) -> Result<UploadOutcome, AppError> {
        if data.is_empty() {
            return Err(AppError::InvalidInput("Upload body is empty".to_string()));
        }

        let fingerprint = match Fingerprint::of_image(&data) {
            Ok(fp) => Some(fp),
            Err(e) => {
                // Hashing failure must not abort the upload; the image is
                // stored, just not deduplicated.
                tracing::warn!(error = %e, "Fingerprint computation failed, storing without dedup");
                None
            }
        };

        if let Some(fp) = fingerprint {
            if let Some(existing) = self.find_duplicate(&fp).await? {
                tracing::info!(
                    record_id = %existing.id,
                    asset_id = %existing.cache_asset_id,
                    "Visually identical upload detected, reusing existing asset"
                );
                return Ok(UploadOutcome {
                    record_id: existing.id,
                    cache_asset_id: existing.cache_asset_id,
                    duplicate: true,
                });
            }
        }

        let cache_key = generate_cache_key(&self.cache_folder, content_type);
        let file_size = data.len() as i64;

        self.storage
            .put(&cache_key, data, content_type)
            .await
            .map_err(|e| AppError::Storage(e.to_string()))?;

        // Direct uploads have no real origin; a synthetic one keeps the
        // original_url uniqueness invariant total.
        let origin = format!("upload://{}", Uuid::new_v4());
        let asset = self
            .assets
            .insert_cached(&origin, &cache_key, content_type, file_size)
            .await?;

        let record = self
            .uploads
            .insert(UploadRecord::new(
                asset.id,
                fingerprint.map(|fp| fp.to_string()),
                content_type,
            ))
            .await?;

        tracing::info!(
            record_id = %record.id,
            asset_id = %asset.id,
            cache_key = %cache_key,
            "Direct upload stored"
        );

        Ok(UploadOutcome {
            record_id: record.id,
            cache_asset_id: asset.id,
            duplicate: false,
        })
    }

    /// Asynchronous path: only an origin URL is known.
    ///
    /// Idempotent per URL: repeated calls return the same asset id, and the
    /// queue absorbs duplicate jobs, so re-importing the same origin is
    /// cheap. Assets that already finished (cached or failed) are not
    /// re-enqueued.
    #[tracing::instrument(skip(self))]
    pub async fn create_or_reuse(&self, original_url: &str) -> Result<Uuid, AppError> {
        let original_url = original_url.trim();
        if original_url.is_empty() {
            return Err(AppError::InvalidInput("Origin URL is empty".to_string()));
        }

        let asset = self.assets.create_pending(original_url).await?;

        if asset.status != CacheStatus::Cached {
            let inserted = self
                .jobs
                .enqueue(CacheJob::new(
                    asset.id,
                    original_url,
                    self.cache_folder.clone(),
                    self.max_retries,
                ))
                .await?;
            if inserted {
                tracing::info!(asset_id = %asset.id, "Caching job enqueued for origin URL");
            }
        }

        Ok(asset.id)
    }

    async fn find_duplicate(
        &self,
        fingerprint: &Fingerprint,
    ) -> Result<Option<UploadRecord>, AppError> {
        let records = self.uploads.list_fingerprinted().await?;
        for record in records {
            let Some(existing) = record
                .fingerprint
                .as_deref()
                .and_then(|s| s.parse::<Fingerprint>().ok())
            else {
                continue;
            };
            if fingerprint.is_match(&existing, self.distance_threshold) {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat, RgbImage};
    use mediastash_core::MemoryStore;
    use mediastash_storage::LocalObjectStore;
    use std::io::Cursor;
    use tempfile::tempdir;

    fn encode(img: RgbImage, format: ImageFormat) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut out, format)
            .unwrap();
        out.into_inner()
    }

    fn gradient(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, _| {
            let v = (x * 255 / width.max(1)) as u8;
            image::Rgb([v, v, v])
        })
    }

    fn checkerboard(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            if ((x / 8) + (y / 8)) % 2 == 0 {
                image::Rgb([255, 255, 255])
            } else {
                image::Rgb([0, 0, 0])
            }
        })
    }

    async fn gate() -> (tempfile::TempDir, Arc<MemoryStore>, IngestGate) {
        let dir = tempdir().unwrap();
        let storage = Arc::new(
            LocalObjectStore::new(dir.path(), "http://localhost:3000/cache".to_string())
                .await
                .unwrap(),
        );
        let store = Arc::new(MemoryStore::new());
        let gate = IngestGate::new(
            store.clone(),
            store.clone(),
            store.clone(),
            storage,
            10,
            "cache",
            3,
        );
        (dir, store, gate)
    }

    #[tokio::test]
    async fn first_upload_creates_cached_asset() {
        let (_dir, store, gate) = gate().await;
        let bytes = encode(gradient(64, 64), ImageFormat::Png);

        let outcome = gate.upload_image(bytes, "image/png").await.unwrap();
        assert!(!outcome.duplicate);

        let assets: Arc<dyn CacheAssetStore> = store.clone();
        let asset = assets.get(outcome.cache_asset_id).await.unwrap().unwrap();
        assert_eq!(asset.status, CacheStatus::Cached);
        assert!(asset.cache_key.as_deref().unwrap().ends_with(".png"));
        assert!(asset.original_url.starts_with("upload://"));

        let uploads: Arc<dyn UploadRecordStore> = store.clone();
        let record = uploads.get(outcome.record_id).await.unwrap().unwrap();
        assert!(record.fingerprint.is_some());
    }

    #[tokio::test]
    async fn visually_identical_upload_short_circuits() {
        let (_dir, store, gate) = gate().await;

        let first = gate
            .upload_image(encode(gradient(128, 96), ImageFormat::Png), "image/png")
            .await
            .unwrap();

        // Same picture, different encoding and size.
        let second = gate
            .upload_image(encode(gradient(256, 192), ImageFormat::Jpeg), "image/jpeg")
            .await
            .unwrap();

        assert!(second.duplicate);
        assert_eq!(second.cache_asset_id, first.cache_asset_id);
        assert_eq!(second.record_id, first.record_id);

        // No second record was written.
        let uploads: Arc<dyn UploadRecordStore> = store.clone();
        assert_eq!(uploads.list_fingerprinted().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn visually_distinct_upload_is_stored_separately() {
        let (_dir, store, gate) = gate().await;

        let first = gate
            .upload_image(encode(gradient(64, 64), ImageFormat::Png), "image/png")
            .await
            .unwrap();
        let second = gate
            .upload_image(encode(checkerboard(64, 64), ImageFormat::Png), "image/png")
            .await
            .unwrap();

        assert!(!second.duplicate);
        assert_ne!(second.cache_asset_id, first.cache_asset_id);

        let uploads: Arc<dyn UploadRecordStore> = store.clone();
        assert_eq!(uploads.list_fingerprinted().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn corrupt_image_is_stored_without_fingerprint() {
        let (_dir, store, gate) = gate().await;

        let outcome = gate
            .upload_image(b"not an image at all".to_vec(), "image/png")
            .await
            .unwrap();
        assert!(!outcome.duplicate);

        let uploads: Arc<dyn UploadRecordStore> = store.clone();
        let record = uploads.get(outcome.record_id).await.unwrap().unwrap();
        assert!(record.fingerprint.is_none());

        // Unfingerprinted records never participate in the duplicate scan.
        assert!(uploads.list_fingerprinted().await.unwrap().is_empty());

        let assets: Arc<dyn CacheAssetStore> = store.clone();
        let asset = assets.get(outcome.cache_asset_id).await.unwrap().unwrap();
        assert_eq!(asset.status, CacheStatus::Cached);
    }

    #[tokio::test]
    async fn empty_upload_is_rejected() {
        let (_dir, _store, gate) = gate().await;
        let err = gate.upload_image(Vec::new(), "image/png").await.unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn create_or_reuse_is_idempotent_per_url() {
        let (_dir, store, gate) = gate().await;

        let a = gate
            .create_or_reuse("https://cdn.example.com/clip.mp4")
            .await
            .unwrap();
        let b = gate
            .create_or_reuse("https://cdn.example.com/clip.mp4")
            .await
            .unwrap();
        assert_eq!(a, b);

        // One asset, one job; the duplicate enqueue was absorbed.
        let jobs: Arc<dyn CacheJobQueue> = store.clone();
        let stats = jobs.stats().await.unwrap();
        assert_eq!(stats.queued, 1);
        assert_eq!(stats.running, 0);
    }

    #[tokio::test]
    async fn create_or_reuse_skips_enqueue_for_cached_assets() {
        let (_dir, store, gate) = gate().await;

        let assets: Arc<dyn CacheAssetStore> = store.clone();
        let existing = assets
            .insert_cached(
                "https://cdn.example.com/already.png",
                "cache/1-a.png",
                "image/png",
                10,
            )
            .await
            .unwrap();

        let id = gate
            .create_or_reuse("https://cdn.example.com/already.png")
            .await
            .unwrap();
        assert_eq!(id, existing.id);

        let jobs: Arc<dyn CacheJobQueue> = store.clone();
        assert_eq!(jobs.stats().await.unwrap().queued, 0);
    }

    #[tokio::test]
    async fn blank_origin_url_is_rejected() {
        let (_dir, _store, gate) = gate().await;
        assert!(matches!(
            gate.create_or_reuse("   ").await.unwrap_err(),
            AppError::InvalidInput(_)
        ));
    }
}
