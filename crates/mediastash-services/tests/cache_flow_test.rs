//! End-to-end flow over the direct-upload path: gate -> store -> resolver.

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use image::{DynamicImage, ImageFormat, RgbImage};
use tempfile::tempdir;

use mediastash_core::models::MediaRef;
use mediastash_core::store::CacheAssetStore;
use mediastash_core::MemoryStore;
use mediastash_services::{IngestGate, UrlResolver};
use mediastash_storage::LocalObjectStore;

fn png_gradient() -> Vec<u8> {
    let img = RgbImage::from_fn(96, 96, |x, _| {
        let v = (x * 255 / 96) as u8;
        image::Rgb([v, v, v])
    });
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut out, ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

#[tokio::test]
async fn uploaded_image_resolves_to_its_cache_key() {
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
        storage.clone(),
        10,
        "cache",
        3,
    );
    let resolver = UrlResolver::new(store.clone(), storage, Duration::from_secs(3600));

    let outcome = gate
        .upload_image(png_gradient(), "image/png")
        .await
        .unwrap();
    assert!(!outcome.duplicate);

    let assets: Arc<dyn CacheAssetStore> = store.clone();
    let asset = assets.get(outcome.cache_asset_id).await.unwrap().unwrap();
    let cache_key = asset.cache_key.clone().unwrap();

    // The resolved URL is derived from the cache key, not the origin.
    let url = resolver
        .resolve(Some(&MediaRef::Asset(outcome.cache_asset_id)), None)
        .await;
    assert!(url.contains(&cache_key), "{} should contain {}", url, cache_key);

    // A re-upload of the same picture reuses the asset, and resolves to the
    // same URL.
    let duplicate = gate
        .upload_image(png_gradient(), "image/png")
        .await
        .unwrap();
    assert!(duplicate.duplicate);
    assert_eq!(duplicate.cache_asset_id, outcome.cache_asset_id);

    let url_again = resolver
        .resolve(Some(&MediaRef::Asset(duplicate.cache_asset_id)), None)
        .await;
    assert_eq!(url, url_again);
}

#[tokio::test]
async fn untyped_references_resolve_through_sniffing() {
    let dir = tempdir().unwrap();
    let storage = Arc::new(
        LocalObjectStore::new(dir.path(), "http://localhost:3000/cache".to_string())
            .await
            .unwrap(),
    );
    let store = Arc::new(MemoryStore::new());
    let resolver = UrlResolver::new(store.clone(), storage, Duration::from_secs(3600));

    // A legacy row holds a raw storage key; sniffing classifies and resolves it.
    let legacy = MediaRef::parse("media/2020/banner.jpg").unwrap();
    let url = resolver.resolve(Some(&legacy), None).await;
    assert_eq!(url, "http://localhost:3000/cache/media/2020/banner.jpg");

    // A stored asset id string round-trips through the same entry point.
    let assets: Arc<dyn CacheAssetStore> = store.clone();
    let asset = assets
        .insert_cached(
            "https://origin.example.com/banner.jpg",
            "cache/9-b.jpg",
            "image/jpeg",
            42,
        )
        .await
        .unwrap();
    let sniffed = MediaRef::parse(&asset.id.to_string()).unwrap();
    let url = resolver.resolve(Some(&sniffed), None).await;
    assert_eq!(url, "http://localhost:3000/cache/cache/9-b.jpg");
}
