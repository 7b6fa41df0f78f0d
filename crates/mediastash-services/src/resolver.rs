//! Tiered URL resolution.
//!
//! Turns a stored reference into the best currently-available URL. The
//! resolver is total: it never returns an error, only progressively less
//! cached URLs, ending at the origin URL or the empty string when nothing is
//! known at all. Each tier is an explicit `Option<String>` tried in order;
//! failures are logged and skipped, never raised.

use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use mediastash_core::models::MediaRef;
use mediastash_core::store::CacheAssetStore;
use mediastash_storage::ObjectStore;

/// Resolves stored references to servable URLs.
///
/// Safe to call at any asset status: a reader may observe `Pending` and get
/// the origin URL, then `Cached` and get a signed URL on the next call.
#[derive(Clone)]
pub struct UrlResolver {
    assets: Arc<dyn CacheAssetStore>,
    storage: Arc<dyn ObjectStore>,
    signed_url_ttl: Duration,
}

impl UrlResolver {
    pub fn new(
        assets: Arc<dyn CacheAssetStore>,
        storage: Arc<dyn ObjectStore>,
        signed_url_ttl: Duration,
    ) -> Self {
        Self {
            assets,
            storage,
            signed_url_ttl,
        }
    }

    /// Resolve a single reference.
    ///
    /// Resolution order:
    /// 1. no reference: the caller's origin URL, or empty string;
    /// 2. known asset with stored bytes: signed URL, then public URL, then
    ///    the asset's stored origin URL;
    /// 3. known asset without bytes yet: the caller's origin URL, then the
    ///    asset's stored one;
    /// 4. unknown id or legacy raw key: signed URL on the key itself, then
    ///    public URL, then the caller's origin URL, then empty string.
    pub async fn resolve(
        &self,
        reference: Option<&MediaRef>,
        original_url: Option<&str>,
    ) -> String {
        let Some(reference) = reference else {
            return original_url.unwrap_or_default().to_string();
        };

        match reference {
            MediaRef::Asset(id) => self.resolve_asset(*id, original_url).await,
            MediaRef::LegacyKey(key) => self.resolve_key(key, original_url).await,
        }
    }

    /// Bulk resolution: same length as `references`, order preserved, each
    /// entry resolved independently and concurrently.
    pub async fn resolve_many(
        &self,
        references: &[Option<MediaRef>],
        original_urls: &[Option<String>],
    ) -> Vec<String> {
        let futures = references.iter().enumerate().map(|(i, reference)| {
            let original_url = original_urls.get(i).and_then(|u| u.as_deref());
            self.resolve(reference.as_ref(), original_url)
        });
        join_all(futures).await
    }

    async fn resolve_asset(&self, id: Uuid, original_url: Option<&str>) -> String {
        match self.assets.get(id).await {
            Ok(Some(asset)) => {
                if let Some(key) = asset.servable_key() {
                    if let Some(url) = self.key_url(key).await {
                        return url;
                    }
                    // Both URL tiers failed for the stored key; the stored
                    // origin is the last thing we know about these bytes.
                    return asset.original_url;
                }
                // Not yet cached (or failed): degrade to the origin.
                match original_url {
                    Some(url) => url.to_string(),
                    None => asset.original_url,
                }
            }
            Ok(None) => {
                // Unknown id: legacy rows can hold raw keys that happen to
                // parse as UUIDs, so fall through to key resolution.
                self.resolve_key(&id.to_string(), original_url).await
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    asset_id = %id,
                    "Asset lookup failed during resolution, degrading to origin URL"
                );
                original_url.unwrap_or_default().to_string()
            }
        }
    }

    async fn resolve_key(&self, key: &str, original_url: Option<&str>) -> String {
        if let Some(url) = self.key_url(key).await {
            return url;
        }
        original_url.unwrap_or_default().to_string()
    }

    /// URL tiers for a storage key: signed GET URL, then public URL.
    ///
    /// Signing failures are configuration problems; they are never retried
    /// here, just degraded past within the same call.
    async fn key_url(&self, key: &str) -> Option<String> {
        match self.storage.signed_get_url(key, self.signed_url_ttl).await {
            Ok(url) => return Some(url),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    key = %key,
                    "Signed URL generation failed, falling back to public URL"
                );
            }
        }

        match self.storage.public_url(key) {
            Ok(url) => Some(url),
            Err(e) => {
                tracing::warn!(error = %e, key = %key, "Public URL derivation failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mediastash_core::{MemoryStore, StorageBackend};
    use mediastash_storage::{StorageError, StorageResult};

    /// Storage fake with independently failable signing and public tiers.
    struct TierStorage {
        sign_works: bool,
        public_works: bool,
    }

    #[async_trait]
    impl ObjectStore for TierStorage {
        async fn put(
            &self,
            _key: &str,
            _data: Vec<u8>,
            _content_type: &str,
        ) -> StorageResult<String> {
            Err(StorageError::BackendError("not used in this test".into()))
        }

        async fn download(&self, key: &str) -> StorageResult<Vec<u8>> {
            Err(StorageError::NotFound(key.to_string()))
        }

        async fn delete(&self, _key: &str) -> StorageResult<()> {
            Ok(())
        }

        async fn signed_get_url(&self, key: &str, _expires_in: Duration) -> StorageResult<String> {
            if self.sign_works {
                Ok(format!("https://signed.example.com/{}?sig=abc", key))
            } else {
                Err(StorageError::SignFailed("credentials missing".into()))
            }
        }

        fn public_url(&self, key: &str) -> StorageResult<String> {
            if self.public_works {
                Ok(format!("https://public.example.com/{}", key))
            } else {
                Err(StorageError::ConfigError("no public base url".into()))
            }
        }

        async fn exists(&self, _key: &str) -> StorageResult<bool> {
            Ok(true)
        }

        fn backend_type(&self) -> StorageBackend {
            StorageBackend::S3
        }
    }

    fn resolver(sign_works: bool, public_works: bool) -> (Arc<MemoryStore>, UrlResolver) {
        let store = Arc::new(MemoryStore::new());
        let resolver = UrlResolver::new(
            store.clone(),
            Arc::new(TierStorage {
                sign_works,
                public_works,
            }),
            Duration::from_secs(3600),
        );
        (store, resolver)
    }

    #[tokio::test]
    async fn no_reference_returns_origin_or_empty() {
        let (_, resolver) = resolver(true, true);
        assert_eq!(
            resolver
                .resolve(None, Some("https://origin.example.com/x.jpg"))
                .await,
            "https://origin.example.com/x.jpg"
        );
        assert_eq!(resolver.resolve(None, None).await, "");
    }

    #[tokio::test]
    async fn cached_asset_resolves_to_signed_url() {
        let (store, resolver) = resolver(true, true);
        let asset = store
            .insert_cached(
                "https://origin.example.com/x.jpg",
                "cache/1-a.jpg",
                "image/jpeg",
                100,
            )
            .await
            .unwrap();

        let url = resolver
            .resolve(Some(&MediaRef::Asset(asset.id)), None)
            .await;
        assert_eq!(url, "https://signed.example.com/cache/1-a.jpg?sig=abc");
    }

    #[tokio::test]
    async fn signer_failure_degrades_to_public_url() {
        let (store, resolver) = resolver(false, true);
        let asset = store
            .insert_cached(
                "https://origin.example.com/x.jpg",
                "cache/1-a.jpg",
                "image/jpeg",
                100,
            )
            .await
            .unwrap();

        let url = resolver
            .resolve(Some(&MediaRef::Asset(asset.id)), None)
            .await;
        assert_eq!(url, "https://public.example.com/cache/1-a.jpg");
    }

    #[tokio::test]
    async fn all_url_tiers_failing_degrades_to_stored_origin() {
        let (store, resolver) = resolver(false, false);
        let asset = store
            .insert_cached(
                "https://origin.example.com/x.jpg",
                "cache/1-a.jpg",
                "image/jpeg",
                100,
            )
            .await
            .unwrap();

        let url = resolver
            .resolve(Some(&MediaRef::Asset(asset.id)), None)
            .await;
        assert_eq!(url, "https://origin.example.com/x.jpg");
    }

    #[tokio::test]
    async fn pending_asset_resolves_to_stored_origin() {
        let (store, resolver) = resolver(true, true);
        let asset = store
            .create_pending("https://origin.example.com/pending.jpg")
            .await
            .unwrap();

        // No passed URL: the stored one is used.
        let url = resolver
            .resolve(Some(&MediaRef::Asset(asset.id)), None)
            .await;
        assert_eq!(url, "https://origin.example.com/pending.jpg");

        // A passed URL wins over the stored one.
        let url = resolver
            .resolve(
                Some(&MediaRef::Asset(asset.id)),
                Some("https://fresher.example.com/pending.jpg"),
            )
            .await;
        assert_eq!(url, "https://fresher.example.com/pending.jpg");
    }

    #[tokio::test]
    async fn failed_asset_resolves_to_origin() {
        let (store, resolver) = resolver(true, true);
        let asset = store
            .create_pending("https://origin.example.com/broken.jpg")
            .await
            .unwrap();
        store.claim_for_caching(asset.id).await.unwrap();
        store.mark_failed(asset.id, "origin 404").await.unwrap();

        let url = resolver
            .resolve(
                Some(&MediaRef::Asset(asset.id)),
                Some("https://origin.example.com/broken.jpg"),
            )
            .await;
        assert_eq!(url, "https://origin.example.com/broken.jpg");
    }

    #[tokio::test]
    async fn legacy_key_resolves_directly_against_storage() {
        let (_, resolver) = resolver(true, true);
        let url = resolver
            .resolve(
                Some(&MediaRef::LegacyKey("media/old/avatar.png".to_string())),
                None,
            )
            .await;
        assert_eq!(url, "https://signed.example.com/media/old/avatar.png?sig=abc");
    }

    #[tokio::test]
    async fn unknown_asset_id_is_tried_as_legacy_key() {
        let (_, resolver) = resolver(true, true);
        let id = Uuid::new_v4();
        let url = resolver.resolve(Some(&MediaRef::Asset(id)), None).await;
        assert_eq!(url, format!("https://signed.example.com/{}?sig=abc", id));
    }

    #[tokio::test]
    async fn legacy_key_with_no_working_tier_falls_back_to_origin() {
        let (_, resolver) = resolver(false, false);
        let url = resolver
            .resolve(
                Some(&MediaRef::LegacyKey("media/old/avatar.png".to_string())),
                Some("https://origin.example.com/avatar.png"),
            )
            .await;
        assert_eq!(url, "https://origin.example.com/avatar.png");

        let url = resolver
            .resolve(Some(&MediaRef::LegacyKey("media/old/x.png".to_string())), None)
            .await;
        assert_eq!(url, "");
    }

    #[tokio::test]
    async fn resolve_many_preserves_length_and_order() {
        let (store, resolver) = resolver(true, true);
        let asset = store
            .insert_cached(
                "https://origin.example.com/a.jpg",
                "cache/1-a.jpg",
                "image/jpeg",
                100,
            )
            .await
            .unwrap();

        let references = vec![
            Some(MediaRef::Asset(asset.id)),
            None,
            Some(MediaRef::LegacyKey("legacy/key.png".to_string())),
        ];
        let urls = vec![
            Some("https://origin.example.com/a.jpg".to_string()),
            Some("https://origin.example.com/b.jpg".to_string()),
            None,
        ];

        let resolved = resolver.resolve_many(&references, &urls).await;
        assert_eq!(
            resolved,
            vec![
                "https://signed.example.com/cache/1-a.jpg?sig=abc".to_string(),
                "https://origin.example.com/b.jpg".to_string(),
                "https://signed.example.com/legacy/key.png?sig=abc".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn resolve_many_tolerates_short_url_list() {
        let (_, resolver) = resolver(true, true);
        let references = vec![None, None, None];
        let urls = vec![Some("https://origin.example.com/only.jpg".to_string())];

        let resolved = resolver.resolve_many(&references, &urls).await;
        assert_eq!(
            resolved,
            vec![
                "https://origin.example.com/only.jpg".to_string(),
                String::new(),
                String::new(),
            ]
        );
    }
}
