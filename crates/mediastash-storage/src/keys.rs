//! Shared cache-key generation for storage backends.
//!
//! Key format: `{folder}/{unix_millis}-{random}.{ext}`. The extension is
//! derived from the content type; unknown types fall back to `bin`.

use chrono::Utc;
use uuid::Uuid;

/// Map a MIME type to a file extension. Common media types are matched
/// directly so keys stay predictable; everything else goes through
/// `mime_guess`.
pub fn extension_for(content_type: &str) -> &str {
    let content_type = content_type
        .split(';')
        .next()
        .unwrap_or(content_type)
        .trim();
    match content_type {
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "video/mp4" => "mp4",
        "audio/mpeg" => "mp3",
        _ => mime_guess::get_mime_extensions_str(content_type)
            .and_then(|exts| exts.first())
            .copied()
            .unwrap_or("bin"),
    }
}

/// Generate a fresh cache key under `folder` for an object of the given
/// content type.
pub fn generate_cache_key(folder: &str, content_type: &str) -> String {
    let folder = folder.trim_matches('/');
    let millis = Utc::now().timestamp_millis();
    let random = Uuid::new_v4().simple();
    format!(
        "{}/{}-{}.{}",
        folder,
        millis,
        random,
        extension_for(content_type)
    )
}
