//! Difference-hash perceptual fingerprints.
//!
//! The fingerprint is a coarse gradient signature: the image is converted to
//! grayscale, downsampled to 9x8, and each bit records whether a pixel is
//! brighter than its right neighbor. Identical bytes always hash identically;
//! re-encodes and minor resizes land within a small Hamming distance;
//! visually distinct images land far apart with high probability.

use image::imageops::FilterType;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use thiserror::Error;

/// Downsample target: 9 columns produce 8 horizontal gradients per row.
const HASH_WIDTH: u32 = 9;
const HASH_HEIGHT: u32 = 8;

#[derive(Debug, Error)]
pub enum DedupError {
    #[error("Failed to decode image: {0}")]
    Decode(#[from] image::ImageError),

    #[error("Invalid fingerprint encoding: {0}")]
    InvalidEncoding(String),
}

/// A 64-bit visual fingerprint.
///
/// Persisted as 16 lowercase hex digits; compare with
/// [`Fingerprint::distance`] / [`Fingerprint::is_match`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fingerprint(pub u64);

impl Fingerprint {
    /// Compute the difference hash of an encoded image.
    ///
    /// Decode failures (corrupt or unsupported bytes) surface as
    /// [`DedupError`]; callers treat that as "no fingerprint available" and
    /// proceed without deduplication.
    pub fn of_image(bytes: &[u8]) -> Result<Fingerprint, DedupError> {
        let img = image::load_from_memory(bytes)?;
        let gray = img.to_luma8();
        let small = image::imageops::resize(&gray, HASH_WIDTH, HASH_HEIGHT, FilterType::Triangle);

        let mut bits: u64 = 0;
        for y in 0..HASH_HEIGHT {
            for x in 0..(HASH_WIDTH - 1) {
                bits <<= 1;
                if small.get_pixel(x, y).0[0] < small.get_pixel(x + 1, y).0[0] {
                    bits |= 1;
                }
            }
        }
        Ok(Fingerprint(bits))
    }

    /// Hamming distance: number of differing bits between two fingerprints.
    pub fn distance(&self, other: &Fingerprint) -> u32 {
        (self.0 ^ other.0).count_ones()
    }

    /// Duplicate iff the Hamming distance is within `threshold`.
    pub fn is_match(&self, other: &Fingerprint, threshold: u32) -> bool {
        self.distance(other) <= threshold
    }
}

impl Display for Fingerprint {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{:016x}", self.0)
    }
}

impl FromStr for Fingerprint {
    type Err = DedupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 16 {
            return Err(DedupError::InvalidEncoding(format!(
                "expected 16 hex digits, got {}",
                s.len()
            )));
        }
        u64::from_str_radix(s, 16)
            .map(Fingerprint)
            .map_err(|e| DedupError::InvalidEncoding(e.to_string()))
    }
}

impl From<Fingerprint> for String {
    fn from(fp: Fingerprint) -> Self {
        fp.to_string()
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = DedupError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}
