//! Mediastash Dedup Library
//!
//! Perceptual hashing for near-duplicate image detection. Computes a 64-bit
//! difference hash from a downsampled luminance signature and compares
//! fingerprints by Hamming distance.

pub mod phash;

pub use phash::{DedupError, Fingerprint};
