//! SHA-256 helpers for branding bucket queries.
//!
//! The branding server shards its records by the leading hex characters of
//! the SHA-256 digest of the video id, so a client can fetch a whole bucket
//! without revealing exactly which video it is looking at.

use sha2::{Digest, Sha256};

/// Number of hex characters of the digest used as the bucket key.
pub const HASH_PREFIX_LEN: usize = 4;

/// Compute a SHA-256 hex digest of the given bytes.
pub fn sha256_hex(data: &[u8]) -> String {
    let hash = Sha256::digest(data);
    format!("{hash:x}")
}

/// Bucket key for a video id: the first [`HASH_PREFIX_LEN`] hex chars of
/// its SHA-256 digest.
pub fn hash_prefix(video_id: &str) -> String {
    let mut digest = sha256_hex(video_id.as_bytes());
    digest.truncate(HASH_PREFIX_LEN);
    digest
}
