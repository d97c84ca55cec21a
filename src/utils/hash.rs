// src/utils/hash.rs
// Centralized SHA-256 hashing utility

use sha2::{Digest, Sha256};

/// Compute SHA-256 hash of a string and return hex-encoded result
///
/// Used for content deduplication, cache keys, and change detection throughout the codebase.
pub fn sha256_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_hash() {
        let hash = sha256_hash("hello world");
        assert_eq!(hash.len(), 64); // SHA-256 hex is 64 characters

        // Same content produces same hash
        let hash2 = sha256_hash("hello world");
        assert_eq!(hash, hash2);

        // Different content produces different hash
        let hash3 = sha256_hash("hello world!");
        assert_ne!(hash, hash3);
    }

}
