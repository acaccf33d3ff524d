//! Content hashing used for deduplication

use crate::error::Result;
use sha2::{Digest, Sha256};
use std::io::Read;

/// Compute the hex-encoded SHA-256 hash of a byte payload
///
/// This is the dedup key for stored content: two payloads with equal hashes
/// are treated as the same logical content within a binding.
pub fn content_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Compute the hex-encoded SHA-256 hash of any readable source
pub fn compute_checksum<R: Read>(reader: &mut R) -> Result<String> {
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_content_hash() {
        let hash = content_hash(b"hello world");
        assert_eq!(hash, "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9");
    }

    #[test]
    fn test_compute_checksum_matches_content_hash() {
        let data = b"the same bytes either way";
        let mut cursor = Cursor::new(data);
        let streamed = compute_checksum(&mut cursor).unwrap();
        assert_eq!(streamed, content_hash(data));
    }

    #[test]
    fn test_empty_payload() {
        assert_eq!(
            content_hash(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
