//! Checksum utilities for uploaded archives

use sha2::{Digest, Sha256};

/// Incremental SHA-256 over a byte stream that arrives in chunks.
///
/// Used where the bytes are written somewhere else as they arrive (for example
/// a multipart upload streamed to disk), so the data is hashed exactly once.
#[derive(Debug, Default, Clone)]
pub struct StreamingChecksum {
    hasher: Sha256,
    size: u64,
}

impl StreamingChecksum {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
        self.size += chunk.len() as u64;
    }

    /// Bytes hashed so far
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Consume the hasher, returning the hex digest and total byte count
    pub fn finish(self) -> (String, u64) {
        (hex::encode(self.hasher.finalize()), self.size)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const HELLO_WORLD_SHA256: &str =
        "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    #[test]
    fn test_chunked_digest_matches_whole_input() {
        let mut streaming = StreamingChecksum::new();
        streaming.update(b"hello ");
        streaming.update(b"world");
        let (digest, size) = streaming.finish();
        assert_eq!(digest, HELLO_WORLD_SHA256);
        assert_eq!(size, 11);
    }

    #[test]
    fn test_empty_input_digest() {
        let (digest, size) = StreamingChecksum::new().finish();
        assert_eq!(
            digest,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(size, 0);
    }
}
