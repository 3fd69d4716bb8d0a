//! SHA-256 content digests used for overwrite change detection.

use sha2::{Digest, Sha256};

/// Incremental SHA-256 over a plaintext stream.
#[derive(Default)]
pub struct ContentDigest {
    hasher: Sha256,
}

impl ContentDigest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
    }

    /// Lowercase hex encoding of the digest.
    pub fn finalize(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}

/// One-shot digest of an in-memory buffer.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut digest = ContentDigest::new();
    digest.update(data);
    digest.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn chunked_matches_one_shot() {
        let mut digest = ContentDigest::new();
        digest.update(b"hello ");
        digest.update(b"world");
        assert_eq!(digest.finalize(), sha256_hex(b"hello world"));
    }
}
