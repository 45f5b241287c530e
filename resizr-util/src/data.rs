//! Content-hash primitives (§3 `DedupRecord.hash`, §4.1 `HashIndex`).

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A content hash as stored on `ImageRecord`/`DedupRecord`. Only SHA-256 is
/// produced today; `algorithm` is kept explicit so the on-disk shape can
/// grow a second algorithm without a migration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageHash {
    pub algorithm: HashAlgorithm,
    /// 64 lowercase hex characters.
    pub hex: String,
    /// Byte length of the hashed content.
    pub size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HashAlgorithm {
    #[serde(rename = "SHA256")]
    Sha256,
}

impl ImageHash {
    /// Computes the content hash of `bytes`. This is the sole hashing
    /// entry point used by the upload path (§4.3 step 2).
    pub fn of(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        let digest = hasher.finalize();
        ImageHash {
            algorithm: HashAlgorithm::Sha256,
            hex: hex::encode(digest),
            size: bytes.len() as u64,
        }
    }

    /// The metadata-store key for the dedup record of this hash
    /// (§6 persisted state: `hash:SHA256:<hex>`).
    pub fn store_key(&self) -> String {
        format!("hash:SHA256:{}", self.hex)
    }
}

impl std::fmt::Display for ImageHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sha256:{}", self.hex)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic_and_lowercase_hex() {
        let a = ImageHash::of(b"hello world");
        let b = ImageHash::of(b"hello world");
        assert_eq!(a, b);
        assert_eq!(a.hex.len(), 64);
        assert!(a.hex.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(a.size, 11);
    }

    #[test]
    fn different_content_hashes_differ() {
        let a = ImageHash::of(b"hello world");
        let b = ImageHash::of(b"hello worlD");
        assert_ne!(a.hex, b.hex);
    }
}
