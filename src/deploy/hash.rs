//! Content hashing shared with `leafpress deploy`.
//!
//! The deploy command records one digest per source file. Pending-change
//! detection only works while both sides hash with the same algorithm over
//! the raw file bytes.

use std::fs;
use std::io;
use std::path::Path;

use serde::Serialize;
use sha1::{Digest as _, Sha1};

use crate::error::{AppError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    Sha1,
}

/// Algorithm `leafpress deploy` uses for `sourceFiles` digests.
pub const SOURCE_HASH_ALGORITHM: HashAlgorithm = HashAlgorithm::Sha1;

impl HashAlgorithm {
    /// Length of a lowercase hex digest.
    pub fn hex_len(self) -> usize {
        match self {
            Self::Sha1 => 40,
        }
    }

    /// Whether `digest` could have been produced by this algorithm.
    pub fn is_digest(self, digest: &str) -> bool {
        digest.len() == self.hex_len() && digest.bytes().all(|b| b.is_ascii_hexdigit())
    }

    pub fn digest_bytes(self, data: &[u8]) -> String {
        match self {
            Self::Sha1 => hex::encode(Sha1::digest(data)),
        }
    }

    pub fn digest_file(self, path: &Path) -> Result<String> {
        let mut file = fs::File::open(path)
            .map_err(|e| AppError::io(format!("Failed to open {}: {}", path.display(), e)))?;
        match self {
            Self::Sha1 => {
                let mut hasher = Sha1::new();
                io::copy(&mut file, &mut hasher).map_err(|e| {
                    AppError::io(format!("Failed to read {}: {}", path.display(), e))
                })?;
                Ok(hex::encode(hasher.finalize()))
            }
        }
    }
}

pub fn hash_bytes(data: &[u8]) -> String {
    SOURCE_HASH_ALGORITHM.digest_bytes(data)
}

pub fn hash_file(path: &Path) -> Result<String> {
    SOURCE_HASH_ALGORITHM.digest_file(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Pinned: changing this breaks compatibility with existing deploy records.
    #[test]
    fn source_hash_is_sha1_of_raw_bytes() {
        assert_eq!(SOURCE_HASH_ALGORITHM, HashAlgorithm::Sha1);
        assert_eq!(hash_bytes(b"hello"), "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d");
    }

    #[test]
    fn file_and_bytes_agree() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("note.md");
        fs::write(&path, "# Title\r\nbody\n").unwrap();

        assert_eq!(hash_file(&path).unwrap(), hash_bytes(b"# Title\r\nbody\n"));
    }

    #[test]
    fn recognizes_digest_shape() {
        let alg = SOURCE_HASH_ALGORITHM;
        assert!(alg.is_digest(&hash_bytes(b"x")));
        assert!(!alg.is_digest(&"a".repeat(64)));
        assert!(!alg.is_digest(&"z".repeat(40)));
    }
}
