//! Incremental file digests for upload verification.

use sha1::Sha1;
use sha2::{Digest, Sha256};

/// Digest algorithm announced to the repository when opening an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    Sha1,
    Sha256,
}

impl ChecksumAlgorithm {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "sha1" | "sha-1" | "sha1-160" => Some(Self::Sha1),
            "sha256" | "sha-256" => Some(Self::Sha256),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
        }
    }

    pub fn hasher(&self) -> Checksummer {
        match self {
            Self::Sha1 => Checksummer::Sha1(Sha1::new()),
            Self::Sha256 => Checksummer::Sha256(Sha256::new()),
        }
    }
}

/// Running digest of one file.
#[derive(Clone)]
pub enum Checksummer {
    Sha1(Sha1),
    Sha256(Sha256),
}

impl Checksummer {
    pub fn update(&mut self, bytes: &[u8]) {
        match self {
            Self::Sha1(h) => h.update(bytes),
            Self::Sha256(h) => h.update(bytes),
        }
    }

    /// Lowercase hex digest.
    pub fn finish(self) -> String {
        match self {
            Self::Sha1(h) => hex::encode(h.finalize()),
            Self::Sha256(h) => hex::encode(h.finalize()),
        }
    }
}
