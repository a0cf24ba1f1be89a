// src/hash.rs

//! SHA-256 digests for spec identities and recipe integrity metadata
//!
//! Every content hash in spackle is a lowercase hex SHA-256 digest. Stored
//! values may carry an algorithm prefix (`sha256:...`); unprefixed values
//! are accepted for brevity in recipe files.

use sha2::{Digest, Sha256};
use std::fmt;

/// Length of a SHA-256 digest rendered as hex
pub const HEX_LEN: usize = 64;

/// Number of characters used when a hash is displayed in short form
pub const SHORT_LEN: usize = 7;

/// Hash parsing errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HashError {
    /// Algorithm prefix other than `sha256`
    UnknownAlgorithm(String),
    /// Hash string has the wrong length
    InvalidLength { expected: usize, got: usize },
    /// Hash string contains non-hex characters
    InvalidHex(String),
}

impl fmt::Display for HashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownAlgorithm(name) => write!(f, "unknown hash algorithm: {}", name),
            Self::InvalidLength { expected, got } => {
                write!(f, "invalid hash length: expected {}, got {}", expected, got)
            }
            Self::InvalidHex(s) => write!(f, "invalid hex in hash: {}", s),
        }
    }
}

impl std::error::Error for HashError {}

/// A validated SHA-256 digest
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash {
    value: String,
}

impl Hash {
    /// Validate a hex digest
    pub fn new(value: impl Into<String>) -> Result<Self, HashError> {
        let value = value.into();
        if value.len() != HEX_LEN {
            return Err(HashError::InvalidLength {
                expected: HEX_LEN,
                got: value.len(),
            });
        }
        if !value.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(HashError::InvalidHex(value));
        }
        Ok(Self {
            value: value.to_lowercase(),
        })
    }

    fn new_unchecked(value: String) -> Self {
        Self { value }
    }

    /// Parse `sha256:abc...` or a bare digest
    pub fn parse_prefixed(s: &str) -> Result<Self, HashError> {
        match s.split_once(':') {
            Some((algo, digest)) => {
                if !matches!(algo.to_lowercase().as_str(), "sha256" | "sha-256") {
                    return Err(HashError::UnknownAlgorithm(algo.to_string()));
                }
                Self::new(digest)
            }
            None => Self::new(s),
        }
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.value
    }

    /// The first few characters, used for display and prefix lookups
    #[inline]
    pub fn short(&self) -> &str {
        &self.value[..SHORT_LEN]
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

/// Incremental SHA-256 hasher
pub struct Hasher {
    state: Sha256,
}

impl Hasher {
    pub fn new() -> Self {
        Self {
            state: Sha256::new(),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.state.update(data);
    }

    pub fn finalize(self) -> Hash {
        Hash::new_unchecked(format!("{:x}", self.state.finalize()))
    }
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Compute the digest of a byte slice
pub fn hash_bytes(data: &[u8]) -> Hash {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}
