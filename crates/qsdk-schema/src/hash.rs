//! Checksum algorithms and validated hex digests.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from parsing digests.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChecksumError {
    /// The digest had the wrong length for its algorithm.
    #[error("invalid {algorithm} digest: expected {expected} hex chars, got {actual}")]
    BadLength {
        /// The algorithm the digest was parsed for.
        algorithm: HashAlgorithm,
        /// Expected hex length.
        expected: usize,
        /// Observed length.
        actual: usize,
    },

    /// The digest contained non-hex characters.
    #[error("invalid digest: contains non-hex characters in '{0}'")]
    NotHex(String),

    /// Unknown algorithm name.
    #[error("unknown hash algorithm '{0}' (expected sha256, sha1, or md5)")]
    UnknownAlgorithm(String),
}

/// A checksum algorithm the upstream repository publishes digests for.
///
/// `sha256` is the default; `sha1` and `md5` exist for legacy mirrors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    /// SHA-256 (default).
    #[default]
    Sha256,
    /// SHA-1 (legacy).
    Sha1,
    /// MD5 (legacy).
    Md5,
}

impl HashAlgorithm {
    /// File extension of the digest sidecar (`<archive>.sha256`).
    pub fn ext(self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha1 => "sha1",
            Self::Md5 => "md5",
        }
    }

    /// Length of a hex digest for this algorithm.
    pub fn hex_len(self) -> usize {
        match self {
            Self::Sha256 => 64,
            Self::Sha1 => 40,
            Self::Md5 => 32,
        }
    }
}

impl FromStr for HashAlgorithm {
    type Err = ChecksumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sha256" => Ok(Self::Sha256),
            "sha1" => Ok(Self::Sha1),
            "md5" => Ok(Self::Md5),
            other => Err(ChecksumError::UnknownAlgorithm(other.to_string())),
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.ext())
    }
}

/// A validated lowercase hex digest.
///
/// Construction checks the length against the algorithm, so an invalid hex
/// string never propagates into the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Checksum {
    algorithm: HashAlgorithm,
    hex: String,
}

impl Checksum {
    /// Parse and validate a hex digest for `algorithm`.
    ///
    /// # Errors
    ///
    /// Returns [`ChecksumError`] when the length does not match the algorithm
    /// or a character is not hex.
    pub fn parse(algorithm: HashAlgorithm, s: &str) -> Result<Self, ChecksumError> {
        let s = s.trim();
        if s.len() != algorithm.hex_len() {
            return Err(ChecksumError::BadLength {
                algorithm,
                expected: algorithm.hex_len(),
                actual: s.len(),
            });
        }
        if !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ChecksumError::NotHex(s.to_string()));
        }
        Ok(Self {
            algorithm,
            hex: s.to_ascii_lowercase(),
        })
    }

    /// The algorithm this digest belongs to.
    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// The digest as lowercase hex.
    pub fn as_str(&self) -> &str {
        &self.hex
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hex)
    }
}

/// An authoritative digest for one archive URL, sourced from a trusted mirror.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumRecord {
    /// Absolute URL of the archive the digest covers.
    pub url: String,
    /// The validated digest.
    pub checksum: Checksum,
}
