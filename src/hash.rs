// src/hash.rs

//! Content fingerprints for ingested files
//!
//! Every file entering the pipeline is identified by a 256-bit cryptographic
//! digest of its bytes. Two algorithms are available:
//! - **SHA-256** (default): matches the fingerprints stored by earlier runs
//! - **BLAKE3**: faster on large inputs, same output width
//!
//! Files are always hashed through the same streaming path, one bounded
//! window at a time. The window size is a tuning knob only: hashing a file in
//! one block or in single-byte chunks yields the same fingerprint, which is
//! what makes a re-hash after a crash land on the same record.

use crate::error::{Error, Result};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;

/// Default read window for file hashing (64 KiB)
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Hash algorithm selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HashAlgorithm {
    /// SHA-256 (256-bit cryptographic hash)
    #[default]
    Sha256,

    /// BLAKE3 (256-bit cryptographic hash, tree-structured and faster)
    Blake3,
}

impl HashAlgorithm {
    /// Get the hash output length in bytes
    #[inline]
    pub const fn output_len(&self) -> usize {
        match self {
            Self::Sha256 => 32,
            Self::Blake3 => 32,
        }
    }

    /// Get the hash output length as a hex string
    #[inline]
    pub const fn hex_len(&self) -> usize {
        self.output_len() * 2
    }

    /// Get the algorithm name as stored in `file_records.hash_algorithm`
    #[inline]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Blake3 => "blake3",
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for HashAlgorithm {
    type Err = HashError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sha256" | "sha-256" => Ok(Self::Sha256),
            "blake3" | "b3" => Ok(Self::Blake3),
            _ => Err(HashError::UnknownAlgorithm(s.to_string())),
        }
    }
}

/// Hash parsing errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HashError {
    /// Unknown hash algorithm name
    UnknownAlgorithm(String),
    /// Hash string has wrong length for algorithm
    InvalidLength { expected: usize, got: usize },
    /// Hash string contains invalid hex characters
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

/// A content fingerprint with its algorithm
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Hash {
    /// The algorithm used
    pub algorithm: HashAlgorithm,
    /// The hash value as a lowercase hex string
    pub value: String,
}

impl Hash {
    /// Create a hash value, validating length and hex digits
    pub fn new(
        algorithm: HashAlgorithm,
        value: impl Into<String>,
    ) -> std::result::Result<Self, HashError> {
        let value = value.into();
        let expected_len = algorithm.hex_len();

        if value.len() != expected_len {
            return Err(HashError::InvalidLength {
                expected: expected_len,
                got: value.len(),
            });
        }

        if !value.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(HashError::InvalidHex(value));
        }

        Ok(Self {
            algorithm,
            value: value.to_lowercase(),
        })
    }

    fn new_unchecked(algorithm: HashAlgorithm, value: String) -> Self {
        Self { algorithm, value }
    }

    /// Get the hash value as a hex string
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.value
    }

    /// Short form for log lines
    pub fn short(&self) -> &str {
        &self.value[..self.value.len().min(12)]
    }

    /// Parse a prefixed hash string (e.g., "sha256:abc123...")
    pub fn parse_prefixed(s: &str) -> std::result::Result<Self, HashError> {
        if let Some((algo, hash)) = s.split_once(':') {
            let algorithm = algo.parse()?;
            Self::new(algorithm, hash)
        } else {
            Self::new(HashAlgorithm::Sha256, s)
        }
    }

    /// Format as a prefixed string (e.g., "sha256:abc123...")
    pub fn to_prefixed_string(&self) -> String {
        format!("{}:{}", self.algorithm.name(), self.value)
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

/// Incremental hasher over either algorithm
pub struct Hasher {
    algorithm: HashAlgorithm,
    state: HasherState,
}

enum HasherState {
    Sha256(Sha256),
    Blake3(Box<blake3::Hasher>),
}

impl Hasher {
    /// Create a new hasher with the specified algorithm
    pub fn new(algorithm: HashAlgorithm) -> Self {
        let state = match algorithm {
            HashAlgorithm::Sha256 => HasherState::Sha256(Sha256::new()),
            HashAlgorithm::Blake3 => HasherState::Blake3(Box::new(blake3::Hasher::new())),
        };
        Self { algorithm, state }
    }

    /// Fold more data into the running digest
    pub fn update(&mut self, data: &[u8]) {
        match &mut self.state {
            HasherState::Sha256(hasher) => hasher.update(data),
            HasherState::Blake3(hasher) => {
                hasher.update(data);
            }
        }
    }

    /// Finalize and return the hash
    pub fn finalize(self) -> Hash {
        let value = match self.state {
            HasherState::Sha256(hasher) => format!("{:x}", hasher.finalize()),
            HasherState::Blake3(hasher) => hasher.finalize().to_hex().to_string(),
        };
        Hash::new_unchecked(self.algorithm, value)
    }

    #[inline]
    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }
}

/// Compute hash of a byte slice in one block
pub fn hash_bytes(algorithm: HashAlgorithm, data: &[u8]) -> Hash {
    let mut hasher = Hasher::new(algorithm);
    hasher.update(data);
    hasher.finalize()
}

/// Compute hash of data from a reader, `chunk_size` bytes at a time
pub fn hash_reader<R: Read>(
    algorithm: HashAlgorithm,
    reader: &mut R,
    chunk_size: usize,
) -> io::Result<Hash> {
    let mut hasher = Hasher::new(algorithm);
    let mut buffer = vec![0u8; chunk_size.max(1)];

    loop {
        let n = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buffer[..n]);
    }

    Ok(hasher.finalize())
}

/// Fingerprint a file on disk
///
/// The file is opened read-only and never modified. Any open or read failure
/// is reported as [`Error::Read`].
pub fn hash_file(path: &Path, algorithm: HashAlgorithm, chunk_size: usize) -> Result<Hash> {
    let read_err = |source| Error::Read {
        path: path.to_path_buf(),
        source,
    };

    let mut file = File::open(path).map_err(read_err)?;
    hash_reader(algorithm, &mut file, chunk_size).map_err(read_err)
}

/// Compute SHA-256 hash (convenience function)
#[inline]
pub fn sha256(data: &[u8]) -> String {
    hash_bytes(HashAlgorithm::Sha256, data).value
}
