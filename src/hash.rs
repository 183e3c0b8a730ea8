// src/hash.rs

//! Checksums for verifying fetched sources
//!
//! Recipes declare checksums as `algorithm:hex`:
//! - **sha256**: the default, and the only algorithm most recipes need
//! - **sha512**: accepted for upstreams that only publish SHA-512 sums
//!
//! A bare hex string without a prefix is read as SHA-256.

use sha2::{Digest, Sha256, Sha512};
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;

/// Hash algorithm selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HashAlgorithm {
    #[default]
    Sha256,
    Sha512,
}

impl HashAlgorithm {
    /// Get the hash output length in bytes
    #[inline]
    pub const fn output_len(&self) -> usize {
        match self {
            Self::Sha256 => 32,
            Self::Sha512 => 64,
        }
    }

    /// Get the hash output length as a hex string
    #[inline]
    pub const fn hex_len(&self) -> usize {
        self.output_len() * 2
    }

    /// Get the algorithm name as a string
    #[inline]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
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

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sha256" | "sha-256" => Ok(Self::Sha256),
            "sha512" | "sha-512" => Ok(Self::Sha512),
            _ => Err(HashError::UnknownAlgorithm(s.to_string())),
        }
    }
}

/// Checksum parsing errors
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
            Self::UnknownAlgorithm(name) => {
                write!(f, "unknown hash algorithm: {} (supported: sha256, sha512)", name)
            }
            Self::InvalidLength { expected, got } => {
                write!(f, "invalid hash length: expected {}, got {}", expected, got)
            }
            Self::InvalidHex(s) => write!(f, "invalid hex in hash: {}", s),
        }
    }
}

impl std::error::Error for HashError {}

/// A declared checksum: algorithm plus lowercase hex digest
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Checksum {
    pub algorithm: HashAlgorithm,
    pub digest: String,
}

impl Checksum {
    /// Create a checksum, validating length and hex characters
    pub fn new(algorithm: HashAlgorithm, digest: impl Into<String>) -> Result<Self, HashError> {
        let digest = digest.into();
        let expected_len = algorithm.hex_len();

        if digest.len() != expected_len {
            return Err(HashError::InvalidLength {
                expected: expected_len,
                got: digest.len(),
            });
        }
        if !digest.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(HashError::InvalidHex(digest));
        }

        Ok(Self {
            algorithm,
            digest: digest.to_lowercase(),
        })
    }

    /// Parse `sha256:abc...`, `sha512:abc...` or a bare SHA-256 hex string
    pub fn parse_prefixed(s: &str) -> Result<Self, HashError> {
        match s.trim().split_once(':') {
            Some((algo, digest)) => Self::new(algo.parse()?, digest),
            None => Self::new(HashAlgorithm::Sha256, s.trim()),
        }
    }

    /// Format as `algorithm:digest`
    pub fn to_prefixed_string(&self) -> String {
        format!("{}:{}", self.algorithm.name(), self.digest)
    }

    /// Filesystem-safe key for the download cache
    pub fn cache_key(&self) -> String {
        format!("{}-{}", self.algorithm.name(), self.digest)
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_prefixed_string())
    }
}

impl FromStr for Checksum {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_prefixed(s)
    }
}

/// Incremental hasher over either supported algorithm
pub struct Hasher {
    state: HasherState,
}

enum HasherState {
    Sha256(Sha256),
    Sha512(Sha512),
}

impl Hasher {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        let state = match algorithm {
            HashAlgorithm::Sha256 => HasherState::Sha256(Sha256::new()),
            HashAlgorithm::Sha512 => HasherState::Sha512(Sha512::new()),
        };
        Self { state }
    }

    pub fn update(&mut self, data: &[u8]) {
        match &mut self.state {
            HasherState::Sha256(hasher) => hasher.update(data),
            HasherState::Sha512(hasher) => hasher.update(data),
        }
    }

    /// Finalize into a lowercase hex digest
    pub fn finalize(self) -> String {
        match self.state {
            HasherState::Sha256(hasher) => hex::encode(hasher.finalize()),
            HasherState::Sha512(hasher) => hex::encode(hasher.finalize()),
        }
    }
}

/// Compute the hex digest of a byte slice
pub fn hash_bytes(algorithm: HashAlgorithm, data: &[u8]) -> String {
    let mut hasher = Hasher::new(algorithm);
    hasher.update(data);
    hasher.finalize()
}

/// Compute the hex digest of data from a reader
pub fn hash_reader<R: Read>(algorithm: HashAlgorithm, reader: &mut R) -> io::Result<String> {
    let mut hasher = Hasher::new(algorithm);
    let mut buffer = [0u8; 8192];

    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hasher.finalize())
}

/// Compute the hex digest of a file, streaming its content
pub fn hash_file(algorithm: HashAlgorithm, path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    hash_reader(algorithm, &mut file)
}

/// Check a file against a checksum
///
/// Returns `Ok(None)` on a match and `Ok(Some(actual))` on a mismatch.
pub fn verify_file(path: &Path, expected: &Checksum) -> io::Result<Option<String>> {
    let actual = hash_file(expected.algorithm, path)?;
    if actual == expected.digest {
        Ok(None)
    } else {
        Ok(Some(actual))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const HELLO_SHA256: &str = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    #[test]
    fn test_sha256_hash() {
        assert_eq!(hash_bytes(HashAlgorithm::Sha256, b"hello world"), HELLO_SHA256);
    }

    #[test]
    fn test_sha512_length() {
        let digest = hash_bytes(HashAlgorithm::Sha512, b"hello world");
        assert_eq!(digest.len(), HashAlgorithm::Sha512.hex_len());
    }

    #[test]
    fn test_hasher_incremental() {
        let mut hasher = Hasher::new(HashAlgorithm::Sha256);
        hasher.update(b"hello ");
        hasher.update(b"world");
        assert_eq!(hasher.finalize(), HELLO_SHA256);
    }

    #[test]
    fn test_algorithm_parse() {
        assert_eq!("sha256".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Sha256);
        assert_eq!("SHA-512".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Sha512);
        assert!("md5".parse::<HashAlgorithm>().is_err());
    }

    #[test]
    fn test_checksum_prefixed_and_bare() {
        let prefixed = Checksum::parse_prefixed(&format!("sha256:{}", HELLO_SHA256)).unwrap();
        let bare = Checksum::parse_prefixed(HELLO_SHA256).unwrap();
        assert_eq!(prefixed, bare);
        assert_eq!(prefixed.to_prefixed_string(), format!("sha256:{}", HELLO_SHA256));
        assert_eq!(prefixed.cache_key(), format!("sha256-{}", HELLO_SHA256));
    }

    #[test]
    fn test_checksum_validation() {
        assert!(matches!(
            Checksum::parse_prefixed("sha256:abc"),
            Err(HashError::InvalidLength { expected: 64, got: 3 })
        ));
        let not_hex = "z".repeat(64);
        assert!(matches!(
            Checksum::parse_prefixed(&not_hex),
            Err(HashError::InvalidHex(_))
        ));
        assert!(matches!(
            Checksum::parse_prefixed("md5:abc"),
            Err(HashError::UnknownAlgorithm(_))
        ));
    }

    #[test]
    fn test_checksum_uppercase_normalized() {
        let upper = HELLO_SHA256.to_uppercase();
        let checksum = Checksum::parse_prefixed(&upper).unwrap();
        assert_eq!(checksum.digest, HELLO_SHA256);
    }

    #[test]
    fn test_verify_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"hello world").unwrap();

        let good = Checksum::parse_prefixed(HELLO_SHA256).unwrap();
        assert_eq!(verify_file(file.path(), &good).unwrap(), None);

        let bad = Checksum::new(HashAlgorithm::Sha256, "0".repeat(64)).unwrap();
        assert_eq!(
            verify_file(file.path(), &bad).unwrap().as_deref(),
            Some(HELLO_SHA256)
        );
    }
}
