// src/hash.rs

//! Algorithm-tagged checksums for content addressing
//!
//! A [`Checksum`] is the only identity a piece of source content has. It is
//! written as `<algorithm>:<hex digest>`, e.g. `sha256:dffd60...`.
//!
//! | Algorithm | Digest bytes | Notes |
//! |-----------|--------------|-------|
//! | md5       | 16           | Legacy sources only |
//! | sha1      | 20           | Legacy sources only |
//! | sha256    | 32           | Default for new sources |
//! | sha384    | 48           | |
//! | sha512    | 64           | |

use md5::Md5;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384, Sha512};
use std::fmt;
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;

/// Hash algorithm selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum HashAlgorithm {
    Md5,
    Sha1,
    #[default]
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgorithm {
    /// Get the hash output length in bytes
    #[inline]
    pub const fn output_len(&self) -> usize {
        match self {
            Self::Md5 => 16,
            Self::Sha1 => 20,
            Self::Sha256 => 32,
            Self::Sha384 => 48,
            Self::Sha512 => 64,
        }
    }

    /// Get the hash output length as a hex string
    #[inline]
    pub const fn hex_len(&self) -> usize {
        self.output_len() * 2
    }

    /// Get the algorithm name as used in checksum prefixes
    #[inline]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Md5 => "md5",
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
            Self::Sha384 => "sha384",
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
        match s {
            "md5" => Ok(Self::Md5),
            "sha1" => Ok(Self::Sha1),
            "sha256" => Ok(Self::Sha256),
            "sha384" => Ok(Self::Sha384),
            "sha512" => Ok(Self::Sha512),
            _ => Err(HashError::UnknownAlgorithm(s.to_string())),
        }
    }
}

/// Checksum parsing errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HashError {
    /// Missing `<algorithm>:` prefix
    MissingAlgorithm,
    /// Unknown hash algorithm name
    UnknownAlgorithm(String),
    /// Digest has wrong length for algorithm
    InvalidLength { expected: usize, got: usize },
    /// Digest contains invalid hex characters
    InvalidHex(String),
}

impl fmt::Display for HashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingAlgorithm => write!(f, "missing '<algorithm>:' prefix"),
            Self::UnknownAlgorithm(name) => write!(f, "unknown hash algorithm: {}", name),
            Self::InvalidLength { expected, got } => {
                write!(f, "invalid digest length: expected {}, got {}", expected, got)
            }
            Self::InvalidHex(s) => write!(f, "invalid hex in digest: {}", s),
        }
    }
}

impl std::error::Error for HashError {}

/// A content checksum: algorithm plus lowercase hex digest
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Checksum {
    algorithm: HashAlgorithm,
    digest: String,
}

impl Checksum {
    /// Create a checksum from an algorithm and hex digest
    pub fn new(algorithm: HashAlgorithm, digest: impl Into<String>) -> Result<Self, HashError> {
        let digest = digest.into();
        let expected = algorithm.hex_len();

        if digest.len() != expected {
            return Err(HashError::InvalidLength {
                expected,
                got: digest.len(),
            });
        }

        if !digest.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(HashError::InvalidHex(digest));
        }

        Ok(Self {
            algorithm,
            digest: digest.to_ascii_lowercase(),
        })
    }

    /// Parse `<algorithm>:<hex>`
    pub fn parse(s: &str) -> crate::Result<Self> {
        let parsed = match s.split_once(':') {
            Some((algo, digest)) => algo
                .parse::<HashAlgorithm>()
                .and_then(|algorithm| Self::new(algorithm, digest)),
            None => Err(HashError::MissingAlgorithm),
        };
        parsed.map_err(|e| crate::Error::InvalidChecksum {
            checksum: s.to_string(),
            reason: e.to_string(),
        })
    }

    #[inline]
    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    #[inline]
    pub fn digest(&self) -> &str {
        &self.digest
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.digest)
    }
}

impl FromStr for Checksum {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for Checksum {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Checksum {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Incremental hasher over any supported algorithm
pub struct Hasher {
    state: HasherState,
}

enum HasherState {
    Md5(Md5),
    Sha1(Sha1),
    Sha256(Sha256),
    Sha384(Sha384),
    Sha512(Sha512),
}

impl Hasher {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        let state = match algorithm {
            HashAlgorithm::Md5 => HasherState::Md5(Md5::new()),
            HashAlgorithm::Sha1 => HasherState::Sha1(Sha1::new()),
            HashAlgorithm::Sha256 => HasherState::Sha256(Sha256::new()),
            HashAlgorithm::Sha384 => HasherState::Sha384(Sha384::new()),
            HashAlgorithm::Sha512 => HasherState::Sha512(Sha512::new()),
        };
        Self { state }
    }

    pub fn update(&mut self, data: &[u8]) {
        match &mut self.state {
            HasherState::Md5(h) => h.update(data),
            HasherState::Sha1(h) => h.update(data),
            HasherState::Sha256(h) => h.update(data),
            HasherState::Sha384(h) => h.update(data),
            HasherState::Sha512(h) => h.update(data),
        }
    }

    /// Finalize and return the lowercase hex digest
    pub fn finalize_hex(self) -> String {
        match self.state {
            HasherState::Md5(h) => hex::encode(h.finalize()),
            HasherState::Sha1(h) => hex::encode(h.finalize()),
            HasherState::Sha256(h) => hex::encode(h.finalize()),
            HasherState::Sha384(h) => hex::encode(h.finalize()),
            HasherState::Sha512(h) => hex::encode(h.finalize()),
        }
    }
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

    Ok(hasher.finalize_hex())
}

/// Compute the checksum of a file with the given algorithm
pub fn checksum_file(path: &Path, algorithm: HashAlgorithm) -> crate::Result<Checksum> {
    let mut file = std::fs::File::open(path).map_err(|e| crate::Error::io_at(path, e))?;
    let digest = hash_reader(algorithm, &mut file).map_err(|e| crate::Error::io_at(path, e))?;
    Ok(Checksum { algorithm, digest })
}
