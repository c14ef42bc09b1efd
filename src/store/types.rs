//! Store types

use std::fmt;
use std::io;
use std::str::FromStr;

use axum::body::Bytes;
use futures::stream::BoxStream;

/// Request body handed to [`TusStore::append_data`](super::TusStore::append_data)
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

/// Concatenation tag of an upload
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Concatenation {
    /// Ordinary upload
    #[default]
    None,
    /// Upload eligible for later concatenation
    Partial,
    /// Upload assembled from the listed partial uploads, in order
    Final(Vec<String>),
}

impl Concatenation {
    pub fn is_partial(&self) -> bool {
        matches!(self, Self::Partial)
    }

    pub fn is_final(&self) -> bool {
        matches!(self, Self::Final(_))
    }
}

/// Checksum algorithms understood by the checksum extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChecksumAlgorithm {
    Sha1,
    Sha256,
}

impl ChecksumAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
        }
    }

    /// Digest `data` with this algorithm
    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        use sha1::Digest as _;
        match self {
            Self::Sha1 => sha1::Sha1::digest(data).to_vec(),
            Self::Sha256 => sha2::Sha256::digest(data).to_vec(),
        }
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChecksumAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sha1" => Ok(Self::Sha1),
            "sha256" => Ok(Self::Sha256),
            other => Err(format!("Unsupported checksum algorithm: {other}")),
        }
    }
}
