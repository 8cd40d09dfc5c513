//! Checksum utilities for Strata
//!
//! Objects carry a checksum chosen by the bucket's checksum policy; slices
//! carry their own. xxHash64 is the default policy, MD5 exists for S3 ETag
//! compatibility.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use xxhash_rust::xxh64::Xxh64;

/// Checksum algorithm selected by a bucket's checksum policy
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumType {
    /// No checksumming
    None,
    /// xxHash64 (fast, default)
    #[default]
    Xxhash,
    /// MD5 (S3 ETag compatibility)
    Md5,
    /// SHA256 (content addressing)
    Sha256,
}

impl ChecksumType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Xxhash => "xxhash",
            Self::Md5 => "md5",
            Self::Sha256 => "sha256",
        }
    }
}

impl fmt::Display for ChecksumType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A computed checksum: algorithm + lowercase hex value
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Checksum {
    pub ty: ChecksumType,
    pub value: String,
}

impl Checksum {
    #[must_use]
    pub fn new(ty: ChecksumType, value: impl Into<String>) -> Self {
        Self {
            ty,
            value: value.into(),
        }
    }

    /// Compute a checksum of `data` in one shot
    #[must_use]
    pub fn compute(ty: ChecksumType, data: &[u8]) -> Self {
        let mut calc = ChecksumCalculator::new(ty);
        calc.update(data);
        calc.finalize()
    }

    /// Verify `data` against this checksum
    #[must_use]
    pub fn verify(&self, data: &[u8]) -> bool {
        if self.ty == ChecksumType::None {
            return true;
        }
        Self::compute(self.ty, data) == *self
    }
}

impl fmt::Debug for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Checksum({}:{})", self.ty, self.value)
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ty, self.value)
    }
}

enum CalcState {
    None,
    Xxhash(Xxh64),
    Md5(md5::Context),
    Sha256(Sha256),
}

/// Streaming checksum calculator
pub struct ChecksumCalculator {
    ty: ChecksumType,
    state: CalcState,
}

impl ChecksumCalculator {
    #[must_use]
    pub fn new(ty: ChecksumType) -> Self {
        let state = match ty {
            ChecksumType::None => CalcState::None,
            ChecksumType::Xxhash => CalcState::Xxhash(Xxh64::new(0)),
            ChecksumType::Md5 => CalcState::Md5(md5::Context::new()),
            ChecksumType::Sha256 => CalcState::Sha256(Sha256::new()),
        };
        Self { ty, state }
    }

    /// Update the calculator with more data
    pub fn update(&mut self, data: &[u8]) {
        match &mut self.state {
            CalcState::None => {}
            CalcState::Xxhash(h) => h.update(data),
            CalcState::Md5(h) => h.consume(data),
            CalcState::Sha256(h) => h.update(data),
        }
    }

    /// Finalize and return the computed checksum
    #[must_use]
    pub fn finalize(self) -> Checksum {
        let value = match self.state {
            CalcState::None => String::new(),
            CalcState::Xxhash(h) => format!("{:016x}", h.digest()),
            CalcState::Md5(h) => format!("{:x}", h.compute()),
            CalcState::Sha256(h) => hex::encode(h.finalize()),
        };
        Checksum { ty: self.ty, value }
    }
}

/// MD5 hex digest for the S3 `ETag` header
#[must_use]
pub fn etag_md5(data: &[u8]) -> String {
    format!("{:x}", md5::compute(data))
}

/// Quick CRC32C used for slice transport spot checks
#[inline]
#[must_use]
pub fn compute_crc32c(data: &[u8]) -> u32 {
    crc32c::crc32c(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compute_verify() {
        let data = b"hello, world!";
        let ck = Checksum::compute(ChecksumType::Xxhash, data);
        assert!(ck.verify(data));
        assert!(!ck.verify(b"hello, world?"));
    }

    #[test]
    fn streaming_matches_oneshot() {
        let expected = Checksum::compute(ChecksumType::Sha256, b"hello, world!");
        let mut calc = ChecksumCalculator::new(ChecksumType::Sha256);
        calc.update(b"hello, ");
        calc.update(b"world!");
        assert_eq!(calc.finalize(), expected);
    }

    #[test]
    fn none_always_verifies() {
        let ck = Checksum::compute(ChecksumType::None, b"abc");
        assert!(ck.verify(b"anything"));
        assert!(ck.value.is_empty());
    }

    #[test]
    fn known_md5() {
        // MD5("hello") per the S3 ETag contract
        assert_eq!(etag_md5(b"hello"), "5d41402abc4b2a76b9719d911017c592");
    }
}
