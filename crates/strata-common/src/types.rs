//! Core type definitions for Strata
//!
//! This module defines the fundamental identifiers and bucket property
//! structures shared by proxies and targets.

use crate::checksum::ChecksumType;
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a bucket
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display)]
#[display("{_0}")]
pub struct BucketName(String);

impl BucketName {
    /// Create a new bucket name (validates S3 naming rules)
    pub fn new(name: impl Into<String>) -> Result<Self, BucketNameError> {
        let name = name.into();
        Self::validate(&name)?;
        Ok(Self(name))
    }

    /// Create without validation (internal use only)
    #[must_use]
    pub fn new_unchecked(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Get the bucket name as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Validate bucket name according to S3 rules
    fn validate(name: &str) -> Result<(), BucketNameError> {
        if name.len() < 3 {
            return Err(BucketNameError::TooShort);
        }
        if name.len() > 63 {
            return Err(BucketNameError::TooLong);
        }

        let first = name.chars().next().unwrap();
        if !first.is_ascii_lowercase() && !first.is_ascii_digit() {
            return Err(BucketNameError::InvalidStartChar);
        }
        let last = name.chars().last().unwrap();
        if !last.is_ascii_lowercase() && !last.is_ascii_digit() {
            return Err(BucketNameError::InvalidEndChar);
        }
        for c in name.chars() {
            if !c.is_ascii_lowercase() && !c.is_ascii_digit() && c != '-' && c != '.' {
                return Err(BucketNameError::InvalidChar(c));
            }
        }
        if name.contains("..") {
            return Err(BucketNameError::ConsecutivePeriods);
        }

        Ok(())
    }
}

impl fmt::Debug for BucketName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BucketName({:?})", self.0)
    }
}

/// Errors that can occur when creating a bucket name
#[derive(Debug, Clone, thiserror::Error)]
pub enum BucketNameError {
    #[error("bucket name must be at least 3 characters")]
    TooShort,
    #[error("bucket name must be at most 63 characters")]
    TooLong,
    #[error("bucket name must start with a lowercase letter or number")]
    InvalidStartChar,
    #[error("bucket name must end with a lowercase letter or number")]
    InvalidEndChar,
    #[error("bucket name contains invalid character: {0}")]
    InvalidChar(char),
    #[error("bucket name cannot contain consecutive periods")]
    ConsecutivePeriods,
}

/// Object name (path within a bucket)
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display)]
#[display("{_0}")]
pub struct ObjName(String);

impl ObjName {
    /// Create a new object name
    pub fn new(name: impl Into<String>) -> Result<Self, ObjNameError> {
        let name = name.into();
        if name.is_empty() {
            return Err(ObjNameError::Empty);
        }
        if name.len() > 1024 {
            return Err(ObjNameError::TooLong);
        }
        Ok(Self(name))
    }

    /// Create without validation (internal use only)
    #[must_use]
    pub fn new_unchecked(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Get the object name as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ObjName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjName({:?})", self.0)
    }
}

/// Errors that can occur when creating an object name
#[derive(Debug, Clone, thiserror::Error)]
pub enum ObjNameError {
    #[error("object name cannot be empty")]
    Empty,
    #[error("object name cannot exceed 1024 bytes")]
    TooLong,
}

/// Unique identifier for a cluster node (proxy or target)
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display)]
#[display("{_0}")]
pub struct NodeId(String);

impl NodeId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Node role within the cluster
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// Stateless gateway; one proxy is elected primary
    Proxy,
    /// Storage node owning one or more mountpaths
    Target,
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Proxy => write!(f, "proxy"),
            Self::Target => write!(f, "target"),
        }
    }
}

/// Bucket provider namespace
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Native bucket owned by this cluster
    #[default]
    Strata,
    /// Remote (cloud) bucket cached by this cluster
    Cloud,
}

impl Provider {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Strata => "strata",
            Self::Cloud => "cloud",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fully-qualified bucket: provider + name
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Bck {
    pub provider: Provider,
    pub name: BucketName,
}

impl Bck {
    #[must_use]
    pub fn new(provider: Provider, name: BucketName) -> Self {
        Self { provider, name }
    }

    /// Native bucket shorthand
    #[must_use]
    pub fn strata(name: BucketName) -> Self {
        Self::new(Provider::Strata, name)
    }

    /// Unique bucket id used as the FQN path prefix and the uname prefix
    #[must_use]
    pub fn uid(&self) -> String {
        format!("{}/{}", self.provider, self.name)
    }

    /// Unique object key for HRW mapping: `bucket-uid + "/" + objname`
    #[must_use]
    pub fn make_uname(&self, obj: &ObjName) -> String {
        format!("{}/{}", self.uid(), obj)
    }
}

impl fmt::Display for Bck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.uid())
    }
}

impl fmt::Debug for Bck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bck({})", self.uid())
    }
}

/// Access attribute bits for bucket permission checks
pub mod access {
    /// Object GET
    pub const GET: u64 = 1 << 0;
    /// Object HEAD
    pub const OBJ_HEAD: u64 = 1 << 1;
    /// Object PUT
    pub const PUT: u64 = 1 << 2;
    /// Object DELETE
    pub const OBJ_DELETE: u64 = 1 << 3;
    /// Bucket HEAD
    pub const BCK_HEAD: u64 = 1 << 4;
    /// List objects
    pub const OBJ_LIST: u64 = 1 << 5;
    /// Rename bucket
    pub const BCK_RENAME: u64 = 1 << 6;
    /// Patch bucket props
    pub const PATCH: u64 = 1 << 7;
    /// Make-n-copies
    pub const MAKE_NCOPIES: u64 = 1 << 8;
    /// EC encode
    pub const EC: u64 = 1 << 9;
    /// Destroy bucket
    pub const BCK_DELETE: u64 = 1 << 10;
}

/// Access-attribute bitmask attached to bucket props
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessAttrs(pub u64);

impl AccessAttrs {
    #[must_use]
    pub const fn none() -> Self {
        Self(0)
    }

    #[must_use]
    pub const fn all() -> Self {
        Self(u64::MAX)
    }

    #[must_use]
    pub const fn read_only() -> Self {
        Self(access::GET | access::OBJ_HEAD | access::BCK_HEAD | access::OBJ_LIST)
    }

    #[must_use]
    pub const fn has(&self, perms: u64) -> bool {
        self.0 & perms == perms
    }

    /// Grant the given bits
    #[must_use]
    pub const fn allow(self, bits: u64) -> Self {
        Self(self.0 | bits)
    }

    /// Revoke the given bits
    #[must_use]
    pub const fn deny(self, bits: u64) -> Self {
        Self(self.0 & !bits)
    }
}

impl Default for AccessAttrs {
    fn default() -> Self {
        Self::all()
    }
}

impl fmt::Debug for AccessAttrs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccessAttrs({:#x})", self.0)
    }
}

/// Mirroring (n-way local replication) configuration
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorConf {
    pub enabled: bool,
    /// Number of copies across distinct mountpaths
    pub copies: i64,
}

impl Default for MirrorConf {
    fn default() -> Self {
        Self {
            enabled: false,
            copies: 1,
        }
    }
}

/// Erasure coding configuration for a bucket
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EcConf {
    pub enabled: bool,
    /// Number of data slices (k)
    pub data_slices: usize,
    /// Number of parity slices (m)
    pub parity_slices: usize,
    /// Objects at or below this size are replicated instead of sliced
    pub obj_size_limit: u64,
}

impl Default for EcConf {
    fn default() -> Self {
        Self {
            enabled: false,
            data_slices: 2,
            parity_slices: 1,
            obj_size_limit: 256 * 1024,
        }
    }
}

impl EcConf {
    /// Targets required to encode one object
    #[must_use]
    pub fn required_targets(&self, is_copy: bool) -> usize {
        if is_copy {
            self.parity_slices + 1
        } else {
            self.data_slices + self.parity_slices + 1
        }
    }
}

/// Object versioning configuration
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionConf {
    pub enabled: bool,
}

/// Per-bucket properties, stored in the BMD
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BucketProps {
    /// Checksum policy for objects in this bucket
    pub cksum: ChecksumType,
    pub mirror: MirrorConf,
    pub ec: EcConf,
    pub versioning: VersionConf,
    pub access: AccessAttrs,
    /// Set to the rename action when this bucket was renamed away; in-flight
    /// requests to the old name can be rerouted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub renamed: Option<String>,
}

impl BucketProps {
    /// Validate props against the current number of targets in the cluster
    pub fn validate(&self, target_cnt: usize) -> Result<(), crate::Error> {
        if self.mirror.enabled && self.mirror.copies < 2 {
            return Err(crate::Error::InvalidArgument(format!(
                "mirror requires at least 2 copies, got {}",
                self.mirror.copies
            )));
        }
        if self.ec.enabled {
            if self.ec.data_slices < 1 || self.ec.parity_slices < 1 {
                return Err(crate::Error::InvalidArgument(
                    "invalid number of slices".to_string(),
                ));
            }
            let required = self.ec.required_targets(false);
            if target_cnt > 0 && target_cnt < required {
                return Err(crate::Error::InsufficientTargets {
                    available: target_cnt,
                    required,
                });
            }
        }
        Ok(())
    }
}

/// Partial update applied to bucket props by set-props
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BucketPropsToUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cksum: Option<ChecksumType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mirror_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mirror_copies: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ec_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ec_data_slices: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ec_parity_slices: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ec_obj_size_limit: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub versioning_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access: Option<u64>,
}

impl BucketProps {
    /// Apply a partial update in place
    pub fn apply(&mut self, u: &BucketPropsToUpdate) {
        if let Some(v) = u.cksum {
            self.cksum = v;
        }
        if let Some(v) = u.mirror_enabled {
            self.mirror.enabled = v;
        }
        if let Some(v) = u.mirror_copies {
            self.mirror.copies = v;
        }
        if let Some(v) = u.ec_enabled {
            self.ec.enabled = v;
        }
        if let Some(v) = u.ec_data_slices {
            self.ec.data_slices = v;
        }
        if let Some(v) = u.ec_parity_slices {
            self.ec.parity_slices = v;
        }
        if let Some(v) = u.ec_obj_size_limit {
            self.ec.obj_size_limit = v;
        }
        if let Some(v) = u.versioning_enabled {
            self.versioning.enabled = v;
        }
        if let Some(v) = u.access {
            self.access = AccessAttrs(v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_name_valid() {
        assert!(BucketName::new("my-bucket").is_ok());
        assert!(BucketName::new("bucket123").is_ok());
        assert!(BucketName::new("a.b.c").is_ok());
    }

    #[test]
    fn bucket_name_invalid() {
        assert!(BucketName::new("ab").is_err()); // Too short
        assert!(BucketName::new("-bucket").is_err()); // Invalid start
        assert!(BucketName::new("bucket-").is_err()); // Invalid end
        assert!(BucketName::new("Bucket").is_err()); // Uppercase
        assert!(BucketName::new("bucket..name").is_err()); // Consecutive periods
    }

    #[test]
    fn uname_layout() {
        let bck = Bck::strata(BucketName::new_unchecked("b1"));
        let obj = ObjName::new_unchecked("dir/obj");
        assert_eq!(bck.make_uname(&obj), "strata/b1/dir/obj");
    }

    #[test]
    fn access_allow_deny() {
        let a = AccessAttrs::read_only();
        assert!(a.has(access::GET));
        assert!(!a.has(access::PUT));
        let a = a.allow(access::PUT);
        assert!(a.has(access::PUT));
        let a = a.deny(access::PUT | access::GET);
        assert!(!a.has(access::GET));
        assert!(a.has(access::OBJ_HEAD));
    }

    #[test]
    fn props_apply_partial() {
        let mut props = BucketProps::default();
        props.apply(&BucketPropsToUpdate {
            mirror_enabled: Some(true),
            mirror_copies: Some(3),
            ..Default::default()
        });
        assert!(props.mirror.enabled);
        assert_eq!(props.mirror.copies, 3);
        assert!(!props.ec.enabled);
    }

    #[test]
    fn ec_required_targets() {
        let ec = EcConf {
            enabled: true,
            data_slices: 2,
            parity_slices: 1,
            obj_size_limit: 0,
        };
        assert_eq!(ec.required_targets(false), 4);
        assert_eq!(ec.required_targets(true), 2);
    }
}
