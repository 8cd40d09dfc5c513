//! Error types for Strata
//!
//! One shared error enum crosses the HTTP boundary; `http_status_code` is the
//! single source of truth for the wire mapping.

use crate::types::{Bck, BucketNameError, ObjNameError};
use thiserror::Error;

/// Common result type for Strata operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for Strata
#[derive(Debug, Error)]
pub enum Error {
    // Precondition errors: reported synchronously, no state change
    #[error("bucket does not exist: {0}")]
    BucketDoesNotExist(Bck),

    #[error("bucket already exists: {0}")]
    BucketAlreadyExists(Bck),

    #[error("bucket {0} is busy, try again")]
    BucketIsBusy(Bck),

    #[error("bucket {0} is no longer available")]
    BucketNought(Bck),

    #[error("object not found: {bucket}/{object}")]
    ObjectNotFound { bucket: String, object: String },

    #[error("invalid bucket name: {0}")]
    InvalidBucketName(#[from] BucketNameError),

    #[error("invalid object name: {0}")]
    InvalidObjName(#[from] ObjNameError),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("access denied: operation {op} on {bucket}")]
    AccessDenied { bucket: String, op: String },

    // Erasure coding
    #[error("EC is disabled for bucket {0}")]
    EcDisabled(Bck),

    #[error("EC is already enabled for bucket {0}")]
    EcAlreadyEnabled(Bck),

    #[error("once enabled, EC configuration can only be disabled but cannot change")]
    EcImmutable,

    #[error("no target returned a metafile for {bucket}/{object}")]
    NoMetafile { bucket: String, object: String },

    #[error("cannot restore: too many slices missing (found {found}, need {need} or more)")]
    SlicesInsufficient { found: usize, need: usize },

    #[error("operation requires {required} targets, only {available} found")]
    InsufficientTargets { available: usize, required: usize },

    // Transaction protocol
    #[error("txn {uuid}: {reason}")]
    TxnAborted { uuid: String, reason: String },

    #[error("unknown txn {0}")]
    TxnNotFound(String),

    #[error("commit failed on {node}: {reason}")]
    CommitFailed { node: String, reason: String },

    // Data integrity
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    // Xactions
    #[error("xaction {0} was aborted")]
    XactAborted(String),

    #[error("xaction expired: {0}")]
    XactExpired(String),

    #[error("handle not found: {0}")]
    HandleNotFound(String),

    // Network / transport
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("request timeout")]
    Timeout,

    #[error("no registered targets")]
    NoTargets,

    #[error("node not found: {0}")]
    NodeNotFound(String),

    // Resource
    #[error("disk I/O error: {0}")]
    DiskIo(#[from] std::io::Error),

    #[error("no enabled mountpaths")]
    NoMountpaths,

    #[error("mountpath not found: {0}")]
    MountpathNotFound(String),

    // Internal
    #[error("internal error: {0}")]
    Internal(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Check if this is a retryable error
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::ConnectionFailed(_) | Self::BucketIsBusy(_)
        )
    }

    /// Check if this is a not found error
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::BucketDoesNotExist(_)
                | Self::ObjectNotFound { .. }
                | Self::NoMetafile { .. }
                | Self::NodeNotFound(_)
                | Self::HandleNotFound(_)
                | Self::TxnNotFound(_)
                | Self::MountpathNotFound(_)
        )
    }

    /// HTTP status code carried across the REST boundary
    #[must_use]
    pub fn http_status_code(&self) -> u16 {
        match self {
            Self::InvalidBucketName(_)
            | Self::InvalidObjName(_)
            | Self::InvalidArgument(_)
            | Self::EcImmutable => 400,

            Self::AccessDenied { .. } => 403,

            Self::BucketDoesNotExist(_)
            | Self::ObjectNotFound { .. }
            | Self::NoMetafile { .. }
            | Self::NodeNotFound(_)
            | Self::HandleNotFound(_)
            | Self::TxnNotFound(_)
            | Self::MountpathNotFound(_) => 404,

            Self::BucketAlreadyExists(_) | Self::BucketIsBusy(_) | Self::EcAlreadyEnabled(_) => 409,

            Self::BucketNought(_) => 410,

            Self::Timeout => 408,

            Self::NoTargets
            | Self::InsufficientTargets { .. }
            | Self::ConnectionFailed(_)
            | Self::NoMountpaths => 503,

            _ => 500,
        }
    }

    /// S3 error code for the `/s3` surface
    #[must_use]
    pub fn s3_error_code(&self) -> &'static str {
        match self {
            Self::BucketDoesNotExist(_) => "NoSuchBucket",
            Self::BucketAlreadyExists(_) => "BucketAlreadyExists",
            Self::ObjectNotFound { .. } => "NoSuchKey",
            Self::InvalidBucketName(_) => "InvalidBucketName",
            Self::InvalidObjName(_) | Self::InvalidArgument(_) => "InvalidArgument",
            Self::AccessDenied { .. } => "AccessDenied",
            Self::Timeout | Self::NoTargets => "ServiceUnavailable",
            _ => "InternalError",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Bck, BucketName};

    fn bck(name: &str) -> Bck {
        Bck::strata(BucketName::new_unchecked(name))
    }

    #[test]
    fn status_codes() {
        assert_eq!(Error::BucketDoesNotExist(bck("b1")).http_status_code(), 404);
        assert_eq!(Error::BucketAlreadyExists(bck("b1")).http_status_code(), 409);
        assert_eq!(Error::BucketIsBusy(bck("b1")).http_status_code(), 409);
        assert_eq!(Error::BucketNought(bck("b1")).http_status_code(), 410);
        assert_eq!(Error::NoTargets.http_status_code(), 503);
        assert_eq!(Error::internal("x").http_status_code(), 500);
    }

    #[test]
    fn retryable() {
        assert!(Error::Timeout.is_retryable());
        assert!(Error::BucketIsBusy(bck("b1")).is_retryable());
        assert!(!Error::BucketDoesNotExist(bck("b1")).is_retryable());
    }

    #[test]
    fn not_found() {
        assert!(Error::HandleNotFound("h".into()).is_not_found());
        assert!(Error::ObjectNotFound {
            bucket: "b".into(),
            object: "o".into()
        }
        .is_not_found());
        assert!(!Error::Timeout.is_not_found());
    }
}
