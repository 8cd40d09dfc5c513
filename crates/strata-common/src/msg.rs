//! Control-plane message vocabulary
//!
//! Every structural bucket mutation travels as an `ActionMsg`; the txn
//! endpoints and metasync reuse the same envelope.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Structural bucket actions understood by the txn protocol
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    CreateBucket,
    DestroyBucket,
    EvictBucket,
    RenameBucket,
    CopyBucket,
    SetBucketProps,
    ResetBucketProps,
    MakeNCopies,
    EcEncode,
    ListObjects,
    LoadLomCache,
    Resilver,
    RevokeTokens,
}

impl Action {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::CreateBucket => "create-bucket",
            Self::DestroyBucket => "destroy-bucket",
            Self::EvictBucket => "evict-bucket",
            Self::RenameBucket => "rename-bucket",
            Self::CopyBucket => "copy-bucket",
            Self::SetBucketProps => "set-bucket-props",
            Self::ResetBucketProps => "reset-bucket-props",
            Self::MakeNCopies => "make-n-copies",
            Self::EcEncode => "ec-encode",
            Self::ListObjects => "list-objects",
            Self::LoadLomCache => "load-lom-cache",
            Self::Resilver => "resilver",
            Self::RevokeTokens => "revoke-tokens",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Action envelope: the body of txn begin/commit/abort and metasync
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ActionMsg {
    pub action: Action,
    /// Correlation id; keys target txn state and notification listeners
    #[serde(default)]
    pub uuid: String,
    /// Action-specific payload (copies count, destination bucket, props, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    /// BMD version this message was issued against (0 = unset)
    #[serde(default)]
    pub bmd_version: u64,
    /// RMD version, set when the action bumps the rebalance epoch
    #[serde(default)]
    pub rmd_version: u64,
}

impl ActionMsg {
    #[must_use]
    pub fn new(action: Action) -> Self {
        Self {
            action,
            uuid: String::new(),
            value: None,
            bmd_version: 0,
            rmd_version: 0,
        }
    }

    #[must_use]
    pub fn with_value(mut self, value: serde_json::Value) -> Self {
        self.value = Some(value);
        self
    }
}

/// Intra-cluster header and query-parameter names
pub mod headers {
    /// Sender is a proxy; value is its node id
    pub const PROXY_ID: &str = "x-strata-proxy-id";
    /// Sender node id (any role)
    pub const NODE_ID: &str = "x-strata-node-id";
    /// Caller's remaining budget, nanoseconds as a decimal string
    pub const TXN_TIMEOUT: &str = "x-strata-txn-timeout";
    /// Whether a metasync preceded this commit: `none` or `metasync`
    pub const TXN_EVENT: &str = "x-strata-txn-event";

    pub const TXN_EVENT_NONE: &str = "none";
    pub const TXN_EVENT_METASYNC: &str = "metasync";
}

/// Txn phase path segments
pub mod txn_phase {
    pub const BEGIN: &str = "begin";
    pub const COMMIT: &str = "commit";
    pub const ABORT: &str = "abort";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_wire_names() {
        let js = serde_json::to_string(&Action::MakeNCopies).unwrap();
        assert_eq!(js, "\"make-n-copies\"");
        let back: Action = serde_json::from_str("\"ec-encode\"").unwrap();
        assert_eq!(back, Action::EcEncode);
    }

    #[test]
    fn msg_roundtrip() {
        let msg = ActionMsg::new(Action::MakeNCopies).with_value(serde_json::json!(3));
        let js = serde_json::to_string(&msg).unwrap();
        let back: ActionMsg = serde_json::from_str(&js).unwrap();
        assert_eq!(back.action, Action::MakeNCopies);
        assert_eq!(back.value, Some(serde_json::json!(3)));
    }
}
