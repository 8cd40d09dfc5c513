//! Cluster node identity

use serde::{Deserialize, Serialize};
use std::fmt;
use strata_common::{NodeId, NodeRole};

/// Node identity; immutable for the life of the process
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snode {
    pub id: NodeId,
    /// URL clients talk to
    pub public_url: String,
    /// URL for intra-cluster control traffic (txn, metasync, notifs)
    pub intra_control_url: String,
    /// URL for intra-cluster data traffic (slices, replicas)
    pub intra_data_url: String,
    pub role: NodeRole,
}

impl Snode {
    #[must_use]
    pub fn new(
        id: impl Into<NodeId>,
        role: NodeRole,
        public_url: impl Into<String>,
    ) -> Self {
        let public_url = public_url.into();
        Self {
            id: id.into(),
            intra_control_url: public_url.clone(),
            intra_data_url: public_url.clone(),
            public_url,
            role,
        }
    }

    #[must_use]
    pub fn is_proxy(&self) -> bool {
        self.role == NodeRole::Proxy
    }

    #[must_use]
    pub fn is_target(&self) -> bool {
        self.role == NodeRole::Target
    }

    /// Control-plane URL for `path` (no leading slash required)
    #[must_use]
    pub fn control_url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.intra_control_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Data-plane URL for `path`
    #[must_use]
    pub fn data_url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.intra_data_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

impl fmt::Display for Snode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.role, self.id)
    }
}

impl fmt::Debug for Snode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Snode({} {} {})", self.role, self.id, self.public_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_joining() {
        let sn = Snode::new("t1", NodeRole::Target, "http://127.0.0.1:8081/");
        assert_eq!(
            sn.control_url("/v1/txn/b1/begin"),
            "http://127.0.0.1:8081/v1/txn/b1/begin"
        );
        assert_eq!(sn.data_url("v1/objects/b1/o"), "http://127.0.0.1:8081/v1/objects/b1/o");
    }
}
