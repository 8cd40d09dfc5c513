//! Revoked-token list
//!
//! The primary proxy merges posted revocation lists and metasyncs the merged
//! result; every node keeps the latest version to reject revoked tokens at
//! the door.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Versioned set of revoked tokens
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TokenList {
    pub version: u64,
    pub tokens: BTreeSet<String>,
}

impl TokenList {
    /// Merge `other` into self; true if anything was added
    pub fn merge(&mut self, other: &TokenList) -> bool {
        let before = self.tokens.len();
        self.tokens.extend(other.tokens.iter().cloned());
        self.tokens.len() != before
    }

    #[must_use]
    pub fn is_revoked(&self, token: &str) -> bool {
        self.tokens.contains(token)
    }
}

/// Node-local holder of the latest revocation list
#[derive(Default)]
pub struct TokenStore {
    cur: RwLock<Arc<TokenList>>,
}

impl TokenStore {
    #[must_use]
    pub fn get(&self) -> Arc<TokenList> {
        Arc::clone(&self.cur.read())
    }

    /// Adopt a received list; stale versions are ignored
    pub fn receive(&self, list: TokenList) -> bool {
        let mut cur = self.cur.write();
        if list.version <= cur.version && cur.version != 0 {
            return false;
        }
        *cur = Arc::new(list);
        true
    }

    /// Primary-side merge; bumps the version iff the set grew
    pub fn merge(&self, incoming: &TokenList) -> Option<Arc<TokenList>> {
        let mut cur = self.cur.write();
        let mut clone = (**cur).clone();
        if !clone.merge(incoming) {
            return None;
        }
        clone.version = cur.version + 1;
        let published = Arc::new(clone);
        *cur = Arc::clone(&published);
        Some(published)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_and_version() {
        let store = TokenStore::default();
        let mut incoming = TokenList::default();
        incoming.tokens.insert("tok-a".to_string());

        let v1 = store.merge(&incoming).unwrap();
        assert_eq!(v1.version, 1);
        assert!(v1.is_revoked("tok-a"));

        // merging the same tokens again changes nothing
        assert!(store.merge(&incoming).is_none());
        assert_eq!(store.get().version, 1);
    }

    #[test]
    fn receive_monotone() {
        let store = TokenStore::default();
        let mut l = TokenList::default();
        l.version = 4;
        l.tokens.insert("x".into());
        assert!(store.receive(l.clone()));
        l.version = 3;
        assert!(!store.receive(l));
        assert_eq!(store.get().version, 4);
    }
}
