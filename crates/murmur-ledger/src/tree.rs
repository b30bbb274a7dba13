//! Chain trees and the transactions that advance them.
//!
//! A chain tree is a small, versioned key/value document owned by one or
//! more addresses. Every batch of transactions produces a new [`StateRoot`]
//! chained onto the previous one:
//!
//! ```text
//! root(n+1) = blake3(root(n) || canonical_json(transactions))
//! ```

use crate::error::{Error, Result};
use crate::types::{Did, StateRoot};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Prefix under which the application keeps all of its data in a tree.
pub const APP_DATA_PREFIX: &str = "/_murmur";

/// Path of the cached username inside a user tree.
pub const USERNAME_PATH: &str = "/_murmur/username";

/// Path of the user's tweet feed address inside a user tree.
pub const FEED_ADDRESS_PATH: &str = "/_murmur/feed_address";

/// Path of the list of followed usernames inside a user tree.
pub const FOLLOWING_PATH: &str = "/_murmur/following";

/// A transaction that can be played against a chain tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Transaction {
    /// Store a JSON value at a path.
    SetData { path: String, value: Value },
    /// Replace the set of owner addresses.
    SetOwnership { owners: Vec<String> },
}

impl Transaction {
    /// Convenience constructor for [`Transaction::SetData`].
    pub fn set_data(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::SetData {
            path: path.into(),
            value: value.into(),
        }
    }

    /// Convenience constructor for [`Transaction::SetOwnership`].
    pub fn set_ownership(owners: Vec<String>) -> Self {
        Self::SetOwnership { owners }
    }
}

/// Signing material attached to a tree by its owner.
///
/// Produced by the key service; the ledger crate only carries it around.
#[derive(Clone, PartialEq, Eq)]
pub struct TreeKey {
    /// Owner address this key signs for.
    pub address: String,
    /// Opaque private key bytes.
    pub secret: Vec<u8>,
}

impl std::fmt::Debug for TreeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeKey")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// Local view of a chain tree.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainTree {
    /// Identity of the tree.
    pub did: Did,
    /// Current root.
    pub tip: StateRoot,
    /// Addresses allowed to write to the tree.
    pub owners: Vec<String>,
    /// Stored data by path.
    pub data: BTreeMap<String, Value>,
    /// Key used to sign writes, if the local user owns the tree.
    pub key: Option<TreeKey>,
}

impl ChainTree {
    /// Create an empty tree owned by `owner`.
    pub fn new_empty(did: Did, owner: impl Into<String>) -> Self {
        let tip = StateRoot::genesis(&did);
        Self {
            did,
            tip,
            owners: vec![owner.into()],
            data: BTreeMap::new(),
            key: None,
        }
    }

    /// Attach a signing key.
    #[must_use]
    pub fn with_key(mut self, key: TreeKey) -> Self {
        self.key = Some(key);
        self
    }

    /// Look up the value stored at `path`.
    pub fn resolve_data(&self, path: &str) -> Option<&Value> {
        self.data.get(path)
    }

    /// Look up a string stored at `path`.
    pub fn resolve_str(&self, path: &str) -> Option<&str> {
        self.resolve_data(path).and_then(Value::as_str)
    }

    /// Check whether `address` is one of the tree owners.
    pub fn is_owned_by(&self, address: &str) -> bool {
        self.owners.iter().any(|o| o == address)
    }

    /// Compute the root that follows `previous` after `txs`.
    pub fn next_root(previous: &StateRoot, txs: &[Transaction]) -> Result<StateRoot> {
        let encoded = serde_json::to_vec(txs)?;
        let mut hasher = blake3::Hasher::new();
        hasher.update(previous.as_bytes());
        hasher.update(&encoded);
        Ok(StateRoot::from_bytes(*hasher.finalize().as_bytes()))
    }

    /// Apply transactions to the local view and return the new root.
    pub fn apply(&mut self, txs: &[Transaction]) -> Result<StateRoot> {
        if txs.is_empty() {
            return Err(Error::InvalidTransaction("empty transaction batch".into()));
        }
        txs.iter().try_for_each(Self::validate)?;

        let root = Self::next_root(&self.tip, txs)?;
        for tx in txs {
            match tx {
                Transaction::SetData { path, value } => {
                    self.data.insert(path.clone(), value.clone());
                }
                Transaction::SetOwnership { owners } => {
                    self.owners = owners.clone();
                }
            }
        }
        self.tip = root;
        Ok(root)
    }

    fn validate(tx: &Transaction) -> Result<()> {
        match tx {
            Transaction::SetData { path, .. } if !path.starts_with('/') => Err(
                Error::InvalidTransaction(format!("path must be absolute: {}", path)),
            ),
            Transaction::SetOwnership { owners } if owners.is_empty() => Err(
                Error::InvalidTransaction("ownership cannot be empty".into()),
            ),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> ChainTree {
        ChainTree::new_empty(Did::new("did:murmur:alice"), "owner-a")
    }

    #[test]
    fn apply_advances_tip_and_data() {
        let mut t = tree();
        let genesis = t.tip;
        let root = t
            .apply(&[Transaction::set_data(USERNAME_PATH, "alice")])
            .unwrap();

        assert_ne!(root, genesis);
        assert_eq!(t.tip, root);
        assert_eq!(t.resolve_str(USERNAME_PATH), Some("alice"));
    }

    #[test]
    fn next_root_is_deterministic() {
        let txs = vec![Transaction::set_data("/a", 1)];
        let prev = StateRoot::from_bytes([0u8; 32]);
        assert_eq!(
            ChainTree::next_root(&prev, &txs).unwrap(),
            ChainTree::next_root(&prev, &txs).unwrap()
        );
    }

    #[test]
    fn ownership_transfer() {
        let mut t = tree();
        t.apply(&[Transaction::set_ownership(vec!["owner-b".into()])])
            .unwrap();
        assert!(t.is_owned_by("owner-b"));
        assert!(!t.is_owned_by("owner-a"));
    }

    #[test]
    fn rejects_relative_paths_and_empty_batches() {
        let mut t = tree();
        assert!(t.apply(&[]).is_err());
        assert!(t.apply(&[Transaction::set_data("relative", 1)]).is_err());
        assert!(t
            .apply(&[Transaction::set_ownership(Vec::new())])
            .is_err());
    }

    #[test]
    fn failed_batch_leaves_tree_untouched() {
        let mut t = tree();
        let before = t.clone();
        let result = t.apply(&[
            Transaction::set_data("/ok", 1),
            Transaction::set_data("bad", 2),
        ]);
        assert!(result.is_err());
        assert_eq!(t, before);
    }

    #[test]
    fn key_debug_hides_secret() {
        let key = TreeKey {
            address: "owner".into(),
            secret: vec![42; 32],
        };
        let printed = format!("{:?}", key);
        assert!(printed.contains("owner"));
        assert!(!printed.contains("42"));
    }
}
