//! Collaborator interfaces for the ledger network.
//!
//! The community itself (consensus, gossip, signing) lives outside this
//! crate. These traits are the narrow surface we consume from it.

use crate::error::{Error, NetworkError, Result};
use crate::tree::{ChainTree, Transaction};
use crate::types::{Did, Receipt, StateRoot};
use async_trait::async_trait;
use std::sync::Arc;

/// Deployment environment of the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    /// The shared, long-lived community.
    Production,
    /// A fresh local test community.
    #[default]
    Development,
}

impl Environment {
    /// Parse an environment name; anything but `production` is development.
    pub fn from_name(name: &str) -> Self {
        if name.eq_ignore_ascii_case("production") {
            Self::Production
        } else {
            Self::Development
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Production => write!(f, "production"),
            Self::Development => write!(f, "development"),
        }
    }
}

/// Raw signature section of a submit response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseSignature {
    /// Encoded new tip, expected to be a 32-byte content address.
    pub new_tip: Vec<u8>,
}

/// Raw response to a transaction submission, before decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitResponse {
    /// Signature over the new tip, if the network produced one.
    pub signature: Option<ResponseSignature>,
}

impl SubmitResponse {
    /// Build a well-formed response for `root`.
    pub fn signed(root: StateRoot) -> Self {
        Self {
            signature: Some(ResponseSignature {
                new_tip: root.as_bytes().to_vec(),
            }),
        }
    }

    /// Decode into a typed receipt for `did`.
    pub fn decode(self, did: &Did) -> Result<Receipt> {
        let sig = self
            .signature
            .ok_or_else(|| Error::MalformedResponse("response carries no signature".into()))?;
        let new_root = StateRoot::from_slice(&sig.new_tip).ok_or_else(|| {
            Error::MalformedResponse(format!(
                "new tip must be 32 bytes, got {}",
                sig.new_tip.len()
            ))
        })?;
        Ok(Receipt {
            did: did.clone(),
            new_root,
        })
    }
}

/// A connected ledger network.
#[async_trait]
pub trait LedgerNetwork: Send + Sync {
    /// Current root of `did` as seen by the responding node.
    async fn get_tip(&self, did: &Did) -> std::result::Result<StateRoot, NetworkError>;

    /// Suspend until the network has applied its next round of updates.
    async fn next_update(&self);

    /// Play `txs` against `tree`.
    async fn submit(
        &self,
        tree: &ChainTree,
        txs: &[Transaction],
    ) -> std::result::Result<SubmitResponse, NetworkError>;

    /// Fetch the tree for `did` at `tip`.
    async fn load_tree(
        &self,
        did: &Did,
        tip: &StateRoot,
    ) -> std::result::Result<ChainTree, NetworkError>;
}

/// Builds a network handle for an environment.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Perform the connection handshake.
    async fn connect(&self, environment: Environment) -> Result<Arc<dyn LedgerNetwork>>;
}
