//! Error types for murmur-ledger.

use crate::types::Did;
use std::time::Duration;
use thiserror::Error;

/// Result type for murmur-ledger operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while talking to the community.
#[derive(Debug, Error)]
pub enum Error {
    /// The identity is not (yet) visible to the queried node.
    #[error("identity not found: {0}")]
    NotFound(Did),

    /// The expected root was not observed within the attempt budget.
    ///
    /// The write may still land; callers should present it as unconfirmed
    /// rather than failed.
    #[error(
        "action on {did} was submitted but could not be confirmed within {} seconds; it may still complete",
        .bound.as_secs()
    )]
    Timeout {
        did: Did,
        attempts: u32,
        bound: Duration,
    },

    /// A root lookup failed for a reason other than "not found".
    #[error("propagation failed for {did}: {reason}")]
    Propagation { did: Did, reason: String },

    /// The network answered with something we could not decode.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// A transaction batch was rejected before it reached the network.
    #[error("invalid transaction: {0}")]
    InvalidTransaction(String),

    /// Connecting to the community failed.
    #[error("connection error: {0}")]
    Connection(String),

    /// The session was closed.
    #[error("session is closed")]
    SessionClosed,

    /// The caller abandoned the operation.
    #[error("operation cancelled")]
    Cancelled,

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Whether the failure is the transient "not yet visible" condition.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// Whether the failure is a convergence timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }
}

/// Failures reported by a ledger network collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetworkError {
    /// The responding node does not know the identity.
    #[error("not found")]
    NotFound,

    /// The request was refused (malformed identity, bad signature, ...).
    #[error("rejected: {0}")]
    Rejected(String),

    /// The node could not be reached.
    #[error("unavailable: {0}")]
    Unavailable(String),
}
