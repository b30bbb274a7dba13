//! Error types for murmur-node.

use thiserror::Error;

/// Result type for node operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the node.
#[derive(Debug, Error)]
pub enum Error {
    /// Ledger error
    #[error(transparent)]
    Ledger(#[from] murmur_ledger::Error),

    /// Feed error
    #[error(transparent)]
    Feed(#[from] murmur_feed::Error),

    /// Account error
    #[error(transparent)]
    Account(#[from] murmur_account::Error),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// The operation needs a logged-in user.
    #[error("not logged in")]
    NotLoggedIn,

    /// No account exists for the username.
    #[error("unknown user: {0}")]
    UnknownUser(String),

    /// A user tree is missing data the app relies on.
    #[error("account {username} is incomplete: {reason}")]
    IncompleteAccount { username: String, reason: String },

    /// Stored credentials could not be used.
    #[error("stored login is invalid: {0}")]
    InvalidLogin(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether a write was submitted but not confirmed in time.
    pub fn is_timeout(&self) -> bool {
        match self {
            Error::Ledger(e) => e.is_timeout(),
            Error::Account(e) => e.is_timeout(),
            _ => false,
        }
    }
}
