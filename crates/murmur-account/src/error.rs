//! Error types for murmur-account.

use thiserror::Error;

/// Result type for murmur-account operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during account operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Ledger error
    #[error(transparent)]
    Ledger(#[from] murmur_ledger::Error),

    /// Deriving keys failed.
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    /// The caller supplied unusable input (e.g. an empty username).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The username is already registered.
    #[error("account already exists: {0}")]
    AccountExists(String),
}

impl Error {
    /// Whether the convergence wait timed out (the write may still land).
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Ledger(e) if e.is_timeout())
    }
}
