//! Key derivation.
//!
//! Two keys matter for an account:
//!
//! ```text
//!   username ──────────────► identity (public, anyone can derive it)
//!   username + password ───► owner key (controls the tree after registration)
//! ```
//!
//! The identity is deliberately guessable so that anyone can look an
//! account up by name. Ownership is transferred to the password-derived
//! key during registration.

use crate::error::{Error, Result};
use async_trait::async_trait;
use murmur_ledger::{Did, TreeKey};

/// Derives identities and owner keys.
#[async_trait]
pub trait KeyService: Send + Sync {
    /// Public identity for `username`.
    async fn identity(&self, username: &str) -> Result<Did>;

    /// Owner key for `username` protected by `password`.
    async fn owner_key(&self, username: &str, password: &str) -> Result<TreeKey>;
}

const IDENTITY_CONTEXT: &str = "murmur 2020-01-01 development identity";
const OWNER_CONTEXT: &str = "murmur 2020-01-01 development owner key";

/// Key service for development communities.
///
/// Keys are plain keyed hashes with no stretching. Never use with real
/// passwords.
#[derive(Debug, Clone, Copy, Default)]
pub struct DevKeyService;

impl DevKeyService {
    pub fn new() -> Self {
        Self
    }
}

fn require_username(username: &str) -> Result<()> {
    if username.trim().is_empty() {
        return Err(Error::InvalidInput("username must not be empty".into()));
    }
    Ok(())
}

#[async_trait]
impl KeyService for DevKeyService {
    async fn identity(&self, username: &str) -> Result<Did> {
        require_username(username)?;
        let address = blake3::derive_key(IDENTITY_CONTEXT, username.as_bytes());
        Ok(Did::from_address(&address))
    }

    async fn owner_key(&self, username: &str, password: &str) -> Result<TreeKey> {
        require_username(username)?;
        if password.is_empty() {
            return Err(Error::KeyDerivation("password must not be empty".into()));
        }

        let salt = blake3::derive_key(OWNER_CONTEXT, username.as_bytes());
        let secret = blake3::keyed_hash(&salt, password.as_bytes());
        let public = blake3::hash(secret.as_bytes());

        Ok(TreeKey {
            address: format!("0x{}", hex::encode(&public.as_bytes()[..20])),
            secret: secret.as_bytes().to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn identity_is_deterministic() {
        let keys = DevKeyService::new();
        let a = keys.identity("alice").await.unwrap();
        assert_eq!(a, keys.identity("alice").await.unwrap());
        assert_ne!(a, keys.identity("bob").await.unwrap());
        assert!(a.as_str().starts_with("did:murmur:"));
    }

    #[tokio::test]
    async fn owner_key_depends_on_username_and_password() {
        let keys = DevKeyService::new();
        let k1 = keys.owner_key("alice", "hunter2").await.unwrap();
        let k2 = keys.owner_key("alice", "hunter3").await.unwrap();
        let k3 = keys.owner_key("bob", "hunter2").await.unwrap();

        assert_eq!(k1, keys.owner_key("alice", "hunter2").await.unwrap());
        assert_ne!(k1.address, k2.address);
        assert_ne!(k1.address, k3.address);
        assert_eq!(k1.address.len(), 42);
    }

    #[tokio::test]
    async fn rejects_empty_input() {
        let keys = DevKeyService::new();
        assert!(matches!(keys.identity(" ").await, Err(Error::InvalidInput(_))));
        assert!(matches!(
            keys.owner_key("alice", "").await,
            Err(Error::KeyDerivation(_))
        ));
    }
}
