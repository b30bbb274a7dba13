//! Account lookup, registration and verification.

use crate::error::{Error, Result};
use crate::keys::KeyService;
use murmur_ledger::{
    submit_and_wait, ChainTree, Session, TipWaiter, Transaction, FEED_ADDRESS_PATH, USERNAME_PATH,
};
use std::sync::Arc;
use tracing::{debug, info};

/// Accounts stored as chain trees in a ledger community.
pub struct Accounts {
    waiter: TipWaiter,
    keys: Arc<dyn KeyService>,
}

impl Accounts {
    pub fn new(waiter: TipWaiter, keys: Arc<dyn KeyService>) -> Self {
        Self { waiter, keys }
    }

    /// The session accounts are read from.
    pub fn session(&self) -> &Arc<Session> {
        self.waiter.session()
    }

    /// The convergence waiter used for writes.
    pub fn waiter(&self) -> &TipWaiter {
        &self.waiter
    }

    /// The key service.
    pub fn keys(&self) -> &Arc<dyn KeyService> {
        &self.keys
    }

    /// Find the tree registered for `username`.
    ///
    /// Returns `None` when the community has never seen the identity.
    pub async fn find_user_tree(&self, username: &str) -> Result<Option<ChainTree>> {
        let did = self.keys.identity(username).await?;
        match self.session().load_tree(&did).await {
            Ok(tree) => Ok(Some(tree)),
            Err(e) if e.is_not_found() => {
                debug!(user = %username, did = %did, "No account found");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Register `username`, handing ownership to the password-derived key.
    ///
    /// Blocks until the community shows the new tree. The returned tree
    /// carries the owner key.
    pub async fn register(&self, username: &str, password: &str, feed_address: &str) -> Result<ChainTree> {
        if self.find_user_tree(username).await?.is_some() {
            return Err(Error::AccountExists(username.to_string()));
        }

        let did = self.keys.identity(username).await?;
        let owner = self.keys.owner_key(username, password).await?;

        let mut tree = ChainTree::new_empty(did.clone(), did.as_str());
        let txs = [
            Transaction::set_ownership(vec![owner.address.clone()]),
            Transaction::set_data(USERNAME_PATH, username),
            Transaction::set_data(FEED_ADDRESS_PATH, feed_address),
        ];

        info!(user = %username, did = %did, "Registering account");
        submit_and_wait(&self.waiter, &mut tree, &txs).await?;
        info!(user = %username, did = %did, root = %tree.tip, "Account registered");

        Ok(tree.with_key(owner))
    }

    /// Check `password` against `tree`.
    ///
    /// Returns the tree with its owner key attached when the password's key
    /// owns it.
    pub async fn verify_account(
        &self,
        username: &str,
        password: &str,
        tree: ChainTree,
    ) -> Result<Option<ChainTree>> {
        let owner = self.keys.owner_key(username, password).await?;
        if tree.is_owned_by(&owner.address) {
            debug!(user = %username, "Password verified");
            Ok(Some(tree.with_key(owner)))
        } else {
            debug!(user = %username, "Password did not match tree owner");
            Ok(None)
        }
    }
}

impl std::fmt::Debug for Accounts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Accounts")
            .field("wait", &self.waiter.config())
            .finish_non_exhaustive()
    }
}
