//! Murmur node runtime.
//!
//! Wires one ledger session, the account service and the feed stores
//! together and hands out per-user [`App`]s.

use crate::app::App;
use crate::config::NodeConfig;
use crate::error::Result;
use murmur_account::{Accounts, DevKeyService, LoginFlow};
use murmur_feed::{CursorStore, MemoryLogStore, RocksCursorStore, ScopedCursorStore};
use murmur_ledger::{MemoryConnector, MemoryNetwork, Session, TipWaiter};
use std::sync::Arc;
use tracing::info;

/// A running Murmur node.
pub struct Node {
    config: NodeConfig,
    session: Arc<Session>,
    accounts: Arc<Accounts>,
    logs: MemoryLogStore,
    cursors: Arc<dyn CursorStore>,
}

impl Node {
    /// Open storage, connect to the community and set up account services.
    pub async fn start(config: NodeConfig) -> Result<Self> {
        // Ensure data directory exists
        std::fs::create_dir_all(&config.data_dir)?;
        let cursors: Arc<dyn CursorStore> = Arc::new(RocksCursorStore::open(config.data_dir.join("cursors"))?);

        let network = MemoryNetwork::spawn(config.network);
        let connector = Arc::new(MemoryConnector::new(network));
        let session = Arc::new(Session::new(connector, config.environment));
        session.open().await?;

        let accounts = Arc::new(Accounts::new(
            TipWaiter::new(Arc::clone(&session), config.wait),
            Arc::new(DevKeyService::new()),
        ));

        info!(
            environment = %config.environment,
            data_dir = %config.data_dir.display(),
            "Murmur node started"
        );

        Ok(Self {
            config,
            session,
            accounts,
            logs: MemoryLogStore::new("node"),
            cursors,
        })
    }

    /// Node configuration.
    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// The shared ledger session.
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Account services.
    pub fn accounts(&self) -> &Arc<Accounts> {
        &self.accounts
    }

    /// An application store for one local user.
    ///
    /// `peer` names the user's replica; followed-feed cursors are kept per peer.
    pub fn app(&self, peer: &str) -> App {
        let cursors = ScopedCursorStore::new(Arc::clone(&self.cursors), peer);
        App::new(
            Arc::clone(&self.accounts),
            Arc::new(self.logs.join(peer)),
            self.config.sync,
        )
        .with_cursor_store(Arc::new(cursors))
    }

    /// A login form backed by this node's accounts.
    pub fn login_flow(&self) -> LoginFlow {
        LoginFlow::new(Arc::clone(&self.accounts), self.config.debounce)
    }

    /// Close the ledger session.
    pub fn shutdown(&self) {
        self.session.close();
        info!("Murmur node stopped");
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use murmur_ledger::Environment;
    use tempfile::tempdir;

    #[tokio::test(start_paused = true)]
    async fn production_is_unavailable() {
        let dir = tempdir().unwrap();
        let mut config = NodeConfig::fast().with_data_dir(dir.path());
        config.environment = Environment::Production;

        assert!(matches!(
            Node::start(config).await,
            Err(Error::Ledger(murmur_ledger::Error::Connection(_)))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_closes_session() {
        let dir = tempdir().unwrap();
        let node = Node::start(NodeConfig::fast().with_data_dir(dir.path())).await.unwrap();
        assert!(node.session().is_connected());

        node.shutdown();
        assert!(matches!(
            node.session().open().await,
            Err(murmur_ledger::Error::SessionClosed)
        ));
    }
}
