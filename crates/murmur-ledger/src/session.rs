//! Ledger session - the caller-owned handle to a community.
//!
//! A [`Session`] is constructed explicitly and shared (`Arc<Session>`) by
//! every component that needs the network. The connection handshake runs
//! at most once at a time: concurrent callers that arrive before the first
//! successful connection all wait on the same attempt. A failed handshake
//! is not memoised, so the next call retries.

use crate::error::{Error, NetworkError, Result};
use crate::network::{Connector, Environment, LedgerNetwork};
use crate::tree::{ChainTree, Transaction};
use crate::types::{Did, Receipt, StateRoot};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info};

/// Handle to a ledger community.
pub struct Session {
    connector: Option<Arc<dyn Connector>>,
    environment: Environment,
    network: OnceCell<Arc<dyn LedgerNetwork>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("environment", &self.environment)
            .field("connected", &self.network.initialized())
            .field("closed", &self.closed.load(Ordering::Acquire))
            .finish()
    }
}

impl Session {
    /// Create a session that connects lazily through `connector`.
    pub fn new(connector: Arc<dyn Connector>, environment: Environment) -> Self {
        Self {
            connector: Some(connector),
            environment,
            network: OnceCell::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Create a session around an already connected network.
    pub fn from_network(network: Arc<dyn LedgerNetwork>, environment: Environment) -> Self {
        Self {
            connector: None,
            environment,
            network: OnceCell::new_with(Some(network)),
            closed: AtomicBool::new(false),
        }
    }

    /// The environment this session targets.
    pub fn environment(&self) -> Environment {
        self.environment
    }

    /// Whether the handshake has completed.
    pub fn is_connected(&self) -> bool {
        self.network.initialized()
    }

    /// Connect if not yet connected.
    pub async fn open(&self) -> Result<()> {
        self.network().await.map(|_| ())
    }

    /// Close the session. Later operations fail with [`Error::SessionClosed`].
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            info!(environment = %self.environment, "Ledger session closed");
        }
    }

    /// Get the connected network, performing the handshake if needed.
    pub async fn network(&self) -> Result<Arc<dyn LedgerNetwork>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::SessionClosed);
        }

        let network = self
            .network
            .get_or_try_init(|| async {
                let connector = self
                    .connector
                    .as_ref()
                    .ok_or_else(|| Error::Connection("no connector configured".into()))?;
                info!(environment = %self.environment, "Connecting to ledger community");
                let network = connector.connect(self.environment).await?;
                debug!(environment = %self.environment, "Ledger community connected");
                Ok::<_, Error>(network)
            })
            .await?;

        Ok(Arc::clone(network))
    }

    /// Current root of `did`.
    pub async fn get_tip(&self, did: &Did) -> Result<StateRoot> {
        let network = self.network().await?;
        network
            .get_tip(did)
            .await
            .map_err(|e| classify(did, e))
    }

    /// Suspend until the network applies its next round of updates.
    pub async fn next_update(&self) -> Result<()> {
        let network = self.network().await?;
        network.next_update().await;
        Ok(())
    }

    /// Play `txs` against `tree`.
    ///
    /// On success the local tree already reflects the write and carries the
    /// new root; the write has not necessarily converged yet.
    pub async fn submit(&self, tree: &mut ChainTree, txs: &[Transaction]) -> Result<Receipt> {
        let network = self.network().await?;

        let mut next = tree.clone();
        next.apply(txs)?;

        let response = network
            .submit(tree, txs)
            .await
            .map_err(|e| classify(&tree.did, e))?;
        let receipt = response.decode(&tree.did)?;

        debug!(did = %tree.did, root = %receipt.new_root, "Transactions accepted locally");

        next.tip = receipt.new_root;
        *tree = next;
        Ok(receipt)
    }

    /// Fetch the current tree for `did`.
    pub async fn load_tree(&self, did: &Did) -> Result<ChainTree> {
        let network = self.network().await?;
        let tip = network
            .get_tip(did)
            .await
            .map_err(|e| classify(did, e))?;
        network
            .load_tree(did, &tip)
            .await
            .map_err(|e| classify(did, e))
    }
}

fn classify(did: &Did, err: NetworkError) -> Error {
    match err {
        NetworkError::NotFound => Error::NotFound(did.clone()),
        other => Error::Propagation {
            did: did.clone(),
            reason: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryNetwork, MemoryNetworkConfig};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct CountingConnector {
        network: Arc<MemoryNetwork>,
        calls: AtomicUsize,
        failures_left: AtomicUsize,
    }

    impl CountingConnector {
        fn new(failures: usize) -> Self {
            Self {
                network: MemoryNetwork::spawn(MemoryNetworkConfig::fast()),
                calls: AtomicUsize::new(0),
                failures_left: AtomicUsize::new(failures),
            }
        }
    }

    #[async_trait]
    impl Connector for CountingConnector {
        async fn connect(&self, _environment: Environment) -> Result<Arc<dyn LedgerNetwork>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(Error::Connection("handshake refused".into()));
            }
            Ok(self.network.clone() as Arc<dyn LedgerNetwork>)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_opens_share_one_handshake() {
        let connector = Arc::new(CountingConnector::new(0));
        let session = Arc::new(Session::new(connector.clone(), Environment::Development));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let session = Arc::clone(&session);
            handles.push(tokio::spawn(async move { session.open().await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(connector.calls.load(Ordering::SeqCst), 1);
        assert!(session.is_connected());

        // Later callers reuse the memoised connection.
        session.open().await.unwrap();
        assert_eq!(connector.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_handshake_is_retried() {
        let connector = Arc::new(CountingConnector::new(1));
        let session = Session::new(connector.clone(), Environment::Development);

        assert!(matches!(session.open().await, Err(Error::Connection(_))));
        assert!(!session.is_connected());

        session.open().await.unwrap();
        assert_eq!(connector.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn closed_session_rejects_calls() {
        let network = MemoryNetwork::spawn(MemoryNetworkConfig::fast());
        let session = Session::from_network(network, Environment::Development);
        session.close();

        let err = session.get_tip(&Did::new("did:murmur:x")).await.unwrap_err();
        assert!(matches!(err, Error::SessionClosed));
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_identity_is_not_found() {
        let network = MemoryNetwork::spawn(MemoryNetworkConfig::fast());
        let session = Session::from_network(network, Environment::Development);

        let err = session.get_tip(&Did::new("did:murmur:nobody")).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test(start_paused = true)]
    async fn submit_updates_local_tree() {
        let network = MemoryNetwork::spawn(MemoryNetworkConfig::fast());
        let session = Session::from_network(network, Environment::Development);

        let mut tree = ChainTree::new_empty(Did::new("did:murmur:alice"), "owner");
        let receipt = session
            .submit(&mut tree, &[Transaction::set_data("/greeting", "hi")])
            .await
            .unwrap();

        assert_eq!(tree.tip, receipt.new_root);
        assert_eq!(tree.resolve_str("/greeting"), Some("hi"));
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_batch_never_reaches_network() {
        let network = MemoryNetwork::spawn(MemoryNetworkConfig::fast());
        let session = Session::from_network(network.clone(), Environment::Development);

        let mut tree = ChainTree::new_empty(Did::new("did:murmur:alice"), "owner");
        let before = tree.clone();
        let err = session
            .submit(&mut tree, &[Transaction::set_data("nope", 1)])
            .await
            .unwrap_err();

        assert!(matches!(err, Error::InvalidTransaction(_)));
        assert_eq!(tree, before);
        assert_eq!(network.accepted_writes(), 0);
    }
}
