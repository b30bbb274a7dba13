//! In-process simulated community.
//!
//! [`MemoryNetwork`] stands in for a real ledger network in development and
//! tests. Accepted writes only become visible to [`LedgerNetwork::get_tip`]
//! after a configurable number of rounds, which is what makes convergence
//! waiting observable.
//!
//! ```text
//!  submit ──► accepted ──(propagation_rounds)──► visible ──► get_tip
//!                               ▲
//!                  round ticker ┘ (wakes next_update)
//! ```

use crate::error::{Error, NetworkError, Result};
use crate::network::{Connector, Environment, LedgerNetwork, SubmitResponse};
use crate::tree::{ChainTree, Transaction};
use crate::types::{Did, StateRoot};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, trace};

/// Configuration for a simulated community.
#[derive(Debug, Clone, Copy)]
pub struct MemoryNetworkConfig {
    /// Time between update rounds.
    pub round_interval: Duration,
    /// Rounds before an accepted write is visible to lookups.
    pub propagation_rounds: u64,
}

impl Default for MemoryNetworkConfig {
    fn default() -> Self {
        Self {
            round_interval: Duration::from_millis(100),
            propagation_rounds: 2,
        }
    }
}

impl MemoryNetworkConfig {
    /// Short rounds for tests.
    #[must_use]
    pub fn fast() -> Self {
        Self {
            round_interval: Duration::from_millis(10),
            propagation_rounds: 1,
        }
    }

    /// Set the round interval.
    #[must_use]
    pub fn with_round_interval(mut self, interval: Duration) -> Self {
        self.round_interval = interval;
        self
    }

    /// Set the number of rounds a write takes to become visible.
    #[must_use]
    pub fn with_propagation_rounds(mut self, rounds: u64) -> Self {
        self.propagation_rounds = rounds;
        self
    }
}

#[derive(Debug, Default)]
struct NetworkState {
    round: u64,
    /// Latest accepted tree per identity.
    accepted: HashMap<Did, ChainTree>,
    /// Tree per identity as reported to lookups.
    visible: HashMap<Did, ChainTree>,
    /// Writes waiting to become visible, with the round they land in.
    pending: Vec<(u64, ChainTree)>,
    writes: usize,
    lookup_failure: Option<NetworkError>,
}

/// A simulated ledger community.
#[derive(Debug)]
pub struct MemoryNetwork {
    config: MemoryNetworkConfig,
    state: Mutex<NetworkState>,
    rounds: watch::Sender<u64>,
}

impl MemoryNetwork {
    /// Create a network whose rounds only advance through [`advance_round`](Self::advance_round).
    pub fn manual(config: MemoryNetworkConfig) -> Arc<Self> {
        let (rounds, _) = watch::channel(0);
        Arc::new(Self {
            config,
            state: Mutex::new(NetworkState::default()),
            rounds,
        })
    }

    /// Create a network and spawn its round ticker on the current runtime.
    ///
    /// The ticker stops once the last handle to the network is dropped.
    pub fn spawn(config: MemoryNetworkConfig) -> Arc<Self> {
        let network = Self::manual(config);
        let weak: Weak<Self> = Arc::downgrade(&network);
        let interval = config.round_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            loop {
                ticker.tick().await;
                match weak.upgrade() {
                    Some(network) => network.advance_round(),
                    None => break,
                }
            }
        });

        network
    }

    /// Advance one round, publishing every write that is due.
    pub fn advance_round(&self) {
        let round = {
            let mut state = self.state.lock();
            state.round += 1;
            let round = state.round;

            let (due, waiting): (Vec<_>, Vec<_>) =
                state.pending.drain(..).partition(|(at, _)| *at <= round);
            state.pending = waiting;
            for (_, tree) in due {
                trace!(did = %tree.did, root = %tree.tip, round, "Write became visible");
                state.visible.insert(tree.did.clone(), tree);
            }
            round
        };
        self.rounds.send_replace(round);
    }

    /// Current round number.
    pub fn round(&self) -> u64 {
        self.state.lock().round
    }

    /// Number of writes accepted so far.
    pub fn accepted_writes(&self) -> usize {
        self.state.lock().writes
    }

    /// Make every lookup fail with `failure` (or clear it with `None`).
    pub fn fail_lookups(&self, failure: Option<NetworkError>) {
        self.state.lock().lookup_failure = failure;
    }

    /// Insert a tree that is immediately accepted and visible.
    pub fn seed(&self, tree: ChainTree) {
        let mut tree = tree;
        tree.key = None;
        let mut state = self.state.lock();
        state.accepted.insert(tree.did.clone(), tree.clone());
        state.visible.insert(tree.did.clone(), tree);
    }
}

#[async_trait]
impl LedgerNetwork for MemoryNetwork {
    async fn get_tip(&self, did: &Did) -> std::result::Result<StateRoot, NetworkError> {
        let state = self.state.lock();
        if let Some(failure) = &state.lookup_failure {
            return Err(failure.clone());
        }
        state
            .visible
            .get(did)
            .map(|tree| tree.tip)
            .ok_or(NetworkError::NotFound)
    }

    async fn next_update(&self) {
        let mut rounds = self.rounds.subscribe();
        // The sender lives as long as `self`, so this only returns on a new round.
        let _ = rounds.changed().await;
    }

    async fn submit(
        &self,
        tree: &ChainTree,
        txs: &[Transaction],
    ) -> std::result::Result<SubmitResponse, NetworkError> {
        let mut state = self.state.lock();

        let mut next = match state.accepted.get(&tree.did) {
            Some(current) if current.tip != tree.tip => {
                return Err(NetworkError::Rejected(format!(
                    "stale tip {} for {}, current is {}",
                    tree.tip, tree.did, current.tip
                )));
            }
            Some(current) => current.clone(),
            None => {
                let mut fresh = tree.clone();
                fresh.key = None;
                fresh
            }
        };

        let root = next
            .apply(txs)
            .map_err(|e| NetworkError::Rejected(e.to_string()))?;

        let due = state.round + self.config.propagation_rounds;
        state.accepted.insert(next.did.clone(), next.clone());
        if self.config.propagation_rounds == 0 {
            state.visible.insert(next.did.clone(), next);
        } else {
            state.pending.push((due, next));
        }
        state.writes += 1;

        debug!(did = %tree.did, root = %root, due_round = due, "Accepted write");
        Ok(SubmitResponse::signed(root))
    }

    async fn load_tree(
        &self,
        did: &Did,
        tip: &StateRoot,
    ) -> std::result::Result<ChainTree, NetworkError> {
        let state = self.state.lock();
        let found = [state.visible.get(did), state.accepted.get(did)]
            .into_iter()
            .flatten()
            .find(|tree| tree.tip == *tip)
            .cloned();
        found.ok_or(NetworkError::NotFound)
    }
}

/// Connector that hands out an in-process development community.
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    network: Arc<MemoryNetwork>,
}

impl MemoryConnector {
    /// Wrap a shared simulated network.
    pub fn new(network: Arc<MemoryNetwork>) -> Self {
        Self { network }
    }

    /// The network handed out by this connector.
    pub fn network(&self) -> Arc<MemoryNetwork> {
        Arc::clone(&self.network)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, environment: Environment) -> Result<Arc<dyn LedgerNetwork>> {
        match environment {
            Environment::Development => {
                info!("Using development community");
                Ok(self.network.clone() as Arc<dyn LedgerNetwork>)
            }
            Environment::Production => Err(Error::Connection(
                "the in-process community cannot serve production".into(),
            )),
        }
    }
}
