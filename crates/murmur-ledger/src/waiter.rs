//! Tip convergence waiting.
//!
//! After a local write, the new root has to propagate before other nodes
//! report it. [`TipWaiter`] polls the session until the identity's observed
//! root equals the expected one, or the attempt budget runs out.
//!
//! # Pacing
//!
//! Attempt `k` (1-based) runs at `k × poll_interval` after the wait starts,
//! and additionally waits for the network's next update round before looking
//! up the root. The whole wait is cut off at `max_attempts × poll_interval`
//! (30s at defaults) even if the network stops producing update rounds;
//! that is also the bound named by the timeout error.
//!
//! # Outcomes per attempt
//!
//! | lookup result            | action                              |
//! |--------------------------|-------------------------------------|
//! | root == expected         | succeed immediately                 |
//! | root != expected         | count the attempt, try again        |
//! | not found                | transient: count the attempt, retry |
//! | any other error          | fail with `Propagation`, no retry   |

use crate::error::{Error, Result};
use crate::session::Session;
use crate::tree::{ChainTree, Transaction};
use crate::types::{Did, Receipt, StateRoot};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, timeout_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Bounds for convergence waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitConfig {
    /// Maximum number of lookups before giving up.
    pub max_attempts: u32,
    /// Spacing between lookups.
    pub poll_interval: Duration,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            max_attempts: 60,
            poll_interval: Duration::from_millis(500),
        }
    }
}

impl WaitConfig {
    /// Tight bounds for tests.
    #[must_use]
    pub fn fast() -> Self {
        Self {
            max_attempts: 20,
            poll_interval: Duration::from_millis(10),
        }
    }

    /// Set the attempt budget.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Set the poll interval.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Worst-case time spent waiting.
    pub fn bound(&self) -> Duration {
        self.poll_interval.saturating_mul(self.max_attempts)
    }
}

/// Waits for state roots to converge across the community.
#[derive(Debug, Clone)]
pub struct TipWaiter {
    session: Arc<Session>,
    config: WaitConfig,
}

impl TipWaiter {
    /// Create a waiter over a shared session.
    pub fn new(session: Arc<Session>, config: WaitConfig) -> Self {
        Self { session, config }
    }

    /// The configured bounds.
    pub fn config(&self) -> WaitConfig {
        self.config
    }

    /// The session this waiter polls.
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Wait until `did` is observed at `expected`.
    pub async fn wait_for_tip(&self, did: &Did, expected: &StateRoot) -> Result<()> {
        self.wait_for_tip_until(did, expected, &CancellationToken::new())
            .await
    }

    /// Like [`wait_for_tip`](Self::wait_for_tip), abandoning with
    /// [`Error::Cancelled`] once `cancel` fires.
    pub async fn wait_for_tip_until(
        &self,
        did: &Did,
        expected: &StateRoot,
        cancel: &CancellationToken,
    ) -> Result<()> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(did = %did, "Convergence wait cancelled");
                Err(Error::Cancelled)
            }
            result = self.poll_until_converged(did, expected) => result,
        }
    }

    async fn poll_until_converged(&self, did: &Did, expected: &StateRoot) -> Result<()> {
        let max_attempts = self.config.max_attempts;
        debug!(did = %did, expected = %expected, max_attempts, "Waiting for community tip");

        let start = Instant::now();
        // A network that stops producing rounds must not stretch the wait.
        let attempts = self.attempts(did, expected, start);
        if let Ok(result) = timeout_at(start + self.config.bound(), attempts).await {
            return result;
        }

        warn!(did = %did, attempts = max_attempts, "Rejecting convergence wait: timeout");
        Err(self.timeout(did))
    }

    async fn attempts(&self, did: &Did, expected: &StateRoot, start: Instant) -> Result<()> {
        let WaitConfig {
            max_attempts,
            poll_interval,
        } = self.config;

        let mut pace = interval_at(start + poll_interval, poll_interval);
        pace.set_missed_tick_behavior(MissedTickBehavior::Delay);

        for attempt in 1..=max_attempts {
            pace.tick().await;
            self.session.next_update().await?;

            match self.session.get_tip(did).await {
                Ok(root) if root == *expected => {
                    info!(did = %did, root = %root, attempt, "Tips matched");
                    return Ok(());
                }
                Ok(root) => {
                    trace!(did = %did, observed = %root, attempt, "Tips did not match, retrying");
                }
                Err(Error::NotFound(_)) => {
                    trace!(did = %did, attempt, "Identity not visible yet, retrying");
                }
                Err(Error::Propagation { reason, .. }) => {
                    warn!(did = %did, attempt, %reason, "Tip lookup failed");
                    return Err(Error::Propagation {
                        did: did.clone(),
                        reason,
                    });
                }
                Err(other) => {
                    warn!(did = %did, attempt, error = %other, "Tip lookup failed");
                    return Err(Error::Propagation {
                        did: did.clone(),
                        reason: other.to_string(),
                    });
                }
            }
        }

        warn!(did = %did, attempts = max_attempts, "Rejecting convergence wait: timeout");
        Err(self.timeout(did))
    }

    fn timeout(&self, did: &Did) -> Error {
        Error::Timeout {
            did: did.clone(),
            attempts: self.config.max_attempts,
            bound: self.config.bound(),
        }
    }
}

/// Play `txs` against `tree` and wait for the community to pick up the change.
pub async fn submit_and_wait(
    waiter: &TipWaiter,
    tree: &mut ChainTree,
    txs: &[Transaction],
) -> Result<Receipt> {
    let receipt = waiter.session().submit(tree, txs).await?;
    waiter.wait_for_tip(&receipt.did, &receipt.new_root).await?;
    Ok(receipt)
}
