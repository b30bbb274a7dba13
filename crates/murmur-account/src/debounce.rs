//! Debounced Lookup
//!
//! Runs a lookup for the latest input once typing pauses, and makes sure a
//! slow answer for old input never describes newer input.
//!
//! ```text
//!   input ─► (re)arm delay ─► fire ─► lookup(current) ─► result
//!                                          │                │
//!                                          │     matches current? ── yes ─► emit
//!                                          │                │
//!                                          └──── no: look up current now
//! ```
//!
//! At most one lookup is in flight. A timer that fires during a lookup
//! issues nothing; the stale result that lookup produces triggers the
//! lookup for the current value instead.

use futures::future::{BoxFuture, FutureExt};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Configuration for a debounced lookup.
#[derive(Debug, Clone, Copy)]
pub struct DebounceConfig {
    /// Quiet period after the last input before the lookup runs.
    pub delay: Duration,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(150),
        }
    }
}

impl DebounceConfig {
    /// Short delay for tests.
    #[must_use]
    pub fn fast() -> Self {
        Self {
            delay: Duration::from_millis(10),
        }
    }

    /// Set the delay.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// A lookup result for the input that is still current.
#[derive(Debug, Clone, PartialEq)]
pub struct LookupResult<T> {
    /// The input that was looked up.
    pub value: String,
    /// What the lookup returned.
    pub output: T,
}

type LookupFn<T> = Arc<dyn Fn(String) -> BoxFuture<'static, T> + Send + Sync>;

struct Actor<T> {
    delay: Duration,
    lookup: LookupFn<T>,
    results: mpsc::UnboundedSender<LookupResult<T>>,
    current: String,
    deadline: Option<Instant>,
    in_flight: Option<BoxFuture<'static, (String, T)>>,
}

impl<T: Send + 'static> Actor<T> {
    async fn run(mut self, mut inputs: mpsc::UnboundedReceiver<String>, cancel: CancellationToken) {
        loop {
            let deadline = self.deadline;
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                input = inputs.recv() => match input {
                    Some(value) => self.on_input(value),
                    None => break,
                },
                (queried, output) = settle(&mut self.in_flight) => {
                    self.in_flight = None;
                    self.on_result(queried, output);
                }
                _ = wait_until(deadline) => {
                    self.deadline = None;
                    self.on_timer();
                }
            }
        }
        trace!("Debounced lookup stopped");
    }

    fn on_input(&mut self, value: String) {
        self.current = value;
        if self.current.is_empty() {
            self.deadline = None;
        } else {
            self.deadline = Some(Instant::now() + self.delay);
        }
    }

    fn on_timer(&mut self) {
        if self.in_flight.is_some() {
            trace!(value = %self.current, "Lookup in flight, deferring");
            return;
        }
        debug!(value = %self.current, "Debounce fired");
        self.issue();
    }

    fn on_result(&mut self, queried: String, output: T) {
        if queried != self.current {
            debug!(queried = %queried, current = %self.current, "Discarding stale lookup result");
            if !self.current.is_empty() && self.deadline.is_none() {
                self.issue();
            }
            return;
        }

        // Retyping the same value re-armed the timer; this answer covers it.
        self.deadline = None;

        // Nobody listening is fine.
        let _ = self.results.send(LookupResult {
            value: queried,
            output,
        });
    }

    fn issue(&mut self) {
        let value = self.current.clone();
        let lookup = Arc::clone(&self.lookup);
        self.in_flight = Some(
            async move {
                let output = lookup(value.clone()).await;
                (value, output)
            }
            .boxed(),
        );
    }
}

async fn settle<T>(in_flight: &mut Option<BoxFuture<'static, T>>) -> T {
    match in_flight {
        Some(lookup) => lookup.await,
        None => std::future::pending().await,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Debounces input and looks up the latest value.
///
/// Results for the current input arrive on the receiver returned by
/// [`spawn`](Self::spawn). Dropping the handle stops the lookup task.
#[derive(Debug)]
pub struct DebouncedLookup {
    inputs: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
}

impl DebouncedLookup {
    /// Spawn the lookup task on the current runtime.
    pub fn spawn<T, F, Fut>(config: DebounceConfig, lookup: F) -> (Self, mpsc::UnboundedReceiver<LookupResult<T>>)
    where
        T: Send + 'static,
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        Self::spawn_with_cancel(config, lookup, CancellationToken::new())
    }

    /// Like [`spawn`](Self::spawn), stopping when `cancel` fires.
    pub fn spawn_with_cancel<T, F, Fut>(
        config: DebounceConfig,
        lookup: F,
        cancel: CancellationToken,
    ) -> (Self, mpsc::UnboundedReceiver<LookupResult<T>>)
    where
        T: Send + 'static,
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        let (inputs, input_rx) = mpsc::unbounded_channel();
        let (results, result_rx) = mpsc::unbounded_channel();

        let actor = Actor {
            delay: config.delay,
            lookup: Arc::new(move |value| lookup(value).boxed()),
            results,
            current: String::new(),
            deadline: None,
            in_flight: None,
        };
        tokio::spawn(actor.run(input_rx, cancel.clone()));

        (Self { inputs, cancel }, result_rx)
    }

    /// Record `value` as the current input and restart the delay.
    ///
    /// An empty value cancels the pending lookup.
    pub fn input(&self, value: impl Into<String>) {
        let _ = self.inputs.send(value.into());
    }

    /// Stop the lookup task. Later results are never delivered.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether the lookup task has been stopped.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for DebouncedLookup {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
