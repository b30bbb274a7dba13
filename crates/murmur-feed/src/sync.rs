//! Feed Synchronizer
//!
//! Turns a replicated log's payload-free change signals into an ordered,
//! duplicate-free stream of decoded entries.
//!
//! # Delivery
//!
//! ```text
//!   Appended / Replicated signal (possibly coalesced or repeated)
//!          │
//!          ▼
//!   rescan ── scan(cursor+1, page_size) ──► decode ──► observers
//!     ▲                                        │
//!     └──────── cursor advanced per entry ◄────┘
//! ```
//!
//! The cursor is the only deduplication mechanism. Rescans are serialized,
//! every entry is delivered before the cursor moves past it, and a failed
//! scan leaves the cursor at the last delivered entry so the next rescan
//! resumes from there.
//!
//! # Example
//!
//! ```rust,ignore
//! let sync = FeedSynchronizer::<Tweet>::open(log, SyncConfig::default()).await?;
//! let _subscription = sync.subscribe(|entry: &FeedEntry<Tweet>| {
//!     println!("{}: {}", entry.sequence, entry.payload.message);
//! });
//! sync.publish(&tweet).await?;
//! ```

use crate::cursor::CursorStore;
use crate::entry::{Cursor, FeedEntry, LogAddress, RawEntry, Sequence};
use crate::error::{Error, Result};
use crate::log::{LogEvent, ReplicatedLog};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Configuration for a feed synchronizer.
#[derive(Debug, Clone, Copy)]
pub struct SyncConfig {
    /// Maximum entries read by one log scan.
    pub page_size: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self { page_size: 256 }
    }
}

impl SyncConfig {
    /// Small pages for tests, so rescans span several scans.
    #[must_use]
    pub fn fast() -> Self {
        Self { page_size: 2 }
    }

    /// Set the scan page size (at least 1).
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }
}

/// Receives newly observed feed entries.
pub trait FeedObserver<P>: Send + Sync {
    fn on_entry(&self, entry: &FeedEntry<P>);
}

impl<P, F> FeedObserver<P> for F
where
    F: Fn(&FeedEntry<P>) + Send + Sync,
{
    fn on_entry(&self, entry: &FeedEntry<P>) {
        self(entry)
    }
}

trait Unsubscribe: Send + Sync {
    fn unsubscribe(&self, id: u64);
}

struct ObserverSet<P> {
    next_id: AtomicU64,
    observers: Mutex<Vec<(u64, Arc<dyn FeedObserver<P>>)>>,
}

impl<P> ObserverSet<P> {
    fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            observers: Mutex::new(Vec::new()),
        }
    }

    fn insert(&self, observer: Arc<dyn FeedObserver<P>>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.observers.lock().push((id, observer));
        id
    }

    fn snapshot(&self) -> Vec<Arc<dyn FeedObserver<P>>> {
        self.observers.lock().iter().map(|(_, o)| Arc::clone(o)).collect()
    }

    fn len(&self) -> usize {
        self.observers.lock().len()
    }

    fn clear(&self) {
        self.observers.lock().clear();
    }
}

impl<P> Unsubscribe for ObserverSet<P> {
    fn unsubscribe(&self, id: u64) {
        self.observers.lock().retain(|(existing, _)| *existing != id);
    }
}

/// Handle for a registered observer. Dropping it unregisters the observer.
#[must_use = "dropping a Subscription unregisters the observer"]
pub struct Subscription {
    id: u64,
    set: Weak<dyn Unsubscribe>,
}

impl Subscription {
    /// Identifier of this subscription within its synchronizer.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Unregister the observer now.
    pub fn cancel(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(set) = self.set.upgrade() {
            set.unsubscribe(self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

fn decode<P: DeserializeOwned>(raw: &RawEntry) -> Result<FeedEntry<P>> {
    serde_json::from_slice(&raw.payload)
        .map(|payload| FeedEntry {
            sequence: raw.sequence,
            payload,
        })
        .map_err(|source| Error::Decode {
            sequence: raw.sequence,
            source,
        })
}

struct Shared<P> {
    log: Arc<dyn ReplicatedLog>,
    config: SyncConfig,
    cursor: tokio::sync::Mutex<Cursor>,
    observers: Arc<ObserverSet<P>>,
    cursor_store: Option<Arc<dyn CursorStore>>,
}

impl<P> Shared<P>
where
    P: DeserializeOwned + Send + Sync + 'static,
{
    /// Deliver every entry after the cursor, page by page.
    async fn rescan(&self) -> Result<usize> {
        let mut cursor = self.cursor.lock().await;
        let mut delivered = 0;
        let started_at = *cursor;

        let outcome = loop {
            let from = cursor.next_sequence();
            let page = match self.log.scan(from, self.config.page_size).await {
                Ok(page) => page,
                Err(e) => break Err(e),
            };
            let full = page.len() >= self.config.page_size;

            if let Err(e) = self.deliver_page(&mut cursor, &page, &mut delivered) {
                break Err(e);
            }
            if !full {
                break Ok(());
            }
        };

        let reached = *cursor;
        if reached != started_at {
            self.persist(&reached);
        }

        match outcome {
            Ok(()) => {
                if delivered > 0 {
                    debug!(feed = %self.log.address(), delivered, cursor = %reached, "Rescan delivered entries");
                }
                Ok(delivered)
            }
            Err(e) => {
                warn!(feed = %self.log.address(), cursor = %reached, error = %e, "Rescan failed");
                Err(e)
            }
        }
    }

    fn deliver_page(&self, cursor: &mut Cursor, page: &[RawEntry], delivered: &mut usize) -> Result<()> {
        for raw in page {
            let expected = cursor.next_sequence();
            if raw.sequence < expected {
                continue;
            }
            if raw.sequence > expected {
                return Err(Error::Transport(format!(
                    "log {} skipped from {} to {}",
                    self.log.address(),
                    expected,
                    raw.sequence
                )));
            }

            match decode::<P>(raw) {
                Ok(entry) => {
                    trace!(feed = %self.log.address(), sequence = entry.sequence, "Delivering entry");
                    for observer in self.observers.snapshot() {
                        observer.on_entry(&entry);
                    }
                    *delivered += 1;
                }
                // Never becomes valid, so it is skipped rather than retried.
                Err(e) => warn!(feed = %self.log.address(), error = %e, "Skipping malformed entry"),
            }
            cursor.advance(raw.sequence);
        }
        Ok(())
    }

    fn persist(&self, cursor: &Cursor) {
        if let Some(store) = &self.cursor_store {
            if let Err(e) = store.save(self.log.address(), *cursor) {
                warn!(feed = %self.log.address(), error = %e, "Failed to save cursor");
            }
        }
    }

    async fn run(self: Arc<Self>, mut events: broadcast::Receiver<LogEvent>, cancel: CancellationToken) {
        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                event = events.recv() => event,
            };

            match event {
                Ok(LogEvent::Appended) => trace!(feed = %self.log.address(), "Feed written"),
                Ok(LogEvent::Replicated) => debug!(feed = %self.log.address(), "Feed replicated"),
                Err(RecvError::Lagged(skipped)) => {
                    debug!(feed = %self.log.address(), skipped, "Coalesced feed signals")
                }
                Err(RecvError::Closed) => {
                    debug!(feed = %self.log.address(), "Feed signals ended");
                    break;
                }
            }

            // Failures are logged by rescan; the next signal retries.
            let _ = self.rescan().await;
        }
    }
}

/// Scan every entry up to `until` (inclusive), or to the tail.
///
/// Returns the decoded entries and the last sequence read.
async fn scan_prefix<P: DeserializeOwned>(
    log: &dyn ReplicatedLog,
    page_size: usize,
    until: Option<Sequence>,
) -> Result<(Vec<FeedEntry<P>>, Cursor)> {
    let mut entries = Vec::new();
    let mut cursor = Cursor::start();

    loop {
        let page = log.scan(cursor.next_sequence(), page_size).await?;
        let full = page.len() >= page_size;

        for raw in &page {
            if until.is_some_and(|last| raw.sequence > last) {
                return Ok((entries, cursor));
            }
            match decode(raw) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(feed = %log.address(), error = %e, "Skipping malformed entry"),
            }
            cursor.advance(raw.sequence);
        }

        if !full || page.is_empty() {
            return Ok((entries, cursor));
        }
    }
}

/// Keeps subscribers in step with a replicated log.
pub struct FeedSynchronizer<P> {
    shared: Arc<Shared<P>>,
    initial: Vec<FeedEntry<P>>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<P> FeedSynchronizer<P>
where
    P: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Attach to a log with an in-memory cursor.
    ///
    /// Every existing entry is scanned into [`initial_entries`](Self::initial_entries)
    /// and the cursor starts at the log's tail.
    pub async fn open(log: Arc<dyn ReplicatedLog>, config: SyncConfig) -> Result<Self> {
        Self::open_inner(log, config, None).await
    }

    /// Attach to a log, resuming from the cursor saved in `store`.
    ///
    /// With a saved cursor the initial snapshot stops at it and later
    /// entries are delivered by the first [`rescan`](Self::rescan).
    pub async fn open_with_store(
        log: Arc<dyn ReplicatedLog>,
        config: SyncConfig,
        store: Arc<dyn CursorStore>,
    ) -> Result<Self> {
        Self::open_inner(log, config, Some(store)).await
    }

    async fn open_inner(
        log: Arc<dyn ReplicatedLog>,
        config: SyncConfig,
        store: Option<Arc<dyn CursorStore>>,
    ) -> Result<Self> {
        let config = config.with_page_size(config.page_size);
        // Subscribe first so nothing appended during the scan goes unnoticed.
        let events = log.events();

        let saved = match &store {
            Some(store) => store.load(log.address())?,
            None => None,
        };
        let (initial, cursor) =
            scan_prefix::<P>(&*log, config.page_size, saved.and_then(|c| c.last())).await?;

        if saved.is_some_and(|saved| saved.last() > cursor.last()) {
            warn!(feed = %log.address(), cursor = %cursor, "Saved cursor is past the log tail, resetting");
        }
        if let Some(store) = &store {
            store.save(log.address(), cursor)?;
        }

        debug!(feed = %log.address(), entries = initial.len(), cursor = %cursor, "Opened feed");

        let shared = Arc::new(Shared {
            log,
            config,
            cursor: tokio::sync::Mutex::new(cursor),
            observers: Arc::new(ObserverSet::new()),
            cursor_store: store,
        });

        let cancel = CancellationToken::new();
        let task = tokio::spawn(Arc::clone(&shared).run(events, cancel.clone()));

        Ok(Self {
            shared,
            initial,
            cancel,
            task: Mutex::new(Some(task)),
        })
    }

    /// Address of the underlying log.
    pub fn address(&self) -> &LogAddress {
        self.shared.log.address()
    }

    /// Entries found by the initial scan.
    pub fn initial_entries(&self) -> &[FeedEntry<P>] {
        &self.initial
    }

    /// Current cursor.
    pub async fn cursor(&self) -> Cursor {
        *self.shared.cursor.lock().await
    }

    /// Number of registered observers.
    pub fn subscriber_count(&self) -> usize {
        self.shared.observers.len()
    }

    /// Register an observer for entries delivered after this call.
    pub fn subscribe<O>(&self, observer: O) -> Subscription
    where
        O: FeedObserver<P> + 'static,
    {
        let id = self.shared.observers.insert(Arc::new(observer));
        let set: Weak<dyn Unsubscribe> = Arc::downgrade(&self.shared.observers) as Weak<dyn Unsubscribe>;
        Subscription { id, set }
    }

    /// Forward delivered entries into a channel.
    pub fn subscribe_channel(&self) -> (Subscription, mpsc::UnboundedReceiver<FeedEntry<P>>)
    where
        P: Clone,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = self.subscribe(move |entry: &FeedEntry<P>| {
            let _ = tx.send(entry.clone());
        });
        (subscription, rx)
    }

    /// Deliver every entry after the cursor to the current observers.
    ///
    /// Returns the number of entries delivered. On failure the cursor stays
    /// at the last delivered entry.
    pub async fn rescan(&self) -> Result<usize> {
        if self.cancel.is_cancelled() {
            return Err(Error::Closed);
        }
        self.shared.rescan().await
    }

    /// Append a payload to the log.
    ///
    /// Observers see it through the log's signal like any replicated entry.
    pub async fn publish(&self, payload: &P) -> Result<Sequence> {
        if self.cancel.is_cancelled() {
            return Err(Error::Closed);
        }
        let bytes = serde_json::to_vec(payload).map_err(Error::Encode)?;
        let sequence = self.shared.log.append(bytes).await?;
        debug!(feed = %self.address(), sequence, "Published entry");
        Ok(sequence)
    }

    /// Read every decodable entry currently in the log.
    pub async fn entries(&self) -> Result<Vec<FeedEntry<P>>> {
        let (entries, _) = scan_prefix(&*self.shared.log, self.shared.config.page_size, None).await?;
        Ok(entries)
    }

    /// Stop following the log and drop every observer.
    ///
    /// The log itself stays open for other readers.
    pub async fn close(&self) {
        self.cancel.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        self.shared.observers.clear();
        debug!(feed = %self.address(), "Closed feed synchronizer");
    }
}

impl<P> Drop for FeedSynchronizer<P> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::MemoryCursorStore;
    use crate::memory::MemoryLog;
    use proptest::prelude::*;
    use std::time::Duration;

    type Seen = Arc<Mutex<Vec<Sequence>>>;

    fn new_log() -> Arc<MemoryLog> {
        MemoryLog::new(LogAddress::new("/murmur-feed/test/numbers"))
    }

    fn recorder(seen: &Seen) -> impl Fn(&FeedEntry<u32>) + Send + Sync + 'static {
        let seen = Arc::clone(seen);
        move |entry: &FeedEntry<u32>| seen.lock().push(entry.sequence)
    }

    async fn append(log: &MemoryLog, value: u32) {
        log.append(serde_json::to_vec(&value).unwrap()).await.unwrap();
    }

    #[tokio::test]
    async fn initial_scan_sets_cursor_to_tail() {
        let log = new_log();
        for i in 0..3 {
            append(&log, i).await;
        }

        let sync = FeedSynchronizer::<u32>::open(log, SyncConfig::fast()).await.unwrap();
        let values: Vec<u32> = sync.initial_entries().iter().map(|e| e.payload).collect();
        assert_eq!(values, vec![0, 1, 2]);
        assert_eq!(sync.cursor().await, Cursor::at(2));
    }

    #[tokio::test]
    async fn repeated_signals_deliver_each_entry_once() {
        let log = new_log();
        let sync = FeedSynchronizer::<u32>::open(log.clone(), SyncConfig::fast()).await.unwrap();
        let seen: Seen = Arc::default();
        let _sub = sync.subscribe(recorder(&seen));

        for i in 0..5 {
            append(&log, i).await;
        }
        for _ in 0..5 {
            log.notify(LogEvent::Replicated);
        }
        // Explicit rescan waits behind any signal-driven one.
        sync.rescan().await.unwrap();

        assert_eq!(*seen.lock(), vec![0, 1, 2, 3, 4]);
        assert_eq!(sync.cursor().await, Cursor::at(4));
    }

    #[tokio::test]
    async fn publish_delivers_through_signal_path() {
        let log = new_log();
        let sync = FeedSynchronizer::<u32>::open(log, SyncConfig::default()).await.unwrap();
        let (_sub, mut rx) = sync.subscribe_channel();

        assert_eq!(sync.publish(&7).await.unwrap(), 0);
        let entry = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry, FeedEntry { sequence: 0, payload: 7 });
    }

    #[tokio::test]
    async fn scan_failure_keeps_cursor_at_last_delivered() {
        let log = new_log();
        let sync = FeedSynchronizer::<u32>::open(log.clone(), SyncConfig::fast()).await.unwrap();
        let seen: Seen = Arc::default();
        let _sub = sync.subscribe(recorder(&seen));

        // Fail the second page of the rescan.
        log.fail_scans_from(Some(2));
        for i in 0..5 {
            append(&log, i).await;
        }
        let result = sync.rescan().await;
        assert!(matches!(result, Err(Error::Transport(_))));
        assert_eq!(*seen.lock(), vec![0, 1]);
        assert_eq!(sync.cursor().await, Cursor::at(1));

        log.fail_scans_from(None);
        sync.rescan().await.unwrap();
        assert_eq!(*seen.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn malformed_entry_is_skipped() {
        let log = new_log();
        let sync = FeedSynchronizer::<u32>::open(log.clone(), SyncConfig::default()).await.unwrap();
        let seen: Seen = Arc::default();
        let _sub = sync.subscribe(recorder(&seen));

        append(&log, 1).await;
        log.append(b"not json".to_vec()).await.unwrap();
        append(&log, 2).await;

        sync.rescan().await.unwrap();
        assert_eq!(*seen.lock(), vec![0, 2]);
        assert_eq!(sync.cursor().await, Cursor::at(2));
    }

    #[tokio::test]
    async fn dropped_subscription_stops_delivery() {
        let log = new_log();
        let sync = FeedSynchronizer::<u32>::open(log.clone(), SyncConfig::default()).await.unwrap();
        let kept: Seen = Arc::default();
        let dropped: Seen = Arc::default();
        let _kept = sync.subscribe(recorder(&kept));
        let sub = sync.subscribe(recorder(&dropped));
        assert_eq!(sync.subscriber_count(), 2);

        append(&log, 1).await;
        sync.rescan().await.unwrap();
        sub.cancel();
        assert_eq!(sync.subscriber_count(), 1);

        append(&log, 2).await;
        sync.rescan().await.unwrap();

        assert_eq!(*kept.lock(), vec![0, 1]);
        assert_eq!(*dropped.lock(), vec![0]);
    }

    #[tokio::test]
    async fn saved_cursor_resumes_delivery() {
        let log = new_log();
        let store: Arc<dyn CursorStore> = Arc::new(MemoryCursorStore::new());
        for i in 0..2 {
            append(&log, i).await;
        }

        {
            let sync = FeedSynchronizer::<u32>::open_with_store(log.clone(), SyncConfig::fast(), store.clone())
                .await
                .unwrap();
            assert_eq!(sync.initial_entries().len(), 2);
            sync.close().await;
        }

        // Written while nobody was following.
        append(&log, 2).await;
        append(&log, 3).await;

        let sync = FeedSynchronizer::<u32>::open_with_store(log, SyncConfig::fast(), store.clone())
            .await
            .unwrap();
        assert_eq!(sync.initial_entries().len(), 2);

        let seen: Seen = Arc::default();
        let _sub = sync.subscribe(recorder(&seen));
        assert_eq!(sync.rescan().await.unwrap(), 2);
        assert_eq!(*seen.lock(), vec![2, 3]);
        assert_eq!(store.load(sync.address()).unwrap(), Some(Cursor::at(3)));
    }

    #[tokio::test]
    async fn closed_synchronizer_rejects_calls() {
        let log = new_log();
        let sync = FeedSynchronizer::<u32>::open(log.clone(), SyncConfig::default()).await.unwrap();
        let _sub = sync.subscribe(|_: &FeedEntry<u32>| {});
        sync.close().await;

        assert_eq!(sync.subscriber_count(), 0);
        assert!(matches!(sync.rescan().await, Err(Error::Closed)));
        assert!(matches!(sync.publish(&1).await, Err(Error::Closed)));
        // The log is still usable by others.
        append(&log, 1).await;
    }

    #[derive(Debug, Clone)]
    enum Step {
        Append(u32),
        Signal,
        Rescan,
    }

    fn step() -> impl Strategy<Value = Step> {
        prop_oneof![
            any::<u32>().prop_map(Step::Append),
            Just(Step::Signal),
            Just(Step::Rescan),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn delivery_is_ordered_and_duplicate_free(
            preexisting in 0usize..4,
            steps in proptest::collection::vec(step(), 0..40),
            page_size in 1usize..5,
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();

            let (seen, appended) = runtime.block_on(async {
                let log = new_log();
                for i in 0..preexisting {
                    append(&log, i as u32).await;
                }

                let config = SyncConfig::default().with_page_size(page_size);
                let sync = FeedSynchronizer::<u32>::open(log.clone(), config).await.unwrap();
                let seen: Seen = Arc::default();
                let _sub = sync.subscribe(recorder(&seen));

                let mut appended = 0u64;
                for step in steps {
                    match step {
                        Step::Append(v) => {
                            append(&log, v).await;
                            appended += 1;
                        }
                        Step::Signal => log.notify(LogEvent::Replicated),
                        Step::Rescan => {
                            sync.rescan().await.unwrap();
                        }
                    }
                    tokio::task::yield_now().await;
                }
                sync.rescan().await.unwrap();

                let seen = seen.lock().clone();
                (seen, appended)
            });

            let start = preexisting as u64;
            let expected: Vec<Sequence> = (start..start + appended).collect();
            prop_assert_eq!(seen, expected);
        }
    }
}
