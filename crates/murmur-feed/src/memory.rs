//! In-process logs for development and tests.

use crate::entry::{LogAddress, RawEntry, Sequence};
use crate::error::{Error, Result};
use crate::log::{LogEvent, LogStore, ReplicatedLog};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// Capacity of each log's signal channel. Slow receivers see `Lagged`.
const EVENT_CAPACITY: usize = 64;

/// An in-memory replicated log.
#[derive(Debug)]
pub struct MemoryLog {
    address: LogAddress,
    entries: RwLock<Vec<RawEntry>>,
    events: Mutex<Option<broadcast::Sender<LogEvent>>>,
    scan_failure: Mutex<Option<Sequence>>,
}

impl MemoryLog {
    /// Create an empty log at `address`.
    pub fn new(address: LogAddress) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Arc::new(Self {
            address,
            entries: RwLock::new(Vec::new()),
            events: Mutex::new(Some(events)),
            scan_failure: Mutex::new(None),
        })
    }

    /// Number of entries in the log.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the log is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Make every scan starting at or after `from` fail (or clear with `None`).
    pub fn fail_scans_from(&self, from: Option<Sequence>) {
        *self.scan_failure.lock() = from;
    }

    /// Raise a signal without changing the log.
    pub fn notify(&self, event: LogEvent) {
        if let Some(events) = self.events.lock().as_ref() {
            // No receivers is fine.
            let _ = events.send(event);
        }
    }

    /// Copy entries this replica is missing from `source`.
    ///
    /// Returns the number of entries received. Raises a single
    /// [`LogEvent::Replicated`] signal if any arrived.
    pub fn replicate_from(&self, source: &MemoryLog) -> usize {
        let received = {
            let theirs = source.entries.read();
            let mut ours = self.entries.write();
            let missing: Vec<RawEntry> = theirs[ours.len().min(theirs.len())..].to_vec();
            ours.extend(missing.iter().cloned());
            missing.len()
        };

        if received > 0 {
            debug!(address = %self.address, received, "Replicated entries");
            self.notify(LogEvent::Replicated);
        }
        received
    }
}

#[async_trait]
impl ReplicatedLog for MemoryLog {
    fn address(&self) -> &LogAddress {
        &self.address
    }

    async fn append(&self, payload: Vec<u8>) -> Result<Sequence> {
        let events = self.events.lock().clone().ok_or(Error::Closed)?;
        let sequence = {
            let mut entries = self.entries.write();
            let sequence = entries.len() as Sequence;
            entries.push(RawEntry { sequence, payload });
            sequence
        };

        trace!(address = %self.address, sequence, "Appended entry");
        let _ = events.send(LogEvent::Appended);
        Ok(sequence)
    }

    async fn scan(&self, from: Sequence, limit: usize) -> Result<Vec<RawEntry>> {
        if let Some(failing) = *self.scan_failure.lock() {
            if from >= failing {
                return Err(Error::Transport(format!(
                    "scan of {} from {} failed",
                    self.address, from
                )));
            }
        }

        let entries = self.entries.read();
        let start = usize::try_from(from).unwrap_or(usize::MAX).min(entries.len());
        let end = start.saturating_add(limit).min(entries.len());
        Ok(entries[start..end].to_vec())
    }

    fn events(&self) -> broadcast::Receiver<LogEvent> {
        match self.events.lock().as_ref() {
            Some(events) => events.subscribe(),
            // Closed: the sender drops here, so the receiver reports Closed.
            None => broadcast::channel(1).1,
        }
    }

    async fn close(&self) -> Result<()> {
        if self.events.lock().take().is_some() {
            debug!(address = %self.address, "Closed log");
        }
        Ok(())
    }
}

/// A set of in-memory logs shared by every peer handle cloned from it.
///
/// Each handle creates logs under its own peer name; any handle can open
/// any log by address.
#[derive(Debug, Clone)]
pub struct MemoryLogStore {
    peer: String,
    logs: Arc<RwLock<HashMap<LogAddress, Arc<MemoryLog>>>>,
    created: Arc<AtomicU64>,
}

impl MemoryLogStore {
    /// Create an empty store for `peer`.
    pub fn new(peer: impl Into<String>) -> Self {
        Self {
            peer: peer.into(),
            logs: Arc::new(RwLock::new(HashMap::new())),
            created: Arc::new(AtomicU64::new(0)),
        }
    }

    /// A handle for another peer sharing the same logs.
    pub fn join(&self, peer: impl Into<String>) -> Self {
        Self {
            peer: peer.into(),
            logs: Arc::clone(&self.logs),
            created: Arc::clone(&self.created),
        }
    }

    /// Peer name used when creating logs.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Look up the concrete log at `address`.
    pub fn log(&self, address: &LogAddress) -> Option<Arc<MemoryLog>> {
        self.logs.read().get(address).cloned()
    }

    /// Create a log and return the concrete handle.
    pub fn create_log(&self, name: &str) -> Arc<MemoryLog> {
        let n = self.created.fetch_add(1, Ordering::Relaxed);
        let salt = format!("{}:{}", self.peer, n);
        let address = LogAddress::derive(name, salt.as_bytes());
        let log = MemoryLog::new(address.clone());
        self.logs.write().insert(address.clone(), Arc::clone(&log));
        debug!(peer = %self.peer, %address, "Created log");
        log
    }
}

#[async_trait]
impl LogStore for MemoryLogStore {
    async fn create(&self, name: &str) -> Result<Arc<dyn ReplicatedLog>> {
        Ok(self.create_log(name) as Arc<dyn ReplicatedLog>)
    }

    async fn open(&self, address: &LogAddress) -> Result<Arc<dyn ReplicatedLog>> {
        self.log(address)
            .map(|log| log as Arc<dyn ReplicatedLog>)
            .ok_or_else(|| Error::UnknownFeed(address.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::RecvError;

    fn log() -> Arc<MemoryLog> {
        MemoryLog::new(LogAddress::new("/murmur-feed/test/tweets"))
    }

    #[tokio::test]
    async fn append_assigns_sequences() {
        let log = log();
        assert_eq!(log.append(b"a".to_vec()).await.unwrap(), 0);
        assert_eq!(log.append(b"b".to_vec()).await.unwrap(), 1);

        let page = log.scan(1, 10).await.unwrap();
        assert_eq!(page, vec![RawEntry { sequence: 1, payload: b"b".to_vec() }]);
        assert!(log.scan(5, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn scan_respects_limit() {
        let log = log();
        for i in 0..5u8 {
            log.append(vec![i]).await.unwrap();
        }
        let page = log.scan(1, 2).await.unwrap();
        assert_eq!(page.iter().map(|e| e.sequence).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[tokio::test]
    async fn injected_scan_failure() {
        let log = log();
        log.append(b"a".to_vec()).await.unwrap();
        log.fail_scans_from(Some(0));
        assert!(matches!(log.scan(0, 10).await, Err(Error::Transport(_))));
        log.fail_scans_from(None);
        assert_eq!(log.scan(0, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn append_raises_signal() {
        let log = log();
        let mut events = log.events();
        log.append(b"a".to_vec()).await.unwrap();
        assert_eq!(events.recv().await.unwrap(), LogEvent::Appended);
    }

    #[tokio::test]
    async fn replication_copies_missing_entries() {
        let origin = log();
        let replica = log();
        let mut events = replica.events();

        origin.append(b"a".to_vec()).await.unwrap();
        origin.append(b"b".to_vec()).await.unwrap();

        assert_eq!(replica.replicate_from(&origin), 2);
        assert_eq!(events.recv().await.unwrap(), LogEvent::Replicated);
        assert_eq!(replica.replicate_from(&origin), 0);
        assert_eq!(replica.len(), 2);
    }

    #[tokio::test]
    async fn close_ends_streams_and_appends() {
        let log = log();
        let mut events = log.events();
        log.close().await.unwrap();

        assert!(matches!(events.recv().await, Err(RecvError::Closed)));
        assert!(matches!(log.events().recv().await, Err(RecvError::Closed)));
        assert!(matches!(log.append(b"a".to_vec()).await, Err(Error::Closed)));
    }

    #[tokio::test]
    async fn store_shares_logs_between_peers() {
        let alice = MemoryLogStore::new("alice");
        let bob = alice.join("bob");

        let feed = alice.create("tweets").await.unwrap();
        let opened = bob.open(feed.address()).await.unwrap();
        feed.append(b"hello".to_vec()).await.unwrap();
        assert_eq!(opened.scan(0, 10).await.unwrap().len(), 1);

        let other = bob.create("tweets").await.unwrap();
        assert_ne!(other.address(), feed.address());

        let missing = LogAddress::new("/murmur-feed/none/tweets");
        assert!(matches!(bob.open(&missing).await, Err(Error::UnknownFeed(_))));
    }
}
