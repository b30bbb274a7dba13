//! Replicated append-only logs.
//!
//! A log is owned by one writer and replicated to peers. Appends and
//! replication both raise change signals, but a signal carries no payload
//! and says nothing about which entries arrived: consumers rescan.

use crate::entry::{LogAddress, RawEntry, Sequence};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Change signal raised by a log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogEvent {
    /// The local writer appended an entry.
    Appended,
    /// Entries arrived from a peer.
    Replicated,
}

/// An append-only log that may be replicated from peers.
#[async_trait]
pub trait ReplicatedLog: Send + Sync {
    /// Address peers use to open this log.
    fn address(&self) -> &LogAddress;

    /// Append an encoded payload, returning the sequence it was assigned.
    async fn append(&self, payload: Vec<u8>) -> Result<Sequence>;

    /// Read up to `limit` entries in sequence order, starting at `from`.
    async fn scan(&self, from: Sequence, limit: usize) -> Result<Vec<RawEntry>>;

    /// Subscribe to change signals.
    ///
    /// Signals may be coalesced or delivered more than once.
    fn events(&self) -> broadcast::Receiver<LogEvent>;

    /// Stop accepting appends and end every event stream.
    async fn close(&self) -> Result<()>;
}

/// Creates and opens logs by address.
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Create a new log owned by this store.
    async fn create(&self, name: &str) -> Result<Arc<dyn ReplicatedLog>>;

    /// Open an existing log by address.
    async fn open(&self, address: &LogAddress) -> Result<Arc<dyn ReplicatedLog>>;
}
