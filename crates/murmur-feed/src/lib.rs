//! Murmur Feed - Replicated Feed Synchronization
//!
//! Append-only logs replicated between peers, and the synchronizer that
//! turns their change signals into ordered, exactly-once delivery.
//!
//! # Overview
//!
//! - [`ReplicatedLog`] / [`LogStore`]: the log collaborator
//! - [`FeedSynchronizer`]: cursor-based rescans delivering each entry once, in order
//! - [`CursorStore`]: optional cursor durability (memory or RocksDB)
//! - [`TweetFeed`]: a user's feed of [`Tweet`]s
//! - [`MemoryLog`] / [`MemoryLogStore`]: in-process logs for development and tests

pub mod cursor;
pub mod entry;
pub mod error;
pub mod log;
pub mod memory;
pub mod sync;
pub mod tweet;

pub use cursor::{CursorStore, MemoryCursorStore, RocksCursorStore, ScopedCursorStore};
pub use entry::{Cursor, FeedEntry, LogAddress, RawEntry, Sequence};
pub use error::{Error, Result};
pub use log::{LogEvent, LogStore, ReplicatedLog};
pub use memory::{MemoryLog, MemoryLogStore};
pub use sync::{FeedObserver, FeedSynchronizer, Subscription, SyncConfig};
pub use tweet::{Tweet, TweetFeed, TWEET_LOG_NAME};
