//! Error types for murmur-feed.

use crate::entry::Sequence;
use thiserror::Error;

/// Result type for murmur-feed operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while reading or writing feeds.
#[derive(Debug, Error)]
pub enum Error {
    /// Reading or appending to the log failed. The next rescan retries.
    #[error("transport error: {0}")]
    Transport(String),

    /// A payload could not be encoded for appending.
    #[error("encode error: {0}")]
    Encode(#[source] serde_json::Error),

    /// A log entry did not decode into the expected payload.
    #[error("entry {sequence} is malformed: {source}")]
    Decode {
        sequence: Sequence,
        #[source]
        source: serde_json::Error,
    },

    /// No feed exists at the address.
    #[error("unknown feed: {0}")]
    UnknownFeed(String),

    /// The feed or log has been closed.
    #[error("feed is closed")]
    Closed,

    /// Cursor storage failed.
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<rocksdb::Error> for Error {
    fn from(e: rocksdb::Error) -> Self {
        Error::Storage(e.to_string())
    }
}
