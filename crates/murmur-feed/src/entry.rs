//! Feed entry types.

use serde::{Deserialize, Serialize};

/// Position of an entry in a log, assigned by the log on append.
pub type Sequence = u64;

/// Address of a replicated log (e.g. `/murmur-feed/3fa1c0d2e4b5a6f7/tweets`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogAddress(String);

impl LogAddress {
    /// Wrap an address string.
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    /// Derive a fresh address for a log called `name`.
    ///
    /// `salt` distinguishes logs with the same name created by different
    /// writers.
    pub fn derive(name: &str, salt: &[u8]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(salt);
        hasher.update(b":");
        hasher.update(name.as_bytes());
        let hash = hasher.finalize();
        Self(format!("/murmur-feed/{}/{}", hex::encode(&hash.as_bytes()[..8]), name))
    }

    /// Get the address as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The log name (last path component).
    pub fn name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }
}

impl std::fmt::Display for LogAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// An entry as stored by the log: sequence plus undecoded payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEntry {
    /// Sequence assigned by the log.
    pub sequence: Sequence,
    /// Encoded payload.
    pub payload: Vec<u8>,
}

/// A decoded feed entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEntry<P> {
    /// Sequence assigned by the log.
    pub sequence: Sequence,
    /// Decoded payload.
    pub payload: P,
}

/// High-water mark of delivered entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor(Option<Sequence>);

impl Cursor {
    /// A cursor before the first entry.
    pub const fn start() -> Self {
        Self(None)
    }

    /// A cursor after `sequence`.
    pub const fn at(sequence: Sequence) -> Self {
        Self(Some(sequence))
    }

    /// Highest delivered sequence, if any.
    pub const fn last(&self) -> Option<Sequence> {
        self.0
    }

    /// The first sequence not yet delivered.
    pub fn next_sequence(&self) -> Sequence {
        self.0.map_or(0, |s| s + 1)
    }

    /// Move past `sequence`. Never moves backwards.
    pub fn advance(&mut self, sequence: Sequence) {
        if self.0.map_or(true, |s| sequence > s) {
            self.0 = Some(sequence);
        }
    }
}

impl std::fmt::Display for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            Some(s) => write!(f, "{}", s),
            None => write!(f, "start"),
        }
    }
}
