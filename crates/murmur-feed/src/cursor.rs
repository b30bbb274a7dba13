//! Cursor persistence.
//!
//! A synchronizer's cursor normally lives only as long as the synchronizer.
//! Handing it a [`CursorStore`] makes delivery resume where it left off
//! after a restart.

use crate::entry::{Cursor, LogAddress};
use crate::error::{Error, Result};
use parking_lot::Mutex;
use rocksdb::{Options, DB};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Durable storage for per-feed cursors.
pub trait CursorStore: Send + Sync {
    /// Load the saved cursor for a feed.
    fn load(&self, feed: &LogAddress) -> Result<Option<Cursor>>;

    /// Save the cursor for a feed.
    fn save(&self, feed: &LogAddress, cursor: Cursor) -> Result<()>;
}

/// Cursor store kept in memory.
#[derive(Debug, Default)]
pub struct MemoryCursorStore {
    cursors: Mutex<HashMap<LogAddress, Cursor>>,
}

impl MemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CursorStore for MemoryCursorStore {
    fn load(&self, feed: &LogAddress) -> Result<Option<Cursor>> {
        Ok(self.cursors.lock().get(feed).copied())
    }

    fn save(&self, feed: &LogAddress, cursor: Cursor) -> Result<()> {
        self.cursors.lock().insert(feed.clone(), cursor);
        Ok(())
    }
}

/// Cursors of one reader inside a store shared by several readers.
pub struct ScopedCursorStore {
    inner: Arc<dyn CursorStore>,
    scope: String,
}

impl ScopedCursorStore {
    pub fn new(inner: Arc<dyn CursorStore>, scope: impl Into<String>) -> Self {
        Self {
            inner,
            scope: scope.into(),
        }
    }

    fn scoped(&self, feed: &LogAddress) -> LogAddress {
        LogAddress::new(format!("{}:{}", self.scope, feed))
    }
}

impl CursorStore for ScopedCursorStore {
    fn load(&self, feed: &LogAddress) -> Result<Option<Cursor>> {
        self.inner.load(&self.scoped(feed))
    }

    fn save(&self, feed: &LogAddress, cursor: Cursor) -> Result<()> {
        self.inner.save(&self.scoped(feed), cursor)
    }
}

/// Cursor store backed by RocksDB.
pub struct RocksCursorStore {
    db: DB,
}

impl RocksCursorStore {
    /// Open or create storage at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        let db = DB::open(&opts, path)?;
        Ok(Self { db })
    }

    fn key(feed: &LogAddress) -> String {
        format!("cursor:{}", feed)
    }
}

impl CursorStore for RocksCursorStore {
    fn load(&self, feed: &LogAddress) -> Result<Option<Cursor>> {
        match self.db.get(Self::key(feed).as_bytes())? {
            Some(data) => serde_json::from_slice(&data)
                .map(Some)
                .map_err(|e| Error::Storage(format!("corrupt cursor for {}: {}", feed, e))),
            None => Ok(None),
        }
    }

    fn save(&self, feed: &LogAddress, cursor: Cursor) -> Result<()> {
        let value = serde_json::to_vec(&cursor).map_err(Error::Encode)?;
        self.db.put(Self::key(feed).as_bytes(), value)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn feed() -> LogAddress {
        LogAddress::new("/murmur-feed/abc/tweets")
    }

    #[test]
    fn memory_store_round_trip() {
        let store = MemoryCursorStore::new();
        assert_eq!(store.load(&feed()).unwrap(), None);
        store.save(&feed(), Cursor::at(4)).unwrap();
        assert_eq!(store.load(&feed()).unwrap(), Some(Cursor::at(4)));
    }

    #[test]
    fn scopes_do_not_share_cursors() {
        let shared: Arc<dyn CursorStore> = Arc::new(MemoryCursorStore::new());
        let alice = ScopedCursorStore::new(shared.clone(), "alice");
        let bob = ScopedCursorStore::new(shared, "bob");

        alice.save(&feed(), Cursor::at(2)).unwrap();
        assert_eq!(alice.load(&feed()).unwrap(), Some(Cursor::at(2)));
        assert_eq!(bob.load(&feed()).unwrap(), None);
    }

    #[test]
    fn rocks_store_survives_reopen() {
        let dir = tempdir().unwrap();

        {
            let store = RocksCursorStore::open(dir.path()).unwrap();
            assert_eq!(store.load(&feed()).unwrap(), None);
            store.save(&feed(), Cursor::at(7)).unwrap();
        }

        let store = RocksCursorStore::open(dir.path()).unwrap();
        assert_eq!(store.load(&feed()).unwrap(), Some(Cursor::at(7)));
    }
}
