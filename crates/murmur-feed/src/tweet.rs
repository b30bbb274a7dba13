//! Tweet feeds.
//!
//! Each user owns one feed log. Its address is stored in the user's chain
//! tree so followers can open it.

use crate::cursor::CursorStore;
use crate::entry::{FeedEntry, LogAddress, Sequence};
use crate::error::Result;
use crate::log::LogStore;
use crate::sync::{FeedSynchronizer, Subscription, SyncConfig};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::info;

/// Name of the log backing a tweet feed.
pub const TWEET_LOG_NAME: &str = "tweets";

/// A single post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tweet {
    pub message: String,
    /// Unix time in milliseconds.
    pub time_ms: u64,
    /// Feed owner. Not stored; filled in on read.
    #[serde(default, skip_serializing)]
    pub author: Option<String>,
}

impl Tweet {
    /// A tweet stamped with the current time.
    pub fn new(message: impl Into<String>) -> Self {
        let time_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        Self {
            message: message.into(),
            time_ms,
            author: None,
        }
    }
}

/// A user's feed of tweets.
pub struct TweetFeed {
    username: String,
    sync: FeedSynchronizer<Tweet>,
}

impl TweetFeed {
    /// Create a new feed for `username`.
    pub async fn create(username: impl Into<String>, store: &dyn LogStore, config: SyncConfig) -> Result<Self> {
        let username = username.into();
        let log = store.create(TWEET_LOG_NAME).await?;
        info!(user = %username, address = %log.address(), "Created tweet feed");
        let sync = FeedSynchronizer::open(log, config).await?;
        Ok(Self { username, sync })
    }

    /// Open an existing feed owned by `username`.
    pub async fn open(
        username: impl Into<String>,
        store: &dyn LogStore,
        address: &LogAddress,
        config: SyncConfig,
    ) -> Result<Self> {
        let username = username.into();
        let log = store.open(address).await?;
        let sync = FeedSynchronizer::open(log, config).await?;
        Ok(Self { username, sync })
    }

    /// Open an existing feed, resuming delivery from a saved cursor.
    pub async fn open_with_cursors(
        username: impl Into<String>,
        store: &dyn LogStore,
        address: &LogAddress,
        config: SyncConfig,
        cursors: Arc<dyn CursorStore>,
    ) -> Result<Self> {
        let username = username.into();
        let log = store.open(address).await?;
        let sync = FeedSynchronizer::open_with_store(log, config, cursors).await?;
        Ok(Self { username, sync })
    }

    /// Feed owner.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Address followers use to open this feed.
    pub fn address(&self) -> &LogAddress {
        self.sync.address()
    }

    /// The underlying synchronizer.
    pub fn synchronizer(&self) -> &FeedSynchronizer<Tweet> {
        &self.sync
    }

    /// Post a message.
    pub async fn publish(&self, message: impl Into<String>) -> Result<Sequence> {
        self.sync.publish(&Tweet::new(message)).await
    }

    /// Every tweet in the feed, oldest first.
    pub async fn all(&self) -> Result<Vec<Tweet>> {
        let entries = self.sync.entries().await?;
        Ok(entries.into_iter().map(|e| self.attribute(e.payload)).collect())
    }

    /// Observe tweets that arrive after this call.
    pub fn subscribe<F>(&self, observer: F) -> Subscription
    where
        F: Fn(&Tweet) + Send + Sync + 'static,
    {
        let author = self.username.clone();
        self.sync.subscribe(move |entry: &FeedEntry<Tweet>| {
            let mut tweet = entry.payload.clone();
            tweet.author = Some(author.clone());
            observer(&tweet);
        })
    }

    /// Stop following the feed.
    pub async fn close(&self) {
        self.sync.close().await;
    }

    fn attribute(&self, mut tweet: Tweet) -> Tweet {
        tweet.author = Some(self.username.clone());
        tweet
    }
}

impl std::fmt::Debug for TweetFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TweetFeed")
            .field("username", &self.username)
            .field("address", self.address())
            .finish()
    }
}
