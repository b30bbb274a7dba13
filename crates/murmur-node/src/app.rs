//! Application store.
//!
//! Holds the logged-in user and the feeds they read:
//!
//! ```text
//!   App
//!    ├── user tree (username, feed address, following)
//!    ├── own TweetFeed
//!    └── followed TweetFeeds, by username
//! ```

use crate::error::{Error, Result};
use murmur_account::Accounts;
use murmur_feed::{CursorStore, LogAddress, LogStore, Sequence, Subscription, SyncConfig, Tweet, TweetFeed};
use murmur_ledger::{
    submit_and_wait, ChainTree, Did, Transaction, TreeKey, FEED_ADDRESS_PATH, FOLLOWING_PATH,
    USERNAME_PATH,
};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// What a client keeps between runs to skip the password prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredLogin {
    pub did: Did,
    /// Owner address the key signs for.
    pub address: String,
    /// Hex-encoded owner key.
    pub secret: String,
}

impl StoredLogin {
    fn from_key(did: Did, key: &TreeKey) -> Self {
        Self {
            did,
            address: key.address.clone(),
            secret: hex::encode(&key.secret),
        }
    }

    fn key(&self) -> Result<TreeKey> {
        Ok(TreeKey {
            address: self.address.clone(),
            secret: hex::decode(&self.secret)
                .map_err(|e| Error::InvalidLogin(format!("key is not hex: {}", e)))?,
        })
    }
}

struct User {
    username: String,
    tree: ChainTree,
    feed: TweetFeed,
    following: BTreeMap<String, TweetFeed>,
}

/// The application store.
pub struct App {
    accounts: Arc<Accounts>,
    logs: Arc<dyn LogStore>,
    sync: SyncConfig,
    cursors: Option<Arc<dyn CursorStore>>,
    user: Option<User>,
}

impl App {
    pub fn new(accounts: Arc<Accounts>, logs: Arc<dyn LogStore>, sync: SyncConfig) -> Self {
        Self {
            accounts,
            logs,
            sync,
            cursors: None,
            user: None,
        }
    }

    /// Persist followed feeds' cursors in `cursors`.
    #[must_use]
    pub fn with_cursor_store(mut self, cursors: Arc<dyn CursorStore>) -> Self {
        self.cursors = Some(cursors);
        self
    }

    /// Account operations.
    pub fn accounts(&self) -> &Arc<Accounts> {
        &self.accounts
    }

    /// Username of the logged-in user.
    pub fn current_user(&self) -> Option<&str> {
        self.user.as_ref().map(|u| u.username.as_str())
    }

    /// Usernames the logged-in user follows.
    pub fn following(&self) -> Vec<String> {
        self.user
            .as_ref()
            .map(|u| u.following.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Address of the logged-in user's feed.
    pub fn feed_address(&self) -> Option<&LogAddress> {
        self.user.as_ref().map(|u| u.feed.address())
    }

    /// Credentials to hand to [`restore`](Self::restore) later.
    pub fn stored_login(&self) -> Option<StoredLogin> {
        let user = self.user.as_ref()?;
        let key = user.tree.key.as_ref()?;
        Some(StoredLogin::from_key(user.tree.did.clone(), key))
    }

    /// Create a feed and register `username` with it.
    pub async fn register(&mut self, username: &str, password: &str) -> Result<StoredLogin> {
        let feed = TweetFeed::create(username, self.logs.as_ref(), self.sync).await?;
        let tree = self
            .accounts
            .register(username, password, feed.address().as_str())
            .await?;
        self.login_with_feed(tree, username.to_string(), feed).await
    }

    /// Log in with a verified tree.
    pub async fn login(&mut self, tree: ChainTree, username: &str) -> Result<StoredLogin> {
        let address = feed_address(&tree, username)?;
        let feed = TweetFeed::open(username, self.logs.as_ref(), &address, self.sync).await?;
        self.login_with_feed(tree, username.to_string(), feed).await
    }

    /// Log back in from stored credentials.
    ///
    /// Returns `false` and stays logged out when the community no longer
    /// knows the identity.
    pub async fn restore(&mut self, stored: &StoredLogin) -> Result<bool> {
        let tree = match self.accounts.session().load_tree(&stored.did).await {
            Ok(tree) => tree,
            Err(e) if e.is_not_found() => {
                warn!(did = %stored.did, "Stored identity not found, logging out");
                self.logout().await;
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        };

        let username = tree
            .resolve_str(USERNAME_PATH)
            .map(str::to_string)
            .ok_or_else(|| Error::IncompleteAccount {
                username: stored.did.to_string(),
                reason: "no username".into(),
            })?;

        let tree = tree.with_key(stored.key()?);
        self.login(tree, &username).await?;
        Ok(true)
    }

    async fn login_with_feed(&mut self, tree: ChainTree, username: String, feed: TweetFeed) -> Result<StoredLogin> {
        let stored = match &tree.key {
            Some(key) => StoredLogin::from_key(tree.did.clone(), key),
            None => return Err(Error::InvalidLogin(format!("tree for {} has no owner key", username))),
        };
        self.logout().await;

        let mut following = BTreeMap::new();
        for followed in following_list(&tree)? {
            match self.open_followed(&followed).await {
                Ok(feed) => {
                    following.insert(followed, feed);
                }
                Err(e) => warn!(user = %username, followed = %followed, error = %e, "Could not open followed feed"),
            }
        }

        info!(user = %username, did = %tree.did, following = following.len(), "Logged in");
        self.user = Some(User {
            username,
            tree,
            feed,
            following,
        });
        Ok(stored)
    }

    async fn open_followed(&self, username: &str) -> Result<TweetFeed> {
        let tree = self
            .accounts
            .find_user_tree(username)
            .await?
            .ok_or_else(|| Error::UnknownUser(username.to_string()))?;
        let address = feed_address(&tree, username)?;

        let feed = match &self.cursors {
            Some(cursors) => {
                TweetFeed::open_with_cursors(username, self.logs.as_ref(), &address, self.sync, Arc::clone(cursors))
                    .await?
            }
            None => TweetFeed::open(username, self.logs.as_ref(), &address, self.sync).await?,
        };
        Ok(feed)
    }

    /// Post a message to the user's feed.
    pub async fn publish(&self, message: &str) -> Result<Sequence> {
        let user = self.user.as_ref().ok_or(Error::NotLoggedIn)?;
        Ok(user.feed.publish(message).await?)
    }

    /// Follow `username`, recording it in the user's tree.
    ///
    /// Waits until the community shows the updated tree.
    pub async fn follow(&mut self, username: &str) -> Result<()> {
        if self.user.as_ref().ok_or(Error::NotLoggedIn)?.following.contains_key(username) {
            return Ok(());
        }

        let feed = self.open_followed(username).await?;
        let user = self.user.as_mut().ok_or(Error::NotLoggedIn)?;

        let mut list: Vec<String> = user.following.keys().cloned().collect();
        list.push(username.to_string());
        list.sort();

        let tx = Transaction::set_data(FOLLOWING_PATH, serde_json::to_value(&list)?);
        submit_and_wait(self.accounts.waiter(), &mut user.tree, &[tx]).await?;

        info!(user = %user.username, followed = %username, "Now following");
        user.following.insert(username.to_string(), feed);
        Ok(())
    }

    /// Tweets from the user and everyone they follow, newest first.
    pub async fn timeline(&self) -> Result<Vec<Tweet>> {
        let user = self.user.as_ref().ok_or(Error::NotLoggedIn)?;

        let mut tweets = user.feed.all().await?;
        for feed in user.following.values() {
            tweets.extend(feed.all().await?);
        }
        tweets.sort_by_key(|t| Reverse(t.time_ms));
        Ok(tweets)
    }

    /// Receive tweets as they arrive on any feed in the timeline.
    ///
    /// Followed feeds first catch up on tweets posted since their saved
    /// cursor. Delivery stops when the subscriptions are dropped.
    pub async fn watch_timeline(&self) -> Result<(Vec<Subscription>, mpsc::UnboundedReceiver<Tweet>)> {
        let user = self.user.as_ref().ok_or(Error::NotLoggedIn)?;
        let (tx, rx) = mpsc::unbounded_channel();

        let subscriptions = std::iter::once(&user.feed)
            .chain(user.following.values())
            .map(|feed| {
                let tx = tx.clone();
                feed.subscribe(move |tweet: &Tweet| {
                    let _ = tx.send(tweet.clone());
                })
            })
            .collect();

        for (username, feed) in &user.following {
            match feed.synchronizer().rescan().await {
                Ok(0) => {}
                Ok(missed) => info!(followed = %username, missed, "Caught up on feed"),
                Err(e) => warn!(followed = %username, error = %e, "Catch-up failed, waiting for the next signal"),
            }
        }
        Ok((subscriptions, rx))
    }

    /// Forget the logged-in user and stop following their feeds.
    pub async fn logout(&mut self) {
        if let Some(user) = self.user.take() {
            user.feed.close().await;
            for feed in user.following.values() {
                feed.close().await;
            }
            info!(user = %user.username, "Logged out");
        }
    }
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("user", &self.current_user())
            .field("following", &self.following())
            .finish_non_exhaustive()
    }
}

fn feed_address(tree: &ChainTree, username: &str) -> Result<LogAddress> {
    tree.resolve_str(FEED_ADDRESS_PATH)
        .map(LogAddress::new)
        .ok_or_else(|| Error::IncompleteAccount {
            username: username.to_string(),
            reason: "no feed address".into(),
        })
}

fn following_list(tree: &ChainTree) -> Result<Vec<String>> {
    match tree.resolve_data(FOLLOWING_PATH) {
        Some(value) => Ok(serde_json::from_value(value.clone())?),
        None => Ok(Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use murmur_account::DevKeyService;
    use murmur_feed::MemoryLogStore;
    use murmur_ledger::{Environment, MemoryNetwork, MemoryNetworkConfig, Session, TipWaiter, WaitConfig};

    struct Community {
        network: Arc<MemoryNetwork>,
        accounts: Arc<Accounts>,
        logs: MemoryLogStore,
    }

    impl Community {
        fn new() -> Self {
            let network = MemoryNetwork::spawn(MemoryNetworkConfig::fast());
            let session = Arc::new(Session::from_network(network.clone(), Environment::Development));
            let accounts = Accounts::new(
                TipWaiter::new(session, WaitConfig::fast()),
                Arc::new(DevKeyService::new()),
            );
            Self {
                network,
                accounts: Arc::new(accounts),
                logs: MemoryLogStore::new("swarm"),
            }
        }

        fn app(&self, peer: &str) -> App {
            App::new(
                Arc::clone(&self.accounts),
                Arc::new(self.logs.join(peer)),
                SyncConfig::default(),
            )
        }
    }

    #[tokio::test(start_paused = true)]
    async fn operations_need_login() {
        let community = Community::new();
        let mut app = community.app("alice");

        assert!(matches!(app.publish("hi").await, Err(Error::NotLoggedIn)));
        assert!(matches!(app.follow("bob").await, Err(Error::NotLoggedIn)));
        assert!(matches!(app.timeline().await, Err(Error::NotLoggedIn)));
        assert!(app.stored_login().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn register_publish_and_restore() {
        let community = Community::new();
        let mut app = community.app("alice");

        let stored = app.register("alice", "pw").await.unwrap();
        assert_eq!(app.current_user(), Some("alice"));
        app.publish("hello").await.unwrap();

        app.logout().await;
        assert!(app.current_user().is_none());

        assert!(app.restore(&stored).await.unwrap());
        assert_eq!(app.current_user(), Some("alice"));
        let timeline = app.timeline().await.unwrap();
        assert_eq!(timeline.len(), 1);
        assert_eq!(timeline[0].message, "hello");
        assert_eq!(app.stored_login(), Some(stored));
    }

    #[tokio::test(start_paused = true)]
    async fn restore_unknown_identity_logs_out() {
        let community = Community::new();
        let mut app = community.app("alice");
        let stored = StoredLogin {
            did: Did::new("did:murmur:nobody"),
            address: "0x00".into(),
            secret: "00".into(),
        };

        assert!(!app.restore(&stored).await.unwrap());
        assert!(app.current_user().is_none());
        assert_eq!(community.network.accepted_writes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn follow_is_recorded_in_tree() {
        let community = Community::new();
        let mut alice = community.app("alice");
        let mut bob = community.app("bob");

        alice.register("alice", "pw").await.unwrap();
        let bob_login = bob.register("bob", "pw").await.unwrap();

        assert!(matches!(bob.follow("carol").await, Err(Error::UnknownUser(_))));
        bob.follow("alice").await.unwrap();
        assert_eq!(bob.following(), vec!["alice".to_string()]);

        // A fresh session for bob sees the follow.
        let mut again = community.app("bob");
        assert!(again.restore(&bob_login).await.unwrap());
        assert_eq!(again.following(), vec!["alice".to_string()]);
    }

    #[test]
    fn stored_key_round_trips_through_hex() {
        let key = TreeKey {
            address: "0xabc".into(),
            secret: vec![0, 1, 254, 255],
        };
        let stored = StoredLogin::from_key(Did::new("did:murmur:a"), &key);
        assert_eq!(stored.secret, "0001feff");
        assert_eq!(stored.key().unwrap(), key);

        let corrupt = StoredLogin {
            secret: "zz".into(),
            ..stored
        };
        assert!(matches!(corrupt.key(), Err(Error::InvalidLogin(_))));
    }
}
