//! Login flow.
//!
//! [`LoginState`] is a plain reducer over [`LoginEvent`]s. [`LoginFlow`]
//! drives it: username input goes through a [`DebouncedLookup`] over
//! [`Accounts::find_user_tree`], and the answer decides whether the user
//! logs in or registers.

use crate::debounce::{DebounceConfig, DebouncedLookup, LookupResult};
use crate::error::{Error, Result};
use crate::identity::Accounts;
use murmur_ledger::ChainTree;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// What the login form is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    Checking,
    Registering,
    LoggingIn,
}

impl Activity {
    /// Text shown while the activity runs.
    pub fn text(&self) -> &'static str {
        match self {
            Activity::Checking => "Checking for username availability",
            Activity::Registering => "Registering your user",
            Activity::LoggingIn => "Logging in",
        }
    }
}

/// Which form the user should see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginStage {
    /// Nothing typed yet.
    Idle,
    /// Waiting for the username lookup.
    Checking,
    /// The username exists: ask for its password.
    Login,
    /// The username is free: offer registration.
    Register,
    /// Registering or logging in.
    Busy,
}

/// Events applied to [`LoginState`].
#[derive(Debug, Clone)]
pub enum LoginEvent {
    /// The username field changed.
    UsernameTyped(String),
    /// A lookup answered for `username`.
    UserTree {
        username: String,
        tree: Option<ChainTree>,
    },
    Registering,
    LoggingIn,
    /// An operation failed with a message for the user.
    Failed(String),
}

/// State of the login form.
#[derive(Debug, Clone, Default)]
pub struct LoginState {
    pub username: String,
    pub activity: Option<Activity>,
    pub user_tree: Option<ChainTree>,
    pub error: Option<String>,
}

impl LoginState {
    /// Apply an event.
    pub fn apply(&mut self, event: LoginEvent) {
        match event {
            LoginEvent::UsernameTyped(username) => {
                self.activity = (!username.is_empty()).then_some(Activity::Checking);
                // The tree belonged to the previous username.
                self.user_tree = None;
                self.username = username;
                self.error = None;
            }
            LoginEvent::UserTree { username, tree } => {
                if username != self.username {
                    // Answer for old input; a lookup for the current one follows.
                    return;
                }
                self.activity = None;
                self.user_tree = tree;
            }
            LoginEvent::Registering => self.activity = Some(Activity::Registering),
            LoginEvent::LoggingIn => self.activity = Some(Activity::LoggingIn),
            LoginEvent::Failed(message) => {
                self.activity = None;
                self.error = Some(message);
            }
        }
    }

    /// Whether a request is outstanding.
    pub fn loading(&self) -> bool {
        self.activity.is_some()
    }

    /// Text describing the outstanding request, if any.
    pub fn loading_text(&self) -> &'static str {
        self.activity.map_or("", |a| a.text())
    }

    /// Whether the typed username is free to register.
    pub fn is_available(&self) -> bool {
        !self.loading() && !self.username.is_empty() && self.user_tree.is_none()
    }

    /// Which form to show.
    pub fn stage(&self) -> LoginStage {
        match self.activity {
            _ if self.username.is_empty() => LoginStage::Idle,
            Some(Activity::Checking) => LoginStage::Checking,
            Some(_) => LoginStage::Busy,
            None if self.user_tree.is_some() => LoginStage::Login,
            None => LoginStage::Register,
        }
    }
}

/// Drives [`LoginState`] against the community.
pub struct LoginFlow {
    accounts: Arc<Accounts>,
    state: LoginState,
    lookup: DebouncedLookup,
    results: mpsc::UnboundedReceiver<LookupResult<Result<Option<ChainTree>>>>,
}

impl LoginFlow {
    /// Start a login flow. Spawns the debounced username lookup.
    pub fn new(accounts: Arc<Accounts>, config: DebounceConfig) -> Self {
        let finder = Arc::clone(&accounts);
        let (lookup, results) = DebouncedLookup::spawn(config, move |username: String| {
            let accounts = Arc::clone(&finder);
            async move { accounts.find_user_tree(&username).await }
        });

        Self {
            accounts,
            state: LoginState::default(),
            lookup,
            results,
        }
    }

    /// Current state.
    pub fn state(&self) -> &LoginState {
        &self.state
    }

    /// The username field changed.
    pub fn type_username(&mut self, username: impl Into<String>) {
        let username = username.into();
        self.lookup.input(username.clone());
        self.state.apply(LoginEvent::UsernameTyped(username));
    }

    /// Wait for the next username lookup and apply it.
    ///
    /// Returns `None` once the lookup task has stopped.
    pub async fn next_lookup(&mut self) -> Option<&LoginState> {
        let LookupResult { value, output } = self.results.recv().await?;
        match output {
            Ok(tree) => {
                debug!(user = %value, found = tree.is_some(), "Username lookup answered");
                self.state.apply(LoginEvent::UserTree { username: value, tree });
            }
            Err(e) => self.state.apply(LoginEvent::Failed(e.to_string())),
        }
        Some(&self.state)
    }

    /// Log in to the looked-up account.
    ///
    /// Returns `None` (and records the failure) when the password is wrong.
    pub async fn login(&mut self, password: &str) -> Result<Option<ChainTree>> {
        let tree = match (self.state.stage(), &self.state.user_tree) {
            (LoginStage::Login, Some(tree)) => tree.clone(),
            _ => return Err(Error::InvalidInput("no account to log in to".into())),
        };

        self.state.apply(LoginEvent::LoggingIn);
        let username = self.state.username.clone();
        match self.accounts.verify_account(&username, password, tree).await {
            Ok(Some(tree)) => {
                info!(user = %username, "Logged in");
                self.state.activity = None;
                Ok(Some(tree))
            }
            Ok(None) => {
                self.state.apply(LoginEvent::Failed("invalid password".into()));
                Ok(None)
            }
            Err(e) => {
                self.state.apply(LoginEvent::Failed(e.to_string()));
                Err(e)
            }
        }
    }

    /// Register the typed username.
    pub async fn register(&mut self, password: &str, confirm: &str, feed_address: &str) -> Result<ChainTree> {
        if password != confirm {
            self.state.apply(LoginEvent::Failed("passwords do not match".into()));
            return Err(Error::InvalidInput("passwords do not match".into()));
        }

        self.state.apply(LoginEvent::Registering);
        let username = self.state.username.clone();
        match self.accounts.register(&username, password, feed_address).await {
            Ok(tree) => {
                self.state.activity = None;
                self.state.user_tree = Some(tree.clone());
                Ok(tree)
            }
            Err(e) => {
                self.state.apply(LoginEvent::Failed(e.to_string()));
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for LoginFlow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginFlow").field("state", &self.state).finish_non_exhaustive()
    }
}
