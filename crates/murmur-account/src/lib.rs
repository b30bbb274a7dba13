//! Murmur Account - Identities, Registration and Login
//!
//! Accounts are chain trees whose identity anyone can derive from the
//! username. Registration moves ownership to a password-derived key, so
//! logging in is a matter of checking that key against the tree's owners.
//!
//! # Overview
//!
//! - [`KeyService`] / [`DevKeyService`]: identity and owner-key derivation
//! - [`Accounts`]: find, register and verify accounts
//! - [`DebouncedLookup`]: debounced, supersede-safe lookups while typing
//! - [`LoginState`] / [`LoginFlow`]: the login form's state machine

pub mod debounce;
pub mod error;
pub mod identity;
pub mod keys;
pub mod login;

pub use debounce::{DebounceConfig, DebouncedLookup, LookupResult};
pub use error::{Error, Result};
pub use identity::Accounts;
pub use keys::{DevKeyService, KeyService};
pub use login::{Activity, LoginEvent, LoginFlow, LoginStage, LoginState};
