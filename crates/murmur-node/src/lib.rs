//! Murmur Node - Decentralized Microblogging Client
//!
//! Accounts live in a ledger community as chain trees; tweets live in
//! per-user replicated feeds. The node ties the two together.
//!
//! # Overview
//!
//! - [`NodeConfig`]: environment-driven configuration
//! - [`Node`]: one session, account services and feed stores
//! - [`App`]: a user's login, feeds, follows and timeline

pub mod app;
pub mod config;
pub mod error;
pub mod node;

pub use app::{App, StoredLogin};
pub use config::NodeConfig;
pub use error::{Error, Result};
pub use node::Node;
