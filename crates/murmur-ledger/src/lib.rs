//! Murmur Ledger - Sessions and Convergence Waiting
//!
//! Client-side access to a ledger community: a network of nodes maintaining
//! versioned, content-addressed chain trees. Writes are accepted locally
//! first and only later become visible across the community, so this crate
//! also provides the machinery for confirming that a write has converged.
//!
//! # Overview
//!
//! - [`Session`]: caller-owned handle to the community with a single-flight
//!   connection handshake
//! - [`TipWaiter`]: bounded polling until an identity's root matches an
//!   expected value
//! - [`submit_and_wait`]: play transactions and block until they converge
//! - [`MemoryNetwork`]: in-process simulated community for development and tests
//!
//! # Example
//!
//! ```rust,ignore
//! use murmur_ledger::{Session, TipWaiter, WaitConfig, MemoryConnector, Environment};
//!
//! let session = Arc::new(Session::new(Arc::new(connector), Environment::Development));
//! let waiter = TipWaiter::new(session.clone(), WaitConfig::default());
//!
//! let receipt = submit_and_wait(&waiter, &mut tree, &txs).await?;
//! ```

pub mod error;
pub mod memory;
pub mod network;
pub mod session;
pub mod tree;
pub mod types;
pub mod waiter;

pub use error::{Error, NetworkError, Result};
pub use memory::{MemoryConnector, MemoryNetwork, MemoryNetworkConfig};
pub use network::{Connector, Environment, LedgerNetwork, ResponseSignature, SubmitResponse};
pub use session::Session;
pub use tree::{
    ChainTree, Transaction, TreeKey, APP_DATA_PREFIX, FEED_ADDRESS_PATH, FOLLOWING_PATH,
    USERNAME_PATH,
};
pub use types::{Did, Receipt, StateRoot};
pub use waiter::{submit_and_wait, TipWaiter, WaitConfig};
