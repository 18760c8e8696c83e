//! # Phoenix Core
//!
//! Shared types and subsystem seams for the Phoenix chain node.
//!
//! This crate carries the primitives every other crate speaks in: fixed-size
//! hashes and addresses, validator identities, the block/header/transaction
//! structures, the typed event bus, and the narrow traits through which the
//! node assembly consumes its collaborators (chain views, transaction pool,
//! validator providers).
//!
//! Nothing in here owns a database or spawns a task; the crate is the
//! vocabulary, not the machinery.

pub mod accounts;
pub mod api;
pub mod block;
pub mod chain;
pub mod error;
pub mod events;
pub mod keys;
pub mod types;

pub use accounts::AccountManager;
pub use api::ApiDescriptor;
pub use block::{Block, Header, Transaction};
pub use chain::{ChainCache, ChainReader, ExecutionError, TxPoolApi, ValidatorProvider};
pub use error::{CoreError, Result};
pub use events::{EventBus, NodeEvent, Subsystem};
pub use keys::{recover_node_id, NodeKey};
pub use types::{Address, NodeId, ValidatorNode, H256};
