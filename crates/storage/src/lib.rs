//! Key-value storage for the chain and snapshot databases.
//!
//! Everything above this crate talks to the [`Database`] trait. The
//! RocksDB backend is the production store; the in-memory backend backs
//! tests and ephemeral nodes.

pub mod error;
pub mod kv;
pub mod memory;
pub mod rocks;

pub use error::{Result, StorageError};
pub use kv::{BatchOp, Database, WriteBatch};
pub use memory::MemoryStore;
pub use rocks::RocksStore;
