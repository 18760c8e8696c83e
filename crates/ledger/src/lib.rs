//! The ledger: chain database schema, genesis setup, the canonical block
//! chain, its consensus-facing cache, the transaction pool, and the bloom
//! indexer.

pub mod bloom;
pub mod cache;
pub mod chain;
pub mod error;
pub mod genesis;
pub mod rawdb;
pub mod txpool;

pub use bloom::{BloomIndexer, BloomRequester, BLOOM_WORKERS};
pub use cache::{recover_snapshot_db, BlockChainCache, BlockExecutor};
pub use chain::{BlockChain, CacheConfig, InsertOutcome, ShouldPreserve};
pub use error::{LedgerError, Result};
pub use genesis::{genesis_block, mainnet_genesis_hash, setup_genesis_block};
pub use txpool::TxPool;
