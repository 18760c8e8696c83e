//! Narrow chain-facing traits shared across the workspace.
//!
//! The consensus and staking crates only need read access plus block
//! execution, so those seams are defined here rather than against the
//! concrete chain types. The ledger crate implements them.

use std::sync::Arc;

use thiserror::Error;

use crate::block::{Block, Header, Transaction};
use crate::types::{NodeId, ValidatorNode, H256};

/// Failure surfaced while executing or committing a block.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// The block failed to execute against its parent state.
    #[error("execute block {number} ({hash}): {reason}")]
    Execute {
        number: u64,
        hash: H256,
        reason: String,
    },
    /// Execution succeeded but the result could not be committed.
    #[error("commit block {number} ({hash}): {reason}")]
    Commit {
        number: u64,
        hash: H256,
        reason: String,
    },
    /// The block to replay is missing from the chain database.
    #[error("missing block at height {number}")]
    MissingBlock { number: u64 },
}

/// Read access to the canonical chain.
pub trait ChainReader: Send + Sync {
    /// Header of the current chain head.
    fn current_header(&self) -> Header;

    /// The current head block.
    fn current_block(&self) -> Block;

    /// Canonical block at the given height, if present.
    fn get_block_by_number(&self, number: u64) -> Option<Block>;

    /// Canonical header at the given height, if present.
    fn get_header_by_number(&self, number: u64) -> Option<Header>;

    /// Header with the given hash, if present.
    fn get_header_by_hash(&self, hash: &H256) -> Option<Header>;
}

/// Chain access with execution, as the consensus engine sees it.
pub trait ChainCache: ChainReader {
    /// Executes a block on top of its parent and commits the result.
    fn execute_block(&self, block: &Block, parent: &Header) -> Result<(), ExecutionError>;
}

/// The slice of the transaction pool the assembly layer wires against.
pub trait TxPoolApi: Send + Sync {
    /// Transactions eligible for inclusion in the next block.
    fn pending(&self) -> Vec<Transaction>;

    /// Queues transactions arriving from remote peers.
    fn add_remotes(&self, txs: Vec<Transaction>);

    /// Whether the pool currently accepts remote transactions.
    fn accepts_remotes(&self) -> bool;
}

/// Source of the active validator set for delegated selection.
pub trait ValidatorProvider: Send + Sync {
    /// Validators responsible for sealing at the given height.
    fn validators_at(&self, number: u64) -> Option<Vec<ValidatorNode>>;

    /// True when the given identity is in the set active at the height.
    fn is_validator(&self, number: u64, id: &NodeId) -> bool {
        self.validators_at(number)
            .map(|set| set.iter().any(|v| &v.id == id))
            .unwrap_or(false)
    }
}

impl<T: ChainReader + ?Sized> ChainReader for Arc<T> {
    fn current_header(&self) -> Header {
        (**self).current_header()
    }

    fn current_block(&self) -> Block {
        (**self).current_block()
    }

    fn get_block_by_number(&self, number: u64) -> Option<Block> {
        (**self).get_block_by_number(number)
    }

    fn get_header_by_number(&self, number: u64) -> Option<Header> {
        (**self).get_header_by_number(number)
    }

    fn get_header_by_hash(&self, hash: &H256) -> Option<Header> {
        (**self).get_header_by_hash(hash)
    }
}
