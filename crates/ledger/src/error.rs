//! Ledger error type.

use thiserror::Error;

use phoenix_core::H256;

pub type Result<T> = std::result::Result<T, LedgerError>;

/// Errors from the chain database and the structures above it.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error(transparent)]
    Storage(#[from] phoenix_storage::StorageError),

    #[error(transparent)]
    Snapshot(#[from] phoenix_snapshotdb::SnapshotError),

    #[error("ledger encoding: {0}")]
    Encoding(String),

    /// The supplied genesis builds a different block than the stored one.
    #[error("genesis mismatch: database contains {stored}, supplied genesis builds {supplied}")]
    GenesisMismatch { stored: H256, supplied: H256 },

    /// Stored and supplied chain configurations cannot be reconciled.
    /// The operator must act; nothing is rewritten automatically.
    #[error("incompatible chain config: {reason}")]
    ConfigCompat { reason: String },

    /// The chain was written by a newer binary.
    #[error("database version {stored} is newer than supported version {supported}")]
    VersionTooNew { stored: u64, supported: u64 },

    /// The database has a genesis but no stored chain configuration.
    #[error("chain config missing for genesis {0}")]
    MissingChainConfig(H256),

    /// A block references an unknown parent.
    #[error("unknown ancestor {parent} of block {number}")]
    UnknownAncestor { number: u64, parent: H256 },

    /// The database has no head pointer; genesis setup never ran.
    #[error("chain database has no head block")]
    NoHead,

    /// The snapshot database claims a head past the chain's.
    #[error("snapshot head {snapshot} is ahead of chain head {chain}")]
    SnapshotAhead { snapshot: u64, chain: u64 },

    /// The transaction is already pooled.
    #[error("transaction {0} already known")]
    KnownTransaction(H256),

    /// Remote transaction priced below the pool minimum.
    #[error("transaction gas price {got} below pool minimum {min}")]
    Underpriced { got: u64, min: u64 },

    /// A same-nonce replacement must raise the gas price.
    #[error("replacement transaction underpriced")]
    ReplaceUnderpriced,

    /// The pool is at capacity and the transaction is not local.
    #[error("transaction pool is full")]
    PoolFull,

    /// The transaction asks for more gas than a block can hold.
    #[error("transaction gas {got} exceeds block gas limit {limit}")]
    GasOverLimit { got: u64, limit: u64 },

    /// Journal file I/O failed.
    #[error("transaction journal: {0}")]
    Journal(#[from] std::io::Error),

    /// A block at this height conflicts with a preserved local block.
    #[error("block {number} conflicts with a preserved local block")]
    PreservedConflict { number: u64 },

    #[error(transparent)]
    Consensus(#[from] phoenix_consensus::ConsensusError),

    #[error(transparent)]
    Execution(#[from] phoenix_core::ExecutionError),

    /// Operation on a stopped chain.
    #[error("block chain is stopped")]
    Stopped,
}

impl LedgerError {
    /// True for the typed compatibility failure the operator must resolve.
    pub fn is_config_compat(&self) -> bool {
        matches!(self, LedgerError::ConfigCompat { .. })
    }
}
