//! Node assembly and lifecycle errors.

use thiserror::Error;

use phoenix_config::ConfigError;
use phoenix_consensus::ConsensusError;
use phoenix_core::CoreError;
use phoenix_ledger::LedgerError;
use phoenix_pos::PosError;
use phoenix_snapshotdb::SnapshotError;
use phoenix_storage::StorageError;

pub type Result<T> = std::result::Result<T, NodeError>;

/// Errors surfaced by the node service.
#[derive(Debug, Error)]
pub enum NodeError {
    /// The operator configuration cannot be used as given.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The miner's gas floor exceeds what governance allows.
    #[error("miner gas floor {floor} is above the governance gas ceiling {ceiling}")]
    GasFloorTooHigh { floor: u64, ceiling: u64 },

    /// Light peer allowance must leave room for full peers.
    #[error("light peer count {light} must be below the peer limit {max}")]
    LightPeersExhaustMax { light: usize, max: usize },

    /// Recovering from an interrupted fast sync failed.
    #[error("fast-sync recovery: {0}")]
    Recovery(String),

    /// A lifecycle call arrived in the wrong state.
    #[error("node is {0}")]
    BadState(&'static str),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Consensus(#[from] ConsensusError),

    #[error(transparent)]
    Pos(#[from] PosError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Execution(#[from] phoenix_core::ExecutionError),

    #[error(transparent)]
    ConfigFile(#[from] ConfigError),

    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
}

impl NodeError {
    /// True when the failure is the stored chain configuration refusing
    /// the supplied one.
    pub fn is_config_compat(&self) -> bool {
        matches!(self, NodeError::Ledger(e) if e.is_config_compat())
    }
}
