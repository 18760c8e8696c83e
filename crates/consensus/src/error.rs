//! Consensus error type.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ConsensusError>;

/// Errors from engine construction, startup, and header handling.
#[derive(Debug, Error)]
pub enum ConsensusError {
    /// The engine cannot be built from the given configuration.
    #[error("consensus config: {0}")]
    Config(String),

    /// Start was called twice, or an operation needs a started engine.
    #[error("engine not started")]
    NotStarted,

    #[error("engine already started")]
    AlreadyStarted,

    /// A header failed verification.
    #[error("invalid header at {number}: {reason}")]
    InvalidHeader { number: u64, reason: String },

    /// The sealer is not allowed to seal at this height.
    #[error("not our turn to seal block {0}")]
    NotOurTurn(u64),

    /// Write-ahead-log failure.
    #[error("wal: {0}")]
    Wal(String),

    /// Signing or recovery failure.
    #[error(transparent)]
    Key(#[from] phoenix_core::CoreError),

    /// Evidence bytes could not be decoded.
    #[error("evidence decode: {0}")]
    Evidence(String),
}
