//! Error type for the proof-of-stake layer.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PosError>;

/// Errors from the reactor and its plugins.
#[derive(Debug, Error)]
pub enum PosError {
    #[error(transparent)]
    Snapshot(#[from] phoenix_snapshotdb::SnapshotError),

    #[error("pos encoding: {0}")]
    Encoding(String),

    #[error("evidence: {0}")]
    Evidence(String),

    #[error("plugin {plugin}: {reason}")]
    Plugin {
        plugin: &'static str,
        reason: String,
    },

    #[error("governance parameter {0:?} rejected: {1}")]
    ParamRejected(String, String),

    #[error("reactor is not initialized")]
    NotInitialized,
}
