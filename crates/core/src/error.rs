//! Core error types.

use thiserror::Error;

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors produced by the core primitives.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The event bus was stopped and no longer accepts publications.
    #[error("event bus is stopped")]
    BusStopped,

    /// A fixed-size value was built from a slice of the wrong length.
    #[error("invalid length: expected {expected} bytes, got {got}")]
    InvalidLength {
        /// Required byte length.
        expected: usize,
        /// Length of the supplied slice.
        got: usize,
    },

    /// Hex decoding failed.
    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),

    /// A secp256k1 key could not be parsed.
    #[error("invalid node key: {0}")]
    InvalidKey(String),

    /// Binary encoding of a core structure failed.
    #[error("encoding failed: {0}")]
    Encoding(String),
}
