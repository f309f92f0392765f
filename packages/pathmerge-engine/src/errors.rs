//! Error types for pathmerge-engine
//!
//! Only contract-level misuse is represented as errors. Engine-invariant
//! violations (negative reference counts, removing a never-added mapping,
//! prefix-chain inconsistency) are programming defects and are surfaced by
//! debug assertions instead.

use pathmerge_store::StoreError;
use thiserror::Error;

/// Main error type for engine operations
#[derive(Debug, Error)]
pub enum EngineError {
    /// Group id is not (or no longer) registered
    #[error("unknown group id {0}")]
    UnknownGroup(u32),

    /// Source indexer was never registered with the runtime
    #[error("unknown source indexer {0}")]
    UnknownIndexer(u32),

    /// A second declaration under an existing description disagrees with
    /// the registered group
    #[error("conflicting declaration for group description {0:?}")]
    ConflictingGroup(String),

    /// Store error
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl EngineError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        EngineError::Config(msg.into())
    }
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
