//! Error types for the foldtrain system

use thiserror::Error;

/// Main error type for foldtrain operations
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Lifecycle protocol violation (weight swap, parameter-set drift)
    #[error("State error: {0}")]
    State(String),

    /// Tensor shape precondition violation
    #[error("Shape error: {0}")]
    Shape(String),

    /// Checkpoint cannot be reconciled with the current run
    #[error("Incompatible checkpoint: {0}")]
    IncompatibleCheckpoint(String),

    /// Tensor operation error
    #[error("Tensor operation error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Checkpoint blob encoding error
    #[error("Checkpoint encoding error: {0}")]
    Encoding(#[from] bincode::Error),

    /// Other errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias for foldtrain operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a swap state error
    pub fn state(msg: impl Into<String>) -> Self {
        Self::State(msg.into())
    }

    /// Create a shape error
    pub fn shape(msg: impl Into<String>) -> Self {
        Self::Shape(msg.into())
    }

    /// Create an incompatible checkpoint error
    pub fn incompatible_checkpoint(msg: impl Into<String>) -> Self {
        Self::IncompatibleCheckpoint(msg.into())
    }
}
