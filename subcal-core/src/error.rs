//! Error types for the subcal ecosystem.

use thiserror::Error;

/// Errors that can cross the boundary between the core library and the server.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("cache backend error: {0}")]
    Cache(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for subcal operations.
pub type CoreResult<T> = Result<T, CoreError>;
