//! Error types for pilot-core.

use thiserror::Error;

/// Core error types.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid bar window: {0}")]
    InvalidBars(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
