//! Signal error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SignalError {
    #[error("Invalid bar window: {0}")]
    InvalidBars(#[from] pilot_core::CoreError),

    #[error("Not enough bars: need {needed}, got {got}")]
    InsufficientBars { needed: usize, got: usize },

    #[error("Unknown strategy: {0}")]
    UnknownStrategy(String),

    #[error("Provider not installed: {0}")]
    NotInstalled(String),

    #[error("Provider failed: {0}")]
    ProviderFailed(String),
}

pub type SignalResult<T> = Result<T, SignalError>;
