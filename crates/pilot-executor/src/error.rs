//! Executor error types.

use pilot_core::LoopState;
use pilot_signal::SignalError;
use pilot_state::StateError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("Invalid loop transition: {from} -> {to}")]
    InvalidTransition { from: LoopState, to: LoopState },

    #[error("Unknown strategy: {0}")]
    UnknownStrategy(String),

    /// Startup connectivity check failed; the loop stays stopped.
    #[error("Exchange unreachable after {attempts} attempts: {last_error}")]
    Connectivity { attempts: u32, last_error: String },

    /// A dependency kept failing past the retry budget.
    #[error("{dependency} failed after {attempts} attempts: {last_error}")]
    FatalDependency {
        dependency: &'static str,
        attempts: u32,
        last_error: String,
    },

    #[error("Signal evaluation failed: {0}")]
    Signal(#[from] SignalError),

    #[error("State store error: {0}")]
    State(#[from] StateError),

    /// Shutdown was requested while waiting.
    #[error("Cancelled by shutdown")]
    Cancelled,
}

impl ExecutorError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::FatalDependency { .. })
    }
}

pub type ExecutorResult<T> = Result<T, ExecutorError>;
