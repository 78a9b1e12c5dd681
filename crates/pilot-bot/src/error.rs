//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("State error: {0}")]
    State(#[from] pilot_state::StateError),

    #[error("Exchange error: {0}")]
    Exchange(#[from] pilot_exchange::ExchangeError),

    #[error("Executor error: {0}")]
    Executor(#[from] pilot_executor::ExecutorError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] pilot_telemetry::TelemetryError),

    #[error("Loop task failed: {0}")]
    Task(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AppResult<T> = Result<T, AppError>;
