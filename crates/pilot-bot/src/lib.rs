//! pilot spot trading bot.
//!
//! Wires the components into one process:
//! - TOML configuration and CLI
//! - State store open with retry and corrupt-record recovery
//! - Paper or live Binance exchange
//! - Execution loop, its control handle and OS-signal shutdown

pub mod app;
pub mod config;
pub mod error;

pub use app::Application;
pub use config::{AppConfig, ConfigOrigin, OperatingMode};
pub use error::{AppError, AppResult};
