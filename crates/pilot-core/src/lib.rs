//! Core domain types for the pilot trading bot.
//!
//! This crate provides the fundamental types shared by every component:
//! - `PriceBar`: OHLCV bar fetched from the exchange
//! - `Signal`: BUY/SELL/HOLD decision with confidence and source
//! - `OrderResult`: outcome of a single order attempt
//! - `BotState`: the persisted operating record
//! - `LoopState`: execution loop lifecycle
//! - `Price`, `Size`: precision-safe numeric types

pub mod bar;
pub mod decimal;
pub mod error;
pub mod order;
pub mod retry;
pub mod signal;
pub mod state;

pub use bar::{closes, validate_window, PriceBar};
pub use decimal::{Price, Size};
pub use error::{CoreError, Result};
pub use order::{ClientOrderId, OrderResult, OrderSide, OrderStatus};
pub use retry::RetryPolicy;
pub use signal::{Signal, SignalAction, SignalSource};
pub use state::{BotState, LoopState, Position, RiskParams, DEFAULT_STRATEGY};
