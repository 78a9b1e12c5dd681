//! Prometheus metrics and structured logging for pilot.
//!
//! - Structured logging with tracing (JSON in production)
//! - Process-wide Prometheus metrics for the execution loop, signal
//!   dispatch, order placement and state persistence

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::{init_logging, DEFAULT_FILTER};
pub use metrics::Metrics;
