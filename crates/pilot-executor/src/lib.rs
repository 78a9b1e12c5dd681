//! Order execution and the execution loop for pilot.
//!
//! # Key Components
//!
//! - [`OrderExecutor`]: turns an actionable signal into exactly one order
//!   attempt, after local risk checks
//! - [`ExecutionLoop`]: poll/decide/act cycle and its lifecycle state machine
//! - [`ControlHandle`]: start/stop/pause/resume, strategy selection and
//!   status for an external controller
//! - [`retry_exchange`]: bounded, cancellable backoff for exchange calls
//!
//! # Order gates (in `OrderExecutor::execute`)
//!
//! 1. HOLD -> nothing attempted
//! 2. `running == false` -> REJECTED locally
//! 3. BUY above `max_position_size` -> REJECTED locally
//! 4. SELL while flat -> REJECTED locally
//! 5. (all passed) -> one `place_order` call under a timeout

pub mod control;
pub mod error;
pub mod executor;
pub mod executor_loop;
pub mod retry;
pub mod risk;
pub mod status;

pub use control::ControlHandle;
pub use error::{ExecutorError, ExecutorResult};
pub use executor::{OrderExecutor, DEFAULT_ORDER_TIMEOUT};
pub use executor_loop::{ExecutionLoop, LoopConfig};
pub use retry::{retry_exchange, RetryFailure};
pub use risk::{check_order, stop_loss_signal, RiskRejection};
pub use status::{BotStatus, LoopEvent, LoopStatus};
