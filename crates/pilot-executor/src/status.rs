//! Loop status, lifecycle events and the operator-facing status view.

use pilot_core::{BotState, LoopState, OrderResult, Signal};
use serde::Serialize;

/// Loop-owned status shared through a watch channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoopStatus {
    pub state: LoopState,
    /// Most recent error worth showing an operator.
    pub last_error: Option<String>,
    /// Completed iterations since launch.
    pub cycles: u64,
}

/// Notable things the loop did, for a chat front end or other observer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopEvent {
    StateChanged { from: LoopState, to: LoopState },
    /// Signal evaluated this cycle (after normalization and stop-loss).
    Signal(Signal),
    /// An order attempt finished.
    Order(OrderResult),
    /// The persisted record was unreadable and replaced with defaults.
    StateRecovered { reason: String },
    /// The cycle failed but the loop continues.
    CycleFailed { error: String },
    /// Retries exhausted; the loop is shutting down.
    Fatal { error: String },
}

/// Snapshot answer to `getStatus`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BotStatus {
    pub loop_state: LoopState,
    pub bot_state: BotState,
    pub last_error: Option<String>,
    pub cycles: u64,
    pub enhanced_available: bool,
}
