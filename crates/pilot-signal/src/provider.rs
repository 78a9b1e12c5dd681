//! The signal provider capability.

use crate::error::SignalResult;
use pilot_core::{BotState, PriceBar, Signal};
use std::sync::Arc;

/// Produces a trading signal from a bar window and the current state.
///
/// Implementations are pure with respect to the inputs: they never mutate
/// state or talk to the exchange.
pub trait SignalProvider: Send + Sync {
    /// Identifier used in logs and metrics.
    fn name(&self) -> &str;

    /// Evaluate the window. `bars` is oldest-first.
    fn evaluate(&self, bars: &[PriceBar], state: &BotState) -> SignalResult<Signal>;
}

/// Shared provider handle.
pub type DynSignalProvider = Arc<dyn SignalProvider>;
