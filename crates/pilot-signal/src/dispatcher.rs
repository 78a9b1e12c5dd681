//! Signal dispatch with enhanced-to-baseline fallback.
//!
//! Per evaluation:
//! 1. If the enhanced source is enabled, acquire a provider and evaluate.
//! 2. On any miss (not installed, error, panic) evaluate the baseline.
//! 3. Normalize the result against the current position and last action.
//!
//! Enhanced misses are logged at debug and counted, never returned.
//! Baseline errors are returned unchanged.

use crate::enhanced::EnhancedSource;
use crate::error::{SignalError, SignalResult};
use crate::provider::DynSignalProvider;
use pilot_core::{BotState, PriceBar, Signal, SignalAction, SignalSource};
use pilot_telemetry::Metrics;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::debug;

/// Why the enhanced path did not produce the signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackReason {
    NotInstalled,
    Failed,
}

impl FallbackReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotInstalled => "not_installed",
            Self::Failed => "failed",
        }
    }

    fn classify(err: &SignalError) -> Self {
        match err {
            SignalError::NotInstalled(_) => Self::NotInstalled,
            _ => Self::Failed,
        }
    }
}

/// Chooses between the enhanced and the baseline provider.
pub struct SignalDispatcher {
    baseline: DynSignalProvider,
    enhanced: Arc<dyn EnhancedSource>,
}

impl SignalDispatcher {
    pub fn new(baseline: DynSignalProvider, enhanced: Arc<dyn EnhancedSource>) -> Self {
        Self { baseline, enhanced }
    }

    /// Produce the signal for this cycle.
    pub fn get_signal(&self, bars: &[PriceBar], state: &BotState) -> SignalResult<Signal> {
        let raw = if self.enhanced.is_enabled() {
            match self.try_enhanced(bars, state) {
                Ok(signal) => signal,
                Err((reason, err)) => {
                    debug!(
                        reason = reason.as_str(),
                        error = %err,
                        "Enhanced provider unavailable, using baseline"
                    );
                    Metrics::signal_fallback(reason.as_str());
                    self.evaluate_baseline(bars, state)?
                }
            }
        } else {
            self.evaluate_baseline(bars, state)?
        };

        let signal = normalize(raw, state);
        Metrics::signal_produced(signal.action.as_str(), &signal.source.to_string());
        Ok(signal)
    }

    fn try_enhanced(
        &self,
        bars: &[PriceBar],
        state: &BotState,
    ) -> Result<Signal, (FallbackReason, SignalError)> {
        let provider = self
            .enhanced
            .acquire()
            .map_err(|e| (FallbackReason::classify(&e), e))?;

        let outcome = catch_unwind(AssertUnwindSafe(|| provider.evaluate(bars, state)))
            .map_err(|_| {
                (
                    FallbackReason::Failed,
                    SignalError::ProviderFailed(format!("{} panicked", provider.name())),
                )
            })?;

        let mut signal = outcome.map_err(|e| (FallbackReason::Failed, e))?;
        signal.source = SignalSource::Enhanced;
        Ok(signal)
    }

    fn evaluate_baseline(&self, bars: &[PriceBar], state: &BotState) -> SignalResult<Signal> {
        let mut signal = self.baseline.evaluate(bars, state)?;
        signal.source = SignalSource::Baseline;
        Ok(signal)
    }
}

/// Downgrade signals that cannot or should not be acted on.
///
/// - SELL while flat has nothing to sell.
/// - An action equal to `last_action` would repeat the previous order.
pub fn normalize(signal: Signal, state: &BotState) -> Signal {
    let action = signal.action;
    match action {
        SignalAction::Hold => signal,
        SignalAction::Sell if state.position.is_none() => signal.into_hold("flat"),
        _ if state.last_action == Some(action) => signal.into_hold("repeat"),
        _ => signal,
    }
}
