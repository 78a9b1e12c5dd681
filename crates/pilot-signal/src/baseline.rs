//! Baseline indicator strategies.
//!
//! Always available. The active strategy is chosen per evaluation from
//! `BotState::strategy`, so a `setStrategy` command takes effect on the next
//! cycle. Any failure here is a real defect (bad window, unknown strategy)
//! and is returned to the caller unmasked.

use crate::config::SignalConfig;
use crate::error::{SignalError, SignalResult};
use crate::indicators::{rsi, sma};
use crate::provider::SignalProvider;
use pilot_core::{closes, validate_window, BotState, PriceBar, Signal, SignalAction, SignalSource};
use rust_decimal::Decimal;

/// Fast/slow simple moving average trend.
pub const SMA_CROSS: &str = "sma_cross";
/// RSI oversold/overbought reversal.
pub const RSI: &str = "rsi";

/// Base confidence of an RSI signal at the threshold itself.
fn rsi_base_confidence() -> Decimal {
    Decimal::new(5, 1)
}

/// Every strategy identifier the baseline provider understands.
pub const STRATEGIES: &[&str] = &[SMA_CROSS, RSI];

/// Whether `id` names a baseline strategy.
pub fn is_known_strategy(id: &str) -> bool {
    STRATEGIES.contains(&id)
}

/// Baseline provider dispatching on the selected strategy.
#[derive(Debug, Clone)]
pub struct BaselineProvider {
    config: SignalConfig,
}

impl BaselineProvider {
    pub fn new(config: SignalConfig) -> Self {
        Self { config }
    }

    fn sma_cross(&self, closes: &[Decimal]) -> SignalResult<Signal> {
        let needed = self.config.sma_slow;
        let (Some(fast), Some(slow)) = (
            sma(closes, self.config.sma_fast),
            sma(closes, self.config.sma_slow),
        ) else {
            return Err(SignalError::InsufficientBars {
                needed,
                got: closes.len(),
            });
        };

        let spread_pct = (fast - slow) / slow * Decimal::ONE_HUNDRED;
        // 1% separation between the averages counts as full conviction.
        let confidence = spread_pct.abs().min(Decimal::ONE);
        let action = if fast > slow {
            SignalAction::Buy
        } else if fast < slow {
            SignalAction::Sell
        } else {
            SignalAction::Hold
        };

        Ok(Signal::new(
            action,
            confidence,
            SignalSource::Baseline,
            format!(
                "sma{} {} vs sma{} {}",
                self.config.sma_fast,
                fast.round_dp(4),
                self.config.sma_slow,
                slow.round_dp(4)
            ),
        ))
    }

    fn rsi(&self, closes: &[Decimal]) -> SignalResult<Signal> {
        let value = rsi(closes, self.config.rsi_period).ok_or(SignalError::InsufficientBars {
            needed: self.config.rsi_period + 1,
            got: closes.len(),
        })?;

        let oversold = self.config.rsi_oversold;
        let overbought = self.config.rsi_overbought;
        let reason = format!("rsi{} {}", self.config.rsi_period, value.round_dp(2));

        let signal = if value <= oversold {
            let depth = if oversold.is_zero() {
                Decimal::ONE
            } else {
                (oversold - value) / oversold
            };
            Signal::new(
                SignalAction::Buy,
                rsi_base_confidence() + depth,
                SignalSource::Baseline,
                reason,
            )
        } else if value >= overbought {
            let room = Decimal::ONE_HUNDRED - overbought;
            let depth = if room.is_zero() {
                Decimal::ONE
            } else {
                (value - overbought) / room
            };
            Signal::new(
                SignalAction::Sell,
                rsi_base_confidence() + depth,
                SignalSource::Baseline,
                reason,
            )
        } else {
            Signal::hold(SignalSource::Baseline, reason)
        };

        Ok(signal)
    }
}

impl SignalProvider for BaselineProvider {
    fn name(&self) -> &str {
        "baseline"
    }

    fn evaluate(&self, bars: &[PriceBar], state: &BotState) -> SignalResult<Signal> {
        validate_window(bars)?;
        let closes = closes(bars);

        match state.strategy.as_str() {
            SMA_CROSS => self.sma_cross(&closes),
            RSI => self.rsi(&closes),
            other => Err(SignalError::UnknownStrategy(other.to_string())),
        }
    }
}
