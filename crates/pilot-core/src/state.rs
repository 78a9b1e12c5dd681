//! Persisted bot state and loop lifecycle states.
//!
//! `BotState` is the single process-wide record the StateStore owns. It is
//! written as a JSON document, so every field tolerates being absent
//! (defaults apply) and unknown fields are ignored on load.

use crate::decimal::{Price, Size};
use crate::order::{OrderResult, OrderSide};
use crate::signal::SignalAction;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Strategy selected when nothing else is configured.
pub const DEFAULT_STRATEGY: &str = "sma_cross";

/// Open spot holding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    /// Held base-asset quantity (always positive).
    pub size: Size,
    /// Volume-weighted entry price.
    pub entry_price: Price,
}

impl Position {
    pub fn new(size: Size, entry_price: Price) -> Self {
        Self { size, entry_price }
    }

    /// Percentage move of `mark` relative to the entry price.
    pub fn pnl_pct(&self, mark: Price) -> Option<Decimal> {
        mark.pct_from(self.entry_price)
    }
}

/// Position sizing and stop-loss thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskParams {
    /// Exit when price falls this many percent below entry.
    pub stop_loss_pct: Decimal,
    /// Upper bound on the held quantity.
    pub max_position_size: Size,
    /// Quantity per BUY order.
    pub order_size: Size,
}

impl Default for RiskParams {
    fn default() -> Self {
        Self {
            stop_loss_pct: dec!(2),
            max_position_size: Size::new(dec!(0.01)),
            order_size: Size::new(dec!(0.001)),
        }
    }
}

/// Persisted operating status of the bot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BotState {
    /// Active strategy identifier.
    pub strategy: String,
    /// Last signal acted upon (set only after a filled order).
    pub last_action: Option<SignalAction>,
    /// Whether the loop is authorized to place orders.
    pub running: bool,
    /// Current holding; `None` when flat.
    pub position: Option<Position>,
    pub risk_params: RiskParams,
}

impl Default for BotState {
    fn default() -> Self {
        Self {
            strategy: DEFAULT_STRATEGY.to_string(),
            last_action: None,
            running: false,
            position: None,
            risk_params: RiskParams::default(),
        }
    }
}

impl BotState {
    /// Held quantity, zero when flat.
    pub fn position_size(&self) -> Size {
        self.position.map(|p| p.size).unwrap_or(Size::ZERO)
    }

    /// Apply a completed order attempt.
    ///
    /// Only fills change state: `last_action` and the position move together.
    /// Rejections and errors leave the record untouched so the next cycle can
    /// act on the same signal again.
    pub fn apply_order_result(&mut self, result: &OrderResult) {
        if !result.is_fill() {
            return;
        }
        let Some(avg_price) = result.avg_price else {
            return;
        };

        match result.side {
            OrderSide::Buy => {
                let next = match self.position {
                    Some(pos) => {
                        let total = pos.size + result.filled_qty;
                        let cost = pos.size.notional(pos.entry_price)
                            + result.filled_qty.notional(avg_price);
                        Position::new(total, Price::new(cost / total.inner()))
                    }
                    None => Position::new(result.filled_qty, avg_price),
                };
                self.position = Some(next);
                self.last_action = Some(SignalAction::Buy);
            }
            OrderSide::Sell => {
                self.position = match self.position {
                    Some(pos) if pos.size > result.filled_qty => {
                        Some(Position::new(pos.size - result.filled_qty, pos.entry_price))
                    }
                    _ => None,
                };
                self.last_action = Some(SignalAction::Sell);
            }
        }
    }
}

/// Execution loop lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoopState {
    /// Idle: no polling, no orders.
    #[default]
    Stopped,
    /// Polling, evaluating and placing orders.
    Running,
    /// Polling and evaluating only.
    Paused,
    /// Terminal: draining the current iteration before exit.
    ShuttingDown,
}

impl LoopState {
    /// Whether a transition from `self` to `next` is allowed.
    pub fn can_transition_to(self, next: LoopState) -> bool {
        use LoopState::*;
        matches!(
            (self, next),
            (Stopped, Running)
                | (Running, Paused)
                | (Paused, Running)
                | (Running, Stopped)
                | (Paused, Stopped)
                | (Stopped, ShuttingDown)
                | (Running, ShuttingDown)
                | (Paused, ShuttingDown)
        )
    }

    /// Whether the loop polls market data in this state.
    pub fn is_polling(self) -> bool {
        matches!(self, LoopState::Running | LoopState::Paused)
    }
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Stopped => "STOPPED",
            Self::Running => "RUNNING",
            Self::Paused => "PAUSED",
            Self::ShuttingDown => "SHUTTING_DOWN",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::ClientOrderId;

    fn fill(side: OrderSide, qty: Decimal, px: Decimal) -> OrderResult {
        OrderResult::filled(side, Size::new(qty), Price::new(px), ClientOrderId::new())
    }

    #[test]
    fn test_buy_then_buy_averages_entry() {
        let mut state = BotState::default();
        state.apply_order_result(&fill(OrderSide::Buy, dec!(1), dec!(100)));
        state.apply_order_result(&fill(OrderSide::Buy, dec!(1), dec!(110)));

        let pos = state.position.unwrap();
        assert_eq!(pos.size.inner(), dec!(2));
        assert_eq!(pos.entry_price.inner(), dec!(105));
        assert_eq!(state.last_action, Some(SignalAction::Buy));
    }

    #[test]
    fn test_sell_closes_position() {
        let mut state = BotState::default();
        state.apply_order_result(&fill(OrderSide::Buy, dec!(0.5), dec!(100)));
        state.apply_order_result(&fill(OrderSide::Sell, dec!(0.5), dec!(120)));

        assert!(state.position.is_none());
        assert_eq!(state.last_action, Some(SignalAction::Sell));
    }

    #[test]
    fn test_failed_attempt_changes_nothing() {
        let mut state = BotState::default();
        let before = state.clone();
        state.apply_order_result(&OrderResult::error(OrderSide::Buy, "timeout"));
        state.apply_order_result(&OrderResult::rejected(OrderSide::Buy, "limit"));
        assert_eq!(state, before);
    }

    #[test]
    fn test_unknown_fields_ignored_and_missing_defaulted() {
        let json = r#"{"strategy":"rsi","running":true,"operator_note":"hi"}"#;
        let state: BotState = serde_json::from_str(json).unwrap();
        assert_eq!(state.strategy, "rsi");
        assert!(state.running);
        assert_eq!(state.risk_params, RiskParams::default());
        assert!(state.last_action.is_none());
    }

    #[test]
    fn test_loop_transitions() {
        assert!(LoopState::Stopped.can_transition_to(LoopState::Running));
        assert!(LoopState::Running.can_transition_to(LoopState::Paused));
        assert!(LoopState::Paused.can_transition_to(LoopState::Running));
        assert!(!LoopState::Stopped.can_transition_to(LoopState::Paused));
        assert!(!LoopState::ShuttingDown.can_transition_to(LoopState::Running));
        assert!(!LoopState::ShuttingDown.can_transition_to(LoopState::Stopped));
        assert!(!LoopState::ShuttingDown.is_polling());
    }
}
