//! Local pre-trade checks and the stop-loss trigger.
//!
//! Everything here runs before any network call. A failed check becomes a
//! `REJECTED` order result; the exchange never sees the order.

use pilot_core::{BotState, OrderSide, Price, Signal, SignalAction, SignalSource, Size};
use rust_decimal::Decimal;
use thiserror::Error;

/// Why an order was refused locally.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RiskRejection {
    #[error("bot is not running")]
    NotRunning,

    #[error("order size must be positive")]
    ZeroOrderSize,

    #[error("position limit: holding {held} + order {order} exceeds max {max}")]
    PositionLimit { held: Size, order: Size, max: Size },

    #[error("no open position to sell")]
    NoPosition,
}

/// Quantity to trade for `side`, or the reason the order must not be sent.
///
/// BUY uses `order_size` and must stay within `max_position_size`.
/// SELL closes the whole position.
pub fn check_order(side: OrderSide, state: &BotState) -> Result<Size, RiskRejection> {
    if !state.running {
        return Err(RiskRejection::NotRunning);
    }

    let params = &state.risk_params;
    match side {
        OrderSide::Buy => {
            let order = params.order_size;
            if !order.is_positive() {
                return Err(RiskRejection::ZeroOrderSize);
            }
            let held = state.position_size();
            if held + order > params.max_position_size {
                return Err(RiskRejection::PositionLimit {
                    held,
                    order,
                    max: params.max_position_size,
                });
            }
            Ok(order)
        }
        OrderSide::Sell => match state.position {
            Some(pos) if pos.size.is_positive() => Ok(pos.size),
            _ => Err(RiskRejection::NoPosition),
        },
    }
}

/// SELL override when `mark` sits `stop_loss_pct` or more below entry.
pub fn stop_loss_signal(state: &BotState, mark: Price) -> Option<Signal> {
    let threshold = state.risk_params.stop_loss_pct;
    if threshold <= Decimal::ZERO {
        return None;
    }
    let position = state.position?;
    let move_pct = position.pnl_pct(mark)?;
    if move_pct > -threshold {
        return None;
    }

    Some(Signal::new(
        SignalAction::Sell,
        Decimal::ONE,
        SignalSource::Risk,
        format!(
            "stop loss: mark {mark} is {}% from entry {}",
            move_pct.round_dp(2),
            position.entry_price
        ),
    ))
}
