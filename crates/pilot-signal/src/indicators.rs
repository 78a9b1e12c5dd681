//! Indicator math over closing prices (oldest first).
//!
//! All functions return `None` when the series is too short.

use rust_decimal::Decimal;

/// Simple moving average of the last `period` values.
pub fn sma(values: &[Decimal], period: usize) -> Option<Decimal> {
    if period == 0 || values.len() < period {
        return None;
    }
    let window = &values[values.len() - period..];
    let sum: Decimal = window.iter().copied().sum();
    Some(sum / Decimal::from(period))
}

/// Wilder's relative strength index over `period`, in `[0, 100]`.
pub fn rsi(values: &[Decimal], period: usize) -> Option<Decimal> {
    if period == 0 || values.len() < period + 1 {
        return None;
    }

    let p = Decimal::from(period);
    let changes: Vec<Decimal> = values.windows(2).map(|w| w[1] - w[0]).collect();

    let (seed, rest) = changes.split_at(period);
    let mut avg_gain: Decimal = seed
        .iter()
        .filter(|c| c.is_sign_positive())
        .copied()
        .sum::<Decimal>()
        / p;
    let mut avg_loss: Decimal = seed
        .iter()
        .filter(|c| c.is_sign_negative())
        .map(|c| -*c)
        .sum::<Decimal>()
        / p;

    for change in rest {
        let (gain, loss) = if change.is_sign_negative() {
            (Decimal::ZERO, -*change)
        } else {
            (*change, Decimal::ZERO)
        };
        avg_gain = (avg_gain * (p - Decimal::ONE) + gain) / p;
        avg_loss = (avg_loss * (p - Decimal::ONE) + loss) / p;
    }

    if avg_loss.is_zero() {
        return Some(if avg_gain.is_zero() {
            Decimal::from(50)
        } else {
            Decimal::ONE_HUNDRED
        });
    }

    let rs = avg_gain / avg_loss;
    Some(Decimal::ONE_HUNDRED - Decimal::ONE_HUNDRED / (Decimal::ONE + rs))
}

/// Rate of change (%) between the last value and the one `period` bars earlier.
pub fn roc(values: &[Decimal], period: usize) -> Option<Decimal> {
    if period == 0 || values.len() < period + 1 {
        return None;
    }
    let last = values[values.len() - 1];
    let base = values[values.len() - 1 - period];
    if base.is_zero() {
        return None;
    }
    Some((last - base) / base * Decimal::ONE_HUNDRED)
}
