//! Trading signal types.

use crate::order::OrderSide;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Decision produced by a signal provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalAction {
    Buy,
    Sell,
    Hold,
}

impl SignalAction {
    /// Order side for actionable signals, `None` for `Hold`.
    pub fn side(&self) -> Option<OrderSide> {
        match self {
            Self::Buy => Some(OrderSide::Buy),
            Self::Sell => Some(OrderSide::Sell),
            Self::Hold => None,
        }
    }

    pub fn is_hold(&self) -> bool {
        *self == Self::Hold
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
            Self::Hold => "HOLD",
        }
    }
}

impl fmt::Display for SignalAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which provider produced a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalSource {
    /// Always-available indicator strategy.
    Baseline,
    /// Optional enhanced provider.
    Enhanced,
    /// Stop-loss override issued by the execution loop.
    Risk,
}

impl fmt::Display for SignalSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Baseline => write!(f, "baseline"),
            Self::Enhanced => write!(f, "enhanced"),
            Self::Risk => write!(f, "risk"),
        }
    }
}

/// A trading signal.
///
/// `confidence` is informational (logging and reporting); it never bypasses
/// a risk check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signal {
    pub action: SignalAction,
    /// In `[0, 1]`.
    pub confidence: Decimal,
    pub source: SignalSource,
    /// Short human-readable explanation.
    pub reason: String,
}

impl Signal {
    /// Create a signal, clamping confidence into `[0, 1]`.
    pub fn new(
        action: SignalAction,
        confidence: Decimal,
        source: SignalSource,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            action,
            confidence: confidence.clamp(Decimal::ZERO, Decimal::ONE),
            source,
            reason: reason.into(),
        }
    }

    pub fn hold(source: SignalSource, reason: impl Into<String>) -> Self {
        Self::new(SignalAction::Hold, Decimal::ZERO, source, reason)
    }

    /// Downgrade to `Hold`, keeping source and noting why.
    pub fn into_hold(self, why: &str) -> Self {
        Self {
            action: SignalAction::Hold,
            reason: format!("{why} ({})", self.reason),
            ..self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_action_side() {
        assert_eq!(SignalAction::Buy.side(), Some(OrderSide::Buy));
        assert_eq!(SignalAction::Sell.side(), Some(OrderSide::Sell));
        assert_eq!(SignalAction::Hold.side(), None);
    }

    #[test]
    fn test_confidence_is_clamped() {
        let s = Signal::new(SignalAction::Buy, dec!(1.7), SignalSource::Baseline, "x");
        assert_eq!(s.confidence, Decimal::ONE);
        let s = Signal::new(SignalAction::Buy, dec!(-0.2), SignalSource::Baseline, "x");
        assert_eq!(s.confidence, Decimal::ZERO);
    }

    #[test]
    fn test_into_hold_keeps_source() {
        let s = Signal::new(SignalAction::Sell, dec!(0.8), SignalSource::Enhanced, "rsi high");
        let held = s.into_hold("repeat");
        assert_eq!(held.action, SignalAction::Hold);
        assert_eq!(held.source, SignalSource::Enhanced);
        assert!(held.reason.contains("rsi high"));
    }
}
