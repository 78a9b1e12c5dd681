//! Price bars (candles) and window validation.

use crate::decimal::{Price, Size};
use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};

/// One OHLCV bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceBar {
    /// Bar open time (Unix ms).
    pub open_time_ms: i64,
    pub open: Price,
    pub high: Price,
    pub low: Price,
    pub close: Price,
    pub volume: Size,
}

impl PriceBar {
    pub fn new(
        open_time_ms: i64,
        open: Price,
        high: Price,
        low: Price,
        close: Price,
        volume: Size,
    ) -> Self {
        Self {
            open_time_ms,
            open,
            high,
            low,
            close,
            volume,
        }
    }
}

/// Check that a fetched window is usable: non-empty, strictly increasing
/// timestamps and positive closes.
pub fn validate_window(bars: &[PriceBar]) -> Result<()> {
    if bars.is_empty() {
        return Err(CoreError::InvalidBars("empty window".to_string()));
    }

    for pair in bars.windows(2) {
        if pair[1].open_time_ms <= pair[0].open_time_ms {
            return Err(CoreError::InvalidBars(format!(
                "timestamps not strictly increasing at {} -> {}",
                pair[0].open_time_ms, pair[1].open_time_ms
            )));
        }
    }

    if let Some(bad) = bars.iter().find(|b| !b.close.is_positive()) {
        return Err(CoreError::InvalidBars(format!(
            "non-positive close {} at {}",
            bad.close, bad.open_time_ms
        )));
    }

    Ok(())
}

/// Closing prices of a window, oldest first.
pub fn closes(bars: &[PriceBar]) -> Vec<rust_decimal::Decimal> {
    bars.iter().map(|b| b.close.inner()).collect()
}
