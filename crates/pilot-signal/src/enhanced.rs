//! Optional enhanced provider and the slot it is installed into.
//!
//! The dispatcher never holds an enhanced provider directly. It asks an
//! [`EnhancedSource`] for one on every evaluation, so installing, removing
//! or toggling the provider takes effect on the next cycle without a
//! restart.

use crate::config::{EnhancedProfile, SignalConfig};
use crate::error::{SignalError, SignalResult};
use crate::indicators::{roc, rsi, sma};
use crate::provider::{DynSignalProvider, SignalProvider};
use parking_lot::RwLock;
use pilot_core::{closes, validate_window, BotState, PriceBar, Signal, SignalAction, SignalSource};
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Where the dispatcher looks for an enhanced provider.
pub trait EnhancedSource: Send + Sync {
    /// Whether the operator wants the enhanced path tried at all.
    fn is_enabled(&self) -> bool {
        true
    }

    /// Obtain the provider for one evaluation.
    ///
    /// Returns `SignalError::NotInstalled` when nothing is available.
    fn acquire(&self) -> SignalResult<DynSignalProvider>;
}

/// Runtime-swappable holder for the enhanced provider.
#[derive(Default)]
pub struct EnhancedSlot {
    provider: RwLock<Option<DynSignalProvider>>,
    enabled: AtomicBool,
}

impl EnhancedSlot {
    /// Empty, disabled slot.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Slot pre-filled with `provider`.
    pub fn with_provider(provider: DynSignalProvider, enabled: bool) -> Self {
        Self {
            provider: RwLock::new(Some(provider)),
            enabled: AtomicBool::new(enabled),
        }
    }

    /// Install (or replace) the provider.
    pub fn install(&self, provider: DynSignalProvider) {
        *self.provider.write() = Some(provider);
    }

    /// Remove the provider; later evaluations fall back to the baseline.
    pub fn clear(&self) -> Option<DynSignalProvider> {
        self.provider.write().take()
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_installed(&self) -> bool {
        self.provider.read().is_some()
    }

    /// Enabled and installed.
    pub fn is_available(&self) -> bool {
        self.is_enabled() && self.is_installed()
    }
}

impl EnhancedSource for EnhancedSlot {
    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn acquire(&self) -> SignalResult<DynSignalProvider> {
        self.provider
            .read()
            .clone()
            .ok_or_else(|| SignalError::NotInstalled("enhanced slot is empty".to_string()))
    }
}

impl std::fmt::Debug for EnhancedSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = self.provider.read().as_ref().map(|p| p.name().to_string());
        f.debug_struct("EnhancedSlot")
            .field("provider", &name)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

/// Weighted vote of trend, RSI and momentum.
///
/// Each indicator votes +1 (buy), -1 (sell) or 0. The weighted sum is the
/// agreement score; its magnitude becomes the confidence, and anything
/// below the profile's floor is a HOLD.
#[derive(Debug, Clone)]
pub struct EnsembleProvider {
    config: SignalConfig,
    profile: EnhancedProfile,
}

impl EnsembleProvider {
    pub fn new(config: SignalConfig) -> Self {
        let profile = config.enhanced_profile;
        Self { config, profile }
    }

    pub fn into_shared(self) -> DynSignalProvider {
        Arc::new(self)
    }

    fn trend_vote(&self, closes: &[Decimal]) -> Option<i8> {
        let fast = sma(closes, self.config.sma_fast)?;
        let slow = sma(closes, self.config.sma_slow)?;
        Some(match fast.cmp(&slow) {
            std::cmp::Ordering::Greater => 1,
            std::cmp::Ordering::Less => -1,
            std::cmp::Ordering::Equal => 0,
        })
    }

    fn rsi_vote(&self, closes: &[Decimal]) -> Option<i8> {
        let value = rsi(closes, self.config.rsi_period)?;
        Some(if value <= self.config.rsi_oversold {
            1
        } else if value >= self.config.rsi_overbought {
            -1
        } else {
            0
        })
    }

    fn momentum_vote(&self, closes: &[Decimal]) -> Option<i8> {
        let value = roc(closes, self.config.roc_period)?;
        let threshold = self.config.roc_threshold_pct;
        Some(if value >= threshold {
            1
        } else if value <= -threshold {
            -1
        } else {
            0
        })
    }
}

impl SignalProvider for EnsembleProvider {
    fn name(&self) -> &str {
        "ensemble"
    }

    fn evaluate(&self, bars: &[PriceBar], _state: &BotState) -> SignalResult<Signal> {
        validate_window(bars)?;
        let closes = closes(bars);

        let insufficient = || SignalError::InsufficientBars {
            needed: self.config.min_bars(),
            got: closes.len(),
        };
        let trend = self.trend_vote(&closes).ok_or_else(insufficient)?;
        let osc = self.rsi_vote(&closes).ok_or_else(insufficient)?;
        let momentum = self.momentum_vote(&closes).ok_or_else(insufficient)?;

        let (w_trend, w_osc, w_momentum) = self.profile.weights();
        let score = w_trend * Decimal::from(trend)
            + w_osc * Decimal::from(osc)
            + w_momentum * Decimal::from(momentum);
        let reason = format!(
            "{} votes trend={trend} rsi={osc} roc={momentum} score={score}",
            self.profile
        );

        if score.is_zero() || score.abs() < self.profile.confidence_floor() {
            return Ok(Signal::hold(SignalSource::Enhanced, reason));
        }

        let action = if score.is_sign_positive() {
            SignalAction::Buy
        } else {
            SignalAction::Sell
        };
        Ok(Signal::new(action, score.abs(), SignalSource::Enhanced, reason))
    }
}
