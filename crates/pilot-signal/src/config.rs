//! Signal provider configuration.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Tuning preset for the enhanced ensemble provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnhancedProfile {
    /// Needs strong agreement between indicators.
    Conservative,
    #[default]
    Balanced,
    /// Acts on weak agreement.
    Aggressive,
}

impl EnhancedProfile {
    /// Minimum weighted agreement (0-1) before a BUY/SELL is emitted.
    pub fn confidence_floor(&self) -> Decimal {
        match self {
            Self::Conservative => Decimal::new(60, 2),
            Self::Balanced => Decimal::new(40, 2),
            Self::Aggressive => Decimal::new(20, 2),
        }
    }

    /// Vote weights: (sma trend, rsi, rate of change).
    pub fn weights(&self) -> (Decimal, Decimal, Decimal) {
        match self {
            Self::Conservative => (Decimal::new(5, 1), Decimal::new(3, 1), Decimal::new(2, 1)),
            Self::Balanced => (Decimal::new(4, 1), Decimal::new(3, 1), Decimal::new(3, 1)),
            Self::Aggressive => (Decimal::new(3, 1), Decimal::new(2, 1), Decimal::new(5, 1)),
        }
    }
}

impl fmt::Display for EnhancedProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Conservative => write!(f, "conservative"),
            Self::Balanced => write!(f, "balanced"),
            Self::Aggressive => write!(f, "aggressive"),
        }
    }
}

impl FromStr for EnhancedProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "conservative" => Ok(Self::Conservative),
            "balanced" => Ok(Self::Balanced),
            "aggressive" => Ok(Self::Aggressive),
            other => Err(format!("unknown profile: {other}")),
        }
    }
}

/// Indicator periods and thresholds shared by the baseline strategies and
/// the enhanced ensemble.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalConfig {
    /// Fast SMA period for `sma_cross`.
    #[serde(default = "default_sma_fast")]
    pub sma_fast: usize,
    /// Slow SMA period for `sma_cross`.
    #[serde(default = "default_sma_slow")]
    pub sma_slow: usize,
    #[serde(default = "default_rsi_period")]
    pub rsi_period: usize,
    #[serde(default = "default_rsi_oversold")]
    pub rsi_oversold: Decimal,
    #[serde(default = "default_rsi_overbought")]
    pub rsi_overbought: Decimal,
    /// Lookback for the rate-of-change vote.
    #[serde(default = "default_roc_period")]
    pub roc_period: usize,
    /// Rate of change (%) that counts as momentum.
    #[serde(default = "default_roc_threshold_pct")]
    pub roc_threshold_pct: Decimal,
    /// Try the enhanced provider before the baseline.
    #[serde(default)]
    pub enhanced_enabled: bool,
    #[serde(default)]
    pub enhanced_profile: EnhancedProfile,
}

fn default_sma_fast() -> usize {
    9
}

fn default_sma_slow() -> usize {
    21
}

fn default_rsi_period() -> usize {
    14
}

fn default_rsi_oversold() -> Decimal {
    Decimal::from(30)
}

fn default_rsi_overbought() -> Decimal {
    Decimal::from(70)
}

fn default_roc_period() -> usize {
    10
}

fn default_roc_threshold_pct() -> Decimal {
    Decimal::ONE
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            sma_fast: default_sma_fast(),
            sma_slow: default_sma_slow(),
            rsi_period: default_rsi_period(),
            rsi_oversold: default_rsi_oversold(),
            rsi_overbought: default_rsi_overbought(),
            roc_period: default_roc_period(),
            roc_threshold_pct: default_roc_threshold_pct(),
            enhanced_enabled: false,
            enhanced_profile: EnhancedProfile::default(),
        }
    }
}

impl SignalConfig {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.sma_fast == 0 || self.sma_fast >= self.sma_slow {
            return Err(format!(
                "sma_fast ({}) must be positive and less than sma_slow ({})",
                self.sma_fast, self.sma_slow
            ));
        }

        if self.rsi_period == 0 || self.roc_period == 0 {
            return Err("rsi_period and roc_period must be positive".to_string());
        }

        if self.rsi_oversold >= self.rsi_overbought
            || self.rsi_oversold.is_sign_negative()
            || self.rsi_overbought > Decimal::ONE_HUNDRED
        {
            return Err(format!(
                "rsi thresholds must satisfy 0 <= oversold ({}) < overbought ({}) <= 100",
                self.rsi_oversold, self.rsi_overbought
            ));
        }

        Ok(())
    }

    /// Bars needed for every indicator to be computable.
    pub fn min_bars(&self) -> usize {
        self.sma_slow
            .max(self.rsi_period + 1)
            .max(self.roc_period + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = SignalConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.min_bars(), 21);
    }

    #[test]
    fn test_rejects_inverted_sma_periods() {
        let config = SignalConfig {
            sma_fast: 30,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parses_from_toml_with_defaults() {
        let config: SignalConfig =
            toml::from_str("enhanced_enabled = true\nenhanced_profile = \"aggressive\"").unwrap();
        assert!(config.enhanced_enabled);
        assert_eq!(config.enhanced_profile, EnhancedProfile::Aggressive);
        assert_eq!(config.sma_slow, 21);
    }

    #[test]
    fn test_profile_floors_are_ordered() {
        assert!(
            EnhancedProfile::Conservative.confidence_floor()
                > EnhancedProfile::Balanced.confidence_floor()
        );
        assert!(
            EnhancedProfile::Balanced.confidence_floor()
                > EnhancedProfile::Aggressive.confidence_floor()
        );
        assert_eq!("Balanced".parse::<EnhancedProfile>(), Ok(EnhancedProfile::Balanced));
    }
}
