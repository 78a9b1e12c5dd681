//! Application configuration.

use crate::error::{AppError, AppResult};
use pilot_core::{RetryPolicy, RiskParams, Size, DEFAULT_STRATEGY};
use pilot_exchange::{split_pair, BINANCE_REST_URL};
use pilot_executor::LoopConfig;
use pilot_signal::{is_known_strategy, SignalConfig};
use pilot_telemetry::DEFAULT_FILTER;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

const CONFIG_ENV: &str = "PILOT_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperatingMode {
    /// Live market data, simulated fills.
    #[default]
    Paper,
    /// Real orders on the exchange. Requires API credentials.
    Live,
}

/// Where the configuration came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigOrigin {
    File,
    Defaults,
}

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub mode: OperatingMode,
    /// Trading pair, e.g. `BTCUSDT`.
    #[serde(default = "default_pair")]
    pub pair: String,
    /// Candle interval, e.g. `1h`.
    #[serde(default = "default_candle_interval")]
    pub candle_interval: String,
    /// Bars per evaluation window.
    #[serde(default = "default_candle_limit")]
    pub candle_limit: u32,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Start trading on launch when the persisted state says `running`.
    #[serde(default = "default_auto_start")]
    pub auto_start: bool,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub signal: SignalConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub exchange: ExchangeConfig,
    #[serde(default)]
    pub paper: PaperConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

fn default_pair() -> String {
    "BTCUSDT".to_string()
}

fn default_candle_interval() -> String {
    "1h".to_string()
}

fn default_candle_limit() -> u32 {
    100
}

fn default_poll_interval_secs() -> u64 {
    60
}

fn default_auto_start() -> bool {
    true
}

/// State store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    /// Path of the persisted JSON record.
    #[serde(default = "default_state_path")]
    pub path: String,
    /// Strategy written into a fresh or recovered record.
    #[serde(default = "default_strategy")]
    pub default_strategy: String,
}

fn default_state_path() -> String {
    "bot_state.json".to_string()
}

fn default_strategy() -> String {
    DEFAULT_STRATEGY.to_string()
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            path: default_state_path(),
            default_strategy: default_strategy(),
        }
    }
}

/// Risk limits. Applied to the state record at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Exit when price falls this many percent below entry.
    #[serde(default = "default_stop_loss_pct")]
    pub stop_loss_pct: Decimal,
    /// Upper bound on the held base-asset quantity.
    #[serde(default = "default_max_position_size")]
    pub max_position_size: Decimal,
    /// Base-asset quantity per BUY.
    #[serde(default = "default_order_size")]
    pub order_size: Decimal,
}

fn default_stop_loss_pct() -> Decimal {
    Decimal::new(2, 0)
}

fn default_max_position_size() -> Decimal {
    Decimal::new(1, 2)
}

fn default_order_size() -> Decimal {
    Decimal::new(1, 3)
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            stop_loss_pct: default_stop_loss_pct(),
            max_position_size: default_max_position_size(),
            order_size: default_order_size(),
        }
    }
}

impl RiskConfig {
    pub fn to_params(&self) -> RiskParams {
        RiskParams {
            stop_loss_pct: self.stop_loss_pct,
            max_position_size: Size::new(self.max_position_size),
            order_size: Size::new(self.order_size),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.stop_loss_pct <= Decimal::ZERO || self.stop_loss_pct >= Decimal::ONE_HUNDRED {
            return Err(format!(
                "stop_loss_pct must be within (0, 100), got {}",
                self.stop_loss_pct
            ));
        }
        if self.max_position_size <= Decimal::ZERO {
            return Err("max_position_size must be positive".to_string());
        }
        if self.order_size <= Decimal::ZERO {
            return Err("order_size must be positive".to_string());
        }
        if self.order_size > self.max_position_size {
            return Err(format!(
                "order_size {} exceeds max_position_size {}",
                self.order_size, self.max_position_size
            ));
        }
        Ok(())
    }
}

/// Exchange connection configuration.
///
/// Credentials are never read from the file; see `PILOT_API_KEY` and
/// `PILOT_API_SECRET`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    #[serde(default = "default_rest_url")]
    pub rest_url: String,
    /// Timeout for market data and account requests (ms).
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Timeout for one order submission (ms).
    #[serde(default = "default_order_timeout_ms")]
    pub order_timeout_ms: u64,
    /// Signed request validity window (ms).
    #[serde(default = "default_recv_window_ms")]
    pub recv_window_ms: u64,
}

fn default_rest_url() -> String {
    BINANCE_REST_URL.to_string()
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_order_timeout_ms() -> u64 {
    10_000
}

fn default_recv_window_ms() -> u64 {
    5_000
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            rest_url: default_rest_url(),
            request_timeout_ms: default_request_timeout_ms(),
            order_timeout_ms: default_order_timeout_ms(),
            recv_window_ms: default_recv_window_ms(),
        }
    }
}

/// Paper trading configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperConfig {
    /// Quote-asset balance the simulated account starts with.
    #[serde(default = "default_starting_quote")]
    pub starting_quote: Decimal,
}

fn default_starting_quote() -> Decimal {
    Decimal::new(10_000, 0)
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            starting_quote: default_starting_quote(),
        }
    }
}

/// Telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    DEFAULT_FILTER.to_string()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            mode: OperatingMode::default(),
            pair: default_pair(),
            candle_interval: default_candle_interval(),
            candle_limit: default_candle_limit(),
            poll_interval_secs: default_poll_interval_secs(),
            auto_start: default_auto_start(),
            state: StateConfig::default(),
            risk: RiskConfig::default(),
            signal: SignalConfig::default(),
            retry: RetryPolicy::default(),
            exchange: ExchangeConfig::default(),
            paper: PaperConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

impl AppConfig {
    /// Config path: explicit argument, then `PILOT_CONFIG`, then the default.
    pub fn resolve_path(explicit: Option<String>) -> String {
        explicit
            .or_else(|| std::env::var(CONFIG_ENV).ok())
            .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string())
    }

    /// Load `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &str) -> AppResult<(Self, ConfigOrigin)> {
        if Path::new(path).exists() {
            Ok((Self::from_file(path)?, ConfigOrigin::File))
        } else {
            Ok((Self::default(), ConfigOrigin::Defaults))
        }
    }

    /// Load from a specific file.
    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;

        toml::from_str(&content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))
    }

    /// Reject values the bot cannot run with.
    pub fn validate(&self) -> AppResult<()> {
        let invalid = |msg: String| Err(AppError::Config(msg));

        if split_pair(&self.pair).is_none() {
            return invalid(format!("unrecognized trading pair: {}", self.pair));
        }
        if self.candle_interval.trim().is_empty() {
            return invalid("candle_interval must not be empty".to_string());
        }
        if self.candle_limit == 0 {
            return invalid("candle_limit must be positive".to_string());
        }
        if self.poll_interval_secs == 0 {
            return invalid("poll_interval_secs must be positive".to_string());
        }
        if !is_known_strategy(&self.state.default_strategy) {
            return invalid(format!(
                "unknown default_strategy: {}",
                self.state.default_strategy
            ));
        }
        if self.exchange.request_timeout_ms == 0 || self.exchange.order_timeout_ms == 0 {
            return invalid("exchange timeouts must be positive".to_string());
        }
        if self.paper.starting_quote < Decimal::ZERO {
            return invalid("paper.starting_quote must not be negative".to_string());
        }
        self.risk.validate().map_err(AppError::Config)?;
        self.signal.validate().map_err(AppError::Config)?;

        let needed = self.signal.min_bars();
        if (self.candle_limit as usize) < needed {
            return invalid(format!(
                "candle_limit {} is below the {needed} bars the indicators need",
                self.candle_limit
            ));
        }
        Ok(())
    }

    pub fn is_live(&self) -> bool {
        self.mode == OperatingMode::Live
    }

    /// Execution loop parameters derived from this configuration.
    pub fn loop_config(&self) -> LoopConfig {
        let quote = split_pair(&self.pair).map(|(_, quote)| quote);
        LoopConfig {
            pair: self.pair.to_ascii_uppercase(),
            candle_interval: self.candle_interval.clone(),
            candle_limit: self.candle_limit,
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            fetch_timeout: Duration::from_millis(self.exchange.request_timeout_ms),
            order_timeout: Duration::from_millis(self.exchange.order_timeout_ms),
            retry: self.retry,
            balance_asset: if self.is_live() { quote } else { None },
        }
    }
}
