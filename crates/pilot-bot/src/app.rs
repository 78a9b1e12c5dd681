//! Application wiring and process lifecycle.
//!
//! Startup order:
//! 1. Open the state store (retrying I/O, recovering a corrupt record)
//! 2. Apply configured risk limits to the record
//! 3. Build the exchange (paper or live) and signal providers
//! 4. Spawn the execution loop, auto-start it if the record says running
//! 5. Wait for SIGINT/SIGTERM or a fatal loop exit, then drain

use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use pilot_core::{BotState, Size};
use pilot_exchange::{
    split_pair, BinanceClient, Credentials, DynMarketData, DynOrderGateway, PaperExchange,
};
use pilot_executor::{ControlHandle, ExecutionLoop, LoopEvent};
use pilot_signal::{BaselineProvider, EnhancedSlot, EnsembleProvider};
use pilot_state::StateStore;
use pilot_telemetry::Metrics;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, error, info, warn};

/// Market data source and order gateway for the configured mode.
pub struct ExchangeBundle {
    pub market: DynMarketData,
    pub gateway: DynOrderGateway,
}

/// Main application.
pub struct Application {
    config: AppConfig,
}

impl Application {
    /// Create the application from a validated configuration.
    pub fn new(config: AppConfig) -> AppResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Run until shutdown. A fatal loop exit is returned as an error.
    pub async fn run(self) -> AppResult<()> {
        let config = &self.config;

        let default_state = BotState {
            strategy: config.state.default_strategy.clone(),
            risk_params: config.risk.to_params(),
            ..Default::default()
        };
        let (store, outcome) =
            StateStore::open_with_retry(&config.state.path, default_state, config.retry).await?;
        let store = Arc::new(store);
        info!(path = %store.path().display(), ?outcome, "State store opened");

        let params = config.risk.to_params();
        if store.snapshot().risk_params != params {
            store.mutate(|state| state.risk_params = params).await?;
            info!(?params, "Applied configured risk limits");
        }

        let held = store.snapshot().position_size();
        let exchange = build_exchange(config, Credentials::from_env(), held)?;

        let enhanced = Arc::new(EnhancedSlot::with_provider(
            EnsembleProvider::new(config.signal.clone()).into_shared(),
            config.signal.enhanced_enabled,
        ));
        let baseline = Arc::new(BaselineProvider::new(config.signal.clone()));

        let (execution_loop, control) = ExecutionLoop::new(
            config.loop_config(),
            store.clone(),
            exchange.market,
            exchange.gateway,
            baseline,
            enhanced,
        );
        let event_log = tokio::spawn(log_events(control.subscribe()));
        execution_loop.report_load_outcome(&outcome);
        let mut loop_task = tokio::spawn(execution_loop.run());

        self.auto_start(&control, &store).await?;
        match serde_json::to_string(&control.get_status()) {
            Ok(status) => info!(%status, "Bot status"),
            Err(e) => warn!(error = %e, "Failed to render status"),
        }

        let joined = tokio::select! {
            joined = &mut loop_task => joined,
            () = shutdown_signal() => {
                control.shutdown();
                (&mut loop_task).await
            }
        };
        event_log.abort();
        match Metrics::encode() {
            Ok(text) => debug!(metrics = %text, "Final metrics"),
            Err(e) => warn!(error = %e, "Failed to encode metrics"),
        }

        match joined {
            Ok(Ok(())) => {
                info!("Shutdown complete");
                Ok(())
            }
            Ok(Err(e)) => {
                error!(error = %e, "Execution loop stopped on a fatal error");
                Err(AppError::Executor(e))
            }
            Err(e) => Err(AppError::Task(e.to_string())),
        }
    }

    /// Resume trading when the record says the bot was running.
    ///
    /// A failed start leaves the loop STOPPED and clears `running` so the
    /// record matches what the loop is doing.
    async fn auto_start(&self, control: &ControlHandle, store: &StateStore) -> AppResult<()> {
        let was_running = store.snapshot().running;
        if !was_running {
            info!("Bot idle, waiting for a start command");
            return Ok(());
        }

        if !self.config.auto_start {
            info!("auto_start disabled, clearing persisted running flag");
            store.mutate(|state| state.running = false).await?;
            return Ok(());
        }

        if let Err(e) = control.start().await {
            warn!(error = %e, "Auto-start failed, staying stopped");
            store.mutate(|state| state.running = false).await?;
        }
        Ok(())
    }
}

/// Build the exchange for the configured mode.
///
/// Paper mode reads public market data and simulates fills, starting with
/// `held` of the base asset so a restored position can still be sold.
/// Live mode requires credentials.
pub fn build_exchange(
    config: &AppConfig,
    credentials: Option<Credentials>,
    held: Size,
) -> AppResult<ExchangeBundle> {
    let (base, quote) = split_pair(&config.pair)
        .ok_or_else(|| AppError::Config(format!("unrecognized trading pair: {}", config.pair)))?;
    let timeout = Duration::from_millis(config.exchange.request_timeout_ms);

    if config.is_live() {
        let credentials = credentials.ok_or_else(|| {
            AppError::Config("live mode requires PILOT_API_KEY and PILOT_API_SECRET".to_string())
        })?;
        let client = Arc::new(BinanceClient::new(
            config.exchange.rest_url.clone(),
            timeout,
            config.exchange.recv_window_ms,
            Some(credentials),
        )?);
        info!(rest_url = %config.exchange.rest_url, "Live trading on Binance");
        return Ok(ExchangeBundle {
            market: client.clone(),
            gateway: client,
        });
    }

    let client = Arc::new(BinanceClient::new(
        config.exchange.rest_url.clone(),
        timeout,
        config.exchange.recv_window_ms,
        None,
    )?);
    let paper = Arc::new(
        PaperExchange::new(client, base, quote.clone(), config.paper.starting_quote)
            .with_base_balance(held.inner()),
    );
    info!(
        %quote,
        starting_balance = %config.paper.starting_quote,
        %held,
        "Paper trading with simulated fills"
    );
    Ok(ExchangeBundle {
        market: paper.clone(),
        gateway: paper,
    })
}

/// Log loop events; stands in for a chat front end.
async fn log_events(mut events: broadcast::Receiver<LoopEvent>) {
    loop {
        match events.recv().await {
            Ok(LoopEvent::Signal(_)) => {}
            Ok(LoopEvent::Order(result)) => info!(
                side = %result.side,
                status = %result.status,
                filled = %result.filled_qty,
                detail = result.error_detail.as_deref().unwrap_or(""),
                "Order outcome"
            ),
            Ok(LoopEvent::StateChanged { from, to }) => info!(%from, %to, "Loop state"),
            Ok(LoopEvent::StateRecovered { reason }) => {
                warn!(%reason, "State record was reset to defaults")
            }
            Ok(LoopEvent::CycleFailed { error }) => warn!(%error, "Cycle failed"),
            Ok(LoopEvent::Fatal { error }) => error!(%error, "Fatal error, shutting down"),
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event log lagged"),
            Err(RecvError::Closed) => return,
        }
    }
}

/// Resolve on SIGINT or, on unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received SIGINT"),
        () = terminate => info!("Received SIGTERM"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OperatingMode;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    #[test]
    fn test_paper_mode_needs_no_credentials() {
        let config = AppConfig::default();
        assert!(build_exchange(&config, None, Size::ZERO).is_ok());
    }

    #[tokio::test]
    async fn test_paper_mode_starts_holding_restored_position() {
        let config = AppConfig::default();
        let exchange = build_exchange(&config, None, Size::new(dec!(0.003))).unwrap();

        assert_eq!(exchange.gateway.get_balance("BTC").await.unwrap(), dec!(0.003));
        assert_eq!(
            exchange.gateway.get_balance("USDT").await.unwrap(),
            config.paper.starting_quote
        );

        let flat = build_exchange(&config, None, Size::ZERO).unwrap();
        assert_eq!(flat.gateway.get_balance("BTC").await.unwrap(), Decimal::ZERO);
    }

    #[test]
    fn test_live_mode_requires_credentials() {
        let config = AppConfig {
            mode: OperatingMode::Live,
            ..Default::default()
        };
        assert!(matches!(
            build_exchange(&config, None, Size::ZERO),
            Err(AppError::Config(_))
        ));
        assert!(
            build_exchange(&config, Some(Credentials::new("key", "secret")), Size::ZERO).is_ok()
        );
    }

    #[test]
    fn test_invalid_config_is_refused() {
        let config = AppConfig {
            poll_interval_secs: 0,
            ..Default::default()
        };
        assert!(Application::new(config).is_err());
    }
}
