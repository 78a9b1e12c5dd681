//! Control surface shared between the execution loop and external callers.
//!
//! The loop and a [`ControlHandle`] share one [`LoopShared`]:
//! - loop lifecycle lives in a `watch` channel, readable at any time
//! - `BotState` changes go through the store's serialized mutation
//! - shutdown is a `CancellationToken` that interrupts every wait

use crate::error::{ExecutorError, ExecutorResult};
use crate::executor_loop::LoopConfig;
use crate::retry::{retry_exchange, RetryFailure};
use crate::status::{BotStatus, LoopEvent, LoopStatus};
use pilot_core::LoopState;
use pilot_exchange::{DynMarketData, DynOrderGateway};
use pilot_signal::{is_known_strategy, EnhancedSlot};
use pilot_state::StateStore;
use pilot_telemetry::Metrics;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Buffered lifecycle events per subscriber before it starts lagging.
const EVENT_CAPACITY: usize = 256;

// ============================================================================
// LoopShared
// ============================================================================

/// State reachable from both the loop task and control commands.
pub(crate) struct LoopShared {
    pub(crate) config: LoopConfig,
    pub(crate) store: Arc<StateStore>,
    pub(crate) market: DynMarketData,
    pub(crate) gateway: DynOrderGateway,
    pub(crate) enhanced: Arc<EnhancedSlot>,
    pub(crate) shutdown: CancellationToken,
    status: watch::Sender<LoopStatus>,
    events: broadcast::Sender<LoopEvent>,
}

impl LoopShared {
    pub(crate) fn new(
        config: LoopConfig,
        store: Arc<StateStore>,
        market: DynMarketData,
        gateway: DynOrderGateway,
        enhanced: Arc<EnhancedSlot>,
    ) -> Self {
        let (status, _) = watch::channel(LoopStatus::default());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Metrics::loop_state_set(&LoopState::Stopped.to_string());
        Self {
            config,
            store,
            market,
            gateway,
            enhanced,
            shutdown: CancellationToken::new(),
            status,
            events,
        }
    }

    pub(crate) fn loop_state(&self) -> LoopState {
        self.status.borrow().state
    }

    pub(crate) fn status(&self) -> LoopStatus {
        self.status.borrow().clone()
    }

    pub(crate) fn watch(&self) -> watch::Receiver<LoopStatus> {
        self.status.subscribe()
    }

    /// Move the loop to `to`, returning the previous state.
    pub(crate) fn transition(&self, to: LoopState) -> ExecutorResult<LoopState> {
        let mut from = to;
        let mut allowed = false;
        self.status.send_if_modified(|status| {
            from = status.state;
            allowed = from.can_transition_to(to);
            if allowed {
                status.state = to;
            }
            allowed
        });

        if !allowed {
            return Err(ExecutorError::InvalidTransition { from, to });
        }

        info!(%from, %to, "Loop state changed");
        Metrics::loop_state_set(&to.to_string());
        self.publish(LoopEvent::StateChanged { from, to });
        Ok(from)
    }

    /// Enter SHUTTING_DOWN (if not already there) and cancel all waits.
    pub(crate) fn begin_shutdown(&self) {
        if self.loop_state() != LoopState::ShuttingDown {
            // Every non-terminal state may move to SHUTTING_DOWN.
            let _ = self.transition(LoopState::ShuttingDown);
        }
        self.shutdown.cancel();
    }

    pub(crate) fn set_error(&self, error: Option<String>) {
        self.status.send_if_modified(|status| {
            if status.last_error == error {
                return false;
            }
            status.last_error = error;
            true
        });
    }

    pub(crate) fn record_cycle(&self) {
        self.status.send_modify(|status| status.cycles += 1);
    }

    pub(crate) fn publish(&self, event: LoopEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<LoopEvent> {
        self.events.subscribe()
    }
}

// ============================================================================
// ControlHandle
// ============================================================================

/// Cloneable handle for the chat front end or any other controller.
///
/// Every command either moves the loop state machine, mutates `BotState`
/// through the store, or both. None of them touch the loop's in-flight
/// cycle directly.
#[derive(Clone)]
pub struct ControlHandle {
    shared: Arc<LoopShared>,
}

impl ControlHandle {
    pub(crate) fn new(shared: Arc<LoopShared>) -> Self {
        Self { shared }
    }

    /// STOPPED -> RUNNING after a successful connectivity check.
    ///
    /// On a failed check the loop stays STOPPED and the error is kept as
    /// `last_error`.
    pub async fn start(&self) -> ExecutorResult<()> {
        let result = self.try_start().await;
        record("start", &result);
        result
    }

    /// RUNNING -> PAUSED. The loop keeps evaluating but places no orders.
    pub async fn pause(&self) -> ExecutorResult<()> {
        let result = self.halt(LoopState::Paused).await;
        record("pause", &result);
        result
    }

    /// PAUSED -> RUNNING.
    pub async fn resume(&self) -> ExecutorResult<()> {
        let result = self.try_resume().await;
        record("resume", &result);
        result
    }

    /// RUNNING or PAUSED -> STOPPED. The loop idles until the next `start`.
    pub async fn stop(&self) -> ExecutorResult<()> {
        let result = self.halt(LoopState::Stopped).await;
        record("stop", &result);
        result
    }

    /// Select a baseline strategy for subsequent cycles.
    pub async fn set_strategy(&self, id: &str) -> ExecutorResult<()> {
        let result = self.try_set_strategy(id).await;
        record("set_strategy", &result);
        result
    }

    /// Toggle the enhanced provider. Takes effect on the next cycle.
    pub fn set_enhanced(&self, enabled: bool) {
        self.shared.enhanced.set_enabled(enabled);
        info!(
            enabled,
            installed = self.shared.enhanced.is_installed(),
            "Enhanced provider toggled"
        );
        Metrics::control_command("set_enhanced", true);
    }

    /// Current loop and bot state. Never waits on an in-flight cycle.
    pub fn get_status(&self) -> BotStatus {
        let status = self.shared.status();
        BotStatus {
            loop_state: status.state,
            bot_state: self.shared.store.snapshot(),
            last_error: status.last_error,
            cycles: status.cycles,
            enhanced_available: self.shared.enhanced.is_available(),
        }
    }

    /// Ask the loop to drain its current iteration, persist and exit.
    ///
    /// Idempotent.
    pub fn shutdown(&self) {
        info!(state = %self.shared.loop_state(), "Shutdown requested");
        self.shared.begin_shutdown();
        Metrics::control_command("shutdown", true);
    }

    /// Lifecycle events published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<LoopEvent> {
        self.shared.subscribe()
    }

    /// Live view of the loop status.
    pub fn watch(&self) -> watch::Receiver<LoopStatus> {
        self.shared.watch()
    }

    async fn try_start(&self) -> ExecutorResult<()> {
        let current = self.shared.loop_state();
        if current != LoopState::Stopped {
            return Err(ExecutorError::InvalidTransition {
                from: current,
                to: LoopState::Running,
            });
        }

        if let Err(e) = self.check_connectivity().await {
            warn!(error = %e, "Start refused, exchange unreachable");
            self.shared.set_error(Some(e.to_string()));
            return Err(e);
        }

        self.authorize(LoopState::Running).await?;
        self.shared.set_error(None);
        Ok(())
    }

    async fn try_resume(&self) -> ExecutorResult<()> {
        let current = self.shared.loop_state();
        if current != LoopState::Paused {
            return Err(ExecutorError::InvalidTransition {
                from: current,
                to: LoopState::Running,
            });
        }
        self.authorize(LoopState::Running).await
    }

    /// Persist `running = true`, then enter `to`.
    ///
    /// The flag is written first so the loop never observes RUNNING while
    /// the record still says stopped.
    async fn authorize(&self, to: LoopState) -> ExecutorResult<()> {
        let from = self.shared.loop_state();
        if !from.can_transition_to(to) {
            return Err(ExecutorError::InvalidTransition { from, to });
        }

        self.shared.store.mutate(|state| state.running = true).await?;
        if let Err(e) = self.shared.transition(to) {
            self.shared.store.mutate(|state| state.running = false).await?;
            return Err(e);
        }
        Ok(())
    }

    /// Enter `to`, then persist `running = false`.
    async fn halt(&self, to: LoopState) -> ExecutorResult<()> {
        self.shared.transition(to)?;
        self.shared.store.mutate(|state| state.running = false).await?;
        Ok(())
    }

    async fn try_set_strategy(&self, id: &str) -> ExecutorResult<()> {
        if !is_known_strategy(id) {
            return Err(ExecutorError::UnknownStrategy(id.to_string()));
        }
        let previous = self.shared.store.snapshot().strategy;
        self.shared
            .store
            .mutate(|state| state.strategy = id.to_string())
            .await?;
        info!(from = %previous, to = %id, "Strategy changed");
        Ok(())
    }

    /// Ping the exchange and, when configured, read the account balance.
    async fn check_connectivity(&self) -> ExecutorResult<()> {
        let shared = &self.shared;
        let config = &shared.config;

        retry_exchange(
            "ping",
            &config.retry,
            config.fetch_timeout,
            &shared.shutdown,
            move || shared.market.ping(),
        )
        .await
        .map_err(connectivity_error)?;

        if let Some(asset) = config.balance_asset.as_deref() {
            let balance = retry_exchange(
                "get_balance",
                &config.retry,
                config.fetch_timeout,
                &shared.shutdown,
                move || shared.gateway.get_balance(asset),
            )
            .await
            .map_err(connectivity_error)?;
            info!(asset, %balance, "Account balance checked");
        }
        Ok(())
    }
}

fn connectivity_error(failure: RetryFailure) -> ExecutorError {
    match failure {
        RetryFailure::Cancelled => ExecutorError::Cancelled,
        RetryFailure::Exhausted {
            attempts,
            last_error,
        } => ExecutorError::Connectivity {
            attempts,
            last_error,
        },
    }
}

fn record(command: &str, result: &ExecutorResult<()>) {
    match result {
        Ok(()) => info!(command, "Control command applied"),
        Err(e) => warn!(command, error = %e, "Control command refused"),
    }
    Metrics::control_command(command, result.is_ok());
}
