//! Execution loop: poll, decide, act, persist, sleep.
//!
//! One cycle at a time. The next poll is scheduled `poll_interval` after the
//! previous cycle finished, so a slow cycle pushes the schedule back instead
//! of stacking ticks.
//!
//! Lifecycle is driven from outside through [`ControlHandle`]:
//! - STOPPED: idle, no polling
//! - RUNNING: poll, evaluate, place orders
//! - PAUSED: poll and evaluate only
//! - SHUTTING_DOWN: finish the current step, persist, return
//!
//! A market data fetch in backoff is abandoned as soon as the loop leaves
//! RUNNING/PAUSED, so `stop()` never turns into a fatal exhaustion.

use crate::control::{ControlHandle, LoopShared};
use crate::error::{ExecutorError, ExecutorResult};
use crate::executor::{OrderExecutor, DEFAULT_ORDER_TIMEOUT};
use crate::retry::{retry_exchange, RetryFailure};
use crate::risk::stop_loss_signal;
use crate::status::{LoopEvent, LoopStatus};
use pilot_core::{BotState, LoopState, OrderResult, PriceBar, RetryPolicy, Signal};
use pilot_exchange::{DynMarketData, DynOrderGateway};
use pilot_signal::{DynSignalProvider, EnhancedSlot, SignalDispatcher};
use pilot_state::{LoadOutcome, StateGuard, StateStore};
use pilot_telemetry::Metrics;
use rust_decimal::prelude::ToPrimitive;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

// ============================================================================
// LoopConfig
// ============================================================================

/// Loop parameters.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Trading pair, e.g. `BTCUSDT`.
    pub pair: String,
    /// Candle interval, e.g. `1h`.
    pub candle_interval: String,
    /// Bars per fetched window.
    pub candle_limit: u32,
    /// Wait between the end of one cycle and the start of the next.
    pub poll_interval: Duration,
    /// Bound on each market data / connectivity call.
    pub fetch_timeout: Duration,
    /// Bound on each order submission.
    pub order_timeout: Duration,
    /// Backoff for market data, connectivity and state persistence.
    pub retry: RetryPolicy,
    /// Asset whose balance `start()` reads as part of the connectivity
    /// check. `None` skips it.
    pub balance_asset: Option<String>,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            pair: "BTCUSDT".to_string(),
            candle_interval: "1h".to_string(),
            candle_limit: 100,
            poll_interval: Duration::from_secs(60),
            fetch_timeout: Duration::from_secs(10),
            order_timeout: DEFAULT_ORDER_TIMEOUT,
            retry: RetryPolicy::default(),
            balance_asset: None,
        }
    }
}

// ============================================================================
// ExecutionLoop
// ============================================================================

/// The poll/decide/act orchestrator.
pub struct ExecutionLoop {
    shared: Arc<LoopShared>,
    dispatcher: SignalDispatcher,
    executor: OrderExecutor,
    status_rx: watch::Receiver<LoopStatus>,
}

impl ExecutionLoop {
    /// Build the loop and its control handle. The loop starts STOPPED.
    pub fn new(
        config: LoopConfig,
        store: Arc<StateStore>,
        market: DynMarketData,
        gateway: DynOrderGateway,
        baseline: DynSignalProvider,
        enhanced: Arc<EnhancedSlot>,
    ) -> (Self, ControlHandle) {
        let dispatcher = SignalDispatcher::new(baseline, enhanced.clone());
        let executor = OrderExecutor::new(gateway.clone(), config.pair.clone())
            .with_order_timeout(config.order_timeout);
        let shared = Arc::new(LoopShared::new(config, store, market, gateway, enhanced));
        let status_rx = shared.watch();

        let handle = ControlHandle::new(shared.clone());
        let this = Self {
            shared,
            dispatcher,
            executor,
            status_rx,
        };
        (this, handle)
    }

    /// Surface how the state record was obtained at startup.
    ///
    /// A recovered record is reported as `last_error` and as a
    /// [`LoopEvent::StateRecovered`]; subscribe before calling this to see
    /// the event.
    pub fn report_load_outcome(&self, outcome: &LoadOutcome) {
        if let LoadOutcome::Recovered {
            reason,
            quarantined_to,
        } = outcome
        {
            warn!(
                %reason,
                quarantined_to = ?quarantined_to,
                "Starting from default state after corrupt record"
            );
            Metrics::state_recovered();
            self.shared
                .set_error(Some(format!("state record corrupt, reset to defaults: {reason}")));
            self.shared.publish(LoopEvent::StateRecovered {
                reason: reason.clone(),
            });
        }
    }

    /// Run until shutdown.
    ///
    /// Returns `Err(FatalDependency)` when a dependency exhausted its retries;
    /// the loop has already moved to SHUTTING_DOWN and persisted its state.
    pub async fn run(mut self) -> ExecutorResult<()> {
        info!(
            pair = %self.shared.config.pair,
            interval = %self.shared.config.candle_interval,
            poll_secs = self.shared.config.poll_interval.as_secs(),
            "Execution loop started"
        );

        let outcome = loop {
            if self.shared.shutdown.is_cancelled() {
                break Ok(());
            }

            let state = self.status_rx.borrow_and_update().state;
            match state {
                LoopState::ShuttingDown => break Ok(()),
                LoopState::Stopped => self.idle().await,
                LoopState::Running | LoopState::Paused => match self.cycle().await {
                    Ok(()) => self.wait_next_poll().await,
                    Err(ExecutorError::Cancelled) => {}
                    Err(e) if e.is_fatal() => {
                        self.fail(&e);
                        break Err(e);
                    }
                    Err(e) => {
                        self.cycle_failed(&e);
                        self.wait_next_poll().await;
                    }
                },
            }
        };

        self.finish(outcome.is_err()).await;
        info!(cycles = self.shared.status().cycles, "Execution loop exited");
        outcome
    }

    // ------------------------------------------------------------------------
    // Cycle
    // ------------------------------------------------------------------------

    async fn cycle(&self) -> ExecutorResult<()> {
        let bars = self.fetch_bars().await?;
        self.reconcile().await?;
        let snapshot = self.shared.store.snapshot();

        let signal = self.dispatcher.get_signal(&bars, &snapshot)?;
        let signal = match bars.last().and_then(|bar| stop_loss_signal(&snapshot, bar.close)) {
            Some(exit) => {
                warn!(reason = %exit.reason, "Stop loss overrides strategy signal");
                Metrics::stop_loss_triggered();
                exit
            }
            None => signal,
        };

        debug!(
            action = %signal.action,
            source = %signal.source,
            confidence = %signal.confidence,
            reason = %signal.reason,
            "Signal evaluated"
        );
        self.shared.publish(LoopEvent::Signal(signal.clone()));

        if !signal.action.is_hold() {
            self.act(&signal).await?;
        }

        self.shared.record_cycle();
        Metrics::cycle_completed();
        Ok(())
    }

    async fn fetch_bars(&self) -> ExecutorResult<Vec<PriceBar>> {
        let shared = &self.shared;
        let config = &shared.config;

        let fetch = retry_exchange(
            "fetch_candles",
            &config.retry,
            config.fetch_timeout,
            &shared.shutdown,
            move || {
                shared
                    .market
                    .fetch_candles(&config.pair, &config.candle_interval, config.candle_limit)
            },
        );
        let outcome = tokio::select! {
            outcome = fetch => outcome,
            () = left_polling(shared.watch()) => {
                debug!("Loop no longer polling, market data fetch abandoned");
                Err(RetryFailure::Cancelled)
            }
        };

        outcome.map_err(|failure| match failure {
            RetryFailure::Cancelled => ExecutorError::Cancelled,
            RetryFailure::Exhausted {
                attempts,
                last_error,
            } => ExecutorError::FatalDependency {
                dependency: "market data",
                attempts,
                last_error,
            },
        })
    }

    /// Settle an earlier order whose outcome was unknown.
    async fn reconcile(&self) -> ExecutorResult<()> {
        if !self.executor.has_unresolved() {
            return Ok(());
        }
        let mut guard = self.shared.store.lock().await;
        match self.executor.reconcile().await {
            Some(result) => self.record(&mut guard, result).await,
            None => Ok(()),
        }
    }

    /// Execute `signal` and record the outcome, holding the state lock
    /// throughout so no control command interleaves.
    async fn act(&self, signal: &Signal) -> ExecutorResult<()> {
        let mut guard = self.shared.store.lock().await;

        let loop_state = self.shared.loop_state();
        if loop_state != LoopState::Running {
            debug!(action = %signal.action, %loop_state, "Order skipped, loop not running");
            return Ok(());
        }

        let Some(result) = self.executor.execute(signal, guard.state()).await else {
            return Ok(());
        };
        self.record(&mut guard, result).await
    }

    /// Publish an order outcome; a fill is applied and persisted.
    async fn record(&self, guard: &mut StateGuard<'_>, result: OrderResult) -> ExecutorResult<()> {
        self.shared.publish(LoopEvent::Order(result.clone()));

        if !result.is_fill() {
            self.shared.set_error(Some(format!(
                "{} {} order {}: {}",
                self.executor.pair(),
                result.side,
                result.status,
                result.error_detail.as_deref().unwrap_or("no detail")
            )));
            return Ok(());
        }

        let mut next = guard.state().clone();
        next.apply_order_result(&result);
        let committed = self.commit(guard, next).await?;
        Metrics::position_size(committed.position_size().inner().to_f64().unwrap_or(0.0));
        info!(
            last_action = ?committed.last_action,
            position = %committed.position_size(),
            "Order recorded"
        );
        Ok(())
    }

    /// Persist the post-order state, retrying write failures.
    ///
    /// The order already happened, so the wait is not cut short by shutdown.
    async fn commit(
        &self,
        guard: &mut StateGuard<'_>,
        next: BotState,
    ) -> ExecutorResult<BotState> {
        let policy = self.shared.config.retry;
        let mut attempt = 1;

        loop {
            match guard.commit(next.clone()).await {
                Ok(committed) => {
                    Metrics::state_persisted(true);
                    return Ok(committed);
                }
                Err(e) => {
                    Metrics::state_persisted(false);
                    if attempt >= policy.max_attempts() {
                        return Err(ExecutorError::FatalDependency {
                            dependency: "state store",
                            attempts: attempt,
                            last_error: e.to_string(),
                        });
                    }
                    let delay = policy.delay_for(attempt);
                    warn!(
                        error = %e,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "State write failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // Waiting
    // ------------------------------------------------------------------------

    /// Wait while STOPPED for any status change or shutdown.
    async fn idle(&mut self) {
        tokio::select! {
            _ = self.status_rx.changed() => {}
            () = self.shared.shutdown.cancelled() => {}
        }
    }

    /// Sleep one poll interval; wake early on shutdown or stop.
    async fn wait_next_poll(&mut self) {
        let sleep = tokio::time::sleep(self.shared.config.poll_interval);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                () = &mut sleep => return,
                () = self.shared.shutdown.cancelled() => return,
                changed = self.status_rx.changed() => {
                    if changed.is_err() || !self.status_rx.borrow_and_update().state.is_polling() {
                        return;
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // Failure and exit
    // ------------------------------------------------------------------------

    fn cycle_failed(&self, err: &ExecutorError) {
        warn!(error = %err, "Cycle failed, continuing");
        self.shared.set_error(Some(err.to_string()));
        self.shared.publish(LoopEvent::CycleFailed {
            error: err.to_string(),
        });
    }

    fn fail(&self, err: &ExecutorError) {
        error!(error = %err, "Fatal dependency failure, shutting down");
        self.shared.set_error(Some(err.to_string()));
        self.shared.begin_shutdown();
        self.shared.publish(LoopEvent::Fatal {
            error: err.to_string(),
        });
    }

    /// Persist the final record. A fatal exit also revokes `running`.
    async fn finish(&self, fatal: bool) {
        let result = self
            .shared
            .store
            .mutate(|state| {
                if fatal {
                    state.running = false;
                }
            })
            .await;

        match result {
            Ok(state) => info!(
                running = state.running,
                last_action = ?state.last_action,
                "Final state persisted"
            ),
            Err(e) => error!(error = %e, "Failed to persist final state"),
        }
    }
}

/// Resolves once the loop is no longer RUNNING or PAUSED.
async fn left_polling(mut status_rx: watch::Receiver<LoopStatus>) {
    if status_rx
        .wait_for(|status| !status.state.is_polling())
        .await
        .is_err()
    {
        std::future::pending::<()>().await;
    }
}
