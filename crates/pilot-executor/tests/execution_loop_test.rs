//! End-to-end tests of the execution loop against in-memory exchange doubles.
//!
//! Time is paused, so poll intervals and retry backoff resolve instantly in
//! virtual time while keeping their ordering.

use parking_lot::Mutex;
use pilot_core::{
    BotState, ClientOrderId, LoopState, OrderResult, OrderStatus, Price, PriceBar, RetryPolicy, Signal,
    SignalAction, SignalSource, Size,
};
use pilot_exchange::{
    BoxFuture, ExchangeError, ExchangeResult, MarketDataSource, OrderGateway, OrderRequest,
};
use pilot_executor::{ControlHandle, ExecutionLoop, ExecutorError, LoopConfig, LoopEvent};
use pilot_signal::{
    BaselineProvider, EnhancedSlot, SignalConfig, SignalError, SignalProvider, SignalResult,
};
use pilot_state::{LoadOutcome, StateStore};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

// ============================================================================
// Doubles
// ============================================================================

#[derive(Clone)]
enum Step {
    Bars(Vec<PriceBar>),
    Fail,
}

/// Market data that replays a script; the last step repeats forever.
struct ScriptedMarketData {
    steps: Mutex<VecDeque<Step>>,
    fetches: AtomicUsize,
    reachable: bool,
}

impl ScriptedMarketData {
    fn new(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            fetches: AtomicUsize::new(0),
            reachable: true,
        })
    }

    fn unreachable() -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(VecDeque::from(vec![Step::Fail])),
            fetches: AtomicUsize::new(0),
            reachable: false,
        })
    }

    fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn next_step(&self) -> Step {
        let mut steps = self.steps.lock();
        if steps.len() > 1 {
            steps.pop_front().unwrap()
        } else {
            steps.front().cloned().unwrap()
        }
    }
}

impl MarketDataSource for ScriptedMarketData {
    fn fetch_candles<'a>(
        &'a self,
        _pair: &'a str,
        _interval: &'a str,
        _limit: u32,
    ) -> BoxFuture<'a, ExchangeResult<Vec<PriceBar>>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let step = self.next_step();
        Box::pin(async move {
            match step {
                Step::Bars(bars) => Ok(bars),
                Step::Fail => Err(ExchangeError::Network("connection refused".to_string())),
            }
        })
    }

    fn ping(&self) -> BoxFuture<'_, ExchangeResult<()>> {
        let reachable = self.reachable;
        Box::pin(async move {
            if reachable {
                Ok(())
            } else {
                Err(ExchangeError::Network("connection refused".to_string()))
            }
        })
    }
}

/// Order gateway that records every request and fills (or fails) it.
struct RecordingGateway {
    requests: Mutex<Vec<OrderRequest>>,
    lookups: Mutex<Vec<ClientOrderId>>,
    fail: bool,
    /// Submissions reported as failed were in fact filled by the exchange.
    landed: bool,
}

impl RecordingGateway {
    fn build(fail: bool, landed: bool) -> Arc<Self> {
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            lookups: Mutex::new(Vec::new()),
            fail,
            landed,
        })
    }

    fn filling() -> Arc<Self> {
        Self::build(false, false)
    }

    fn failing() -> Arc<Self> {
        Self::build(true, false)
    }

    /// Every submission times out on the wire but fills on the exchange.
    fn failing_after_fill() -> Arc<Self> {
        Self::build(true, true)
    }

    fn calls(&self) -> usize {
        self.requests.lock().len()
    }

    fn sent_ids(&self) -> Vec<ClientOrderId> {
        self.requests
            .lock()
            .iter()
            .map(|r| r.client_order_id.clone())
            .collect()
    }
}

impl OrderGateway for RecordingGateway {
    fn place_order(&self, request: OrderRequest) -> BoxFuture<'_, ExchangeResult<OrderResult>> {
        self.requests.lock().push(request.clone());
        let fail = self.fail;
        Box::pin(async move {
            if fail {
                return Err(ExchangeError::Timeout("order endpoint".to_string()));
            }
            Ok(OrderResult::filled(
                request.side,
                request.quantity,
                Price::new(dec!(100)),
                request.client_order_id,
            ))
        })
    }

    fn query_order<'a>(
        &'a self,
        request: &'a OrderRequest,
    ) -> BoxFuture<'a, ExchangeResult<Option<OrderResult>>> {
        self.lookups.lock().push(request.client_order_id.clone());
        let known = self.landed && self.sent_ids().contains(&request.client_order_id);
        Box::pin(async move {
            Ok(known.then(|| {
                OrderResult::filled(
                    request.side,
                    request.quantity,
                    Price::new(dec!(100)),
                    request.client_order_id.clone(),
                )
            }))
        })
    }

    fn get_balance<'a>(&'a self, _asset: &'a str) -> BoxFuture<'a, ExchangeResult<Decimal>> {
        Box::pin(async { Ok(dec!(1000)) })
    }
}

struct BrokenEnhanced;

impl SignalProvider for BrokenEnhanced {
    fn name(&self) -> &str {
        "broken"
    }

    fn evaluate(&self, _bars: &[PriceBar], _state: &BotState) -> SignalResult<Signal> {
        Err(SignalError::ProviderFailed("model file missing".to_string()))
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn window(closes: &[i64]) -> Vec<PriceBar> {
    closes
        .iter()
        .enumerate()
        .map(|(i, close)| {
            let px = Price::new(Decimal::from(*close));
            PriceBar::new(i as i64 * 60_000, px, px, px, px, Size::new(dec!(1)))
        })
        .collect()
}

fn rising() -> Step {
    Step::Bars(window(&[100, 101, 102, 103, 104]))
}

fn falling() -> Step {
    Step::Bars(window(&[104, 103, 102, 101, 100]))
}

fn flat() -> Step {
    Step::Bars(window(&[100, 100, 100, 100, 100]))
}

fn loop_config() -> LoopConfig {
    LoopConfig {
        poll_interval: Duration::from_secs(60),
        fetch_timeout: Duration::from_secs(5),
        order_timeout: Duration::from_secs(5),
        retry: RetryPolicy {
            max_retries: 3,
            base_delay_ms: 10,
            max_delay_ms: 100,
        },
        ..Default::default()
    }
}

fn baseline() -> Arc<BaselineProvider> {
    Arc::new(BaselineProvider::new(SignalConfig {
        sma_fast: 2,
        sma_slow: 3,
        ..Default::default()
    }))
}

struct Harness {
    control: ControlHandle,
    events: broadcast::Receiver<LoopEvent>,
    task: JoinHandle<Result<(), ExecutorError>>,
    store: Arc<StateStore>,
}

fn launch(
    store: StateStore,
    outcome: LoadOutcome,
    market: Arc<ScriptedMarketData>,
    gateway: Arc<RecordingGateway>,
    enhanced: Arc<EnhancedSlot>,
) -> Harness {
    launch_with(loop_config(), store, outcome, market, gateway, enhanced)
}

fn launch_with(
    config: LoopConfig,
    store: StateStore,
    outcome: LoadOutcome,
    market: Arc<ScriptedMarketData>,
    gateway: Arc<RecordingGateway>,
    enhanced: Arc<EnhancedSlot>,
) -> Harness {
    let store = Arc::new(store);
    let (execution_loop, control) = ExecutionLoop::new(
        config,
        store.clone(),
        market,
        gateway,
        baseline(),
        enhanced,
    );
    let events = control.subscribe();
    execution_loop.report_load_outcome(&outcome);
    let task = tokio::spawn(execution_loop.run());
    Harness {
        control,
        events,
        task,
        store,
    }
}

fn open_store(dir: &TempDir) -> (StateStore, LoadOutcome) {
    StateStore::open(dir.path().join("bot_state.json"), BotState::default()).unwrap()
}

async fn next_event<T>(
    events: &mut broadcast::Receiver<LoopEvent>,
    mut pick: impl FnMut(LoopEvent) -> Option<T>,
) -> T {
    let wait = async {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Some(found) = pick(event) {
                        return found;
                    }
                }
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => panic!("event channel closed"),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(3600), wait)
        .await
        .expect("loop event never arrived")
}

async fn next_order(events: &mut broadcast::Receiver<LoopEvent>) -> OrderResult {
    next_event(events, |event| match event {
        LoopEvent::Order(result) => Some(result),
        _ => None,
    })
    .await
}

async fn next_signal(events: &mut broadcast::Receiver<LoopEvent>) -> Signal {
    next_event(events, |event| match event {
        LoopEvent::Signal(signal) => Some(signal),
        _ => None,
    })
    .await
}

fn persisted(path: &Path) -> BotState {
    StateStore::load(path).unwrap().unwrap()
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_buy_then_sell_with_pause_in_between() {
    let dir = TempDir::new().unwrap();
    let (store, outcome) = open_store(&dir);
    let market = ScriptedMarketData::new(vec![rising(), falling(), falling()]);
    let gateway = RecordingGateway::filling();
    let mut h = launch(store, outcome, market, gateway.clone(), Arc::new(EnhancedSlot::empty()));

    h.control.start().await.unwrap();
    let buy = next_order(&mut h.events).await;
    assert_eq!(buy.side.as_str(), "BUY");
    assert_eq!(buy.status, OrderStatus::Filled);

    h.control.pause().await.unwrap();
    let paused_signal = next_signal(&mut h.events).await;
    assert_eq!(paused_signal.action, SignalAction::Sell);
    assert_eq!(gateway.calls(), 1);
    assert_eq!(h.control.get_status().loop_state, LoopState::Paused);

    h.control.resume().await.unwrap();
    let sell = next_order(&mut h.events).await;
    assert_eq!(sell.side.as_str(), "SELL");
    assert_eq!(gateway.calls(), 2);

    h.control.shutdown();
    h.task.await.unwrap().unwrap();

    let state = persisted(h.store.path());
    assert_eq!(state.last_action, Some(SignalAction::Sell));
    assert!(state.position.is_none());
    assert!(state.running);
}

#[tokio::test(start_paused = true)]
async fn test_corrupt_state_recovers_and_reaches_running() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bot_state.json");
    std::fs::write(&path, "{\"strategy\": \"sma_cr").unwrap();

    let (store, outcome) = StateStore::open(&path, BotState::default()).unwrap();
    assert!(matches!(outcome, LoadOutcome::Recovered { .. }));

    let market = ScriptedMarketData::new(vec![flat()]);
    let mut h = launch(
        store,
        outcome,
        market,
        RecordingGateway::filling(),
        Arc::new(EnhancedSlot::empty()),
    );

    let reason = next_event(&mut h.events, |event| match event {
        LoopEvent::StateRecovered { reason } => Some(reason),
        _ => None,
    })
    .await;
    assert!(!reason.is_empty());
    assert!(h.control.get_status().last_error.is_some());
    assert_eq!(h.control.get_status().bot_state, BotState::default());

    h.control.start().await.unwrap();
    next_signal(&mut h.events).await;
    assert_eq!(h.control.get_status().loop_state, LoopState::Running);

    h.control.shutdown();
    h.task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_three_fetch_failures_then_success_keeps_running() {
    let dir = TempDir::new().unwrap();
    let (store, outcome) = open_store(&dir);
    let market = ScriptedMarketData::new(vec![Step::Fail, Step::Fail, Step::Fail, rising()]);
    let mut h = launch(
        store,
        outcome,
        market.clone(),
        RecordingGateway::filling(),
        Arc::new(EnhancedSlot::empty()),
    );

    h.control.start().await.unwrap();
    let order = next_order(&mut h.events).await;
    assert!(order.is_fill());
    assert_eq!(market.fetches(), 4);

    let status = h.control.get_status();
    assert_eq!(status.loop_state, LoopState::Running);
    assert_eq!(status.cycles, 1);

    h.control.shutdown();
    h.task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_shut_down_and_persist() {
    let dir = TempDir::new().unwrap();
    let (store, outcome) = open_store(&dir);
    let market = ScriptedMarketData::new(vec![Step::Fail]);
    let mut h = launch(
        store,
        outcome,
        market.clone(),
        RecordingGateway::filling(),
        Arc::new(EnhancedSlot::empty()),
    );

    h.control.start().await.unwrap();
    assert!(persisted(h.store.path()).running);

    let error = next_event(&mut h.events, |event| match event {
        LoopEvent::Fatal { error } => Some(error),
        _ => None,
    })
    .await;
    assert!(error.contains("market data"));

    let status = h.control.get_status();
    assert_eq!(status.loop_state, LoopState::ShuttingDown);
    assert!(status.last_error.is_some());

    let result = h.task.await.unwrap();
    assert!(matches!(
        result,
        Err(ExecutorError::FatalDependency { attempts: 4, .. })
    ));
    assert_eq!(market.fetches(), 4);
    assert!(!persisted(h.store.path()).running);
}

#[tokio::test(start_paused = true)]
async fn test_hold_never_reaches_gateway() {
    let dir = TempDir::new().unwrap();
    let (store, outcome) = open_store(&dir);
    let gateway = RecordingGateway::filling();
    let mut h = launch(
        store,
        outcome,
        ScriptedMarketData::new(vec![flat()]),
        gateway.clone(),
        Arc::new(EnhancedSlot::empty()),
    );

    h.control.start().await.unwrap();
    for _ in 0..3 {
        let signal = next_signal(&mut h.events).await;
        assert_eq!(signal.action, SignalAction::Hold);
    }
    assert_eq!(gateway.calls(), 0);

    h.control.shutdown();
    h.task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_paused_loop_never_orders() {
    let dir = TempDir::new().unwrap();
    let (store, outcome) = open_store(&dir);
    let gateway = RecordingGateway::filling();
    let mut h = launch(
        store,
        outcome,
        ScriptedMarketData::new(vec![flat(), rising()]),
        gateway.clone(),
        Arc::new(EnhancedSlot::empty()),
    );

    h.control.start().await.unwrap();
    next_signal(&mut h.events).await;
    h.control.pause().await.unwrap();
    assert!(!persisted(h.store.path()).running);

    for _ in 0..3 {
        let signal = next_signal(&mut h.events).await;
        assert_eq!(signal.action, SignalAction::Buy);
    }
    assert_eq!(gateway.calls(), 0);

    h.control.shutdown();
    h.task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_failed_order_is_single_attempt_and_does_not_pause() {
    let dir = TempDir::new().unwrap();
    let (store, outcome) = open_store(&dir);
    let gateway = RecordingGateway::failing();
    let mut h = launch(
        store,
        outcome,
        ScriptedMarketData::new(vec![rising()]),
        gateway.clone(),
        Arc::new(EnhancedSlot::empty()),
    );

    h.control.start().await.unwrap();
    let result = next_order(&mut h.events).await;
    assert_eq!(result.status, OrderStatus::Error);
    assert_eq!(gateway.calls(), 1);

    let status = h.control.get_status();
    assert_eq!(status.loop_state, LoopState::Running);
    assert!(status.last_error.is_some());
    assert!(status.bot_state.running);
    assert_eq!(status.bot_state.last_action, None);

    // Next cycle looks the first order up, finds nothing, then tries again
    // under a new client order id.
    next_order(&mut h.events).await;
    assert_eq!(gateway.calls(), 2);
    let sent = gateway.sent_ids();
    assert_eq!(gateway.lookups.lock()[0], sent[0]);
    assert_ne!(sent[0], sent[1]);

    h.control.shutdown();
    h.task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_errored_order_that_filled_is_recorded_not_resubmitted() {
    let dir = TempDir::new().unwrap();
    let (store, outcome) = open_store(&dir);
    let gateway = RecordingGateway::failing_after_fill();
    let mut h = launch(
        store,
        outcome,
        ScriptedMarketData::new(vec![rising()]),
        gateway.clone(),
        Arc::new(EnhancedSlot::empty()),
    );

    h.control.start().await.unwrap();
    let errored = next_order(&mut h.events).await;
    assert_eq!(errored.status, OrderStatus::Error);
    assert_eq!(persisted(h.store.path()).last_action, None);

    let settled = next_order(&mut h.events).await;
    assert!(settled.is_fill());
    assert_eq!(settled.client_order_id, errored.client_order_id);

    let state = persisted(h.store.path());
    assert_eq!(state.last_action, Some(SignalAction::Buy));
    assert_eq!(state.position_size().inner(), dec!(0.001));

    // Same rising window: a repeat BUY is held, nothing new is sent.
    let signal = next_signal(&mut h.events).await;
    assert_eq!(signal.action, SignalAction::Hold);
    assert_eq!(gateway.calls(), 1);
    assert_eq!(gateway.lookups.lock().len(), 1);

    h.control.shutdown();
    h.task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_broken_enhanced_provider_falls_back_to_baseline() {
    let dir = TempDir::new().unwrap();
    let (store, outcome) = open_store(&dir);
    let enhanced = Arc::new(EnhancedSlot::with_provider(Arc::new(BrokenEnhanced), true));
    let mut h = launch(
        store,
        outcome,
        ScriptedMarketData::new(vec![rising()]),
        RecordingGateway::filling(),
        enhanced,
    );
    assert!(h.control.get_status().enhanced_available);

    h.control.start().await.unwrap();
    let signal = next_signal(&mut h.events).await;
    assert_eq!(signal.source, SignalSource::Baseline);
    assert_eq!(signal.action, SignalAction::Buy);
    assert!(next_order(&mut h.events).await.is_fill());

    h.control.set_enhanced(false);
    assert!(!h.control.get_status().enhanced_available);

    h.control.shutdown();
    h.task.await.unwrap().unwrap();
}

// ============================================================================
// Control surface
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_start_fails_when_exchange_unreachable() {
    let dir = TempDir::new().unwrap();
    let (store, outcome) = open_store(&dir);
    let h = launch(
        store,
        outcome,
        ScriptedMarketData::unreachable(),
        RecordingGateway::filling(),
        Arc::new(EnhancedSlot::empty()),
    );

    let err = h.control.start().await.unwrap_err();
    assert!(matches!(err, ExecutorError::Connectivity { attempts: 4, .. }));

    let status = h.control.get_status();
    assert_eq!(status.loop_state, LoopState::Stopped);
    assert!(status.last_error.is_some());
    assert!(!status.bot_state.running);

    h.control.shutdown();
    h.task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_invalid_transitions_are_refused() {
    let dir = TempDir::new().unwrap();
    let (store, outcome) = open_store(&dir);
    let h = launch(
        store,
        outcome,
        ScriptedMarketData::new(vec![flat()]),
        RecordingGateway::filling(),
        Arc::new(EnhancedSlot::empty()),
    );

    assert!(matches!(
        h.control.pause().await,
        Err(ExecutorError::InvalidTransition {
            from: LoopState::Stopped,
            to: LoopState::Paused
        })
    ));
    assert!(h.control.resume().await.is_err());

    h.control.start().await.unwrap();
    assert!(matches!(
        h.control.start().await,
        Err(ExecutorError::InvalidTransition { .. })
    ));

    h.control.shutdown();
    h.control.shutdown();
    h.task.await.unwrap().unwrap();
    assert!(h.control.start().await.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_set_strategy_validates_and_persists() {
    let dir = TempDir::new().unwrap();
    let (store, outcome) = open_store(&dir);
    let h = launch(
        store,
        outcome,
        ScriptedMarketData::new(vec![flat()]),
        RecordingGateway::filling(),
        Arc::new(EnhancedSlot::empty()),
    );

    let err = h.control.set_strategy("martingale").await.unwrap_err();
    assert!(matches!(err, ExecutorError::UnknownStrategy(_)));
    assert_eq!(persisted(h.store.path()).strategy, "sma_cross");

    h.control.set_strategy("rsi").await.unwrap();
    assert_eq!(persisted(h.store.path()).strategy, "rsi");
    assert_eq!(h.control.get_status().bot_state.strategy, "rsi");

    let status = serde_json::to_value(h.control.get_status()).unwrap();
    assert_eq!(status["loop_state"], "STOPPED");
    assert_eq!(status["bot_state"]["strategy"], "rsi");

    h.control.shutdown();
    h.task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_stop_idles_without_polling() {
    let dir = TempDir::new().unwrap();
    let (store, outcome) = open_store(&dir);
    let market = ScriptedMarketData::new(vec![flat()]);
    let mut h = launch(
        store,
        outcome,
        market.clone(),
        RecordingGateway::filling(),
        Arc::new(EnhancedSlot::empty()),
    );

    h.control.start().await.unwrap();
    next_signal(&mut h.events).await;
    h.control.stop().await.unwrap();

    let fetched = market.fetches();
    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(market.fetches(), fetched);
    assert_eq!(h.control.get_status().loop_state, LoopState::Stopped);
    assert!(!persisted(h.store.path()).running);

    h.control.shutdown();
    h.task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_fetch_backoff_abandons_retries() {
    let dir = TempDir::new().unwrap();
    let (store, outcome) = open_store(&dir);
    let market = ScriptedMarketData::new(vec![Step::Fail]);
    let config = LoopConfig {
        retry: RetryPolicy {
            max_retries: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 10_000,
        },
        ..loop_config()
    };
    let mut h = launch_with(
        config,
        store,
        outcome,
        market.clone(),
        RecordingGateway::filling(),
        Arc::new(EnhancedSlot::empty()),
    );

    h.control.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(market.fetches(), 1);
    h.control.stop().await.unwrap();

    tokio::time::sleep(Duration::from_secs(3600)).await;
    assert_eq!(market.fetches(), 1);
    assert!(!h.task.is_finished());

    let status = h.control.get_status();
    assert_eq!(status.loop_state, LoopState::Stopped);
    assert!(status.last_error.is_none());
    assert!(!persisted(h.store.path()).running);
    while let Ok(event) = h.events.try_recv() {
        assert!(!matches!(event, LoopEvent::Fatal { .. }));
    }

    h.control.shutdown();
    h.task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_interrupts_poll_sleep() {
    let dir = TempDir::new().unwrap();
    let (store, outcome) = open_store(&dir);
    let config = loop_config();
    let poll_interval = config.poll_interval;
    let mut h = launch_with(
        config,
        store,
        outcome,
        ScriptedMarketData::new(vec![flat()]),
        RecordingGateway::filling(),
        Arc::new(EnhancedSlot::empty()),
    );

    h.control.start().await.unwrap();
    next_signal(&mut h.events).await;
    tokio::time::sleep(Duration::from_secs(1)).await;

    let asked = tokio::time::Instant::now();
    h.control.shutdown();
    h.task.await.unwrap().unwrap();
    assert!(asked.elapsed() < poll_interval / 10);
}
