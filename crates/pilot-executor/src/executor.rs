//! Order executor: turns an accepted signal into at most one order.
//!
//! Contract:
//! - HOLD never reaches the gateway.
//! - BUY/SELL go out only when `state.running` and the local risk checks pass.
//! - Exactly one `place_order` call per actionable signal, bounded by a
//!   timeout. No blind retry: an `ERROR` outcome may still have filled.
//! - The request behind an `ERROR` outcome is kept as unresolved. Until
//!   [`OrderExecutor::reconcile`] finds out what happened to it (by client
//!   order id), no new order is submitted.
//! - Failures come back as `OrderResult` values (`REJECTED` / `ERROR`);
//!   nothing here ever pauses the bot.

use crate::risk::check_order;
use parking_lot::Mutex;
use pilot_core::{BotState, ClientOrderId, OrderResult, OrderStatus, Signal};
use pilot_exchange::{DynOrderGateway, OrderRequest};
use pilot_telemetry::Metrics;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Default bound on a single order round-trip.
pub const DEFAULT_ORDER_TIMEOUT: Duration = Duration::from_secs(10);

pub struct OrderExecutor {
    gateway: DynOrderGateway,
    pair: String,
    order_timeout: Duration,
    /// Last submission that ended in `ERROR`.
    unresolved: Mutex<Option<OrderRequest>>,
}

impl OrderExecutor {
    pub fn new(gateway: DynOrderGateway, pair: impl Into<String>) -> Self {
        Self {
            gateway,
            pair: pair.into(),
            order_timeout: DEFAULT_ORDER_TIMEOUT,
            unresolved: Mutex::new(None),
        }
    }

    pub fn with_order_timeout(mut self, timeout: Duration) -> Self {
        self.order_timeout = timeout;
        self
    }

    pub fn pair(&self) -> &str {
        &self.pair
    }

    /// Whether an earlier submission still has an unknown outcome.
    pub fn has_unresolved(&self) -> bool {
        self.unresolved.lock().is_some()
    }

    /// Look up the unresolved submission by client order id.
    ///
    /// Returns the final result (`FILLED` or `REJECTED`) once the exchange
    /// reports one. If the exchange never saw the order it is dropped and
    /// `None` is returned. A failed lookup or a still-open order leaves it
    /// unresolved for the next call.
    pub async fn reconcile(&self) -> Option<OrderResult> {
        let request = self.unresolved.lock().clone()?;
        let cloid = request.client_order_id.clone();

        let lookup =
            tokio::time::timeout(self.order_timeout, self.gateway.query_order(&request)).await;
        match lookup {
            Ok(Ok(None)) => {
                info!(cloid = %cloid, "Unresolved order never reached the exchange");
                *self.unresolved.lock() = None;
                None
            }
            Ok(Ok(Some(result))) if result.status != OrderStatus::Error => {
                info!(
                    cloid = %cloid,
                    status = %result.status,
                    filled = %result.filled_qty,
                    "Unresolved order settled"
                );
                *self.unresolved.lock() = None;
                Metrics::order_completed(request.side.as_str(), &result.status.to_string());
                if result.client_order_id.is_some() {
                    Some(result)
                } else {
                    Some(result.with_client_order_id(cloid))
                }
            }
            Ok(Ok(Some(result))) => {
                debug!(
                    cloid = %cloid,
                    detail = result.error_detail.as_deref().unwrap_or(""),
                    "Unresolved order not final yet"
                );
                None
            }
            Ok(Err(e)) => {
                warn!(cloid = %cloid, error = %e, "Order lookup failed");
                None
            }
            Err(_) => {
                warn!(
                    cloid = %cloid,
                    timeout_ms = self.order_timeout.as_millis() as u64,
                    "Order lookup timed out"
                );
                None
            }
        }
    }

    /// Execute `signal` against `state`.
    ///
    /// Returns `None` for HOLD (nothing attempted), otherwise the outcome of
    /// the single attempt.
    pub async fn execute(&self, signal: &Signal, state: &BotState) -> Option<OrderResult> {
        let side = signal.action.side()?;

        let quantity = match check_order(side, state) {
            Ok(quantity) => quantity,
            Err(rejection) => {
                debug!(%side, reason = %rejection, "Order blocked by local check");
                Metrics::order_completed(side.as_str(), "REJECTED");
                return Some(OrderResult::rejected(side, rejection.to_string()));
            }
        };

        if let Some(pending) = self.unresolved.lock().as_ref() {
            warn!(
                %side,
                cloid = %pending.client_order_id,
                "Order withheld, earlier order unresolved"
            );
            return Some(
                OrderResult::error(
                    side,
                    format!("order {} unresolved, not submitting", pending.client_order_id),
                )
                .with_client_order_id(pending.client_order_id.clone()),
            );
        }

        let cloid = ClientOrderId::new();
        let request = OrderRequest {
            pair: self.pair.clone(),
            side,
            quantity,
            client_order_id: cloid.clone(),
        };

        info!(
            %side,
            %quantity,
            cloid = %cloid,
            source = %signal.source,
            confidence = %signal.confidence,
            reason = %signal.reason,
            "Placing order"
        );

        let started = Instant::now();
        let outcome =
            tokio::time::timeout(self.order_timeout, self.gateway.place_order(request.clone()))
                .await;
        Metrics::order_latency(side.as_str(), started.elapsed().as_secs_f64() * 1000.0);

        let result = match outcome {
            Ok(Ok(result)) if result.client_order_id.is_some() => result,
            Ok(Ok(result)) => result.with_client_order_id(cloid),
            Ok(Err(e)) if e.is_rejection() => {
                OrderResult::rejected(side, e.to_string()).with_client_order_id(cloid)
            }
            Ok(Err(e)) => OrderResult::error(side, e.to_string()).with_client_order_id(cloid),
            Err(_) => OrderResult::error(
                side,
                format!(
                    "no response within {}ms, outcome unknown",
                    self.order_timeout.as_millis()
                ),
            )
            .with_client_order_id(cloid),
        };

        match result.status {
            OrderStatus::Filled => info!(
                %side,
                filled = %result.filled_qty,
                avg_price = ?result.avg_price.map(|p| p.to_string()),
                "Order filled"
            ),
            status => warn!(
                %side,
                %status,
                detail = result.error_detail.as_deref().unwrap_or(""),
                "Order not filled"
            ),
        }
        if result.status == OrderStatus::Error {
            *self.unresolved.lock() = Some(request);
        }
        Metrics::order_completed(side.as_str(), &result.status.to_string());

        Some(result)
    }
}
