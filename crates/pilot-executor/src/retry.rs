//! Bounded, cancellable retry for exchange calls.

use pilot_core::RetryPolicy;
use pilot_exchange::{ExchangeError, ExchangeResult};
use pilot_telemetry::Metrics;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Why a retried call gave up.
#[derive(Debug)]
pub enum RetryFailure {
    Cancelled,
    Exhausted { attempts: u32, last_error: String },
}

/// Run `op` until it succeeds, the policy is exhausted or `cancel` fires.
///
/// Each attempt is bounded by `timeout`; a timeout counts as a failed
/// attempt. Waits between attempts follow the policy's exponential delays
/// and end early on cancellation. A non-transient error (bad symbol,
/// missing credentials) ends the call at once.
pub async fn retry_exchange<T, F, Fut>(
    what: &str,
    policy: &RetryPolicy,
    timeout: Duration,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, RetryFailure>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ExchangeResult<T>>,
{
    let max_attempts = policy.max_attempts();
    let mut last_error = String::new();

    for attempt in 1..=max_attempts {
        if attempt > 1 {
            let delay = policy.delay_for(attempt - 1);
            warn!(
                what,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %last_error,
                "Retrying after failure"
            );
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = cancel.cancelled() => return Err(RetryFailure::Cancelled),
            }
        }

        let outcome = tokio::select! {
            r = tokio::time::timeout(timeout, op()) => r,
            () = cancel.cancelled() => return Err(RetryFailure::Cancelled),
        };

        let err = match outcome {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => e,
            Err(_) => ExchangeError::Timeout(format!("{what} exceeded {}ms", timeout.as_millis())),
        };
        Metrics::fetch_failed(err.kind());
        last_error = err.to_string();

        if !err.is_transient() {
            warn!(what, attempt, error = %last_error, "Permanent failure, not retrying");
            return Err(RetryFailure::Exhausted {
                attempts: attempt,
                last_error,
            });
        }
    }

    Err(RetryFailure::Exhausted {
        attempts: max_attempts,
        last_error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay_ms: 100,
            max_delay_ms: 1_000,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_last_allowed_attempt() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();

        let result = retry_exchange("fetch_candles", &policy(3), Duration::from_secs(1), &cancel, || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n <= 3 {
                    Err(ExchangeError::Network("down".to_string()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 4);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_reports_attempts() {
        let cancel = CancellationToken::new();
        let result: Result<(), _> =
            retry_exchange("fetch_candles", &policy(2), Duration::from_secs(1), &cancel, || async {
                Err(ExchangeError::Http {
                    status: 503,
                    body: "busy".to_string(),
                })
            })
            .await;

        match result {
            Err(RetryFailure::Exhausted { attempts, last_error }) => {
                assert_eq!(attempts, 3);
                assert!(last_error.contains("503"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_call_times_out() {
        let cancel = CancellationToken::new();
        let result: Result<(), _> =
            retry_exchange("fetch_candles", &policy(0), Duration::from_millis(50), &cancel, || {
                std::future::pending::<ExchangeResult<()>>()
            })
            .await;
        assert!(matches!(result, Err(RetryFailure::Exhausted { attempts: 1, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let result: Result<(), _> =
            retry_exchange("fetch_candles", &policy(3), Duration::from_secs(1), &cancel, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(ExchangeError::Api {
                        code: -1121,
                        msg: "Invalid symbol.".to_string(),
                    })
                }
            })
            .await;

        assert!(matches!(result, Err(RetryFailure::Exhausted { attempts: 1, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_backoff() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result: Result<(), _> =
            retry_exchange("fetch_candles", &policy(3), Duration::from_secs(1), &cancel, || async {
                Err(ExchangeError::Network("down".to_string()))
            })
            .await;
        assert!(matches!(result, Err(RetryFailure::Cancelled)));
    }
}
