//! Prometheus metrics for the pilot bot.
//!
//! Covers:
//! - Loop lifecycle and cycle counts
//! - Market data fetch attempts and failures
//! - Signal dispatch, including enhanced-provider fallbacks
//! - Order outcomes and latency
//! - State persistence and recovery
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally. If registration fails,
//! it indicates a fatal configuration error (e.g., duplicate metric names)
//! that should cause an immediate crash at startup rather than silent failure.
//! These panics only occur during static initialization, never at runtime.

use crate::error::TelemetryResult;
use once_cell::sync::Lazy;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_gauge_vec,
    register_histogram_vec, Counter, CounterVec, Encoder, Gauge, GaugeVec, HistogramVec,
    TextEncoder,
};

/// Execution loop state (1 = active, 0 = inactive).
/// Labels: state (STOPPED/RUNNING/PAUSED/SHUTTING_DOWN)
pub static LOOP_STATE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "pilot_loop_state",
        "Execution loop state (1=active, 0=inactive)",
        &["state"]
    )
    .unwrap()
});

/// Completed loop iterations.
pub static CYCLES_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!("pilot_cycles_total", "Completed execution loop iterations").unwrap()
});

/// Market data fetch failures.
/// Labels: kind (network/timeout/http/empty/invalid)
pub static FETCH_FAILURES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "pilot_fetch_failures_total",
        "Market data fetch attempts that failed",
        &["kind"]
    )
    .unwrap()
});

/// Signals produced per action and source.
pub static SIGNALS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "pilot_signals_total",
        "Signals produced",
        &["action", "source"]
    )
    .unwrap()
});

/// Enhanced provider fallbacks to the baseline.
/// Labels: reason (disabled/not_installed/failed)
pub static SIGNAL_FALLBACK_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "pilot_signal_fallback_total",
        "Signal evaluations served by the baseline after an enhanced miss",
        &["reason"]
    )
    .unwrap()
});

/// Order attempts per side and terminal status.
pub static ORDERS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "pilot_orders_total",
        "Order attempts by outcome",
        &["side", "status"]
    )
    .unwrap()
});

/// Order round-trip latency in milliseconds.
pub static ORDER_LATENCY_MS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "pilot_order_latency_ms",
        "Order placement round-trip latency in milliseconds",
        &["side"],
        vec![10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0]
    )
    .unwrap()
});

/// Stop-loss exits issued by the loop.
pub static STOP_LOSS_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!("pilot_stop_loss_total", "Stop-loss exits issued").unwrap()
});

/// Held base-asset quantity.
pub static POSITION_SIZE: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!("pilot_position_size", "Held base-asset quantity").unwrap()
});

/// State store writes.
/// Labels: outcome (ok/error)
pub static STATE_PERSIST_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "pilot_state_persist_total",
        "State store writes",
        &["outcome"]
    )
    .unwrap()
});

/// Times the state file was unreadable and replaced with defaults.
pub static STATE_RECOVERED_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "pilot_state_recovered_total",
        "State loads that fell back to defaults after corruption"
    )
    .unwrap()
});

/// Control commands received.
/// Labels: command, outcome (ok/rejected)
pub static CONTROL_COMMANDS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "pilot_control_commands_total",
        "Control commands by outcome",
        &["command", "outcome"]
    )
    .unwrap()
});

const LOOP_STATES: [&str; 4] = ["STOPPED", "RUNNING", "PAUSED", "SHUTTING_DOWN"];

/// Metrics facade for easy access.
pub struct Metrics;

impl Metrics {
    /// Set the active loop state; all others drop to 0.
    pub fn loop_state_set(state: &str) {
        for s in LOOP_STATES {
            LOOP_STATE.with_label_values(&[s]).set(0.0);
        }
        LOOP_STATE.with_label_values(&[state]).set(1.0);
    }

    pub fn cycle_completed() {
        CYCLES_TOTAL.inc();
    }

    pub fn fetch_failed(kind: &str) {
        FETCH_FAILURES_TOTAL.with_label_values(&[kind]).inc();
    }

    pub fn signal_produced(action: &str, source: &str) {
        SIGNALS_TOTAL.with_label_values(&[action, source]).inc();
    }

    /// Record a baseline evaluation that replaced an enhanced one.
    pub fn signal_fallback(reason: &str) {
        SIGNAL_FALLBACK_TOTAL.with_label_values(&[reason]).inc();
    }

    pub fn order_completed(side: &str, status: &str) {
        ORDERS_TOTAL.with_label_values(&[side, status]).inc();
    }

    pub fn order_latency(side: &str, latency_ms: f64) {
        ORDER_LATENCY_MS
            .with_label_values(&[side])
            .observe(latency_ms);
    }

    pub fn stop_loss_triggered() {
        STOP_LOSS_TOTAL.inc();
    }

    pub fn position_size(size: f64) {
        POSITION_SIZE.set(size);
    }

    pub fn state_persisted(ok: bool) {
        let outcome = if ok { "ok" } else { "error" };
        STATE_PERSIST_TOTAL.with_label_values(&[outcome]).inc();
    }

    pub fn state_recovered() {
        STATE_RECOVERED_TOTAL.inc();
    }

    pub fn control_command(command: &str, accepted: bool) {
        let outcome = if accepted { "ok" } else { "rejected" };
        CONTROL_COMMANDS_TOTAL
            .with_label_values(&[command, outcome])
            .inc();
    }

    /// Render every registered metric in the Prometheus text format.
    pub fn encode() -> TelemetryResult<String> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&prometheus::gather(), &mut buf)?;
        Ok(String::from_utf8(buf)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loop_state_is_one_hot() {
        Metrics::loop_state_set("PAUSED");
        assert_eq!(LOOP_STATE.with_label_values(&["PAUSED"]).get(), 1.0);
        assert_eq!(LOOP_STATE.with_label_values(&["RUNNING"]).get(), 0.0);

        Metrics::loop_state_set("RUNNING");
        assert_eq!(LOOP_STATE.with_label_values(&["PAUSED"]).get(), 0.0);
        assert_eq!(LOOP_STATE.with_label_values(&["RUNNING"]).get(), 1.0);
    }

    #[test]
    fn test_encode_includes_recorded_series() {
        Metrics::signal_fallback("not_installed");
        Metrics::order_completed("BUY", "FILLED");

        let text = Metrics::encode().unwrap();
        assert!(text.contains("pilot_signal_fallback_total"));
        assert!(text.contains("pilot_orders_total"));
    }
}
