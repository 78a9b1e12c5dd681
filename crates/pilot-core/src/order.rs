//! Order-related types and identifiers.
//!
//! Provides order side, client order IDs and the outcome of a single
//! order attempt.

use crate::decimal::{Price, Size};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Order side: buy or sell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// Exchange wire representation (`BUY` / `SELL`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Client order ID for idempotency.
///
/// Every order attempt gets a fresh id. An attempt whose outcome is unknown
/// is looked up by this id before anything else is submitted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientOrderId(String);

impl ClientOrderId {
    /// Create a new unique client order ID.
    ///
    /// Format: `pilot_{timestamp_ms}_{uuid_short}` (fits the 36-char exchange limit).
    pub fn new() -> Self {
        let ts = chrono::Utc::now().timestamp_millis();
        let uuid = Uuid::new_v4().simple().to_string();
        Self(format!("pilot_{ts}_{}", &uuid[..8]))
    }

    /// Wrap an id received from the exchange.
    pub fn from_string(s: String) -> Self {
        Self(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ClientOrderId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientOrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Terminal status of an order attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    /// Order filled (fully or partially, `filled_qty` tells how much).
    Filled,
    /// Order refused, either by a local risk check or by the exchange.
    Rejected,
    /// Transport or exchange failure; outcome may be unknown.
    Error,
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Filled => write!(f, "FILLED"),
            Self::Rejected => write!(f, "REJECTED"),
            Self::Error => write!(f, "ERROR"),
        }
    }
}

/// Outcome of one order attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderResult {
    pub status: OrderStatus,
    pub side: OrderSide,
    pub filled_qty: Size,
    pub avg_price: Option<Price>,
    /// Reason for `Rejected` / `Error`.
    pub error_detail: Option<String>,
    pub client_order_id: Option<ClientOrderId>,
}

impl OrderResult {
    pub fn filled(
        side: OrderSide,
        filled_qty: Size,
        avg_price: Price,
        client_order_id: ClientOrderId,
    ) -> Self {
        Self {
            status: OrderStatus::Filled,
            side,
            filled_qty,
            avg_price: Some(avg_price),
            error_detail: None,
            client_order_id: Some(client_order_id),
        }
    }

    pub fn rejected(side: OrderSide, reason: impl Into<String>) -> Self {
        Self {
            status: OrderStatus::Rejected,
            side,
            filled_qty: Size::ZERO,
            avg_price: None,
            error_detail: Some(reason.into()),
            client_order_id: None,
        }
    }

    pub fn error(side: OrderSide, detail: impl Into<String>) -> Self {
        Self {
            status: OrderStatus::Error,
            side,
            filled_qty: Size::ZERO,
            avg_price: None,
            error_detail: Some(detail.into()),
            client_order_id: None,
        }
    }

    /// Attach the client order id used for the attempt.
    pub fn with_client_order_id(mut self, cloid: ClientOrderId) -> Self {
        self.client_order_id = Some(cloid);
        self
    }

    /// True when something was actually bought or sold.
    pub fn is_fill(&self) -> bool {
        self.status == OrderStatus::Filled && self.filled_qty.is_positive()
    }
}
