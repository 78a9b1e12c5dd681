//! Capabilities the execution core needs from an exchange.
//!
//! Both traits return boxed futures so they stay dyn-compatible; the loop
//! holds them as `Arc<dyn ...>` and tests substitute in-memory doubles.

use crate::error::ExchangeResult;
use pilot_core::{ClientOrderId, OrderResult, OrderSide, PriceBar, Size};
use rust_decimal::Decimal;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Boxed future for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Read access to recent price bars.
pub trait MarketDataSource: Send + Sync {
    /// Most recent `limit` bars for `pair`, oldest first.
    ///
    /// Never returns an empty or unordered window: those are errors.
    fn fetch_candles<'a>(
        &'a self,
        pair: &'a str,
        interval: &'a str,
        limit: u32,
    ) -> BoxFuture<'a, ExchangeResult<Vec<PriceBar>>>;

    /// Cheap reachability check.
    fn ping(&self) -> BoxFuture<'_, ExchangeResult<()>>;
}

/// One market order to submit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderRequest {
    pub pair: String,
    pub side: OrderSide,
    pub quantity: Size,
    pub client_order_id: ClientOrderId,
}

/// Order placement and account queries.
pub trait OrderGateway: Send + Sync {
    /// Submit exactly one order. Callers must not retry on error: the
    /// outcome of a failed submission may be unknown.
    fn place_order(&self, request: OrderRequest) -> BoxFuture<'_, ExchangeResult<OrderResult>>;

    /// Look up a previously submitted order by its client order id.
    ///
    /// `Ok(None)` means the exchange never accepted it. A result with
    /// status `Error` means the order exists but is not final yet.
    fn query_order<'a>(
        &'a self,
        request: &'a OrderRequest,
    ) -> BoxFuture<'a, ExchangeResult<Option<OrderResult>>>;

    /// Free balance of `asset`.
    fn get_balance<'a>(&'a self, asset: &'a str) -> BoxFuture<'a, ExchangeResult<Decimal>>;
}

pub type DynMarketData = Arc<dyn MarketDataSource>;
pub type DynOrderGateway = Arc<dyn OrderGateway>;

const QUOTE_ASSETS: [&str; 6] = ["USDT", "USDC", "FDUSD", "BUSD", "BTC", "ETH"];

/// Split a concatenated spot symbol (`BTCUSDT`) into base and quote assets.
pub fn split_pair(pair: &str) -> Option<(String, String)> {
    let upper = pair.to_ascii_uppercase();
    QUOTE_ASSETS.iter().find_map(|quote| {
        upper
            .strip_suffix(quote)
            .filter(|base| !base.is_empty())
            .map(|base| (base.to_string(), quote.to_string()))
    })
}
