//! Binance spot REST adapter.
//!
//! Public endpoints (klines, ping) work without credentials. Order
//! placement and account queries are HMAC-SHA256 signed and need
//! `PILOT_API_KEY` / `PILOT_API_SECRET`.

use crate::error::{ExchangeError, ExchangeResult};
use crate::gateway::{BoxFuture, MarketDataSource, OrderGateway, OrderRequest};
use hmac::{Hmac, Mac};
use pilot_core::{validate_window, ClientOrderId, OrderResult, Price, PriceBar, Size};
use reqwest::{Client, Method, Response};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

type HmacSha256 = Hmac<Sha256>;

/// Production REST endpoint.
pub const BINANCE_REST_URL: &str = "https://api.binance.com";

/// Binance code for "Order does not exist".
const UNKNOWN_ORDER: i64 = -2013;

const API_KEY_ENV: &str = "PILOT_API_KEY";
const API_SECRET_ENV: &str = "PILOT_API_SECRET";

/// API key pair.
#[derive(Clone)]
pub struct Credentials {
    api_key: String,
    api_secret: String,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
        }
    }

    /// Read the key pair from the environment; `None` if either is unset or blank.
    pub fn from_env() -> Option<Self> {
        let key = std::env::var(API_KEY_ENV).ok()?;
        let secret = std::env::var(API_SECRET_ENV).ok()?;
        if key.trim().is_empty() || secret.trim().is_empty() {
            return None;
        }
        Some(Self::new(key.trim(), secret.trim()))
    }

    /// Hex HMAC-SHA256 of `payload` under the secret.
    pub fn sign(&self, payload: &str) -> ExchangeResult<String> {
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .map_err(|e| ExchangeError::HttpClient(format!("Invalid API secret: {e}")))?;
        mac.update(payload.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"<redacted>")
            .field("api_secret", &"<redacted>")
            .finish()
    }
}

/// Error body returned by Binance on 4xx/5xx.
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: i64,
    msg: String,
}

/// Subset of the `newOrderRespType=FULL` order response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    client_order_id: String,
    status: String,
    executed_qty: Decimal,
    cummulative_quote_qty: Decimal,
}

#[derive(Debug, Deserialize)]
struct AccountResponse {
    balances: Vec<AssetBalance>,
}

#[derive(Debug, Deserialize)]
struct AssetBalance {
    asset: String,
    free: Decimal,
}

/// Binance spot client.
pub struct BinanceClient {
    client: Client,
    rest_url: String,
    credentials: Option<Credentials>,
    recv_window_ms: u64,
}

impl BinanceClient {
    /// Create a client. Every request carries `timeout`.
    pub fn new(
        rest_url: impl Into<String>,
        timeout: Duration,
        recv_window_ms: u64,
        credentials: Option<Credentials>,
    ) -> ExchangeResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ExchangeError::HttpClient(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            rest_url: rest_url.into().trim_end_matches('/').to_string(),
            credentials,
            recv_window_ms,
        })
    }

    /// Turn a non-success response into the matching error.
    async fn check(response: Response) -> ExchangeResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        if status.is_client_error() && status.as_u16() != 429 {
            if let Ok(api) = serde_json::from_str::<ApiErrorBody>(&body) {
                return Err(ExchangeError::Api {
                    code: api.code,
                    msg: api.msg,
                });
            }
        }
        Err(ExchangeError::Http {
            status: status.as_u16(),
            body,
        })
    }

    /// Send a signed request with `params` in the query string.
    async fn signed(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
    ) -> ExchangeResult<Response> {
        let credentials = self
            .credentials
            .as_ref()
            .ok_or(ExchangeError::MissingCredentials)?;

        let mut query: Vec<String> = params.iter().map(|(k, v)| format!("{k}={v}")).collect();
        query.push(format!("recvWindow={}", self.recv_window_ms));
        query.push(format!("timestamp={}", chrono::Utc::now().timestamp_millis()));
        let query = query.join("&");
        let signature = credentials.sign(&query)?;

        let url = format!("{}{path}?{query}&signature={signature}", self.rest_url);
        let response = self
            .client
            .request(method, url)
            .header("X-MBX-APIKEY", &credentials.api_key)
            .send()
            .await?;
        Self::check(response).await
    }

    async fn klines(
        &self,
        pair: &str,
        interval: &str,
        limit: u32,
    ) -> ExchangeResult<Vec<PriceBar>> {
        let url = format!("{}/api/v3/klines", self.rest_url);
        debug!(pair, interval, limit, "Fetching klines");

        let response = self
            .client
            .get(&url)
            .query(&[
                ("symbol", pair.to_ascii_uppercase()),
                ("interval", interval.to_string()),
                ("limit", limit.to_string()),
            ])
            .send()
            .await?;
        let rows: Vec<Vec<Value>> = Self::check(response).await?.json().await?;

        if rows.is_empty() {
            return Err(ExchangeError::EmptyResponse(format!(
                "no klines for {pair} {interval}"
            )));
        }

        let bars = rows
            .iter()
            .enumerate()
            .map(|(idx, row)| {
                parse_kline(row).map_err(|e| ExchangeError::Parse(format!("kline {idx}: {e}")))
            })
            .collect::<ExchangeResult<Vec<_>>>()?;
        validate_window(&bars)?;
        Ok(bars)
    }

    async fn submit(&self, request: OrderRequest) -> ExchangeResult<OrderResult> {
        info!(
            pair = %request.pair,
            side = %request.side,
            quantity = %request.quantity,
            cloid = %request.client_order_id,
            "Submitting market order"
        );

        let params = [
            ("symbol", request.pair.to_ascii_uppercase()),
            ("side", request.side.as_str().to_string()),
            ("type", "MARKET".to_string()),
            ("quantity", request.quantity.to_string()),
            ("newClientOrderId", request.client_order_id.to_string()),
            ("newOrderRespType", "FULL".to_string()),
        ];
        let response = self.signed(Method::POST, "/api/v3/order", &params).await?;
        let order: OrderResponse = response.json().await?;
        Ok(order_result(request.side, order))
    }

    async fn lookup(&self, request: &OrderRequest) -> ExchangeResult<Option<OrderResult>> {
        debug!(cloid = %request.client_order_id, "Querying order");
        let params = [
            ("symbol", request.pair.to_ascii_uppercase()),
            ("origClientOrderId", request.client_order_id.to_string()),
        ];
        let response = match self.signed(Method::GET, "/api/v3/order", &params).await {
            Ok(response) => response,
            Err(ExchangeError::Api { code: UNKNOWN_ORDER, .. }) => return Ok(None),
            Err(e) => return Err(e),
        };
        let order: OrderResponse = response.json().await?;
        if matches!(order.status.as_str(), "NEW" | "PENDING_NEW") {
            return Ok(Some(
                OrderResult::error(request.side, format!("order status {}", order.status))
                    .with_client_order_id(request.client_order_id.clone()),
            ));
        }
        Ok(Some(order_result(request.side, order)))
    }

    async fn free_balance(&self, asset: &str) -> ExchangeResult<Decimal> {
        let response = self.signed(Method::GET, "/api/v3/account", &[]).await?;
        let account: AccountResponse = response.json().await?;
        Ok(account
            .balances
            .into_iter()
            .find(|b| b.asset.eq_ignore_ascii_case(asset))
            .map(|b| b.free)
            .unwrap_or(Decimal::ZERO))
    }

    async fn ping_inner(&self) -> ExchangeResult<()> {
        let url = format!("{}/api/v3/ping", self.rest_url);
        let response = self.client.get(&url).send().await?;
        Self::check(response).await?;
        Ok(())
    }
}

impl MarketDataSource for BinanceClient {
    fn fetch_candles<'a>(
        &'a self,
        pair: &'a str,
        interval: &'a str,
        limit: u32,
    ) -> BoxFuture<'a, ExchangeResult<Vec<PriceBar>>> {
        Box::pin(self.klines(pair, interval, limit))
    }

    fn ping(&self) -> BoxFuture<'_, ExchangeResult<()>> {
        Box::pin(self.ping_inner())
    }
}

impl OrderGateway for BinanceClient {
    fn place_order(&self, request: OrderRequest) -> BoxFuture<'_, ExchangeResult<OrderResult>> {
        Box::pin(self.submit(request))
    }

    fn query_order<'a>(
        &'a self,
        request: &'a OrderRequest,
    ) -> BoxFuture<'a, ExchangeResult<Option<OrderResult>>> {
        Box::pin(self.lookup(request))
    }

    fn get_balance<'a>(&'a self, asset: &'a str) -> BoxFuture<'a, ExchangeResult<Decimal>> {
        Box::pin(self.free_balance(asset))
    }
}

/// Parse one kline row: `[openTime, open, high, low, close, volume, ...]`.
fn parse_kline(row: &[Value]) -> Result<PriceBar, String> {
    if row.len() < 6 {
        return Err(format!("expected at least 6 fields, got {}", row.len()));
    }
    let open_time_ms = row[0]
        .as_i64()
        .ok_or_else(|| "open time is not an integer".to_string())?;
    let field = |i: usize| -> Result<Decimal, String> {
        let raw = row[i]
            .as_str()
            .ok_or_else(|| format!("field {i} is not a string"))?;
        Decimal::from_str(raw).map_err(|e| format!("field {i}: {e}"))
    };

    Ok(PriceBar::new(
        open_time_ms,
        Price::new(field(1)?),
        Price::new(field(2)?),
        Price::new(field(3)?),
        Price::new(field(4)?),
        Size::new(field(5)?),
    ))
}

/// Map an exchange order response to an [`OrderResult`].
fn order_result(side: pilot_core::OrderSide, order: OrderResponse) -> OrderResult {
    let cloid = ClientOrderId::from_string(order.client_order_id);
    let filled = Size::new(order.executed_qty);

    match order.status.as_str() {
        "FILLED" | "PARTIALLY_FILLED" if filled.is_positive() => {
            let avg = Price::new(order.cummulative_quote_qty / order.executed_qty);
            OrderResult::filled(side, filled, avg, cloid)
        }
        status => {
            warn!(status, cloid = %cloid, "Order not filled");
            OrderResult::rejected(side, format!("order status {status}")).with_client_order_id(cloid)
        }
    }
}
