//! Simulated exchange for paper trading.
//!
//! Market data comes from a real source; orders fill instantly at the last
//! close that source returned. Balances and filled orders are tracked in
//! memory; the base balance can be seeded from a persisted position.

use crate::error::{ExchangeError, ExchangeResult};
use crate::gateway::{BoxFuture, DynMarketData, MarketDataSource, OrderGateway, OrderRequest};
use parking_lot::Mutex;
use pilot_core::{OrderResult, OrderSide, Price, PriceBar};
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::info;

/// Binance code for "Account has insufficient balance".
const INSUFFICIENT_BALANCE: i64 = -2010;

#[derive(Debug, Default)]
struct Book {
    last_close: HashMap<String, Price>,
    balances: HashMap<String, Decimal>,
    /// Filled orders by client order id.
    orders: HashMap<String, OrderResult>,
}

/// Paper exchange wrapping a live market data source.
pub struct PaperExchange {
    market: DynMarketData,
    base_asset: String,
    quote_asset: String,
    book: Mutex<Book>,
}

impl PaperExchange {
    pub fn new(
        market: DynMarketData,
        base_asset: impl Into<String>,
        quote_asset: impl Into<String>,
        starting_quote: Decimal,
    ) -> Self {
        let quote_asset = quote_asset.into().to_ascii_uppercase();
        let mut book = Book::default();
        book.balances.insert(quote_asset.clone(), starting_quote);
        Self {
            market,
            base_asset: base_asset.into().to_ascii_uppercase(),
            quote_asset,
            book: Mutex::new(book),
        }
    }

    /// Start holding `held` of the base asset, e.g. a position restored
    /// from disk after a restart.
    pub fn with_base_balance(self, held: Decimal) -> Self {
        if held > Decimal::ZERO {
            info!(asset = %self.base_asset, %held, "Seeding paper base balance");
            self.book.lock().balances.insert(self.base_asset.clone(), held);
        }
        self
    }

    pub fn balance(&self, asset: &str) -> Decimal {
        self.book
            .lock()
            .balances
            .get(&asset.to_ascii_uppercase())
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    async fn candles(
        &self,
        pair: &str,
        interval: &str,
        limit: u32,
    ) -> ExchangeResult<Vec<PriceBar>> {
        let bars = self.market.fetch_candles(pair, interval, limit).await?;
        if let Some(last) = bars.last() {
            self.book
                .lock()
                .last_close
                .insert(pair.to_ascii_uppercase(), last.close);
        }
        Ok(bars)
    }

    fn fill(&self, request: &OrderRequest) -> ExchangeResult<OrderResult> {
        let pair = request.pair.to_ascii_uppercase();
        let mut book = self.book.lock();
        let price = *book.last_close.get(&pair).ok_or_else(|| ExchangeError::Api {
            code: -1121,
            msg: format!("no price observed for {pair}"),
        })?;

        let qty = request.quantity.inner();
        let notional = request.quantity.notional(price);
        let (debit_asset, debit, credit_asset, credit) = match request.side {
            OrderSide::Buy => (&self.quote_asset, notional, &self.base_asset, qty),
            OrderSide::Sell => (&self.base_asset, qty, &self.quote_asset, notional),
        };

        let available = book.balances.get(debit_asset).copied().unwrap_or(Decimal::ZERO);
        if available < debit {
            return Err(ExchangeError::Api {
                code: INSUFFICIENT_BALANCE,
                msg: format!("insufficient {debit_asset}: have {available}, need {debit}"),
            });
        }

        *book.balances.entry(debit_asset.clone()).or_default() -= debit;
        *book.balances.entry(credit_asset.clone()).or_default() += credit;

        info!(
            side = %request.side,
            quantity = %request.quantity,
            price = %price,
            cloid = %request.client_order_id,
            "Paper order filled"
        );
        let result = OrderResult::filled(
            request.side,
            request.quantity,
            price,
            request.client_order_id.clone(),
        );
        book.orders.insert(request.client_order_id.to_string(), result.clone());
        Ok(result)
    }
}

impl MarketDataSource for PaperExchange {
    fn fetch_candles<'a>(
        &'a self,
        pair: &'a str,
        interval: &'a str,
        limit: u32,
    ) -> BoxFuture<'a, ExchangeResult<Vec<PriceBar>>> {
        Box::pin(self.candles(pair, interval, limit))
    }

    fn ping(&self) -> BoxFuture<'_, ExchangeResult<()>> {
        self.market.ping()
    }
}

impl OrderGateway for PaperExchange {
    fn place_order(&self, request: OrderRequest) -> BoxFuture<'_, ExchangeResult<OrderResult>> {
        Box::pin(async move { self.fill(&request) })
    }

    fn query_order<'a>(
        &'a self,
        request: &'a OrderRequest,
    ) -> BoxFuture<'a, ExchangeResult<Option<OrderResult>>> {
        Box::pin(async move {
            Ok(self
                .book
                .lock()
                .orders
                .get(request.client_order_id.as_str())
                .cloned())
        })
    }

    fn get_balance<'a>(&'a self, asset: &'a str) -> BoxFuture<'a, ExchangeResult<Decimal>> {
        Box::pin(async move { Ok(self.balance(asset)) })
    }
}
