//! Exchange access for pilot.
//!
//! The execution core only sees two capabilities:
//! - [`MarketDataSource`]: recent price bars and a reachability check
//! - [`OrderGateway`]: order placement and balances
//!
//! [`BinanceClient`] implements both against the Binance spot REST API.
//! [`PaperExchange`] simulates fills against live market data.

pub mod binance;
pub mod error;
pub mod gateway;
pub mod paper;

pub use binance::{BinanceClient, Credentials, BINANCE_REST_URL};
pub use error::{ExchangeError, ExchangeResult};
pub use gateway::{
    split_pair, BoxFuture, DynMarketData, DynOrderGateway, MarketDataSource, OrderGateway,
    OrderRequest,
};
pub use paper::PaperExchange;
