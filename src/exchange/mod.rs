//! Exchange integrations for spot rebalancing.
//!
//! ## Binance
//! REST connectivity for:
//! - Market data (average price, order book, aggregate trades, klines)
//! - Trading rules (lot step and price tick per symbol)
//! - Account operations (balances, orders, cancellation)
//!
//! ## Mock
//! In-memory venue with simulated balances and instant fills.

mod client;
pub mod mock;
mod traits;
mod types;

pub use client::BinanceClient;
pub use mock::MockExchange;
pub use traits::{ExchangeResult, SpotExchange};
pub use types::*;
