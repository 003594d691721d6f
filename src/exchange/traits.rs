//! Venue-agnostic trait for spot exchange access.
//!
//! The rebalancing engine only talks to the venue through this capability
//! set, so the live Binance client and the in-memory mock are interchangeable.

use super::types::*;
use crate::error::ExchangeError;
use async_trait::async_trait;
use rust_decimal::Decimal;

pub type ExchangeResult<T> = Result<T, ExchangeError>;

/// Capabilities the rebalancer consumes from a spot exchange.
///
/// Every call returns an explicit result: a failed request is never
/// confused with an empty or zero response.
#[async_trait]
pub trait SpotExchange: Send + Sync {
    /// All non-zero balances of the account.
    async fn account_balances(&self) -> ExchangeResult<Vec<AssetBalance>>;

    /// Current average price of a pair (e.g. "ETHUSDT").
    async fn avg_price(&self, symbol: &str) -> ExchangeResult<Decimal>;

    /// Order book snapshot limited to `depth` levels per side.
    async fn order_book(&self, symbol: &str, depth: u16) -> ExchangeResult<OrderBook>;

    /// Most recent trades, newest last.
    async fn recent_trades(&self, symbol: &str, limit: u16) -> ExchangeResult<Vec<RecentTrade>>;

    /// Latest `limit` candles of the given interval.
    async fn candles(&self, symbol: &str, interval: &str, limit: u16)
        -> ExchangeResult<Vec<Candle>>;

    /// Quantity step and price tick for a pair.
    async fn symbol_rules(&self, symbol: &str) -> ExchangeResult<SymbolRules>;

    async fn place_order(&self, order: &NewOrder) -> ExchangeResult<OrderResponse>;

    async fn cancel_order(&self, symbol: &str, order_id: i64) -> ExchangeResult<()>;

    async fn open_orders(&self) -> ExchangeResult<Vec<OpenOrder>>;
}
