//! In-memory spot exchange for paper trading and tests.
//!
//! Orders fill immediately at the limit price (or the mark price for market
//! orders) and settle against the simulated balances.

use super::traits::{ExchangeResult, SpotExchange};
use super::types::*;
use crate::error::ExchangeError;
use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Binance code for balance and filter rejections.
const REJECT_CODE: i64 = -2010;

/// Simulated trading pair.
#[derive(Debug, Clone)]
struct MockPair {
    base: String,
    quote: String,
    price: Decimal,
}

/// Mock exchange state.
#[derive(Debug, Default)]
pub struct MockExchangeState {
    pub balances: HashMap<String, AssetBalance>,
    pairs: HashMap<String, MockPair>,
    pub rules: HashMap<String, SymbolRules>,
    pub candles: HashMap<String, Vec<Candle>>,
    pub open_orders: Vec<OpenOrder>,
    /// Every submitted order, including rejected ones
    pub order_log: Vec<NewOrder>,
    pub cancelled: Vec<i64>,
    /// Number of upcoming orders to reject regardless of balance
    pub reject_next: u32,
    /// Symbols whose market data calls fail with a transport error
    pub unreachable: HashSet<String>,
}

/// Mock client that simulates Binance spot responses.
pub struct MockExchange {
    state: Arc<RwLock<MockExchangeState>>,
    order_id_counter: AtomicI64,
}

impl Default for MockExchange {
    fn default() -> Self {
        Self::new()
    }
}

impl MockExchange {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(MockExchangeState::default())),
            order_id_counter: AtomicI64::new(1),
        }
    }

    /// Set the free balance of an asset.
    pub async fn set_balance(&self, asset: &str, free: Decimal) {
        self.set_balance_with_locked(asset, free, Decimal::ZERO).await;
    }

    pub async fn set_balance_with_locked(&self, asset: &str, free: Decimal, locked: Decimal) {
        self.state
            .write()
            .await
            .balances
            .insert(asset.to_string(), AssetBalance::new(asset, free, locked));
    }

    /// Register a tradeable pair with its current price.
    pub async fn set_price(&self, base: &str, quote: &str, price: Decimal) {
        let symbol = pair_symbol(base, quote);
        self.state.write().await.pairs.insert(
            symbol,
            MockPair {
                base: base.to_string(),
                quote: quote.to_string(),
                price,
            },
        );
    }

    pub async fn set_rules(&self, symbol: &str, step_size: Decimal, tick_size: Decimal) {
        self.state
            .write()
            .await
            .rules
            .insert(symbol.to_string(), SymbolRules::new(symbol, step_size, tick_size));
    }

    /// Install candles with a constant volume for ranking tests.
    pub async fn set_volume(&self, symbol: &str, volume: Decimal, count: usize) {
        let candles = (0..count)
            .map(|i| Candle {
                open_time: i as i64,
                open: Decimal::ONE,
                high: Decimal::ONE,
                low: Decimal::ONE,
                close: Decimal::ONE,
                volume,
                quote_volume: volume,
            })
            .collect();
        self.state
            .write()
            .await
            .candles
            .insert(symbol.to_string(), candles);
    }

    pub async fn add_open_order(&self, symbol: &str, price: Decimal, qty: Decimal) -> i64 {
        let order_id = self.next_order_id();
        self.state.write().await.open_orders.push(OpenOrder {
            symbol: symbol.to_string(),
            order_id,
            side: OrderSide::Buy,
            price,
            orig_qty: qty,
        });
        order_id
    }

    /// Reject the next `count` orders with an exchange error.
    pub async fn reject_next_orders(&self, count: u32) {
        self.state.write().await.reject_next = count;
    }

    /// Make market data for a symbol fail with a transport error.
    pub async fn make_unreachable(&self, symbol: &str) {
        self.state
            .write()
            .await
            .unreachable
            .insert(symbol.to_string());
    }

    pub async fn balance_of(&self, asset: &str) -> Decimal {
        self.state
            .read()
            .await
            .balances
            .get(asset)
            .map(|b| b.free)
            .unwrap_or(Decimal::ZERO)
    }

    pub async fn order_log(&self) -> Vec<NewOrder> {
        self.state.read().await.order_log.clone()
    }

    pub async fn cancelled_orders(&self) -> Vec<i64> {
        self.state.read().await.cancelled.clone()
    }

    fn next_order_id(&self) -> i64 {
        self.order_id_counter.fetch_add(1, Ordering::SeqCst)
    }

    async fn pair(&self, symbol: &str) -> ExchangeResult<MockPair> {
        let state = self.state.read().await;
        if state.unreachable.contains(symbol) {
            return Err(ExchangeError::Transport(format!(
                "connection to {} timed out",
                symbol
            )));
        }
        state.pairs.get(symbol).cloned().ok_or_else(|| ExchangeError::Api {
            status: 400,
            code: -1121,
            msg: "Invalid symbol.".to_string(),
        })
    }

    fn reject(msg: &str) -> ExchangeError {
        ExchangeError::Api {
            status: 400,
            code: REJECT_CODE,
            msg: msg.to_string(),
        }
    }
}

#[async_trait]
impl SpotExchange for MockExchange {
    async fn account_balances(&self) -> ExchangeResult<Vec<AssetBalance>> {
        let state = self.state.read().await;
        let mut balances: Vec<_> = state
            .balances
            .values()
            .filter(|b| b.total() > Decimal::ZERO)
            .cloned()
            .collect();
        balances.sort_by(|a, b| a.asset.cmp(&b.asset));
        Ok(balances)
    }

    async fn avg_price(&self, symbol: &str) -> ExchangeResult<Decimal> {
        Ok(self.pair(symbol).await?.price)
    }

    async fn order_book(&self, symbol: &str, _depth: u16) -> ExchangeResult<OrderBook> {
        let price = self.pair(symbol).await?.price;
        let level = BookLevel {
            price,
            qty: dec!(1000000),
        };
        Ok(OrderBook {
            bids: vec![level],
            asks: vec![level],
        })
    }

    async fn recent_trades(&self, symbol: &str, _limit: u16) -> ExchangeResult<Vec<RecentTrade>> {
        let price = self.pair(symbol).await?.price;
        Ok(vec![RecentTrade {
            price,
            qty: Decimal::ONE,
            time: 0,
            is_buyer_maker: false,
        }])
    }

    async fn candles(
        &self,
        symbol: &str,
        _interval: &str,
        limit: u16,
    ) -> ExchangeResult<Vec<Candle>> {
        self.pair(symbol).await?;
        let state = self.state.read().await;
        let candles = state.candles.get(symbol).cloned().unwrap_or_default();
        let skip = candles.len().saturating_sub(limit as usize);
        Ok(candles.into_iter().skip(skip).collect())
    }

    async fn symbol_rules(&self, symbol: &str) -> ExchangeResult<SymbolRules> {
        self.pair(symbol).await?;
        let state = self.state.read().await;
        Ok(state
            .rules
            .get(symbol)
            .cloned()
            .unwrap_or_else(|| SymbolRules::new(symbol, dec!(0.00001), dec!(0.01))))
    }

    async fn place_order(&self, order: &NewOrder) -> ExchangeResult<OrderResponse> {
        let pair = self.pair(&order.symbol).await?;
        let mut state = self.state.write().await;
        state.order_log.push(order.clone());

        if state.reject_next > 0 {
            state.reject_next -= 1;
            return Err(Self::reject("Order rejected by test fixture."));
        }

        if order.quantity <= Decimal::ZERO {
            return Err(Self::reject("Filter failure: LOT_SIZE"));
        }

        let fill_price = match order.order_type {
            OrderType::Market => pair.price,
            _ => order.price.unwrap_or(pair.price),
        };
        let notional = order.quantity * fill_price;

        let (spend_asset, spend_amount, receive_asset, receive_amount) = match order.side {
            OrderSide::Buy => (&pair.quote, notional, &pair.base, order.quantity),
            OrderSide::Sell => (&pair.base, order.quantity, &pair.quote, notional),
        };

        let available = state
            .balances
            .get(spend_asset)
            .map(|b| b.free)
            .unwrap_or(Decimal::ZERO);
        if available < spend_amount {
            return Err(Self::reject(
                "Account has insufficient balance for requested action.",
            ));
        }

        state
            .balances
            .entry(spend_asset.clone())
            .or_insert_with(|| AssetBalance::new(spend_asset, Decimal::ZERO, Decimal::ZERO))
            .free -= spend_amount;
        state
            .balances
            .entry(receive_asset.clone())
            .or_insert_with(|| AssetBalance::new(receive_asset, Decimal::ZERO, Decimal::ZERO))
            .free += receive_amount;

        let order_id = self.next_order_id();
        debug!(
            symbol = %order.symbol,
            side = %order.side,
            quantity = %order.quantity,
            price = %fill_price,
            order_id,
            "Mock order filled"
        );

        Ok(OrderResponse {
            symbol: order.symbol.clone(),
            order_id,
            status: OrderStatus::Filled,
            side: order.side,
            order_type: order.order_type,
            price: order.price.unwrap_or(Decimal::ZERO),
            orig_qty: order.quantity,
            executed_qty: order.quantity,
            cumulative_quote_qty: notional,
        })
    }

    async fn cancel_order(&self, symbol: &str, order_id: i64) -> ExchangeResult<()> {
        let mut state = self.state.write().await;
        let before = state.open_orders.len();
        state
            .open_orders
            .retain(|o| !(o.symbol == symbol && o.order_id == order_id));
        if state.open_orders.len() == before {
            return Err(ExchangeError::Api {
                status: 400,
                code: -2011,
                msg: "Unknown order sent.".to_string(),
            });
        }
        state.cancelled.push(order_id);
        Ok(())
    }

    async fn open_orders(&self) -> ExchangeResult<Vec<OpenOrder>> {
        Ok(self.state.read().await.open_orders.clone())
    }
}
