//! Type definitions for Binance spot API requests and responses.

use crate::error::ExchangeError;
use crate::utils::decimal::safe_div;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Exchange symbol of `base` quoted in `quote` (e.g. "ETHUSDT").
pub fn pair_symbol(base: &str, quote: &str) -> String {
    format!("{}{}", base, quote)
}

/// Free and locked amount of a single asset.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AssetBalance {
    pub asset: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub free: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub locked: Decimal,
}

impl AssetBalance {
    pub fn new(asset: &str, free: Decimal, locked: Decimal) -> Self {
        Self {
            asset: asset.to_string(),
            free,
            locked,
        }
    }

    pub fn total(&self) -> Decimal {
        self.free + self.locked
    }
}

/// Signed account snapshot.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountInfo {
    pub balances: Vec<AssetBalance>,
}

/// Rolling average price for a pair.
#[derive(Debug, Clone, Deserialize)]
pub struct AvgPrice {
    pub mins: u32,
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
}

/// One price level of the order book.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(from = "(Decimal, Decimal)")]
pub struct BookLevel {
    pub price: Decimal,
    pub qty: Decimal,
}

impl From<(Decimal, Decimal)> for BookLevel {
    fn from((price, qty): (Decimal, Decimal)) -> Self {
        Self { price, qty }
    }
}

/// Order book snapshot, best levels first.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderBook {
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
}

impl OrderBook {
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.first().map(|l| l.price)
    }

    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.first().map(|l| l.price)
    }
}

/// Aggregated recent trade.
#[derive(Debug, Clone, Deserialize)]
pub struct RecentTrade {
    #[serde(rename = "p", with = "rust_decimal::serde::str")]
    pub price: Decimal,
    #[serde(rename = "q", with = "rust_decimal::serde::str")]
    pub qty: Decimal,
    #[serde(rename = "T")]
    pub time: i64,
    #[serde(rename = "m")]
    pub is_buyer_maker: bool,
}

/// Kline / candlestick.
#[derive(Debug, Clone, PartialEq)]
pub struct Candle {
    pub open_time: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub quote_volume: Decimal,
}

impl Candle {
    /// Parse one row of the klines array response.
    ///
    /// Layout: `[openTime, open, high, low, close, volume, closeTime, quoteVolume, ...]`
    pub fn from_row(row: &[serde_json::Value]) -> Result<Self, ExchangeError> {
        let field = |idx: usize| -> Result<Decimal, ExchangeError> {
            let raw = row
                .get(idx)
                .and_then(|v| v.as_str())
                .ok_or_else(|| ExchangeError::Decode(format!("kline field {} missing", idx)))?;
            Decimal::from_str(raw)
                .map_err(|e| ExchangeError::Decode(format!("kline field {}: {}", idx, e)))
        };

        let open_time = row
            .first()
            .and_then(|v| v.as_i64())
            .ok_or_else(|| ExchangeError::Decode("kline open time missing".to_string()))?;

        Ok(Self {
            open_time,
            open: field(1)?,
            high: field(2)?,
            low: field(3)?,
            close: field(4)?,
            volume: field(5)?,
            quote_volume: field(7)?,
        })
    }
}

/// Exchange information response (filtered to one symbol).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeInfo {
    pub symbols: Vec<SymbolInfo>,
}

/// Spot symbol information from exchange info.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolInfo {
    pub symbol: String,
    pub status: String,
    pub base_asset: String,
    pub quote_asset: String,
    #[serde(default)]
    pub iceberg_allowed: bool,
    #[serde(default)]
    pub filters: Vec<SymbolFilter>,
}

/// Trading filters relevant to order formatting.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "filterType")]
pub enum SymbolFilter {
    #[serde(rename = "LOT_SIZE", rename_all = "camelCase")]
    LotSize {
        #[serde(with = "rust_decimal::serde::str")]
        step_size: Decimal,
    },
    #[serde(rename = "PRICE_FILTER", rename_all = "camelCase")]
    PriceFilter {
        #[serde(with = "rust_decimal::serde::str")]
        tick_size: Decimal,
    },
    #[serde(other)]
    Other,
}

/// Quantity and price granularity of a pair.
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolRules {
    pub symbol: String,
    pub step_size: Decimal,
    pub tick_size: Decimal,
    pub iceberg_allowed: bool,
}

impl SymbolRules {
    pub fn new(symbol: &str, step_size: Decimal, tick_size: Decimal) -> Self {
        Self {
            symbol: symbol.to_string(),
            step_size,
            tick_size,
            iceberg_allowed: false,
        }
    }
}

impl TryFrom<SymbolInfo> for SymbolRules {
    type Error = ExchangeError;

    fn try_from(info: SymbolInfo) -> Result<Self, Self::Error> {
        let mut step_size = None;
        let mut tick_size = None;
        for filter in &info.filters {
            match filter {
                SymbolFilter::LotSize { step_size: s } => step_size = Some(*s),
                SymbolFilter::PriceFilter { tick_size: t } => tick_size = Some(*t),
                SymbolFilter::Other => {}
            }
        }

        Ok(Self {
            step_size: step_size.ok_or_else(|| {
                ExchangeError::Decode(format!("{} has no LOT_SIZE filter", info.symbol))
            })?,
            tick_size: tick_size.ok_or_else(|| {
                ExchangeError::Decode(format!("{} has no PRICE_FILTER filter", info.symbol))
            })?,
            iceberg_allowed: info.iceberg_allowed,
            symbol: info.symbol,
        })
    }
}

/// Order side (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Limit,
    Market,
    LimitMaker,
    StopLoss,
    StopLossLimit,
    TakeProfit,
    TakeProfitLimit,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Limit => "LIMIT",
            OrderType::Market => "MARKET",
            OrderType::LimitMaker => "LIMIT_MAKER",
            OrderType::StopLoss => "STOP_LOSS",
            OrderType::StopLossLimit => "STOP_LOSS_LIMIT",
            OrderType::TakeProfit => "TAKE_PROFIT",
            OrderType::TakeProfitLimit => "TAKE_PROFIT_LIMIT",
        }
    }
}

/// Time in force for limit orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TimeInForce {
    Gtc, // Good Till Cancel
    Ioc, // Immediate or Cancel
    Fok, // Fill or Kill
}

/// Order status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    PendingCancel,
    Rejected,
    Expired,
    ExpiredInMatch,
}

impl OrderStatus {
    /// Statuses meaning the exchange did not accept the order.
    pub fn is_rejected(&self) -> bool {
        matches!(self, OrderStatus::Rejected | OrderStatus::Expired)
    }
}

/// New order request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOrder {
    pub symbol: String,
    pub side: OrderSide,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub time_in_force: Option<TimeInForce>,
}

impl NewOrder {
    /// Good-till-cancel limit order.
    pub fn limit(symbol: &str, side: OrderSide, quantity: Decimal, price: Decimal) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::Limit,
            quantity,
            price: Some(price),
            time_in_force: Some(TimeInForce::Gtc),
        }
    }

    pub fn market(symbol: &str, side: OrderSide, quantity: Decimal) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::Market,
            quantity,
            price: None,
            time_in_force: None,
        }
    }
}

/// Order response from the exchange.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub symbol: String,
    pub order_id: i64,
    pub status: OrderStatus,
    pub side: OrderSide,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub orig_qty: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub executed_qty: Decimal,
    #[serde(rename = "cummulativeQuoteQty", with = "rust_decimal::serde::str")]
    pub cumulative_quote_qty: Decimal,
}

impl OrderResponse {
    /// Average fill price, zero when nothing filled.
    pub fn avg_price(&self) -> Decimal {
        safe_div(self.cumulative_quote_qty, self.executed_qty)
    }
}

/// Resting order awaiting execution.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenOrder {
    pub symbol: String,
    pub order_id: i64,
    pub side: OrderSide,
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub orig_qty: Decimal,
}

/// Error body returned by Binance.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    pub code: i64,
    pub msg: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_pair_symbol_puts_base_first() {
        assert_eq!(pair_symbol("ETH", "USDT"), "ETHUSDT");
        assert_eq!(pair_symbol("USDT", "BTC"), "USDTBTC");
    }

    #[test]
    fn test_order_book_levels_parse_from_string_pairs() {
        let json = r#"{"lastUpdateId":1,"bids":[["100.50","2.0"]],"asks":[["100.60","1.5"]]}"#;
        let book: OrderBook = serde_json::from_str(json).unwrap();
        assert_eq!(book.best_bid(), Some(dec!(100.50)));
        assert_eq!(book.best_ask(), Some(dec!(100.60)));
        assert_eq!(book.asks[0].qty, dec!(1.5));
    }

    #[test]
    fn test_candle_from_row() {
        let json = r#"[1499040000000,"0.01634790","0.80000000","0.01575800","0.01577100","148976.11427815",1499644799999,"2434.19055334",308,"1756.87402397","28.46694368","0"]"#;
        let row: Vec<serde_json::Value> = serde_json::from_str(json).unwrap();
        let candle = Candle::from_row(&row).unwrap();
        assert_eq!(candle.open_time, 1499040000000);
        assert_eq!(candle.close, dec!(0.01577100));
        assert_eq!(candle.volume, dec!(148976.11427815));
        assert_eq!(candle.quote_volume, dec!(2434.19055334));
    }

    #[test]
    fn test_candle_short_row_is_decode_error() {
        let row = vec![serde_json::json!(1), serde_json::json!("1.0")];
        assert!(matches!(
            Candle::from_row(&row),
            Err(ExchangeError::Decode(_))
        ));
    }

    #[test]
    fn test_symbol_rules_from_exchange_info() {
        let json = r#"{"symbols":[{"symbol":"ETHUSDT","status":"TRADING","baseAsset":"ETH","quoteAsset":"USDT","icebergAllowed":true,
            "filters":[{"filterType":"PRICE_FILTER","minPrice":"0.01","maxPrice":"1000000.00","tickSize":"0.01000000"},
                       {"filterType":"LOT_SIZE","minQty":"0.0001","maxQty":"9000","stepSize":"0.00010000"},
                       {"filterType":"NOTIONAL","minNotional":"5.00"}]}]}"#;
        let info: ExchangeInfo = serde_json::from_str(json).unwrap();
        let rules = SymbolRules::try_from(info.symbols[0].clone()).unwrap();
        assert_eq!(rules.step_size, dec!(0.0001));
        assert_eq!(rules.tick_size, dec!(0.01));
        assert!(rules.iceberg_allowed);
    }

    #[test]
    fn test_avg_fill_price() {
        let json = r#"{"symbol":"ETHUSDT","orderId":7,"status":"FILLED","side":"BUY","type":"MARKET",
            "price":"0.00","origQty":"2.0","executedQty":"2.0","cummulativeQuoteQty":"5000.0"}"#;
        let response: OrderResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.avg_price(), dec!(2500));
        assert!(!response.status.is_rejected());
    }
}
