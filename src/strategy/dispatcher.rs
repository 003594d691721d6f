//! Order dispatch with a single reduced-size retry.

use super::quantizer::{limit_price, quantize};
use crate::config::ExecutionConfig;
use crate::error::{RebalanceError, Result};
use crate::exchange::{pair_symbol, NewOrder, OrderResponse, OrderSide, SpotExchange, SymbolRules};
use crate::utils::decimal::less_percent;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};

/// Final trade decision for one asset.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderIntent {
    pub side: OrderSide,
    pub asset: String,
    pub pair_asset: String,
    pub quantity: Decimal,
}

impl OrderIntent {
    pub fn buy(asset: &str, pair_asset: &str, quantity: Decimal) -> Self {
        Self {
            side: OrderSide::Buy,
            asset: asset.to_string(),
            pair_asset: pair_asset.to_string(),
            quantity,
        }
    }

    pub fn sell(asset: &str, pair_asset: &str, quantity: Decimal) -> Self {
        Self {
            side: OrderSide::Sell,
            asset: asset.to_string(),
            pair_asset: pair_asset.to_string(),
            quantity,
        }
    }

    pub fn symbol(&self) -> String {
        pair_symbol(&self.asset, &self.pair_asset)
    }
}

/// What happened to an intent.
#[derive(Debug, Clone)]
pub enum DispatchOutcome {
    /// Accepted by the exchange
    Placed(OrderResponse),
    /// Fully prepared but not submitted
    DryRun(NewOrder),
    /// Nothing sent
    Skipped { reason: String },
}

impl DispatchOutcome {
    pub fn is_placed(&self) -> bool {
        matches!(self, DispatchOutcome::Placed(_))
    }
}

/// Why a submission attempt failed.
enum Attempt {
    Accepted(OrderResponse),
    Rejected(String),
}

/// Turns intents into exchange orders.
///
/// Buys are fee-buffered GTC limit orders priced from the book; sells are
/// market orders so they always execute.
#[derive(Clone)]
pub struct OrderDispatcher {
    exchange: Arc<dyn SpotExchange>,
    config: ExecutionConfig,
}

impl OrderDispatcher {
    pub fn new(exchange: Arc<dyn SpotExchange>, config: ExecutionConfig) -> Self {
        Self { exchange, config }
    }

    pub fn is_dry_run(&self) -> bool {
        self.config.dry_run
    }

    pub async fn dispatch(&self, intent: &OrderIntent) -> Result<DispatchOutcome> {
        let symbol = intent.symbol();
        let rules = self.exchange.symbol_rules(&symbol).await?;

        let Some(order) = self.prepare(intent, &symbol, &rules).await? else {
            info!(%symbol, side = %intent.side, quantity = %intent.quantity, "Quantity below lot size, skipping");
            return Ok(DispatchOutcome::Skipped {
                reason: format!("{} quantity {} below lot size", symbol, intent.quantity),
            });
        };

        info!(
            %symbol,
            side = %order.side,
            order_type = order.order_type.as_str(),
            quantity = %order.quantity,
            price = ?order.price,
            "📤 Order"
        );

        if self.config.dry_run {
            info!(%symbol, "Dry run, order not submitted");
            return Ok(DispatchOutcome::DryRun(order));
        }

        let reason = match self.submit(&order).await? {
            Attempt::Accepted(response) => return Ok(DispatchOutcome::Placed(response)),
            Attempt::Rejected(reason) => reason,
        };

        let retry_qty = quantize(
            order.quantity * (Decimal::ONE - self.config.retry_reduction),
            Decimal::ZERO,
            &rules,
        )
        .0;
        warn!(
            %symbol,
            %reason,
            quantity = %order.quantity,
            %retry_qty,
            "Order rejected, retrying once at reduced size"
        );

        if retry_qty <= Decimal::ZERO {
            return Err(RebalanceError::OrderRejected { symbol, reason });
        }

        let retry = NewOrder {
            quantity: retry_qty,
            ..order
        };
        match self.submit(&retry).await? {
            Attempt::Accepted(response) => Ok(DispatchOutcome::Placed(response)),
            Attempt::Rejected(reason) => {
                warn!(%symbol, %reason, "Retry rejected, abandoning order");
                Err(RebalanceError::OrderRejected { symbol, reason })
            }
        }
    }

    /// Build the quantized order, or `None` if it floors to zero.
    async fn prepare(
        &self,
        intent: &OrderIntent,
        symbol: &str,
        rules: &SymbolRules,
    ) -> Result<Option<NewOrder>> {
        let order = match intent.side {
            OrderSide::Buy => {
                let buffered = less_percent(intent.quantity, self.config.taker_fee_pct);
                let book = self
                    .exchange
                    .order_book(symbol, self.config.order_book_depth)
                    .await?;
                let trades = self
                    .exchange
                    .recent_trades(symbol, self.config.trade_sample_size)
                    .await?;
                let raw_price = limit_price(OrderSide::Buy, &book, &trades).ok_or_else(|| {
                    RebalanceError::price_unavailable(&intent.asset, &intent.pair_asset)
                })?;

                let (quantity, price) = quantize(buffered, raw_price, rules);
                NewOrder::limit(symbol, OrderSide::Buy, quantity, price)
            }
            OrderSide::Sell => {
                let (quantity, _) = quantize(intent.quantity, Decimal::ZERO, rules);
                NewOrder::market(symbol, OrderSide::Sell, quantity)
            }
        };

        if order.quantity <= Decimal::ZERO {
            return Ok(None);
        }
        Ok(Some(order))
    }

    /// Submit once. Rejections are values; transport failures are errors.
    async fn submit(&self, order: &NewOrder) -> Result<Attempt> {
        match self.exchange.place_order(order).await {
            Ok(response) if response.status.is_rejected() => {
                Ok(Attempt::Rejected(format!("status {:?}", response.status)))
            }
            Ok(response) => {
                info!(
                    symbol = %response.symbol,
                    order_id = response.order_id,
                    status = ?response.status,
                    executed = %response.executed_qty,
                    "✅ Order accepted"
                );
                Ok(Attempt::Accepted(response))
            }
            Err(e) if e.is_rejection() => Ok(Attempt::Rejected(e.to_string())),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{MockExchange, OrderType, TimeInForce};
    use rust_decimal_macros::dec;

    async fn setup(dry_run: bool) -> (Arc<MockExchange>, OrderDispatcher) {
        let exchange = Arc::new(MockExchange::new());
        exchange.set_price("ETH", "USDT", dec!(2000)).await;
        exchange.set_rules("ETHUSDT", dec!(0.001), dec!(0.01)).await;
        exchange.set_balance("USDT", dec!(100000)).await;
        exchange.set_balance("ETH", dec!(50)).await;

        let config = ExecutionConfig {
            dry_run,
            ..ExecutionConfig::default()
        };
        let dispatcher = OrderDispatcher::new(exchange.clone(), config);
        (exchange, dispatcher)
    }

    #[tokio::test]
    async fn test_buy_is_fee_buffered_limit_order() {
        let (exchange, dispatcher) = setup(false).await;

        let outcome = dispatcher
            .dispatch(&OrderIntent::buy("ETH", "USDT", dec!(10)))
            .await
            .unwrap();

        assert!(outcome.is_placed());
        let log = exchange.order_log().await;
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].order_type, OrderType::Limit);
        assert_eq!(log[0].time_in_force, Some(TimeInForce::Gtc));
        // 10 less 0.055% = 9.9945, floored to the 0.001 lot
        assert_eq!(log[0].quantity, dec!(9.994));
        assert_eq!(log[0].price, Some(dec!(2000)));
    }

    #[tokio::test]
    async fn test_sell_is_unbuffered_market_order() {
        let (exchange, dispatcher) = setup(false).await;

        dispatcher
            .dispatch(&OrderIntent::sell("ETH", "USDT", dec!(10)))
            .await
            .unwrap();

        let log = exchange.order_log().await;
        assert_eq!(log[0].order_type, OrderType::Market);
        assert_eq!(log[0].quantity, dec!(10));
        assert_eq!(exchange.balance_of("ETH").await, dec!(40));
    }

    #[tokio::test]
    async fn test_rejection_retried_once_at_ninety_percent() {
        let (exchange, dispatcher) = setup(false).await;
        exchange.reject_next_orders(1).await;

        let outcome = dispatcher
            .dispatch(&OrderIntent::sell("ETH", "USDT", dec!(10)))
            .await
            .unwrap();

        assert!(outcome.is_placed());
        let quantities: Vec<_> = exchange
            .order_log()
            .await
            .iter()
            .map(|o| o.quantity)
            .collect();
        assert_eq!(quantities, vec![dec!(10), dec!(9)]);
    }

    #[tokio::test]
    async fn test_second_rejection_abandons() {
        let (exchange, dispatcher) = setup(false).await;
        exchange.reject_next_orders(5).await;

        let err = dispatcher
            .dispatch(&OrderIntent::sell("ETH", "USDT", dec!(10)))
            .await
            .unwrap_err();

        assert!(matches!(err, RebalanceError::OrderRejected { .. }));
        assert_eq!(exchange.order_log().await.len(), 2);
    }

    #[tokio::test]
    async fn test_transport_failure_not_retried() {
        let (exchange, dispatcher) = setup(false).await;
        exchange.make_unreachable("ETHUSDT").await;

        let err = dispatcher
            .dispatch(&OrderIntent::sell("ETH", "USDT", dec!(10)))
            .await
            .unwrap_err();

        assert!(matches!(err, RebalanceError::Transport(_)));
        assert!(exchange.order_log().await.is_empty());
    }

    #[tokio::test]
    async fn test_dust_quantity_skipped() {
        let (exchange, dispatcher) = setup(false).await;

        let outcome = dispatcher
            .dispatch(&OrderIntent::sell("ETH", "USDT", dec!(0.0004)))
            .await
            .unwrap();

        assert!(matches!(outcome, DispatchOutcome::Skipped { .. }));
        assert!(exchange.order_log().await.is_empty());
    }

    #[tokio::test]
    async fn test_dry_run_does_not_submit() {
        let (exchange, dispatcher) = setup(true).await;

        let outcome = dispatcher
            .dispatch(&OrderIntent::buy("ETH", "USDT", dec!(1)))
            .await
            .unwrap();

        match outcome {
            DispatchOutcome::DryRun(order) => assert_eq!(order.quantity, dec!(0.999)),
            other => panic!("expected dry run, got {:?}", other),
        }
        assert!(exchange.order_log().await.is_empty());
    }
}
