//! Funds verification and the liquidation cascade for buys.
//!
//! A buy that the free trade-pair balance cannot cover first sells every
//! substitute holding, then core holdings with a smaller target fraction one
//! at a time, and finally shrinks to whatever the balance can still afford.
//! Every stage rechecks against freshly fetched balances.

use super::dispatcher::{DispatchOutcome, OrderDispatcher, OrderIntent};
use crate::config::{PortfolioConfig, TradingConfig};
use crate::error::{RebalanceError, Result};
use crate::portfolio::{Holding, PortfolioReader, PortfolioSnapshot, Valuator};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

/// Terminal state of the cascade.
#[derive(Debug, Clone, PartialEq)]
pub enum FundsDecision {
    /// Buy the requested quantity
    Sufficient,
    /// Buy the largest affordable quantity instead
    ScaledDown { quantity: Decimal },
    /// Not worth buying at all
    Abandoned {
        required: Decimal,
        available: Decimal,
    },
}

/// Decision plus the assets sold to reach it.
#[derive(Debug, Clone)]
pub struct CascadeOutcome {
    pub decision: FundsDecision,
    pub sold: Vec<String>,
}

/// Checks trade-pair funds and liquidates other holdings to cover buys.
#[derive(Clone)]
pub struct FundsVerifier {
    reader: PortfolioReader,
    valuator: Valuator,
    dispatcher: OrderDispatcher,
    portfolio: PortfolioConfig,
    min_trade_value: Decimal,
}

impl FundsVerifier {
    pub fn new(
        reader: PortfolioReader,
        valuator: Valuator,
        dispatcher: OrderDispatcher,
        portfolio: &PortfolioConfig,
        trading: &TradingConfig,
    ) -> Self {
        Self {
            reader,
            valuator,
            dispatcher,
            portfolio: portfolio.clone(),
            min_trade_value: trading.min_trade_value,
        }
    }

    /// Free (not locked) trade-pair balance.
    pub async fn trade_pair_free(&self) -> Result<Decimal> {
        Ok(self.reader.balances().await?.free(&self.portfolio.trade_pair))
    }

    /// Free trade-pair balance in the valuation currency.
    pub async fn trade_pair_value(&self) -> Result<Decimal> {
        let trade_pair = &self.portfolio.trade_pair;
        let free = self.trade_pair_free().await?;
        if self.portfolio.is_stable(trade_pair) {
            return Ok(free);
        }
        self.valuator
            .value_of(free, trade_pair, &self.portfolio.valuation_currency)
            .await
    }

    /// Trade-pair cost of `quantity` units of `asset`.
    async fn cost(&self, quantity: Decimal, asset: &str) -> Result<Decimal> {
        self.valuator
            .value_of(quantity, asset, &self.portfolio.trade_pair)
            .await
    }

    /// Whether the free trade-pair balance strictly exceeds the cost.
    pub async fn check(&self, quantity: Decimal, asset: &str) -> Result<bool> {
        let required = self.cost(quantity, asset).await?;
        let available = self.trade_pair_free().await?;
        debug!(%asset, %quantity, %required, %available, "Funds check");
        Ok(required < available)
    }

    /// Held assets that are neither core nor the trade pair.
    pub fn substitute_holdings<'a>(&self, snapshot: &'a PortfolioSnapshot) -> Vec<&'a Holding> {
        snapshot
            .holdings()
            .iter()
            .filter(|h| !self.portfolio.is_core(&h.asset) && h.asset != self.portfolio.trade_pair)
            .collect()
    }

    /// Held core assets with a strictly smaller target than `asset`,
    /// never the fee asset or the trade pair.
    pub fn low_allocation_holdings<'a>(
        &self,
        asset: &str,
        snapshot: &'a PortfolioSnapshot,
    ) -> Vec<&'a Holding> {
        let Some(fraction) = self.portfolio.target_fraction(asset) else {
            return Vec::new();
        };
        snapshot
            .holdings()
            .iter()
            .filter(|h| {
                h.asset != self.portfolio.fee_asset
                    && h.asset != self.portfolio.trade_pair
                    && self
                        .portfolio
                        .target_fraction(&h.asset)
                        .is_some_and(|f| f < fraction)
            })
            .collect()
    }

    /// Sell the whole free balance of `asset`. Failures stay local.
    async fn liquidate(&self, asset: &str) -> bool {
        let free = match self.reader.balances().await {
            Ok(view) => view.free(asset),
            Err(e) => {
                warn!(%asset, error = %e, "Could not read balance for liquidation");
                return false;
            }
        };
        if free <= Decimal::ZERO {
            return false;
        }

        let intent = OrderIntent::sell(asset, &self.portfolio.trade_pair, free);
        match self.dispatcher.dispatch(&intent).await {
            Ok(outcome) => !matches!(outcome, DispatchOutcome::Skipped { .. }),
            Err(e) => {
                warn!(%asset, error = %e, "Liquidation sell failed");
                false
            }
        }
    }

    /// Run the cascade for a prospective buy without placing the buy.
    ///
    /// `floor_applies` marks fee-asset top-ups, which are scaled down even
    /// when the remaining balance is below the minimum trade size.
    pub async fn verify_buy(
        &self,
        quantity: Decimal,
        asset: &str,
        snapshot: &PortfolioSnapshot,
        floor_applies: bool,
    ) -> Result<CascadeOutcome> {
        let mut sold = Vec::new();
        let sufficient = |sold: Vec<String>| CascadeOutcome {
            decision: FundsDecision::Sufficient,
            sold,
        };

        if self.check(quantity, asset).await? {
            return Ok(sufficient(sold));
        }

        let substitutes = self.substitute_holdings(snapshot);
        if !substitutes.is_empty() {
            info!(
                %asset,
                trade_pair = %self.portfolio.trade_pair,
                count = substitutes.len(),
                "Need more funds, liquidating substitutes"
            );
            for holding in substitutes {
                if self.liquidate(&holding.asset).await {
                    sold.push(holding.asset.clone());
                }
            }
            if self.check(quantity, asset).await? {
                return Ok(sufficient(sold));
            }
        }

        let low = self.low_allocation_holdings(asset, snapshot);
        if !low.is_empty() {
            info!(
                %asset,
                count = low.len(),
                "Still need more funds, liquidating lower allocations"
            );
            for holding in low {
                if self.liquidate(&holding.asset).await {
                    sold.push(holding.asset.clone());
                }
                if self.check(quantity, asset).await? {
                    return Ok(sufficient(sold));
                }
            }
        }

        let available = self.trade_pair_value().await?;
        let decision = if floor_applies || available > self.min_trade_value {
            let free = self.trade_pair_free().await?;
            let scaled = self
                .valuator
                .value_of(free, &self.portfolio.trade_pair, asset)
                .await?;
            info!(%asset, requested = %quantity, quantity = %scaled, "Scaling buy down to available funds");
            FundsDecision::ScaledDown { quantity: scaled }
        } else {
            let required = self.cost(quantity, asset).await?;
            info!(%asset, %required, %available, "Not enough funds, skipping buy");
            FundsDecision::Abandoned {
                required,
                available,
            }
        };

        Ok(CascadeOutcome { decision, sold })
    }

    /// Verify funds, then buy the full or scaled quantity.
    pub async fn buy(
        &self,
        quantity: Decimal,
        asset: &str,
        snapshot: &PortfolioSnapshot,
        floor_applies: bool,
    ) -> Result<DispatchOutcome> {
        let outcome = self
            .verify_buy(quantity, asset, snapshot, floor_applies)
            .await?;

        let quantity = match outcome.decision {
            FundsDecision::Sufficient => quantity,
            FundsDecision::ScaledDown { quantity } => quantity,
            FundsDecision::Abandoned {
                required,
                available,
            } => {
                return Err(RebalanceError::InsufficientFunds {
                    asset: asset.to_string(),
                    required,
                    available,
                })
            }
        };

        self.dispatcher
            .dispatch(&OrderIntent::buy(asset, &self.portfolio.trade_pair, quantity))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ExecutionConfig, TargetWeight};
    use crate::exchange::{MockExchange, OrderSide};
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn target(asset: &str, fraction: Decimal) -> TargetWeight {
        TargetWeight {
            asset: asset.to_string(),
            fraction,
        }
    }

    async fn setup() -> (Arc<MockExchange>, FundsVerifier, PortfolioReader) {
        let exchange = Arc::new(MockExchange::new());
        exchange.set_price("BTC", "USDT", dec!(50000)).await;
        exchange.set_price("ETH", "USDT", dec!(2000)).await;
        exchange.set_price("ADA", "USDT", dec!(0.5)).await;
        exchange.set_price("BNB", "USDT", dec!(250)).await;
        exchange.set_price("ENJ", "USDT", dec!(1)).await;

        let portfolio = PortfolioConfig {
            allocation: vec![
                target("BTC", dec!(0.4)),
                target("ETH", dec!(0.3)),
                target("ADA", dec!(0.1)),
                target("BNB", dec!(0.05)),
            ],
            substitutes: vec!["ENJ".to_string()],
            ..PortfolioConfig::default()
        };
        let trading = TradingConfig {
            min_trade_value: dec!(10),
            ..TradingConfig::default()
        };
        let execution = ExecutionConfig {
            dry_run: false,
            ..ExecutionConfig::default()
        };

        let valuator = Valuator::new(exchange.clone(), &portfolio);
        let reader = PortfolioReader::new(exchange.clone(), valuator.clone(), &portfolio, &trading);
        let dispatcher = OrderDispatcher::new(exchange.clone(), execution);
        let verifier = FundsVerifier::new(reader.clone(), valuator, dispatcher, &portfolio, &trading);
        (exchange, verifier, reader)
    }

    #[tokio::test]
    async fn test_check_uses_free_balance_strictly() {
        let (exchange, verifier, _) = setup().await;
        exchange
            .set_balance_with_locked("USDT", dec!(200), dec!(1000))
            .await;

        assert!(verifier.check(dec!(0.099), "ETH").await.unwrap());
        // exactly the free balance is not enough
        assert!(!verifier.check(dec!(0.1), "ETH").await.unwrap());
    }

    #[tokio::test]
    async fn test_sufficient_funds_buy_without_cascade() {
        let (exchange, verifier, reader) = setup().await;
        exchange.set_balance("USDT", dec!(1000)).await;
        exchange.set_balance("ENJ", dec!(300)).await;
        let snapshot = reader.snapshot().await.unwrap();

        let outcome = verifier
            .verify_buy(dec!(0.1), "ETH", &snapshot, false)
            .await
            .unwrap();

        assert_eq!(outcome.decision, FundsDecision::Sufficient);
        assert!(outcome.sold.is_empty());
        assert_eq!(exchange.balance_of("ENJ").await, dec!(300));
    }

    #[tokio::test]
    async fn test_underfunded_buy_liquidates_substitute_then_buys_in_full() {
        let (exchange, verifier, reader) = setup().await;
        exchange.set_balance("USDT", dec!(50)).await;
        exchange.set_balance("ENJ", dec!(300)).await; // $300 substitute
        let snapshot = reader.snapshot().await.unwrap();

        // $200 of ETH
        verifier
            .buy(dec!(0.1), "ETH", &snapshot, false)
            .await
            .unwrap();

        let log = exchange.order_log().await;
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].symbol, "ENJUSDT");
        assert_eq!(log[0].side, OrderSide::Sell);
        assert_eq!(log[0].quantity, dec!(300));
        assert_eq!(log[1].symbol, "ETHUSDT");
        assert_eq!(log[1].side, OrderSide::Buy);
        // 0.1 less the 0.055% fee buffer, floored to the default lot
        assert_eq!(log[1].quantity, dec!(0.09994));
    }

    #[tokio::test]
    async fn test_underfunded_buy_without_substitutes_scales_down() {
        let (exchange, verifier, reader) = setup().await;
        exchange.set_balance("USDT", dec!(50)).await;
        let snapshot = reader.snapshot().await.unwrap();

        let outcome = verifier
            .verify_buy(dec!(0.1), "ETH", &snapshot, false)
            .await
            .unwrap();

        // $50 buys exactly 0.025 ETH
        assert_eq!(
            outcome.decision,
            FundsDecision::ScaledDown {
                quantity: dec!(0.025)
            }
        );
        assert!(outcome.sold.is_empty());
    }

    #[tokio::test]
    async fn test_low_allocations_sold_until_enough() {
        let (exchange, verifier, reader) = setup().await;
        exchange.set_balance("USDT", dec!(20)).await;
        exchange.set_balance("ADA", dec!(1000)).await; // $500, target 0.1
        exchange.set_balance("BNB", dec!(4)).await; // fee asset, never sold
        exchange.set_balance("BTC", dec!(0.01)).await; // larger target, never sold
        let snapshot = reader.snapshot().await.unwrap();

        let outcome = verifier
            .verify_buy(dec!(0.1), "ETH", &snapshot, false)
            .await
            .unwrap();

        assert_eq!(outcome.decision, FundsDecision::Sufficient);
        assert_eq!(outcome.sold, vec!["ADA".to_string()]);
        assert_eq!(exchange.balance_of("BNB").await, dec!(4));
        assert_eq!(exchange.balance_of("BTC").await, dec!(0.01));
    }

    #[tokio::test]
    async fn test_tiny_balance_abandons_buy() {
        let (exchange, verifier, reader) = setup().await;
        exchange.set_balance("USDT", dec!(5)).await;
        exchange.set_balance("BTC", dec!(0.01)).await;
        let snapshot = reader.snapshot().await.unwrap();

        let err = verifier
            .buy(dec!(0.1), "ETH", &snapshot, false)
            .await
            .unwrap_err();

        assert!(matches!(err, RebalanceError::InsufficientFunds { .. }));
        assert!(exchange.order_log().await.is_empty());
    }

    #[tokio::test]
    async fn test_fee_floor_scales_down_even_below_min_trade() {
        let (exchange, verifier, reader) = setup().await;
        exchange.set_balance("USDT", dec!(5)).await;
        exchange.set_balance("BTC", dec!(0.01)).await;
        let snapshot = reader.snapshot().await.unwrap();

        let outcome = verifier
            .verify_buy(dec!(1), "BNB", &snapshot, true)
            .await
            .unwrap();

        assert_eq!(
            outcome.decision,
            FundsDecision::ScaledDown {
                quantity: dec!(0.02)
            }
        );
    }

    #[tokio::test]
    async fn test_cascade_bounded_and_never_overspends() {
        let (exchange, verifier, reader) = setup().await;
        exchange.set_balance("USDT", dec!(15)).await;
        exchange.set_balance("ENJ", dec!(40)).await;
        exchange.set_balance("ADA", dec!(60)).await;
        exchange.set_balance("BNB", dec!(1)).await;
        let snapshot = reader.snapshot().await.unwrap();
        let bound = verifier.substitute_holdings(&snapshot).len()
            + verifier.low_allocation_holdings("ETH", &snapshot).len();

        let outcome = verifier
            .verify_buy(dec!(10), "ETH", &snapshot, false)
            .await
            .unwrap();

        assert!(outcome.sold.len() <= bound);
        match outcome.decision {
            FundsDecision::ScaledDown { quantity } => {
                let cost = quantity * dec!(2000);
                assert!(cost <= exchange.balance_of("USDT").await);
            }
            other => panic!("expected scale down, got {:?}", other),
        }
    }
}
