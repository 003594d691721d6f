//! Current holdings view built fresh every cycle.

use super::valuation::Valuator;
use crate::config::{PortfolioConfig, TradingConfig};
use crate::error::{RebalanceError, Result};
use crate::exchange::{AssetBalance, SpotExchange};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// One asset of the portfolio, valued at snapshot time.
#[derive(Debug, Clone, PartialEq)]
pub struct Holding {
    pub asset: String,
    pub free: Decimal,
    pub locked: Decimal,
    pub total: Decimal,
    /// Value in the anchor asset
    pub anchor_value: Decimal,
    /// Value in the valuation currency
    pub valuation_value: Decimal,
}

/// Raw balances as last observed on the exchange.
///
/// Fetched again before every decision point instead of being kept in sync.
#[derive(Debug, Clone, Default)]
pub struct BalanceView {
    balances: HashMap<String, AssetBalance>,
}

impl BalanceView {
    pub fn from_balances(balances: Vec<AssetBalance>) -> Self {
        Self {
            balances: balances
                .into_iter()
                .map(|b| (b.asset.clone(), b))
                .collect(),
        }
    }

    /// Amount usable for new orders.
    pub fn free(&self, asset: &str) -> Decimal {
        self.balances
            .get(asset)
            .map(|b| b.free)
            .unwrap_or(Decimal::ZERO)
    }

    pub fn total(&self, asset: &str) -> Decimal {
        self.balances
            .get(asset)
            .map(|b| b.total())
            .unwrap_or(Decimal::ZERO)
    }
}

/// Holdings above the dust threshold, in exchange order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PortfolioSnapshot {
    holdings: Vec<Holding>,
}

impl PortfolioSnapshot {
    pub fn new(holdings: Vec<Holding>) -> Self {
        Self { holdings }
    }

    pub fn holdings(&self) -> &[Holding] {
        &self.holdings
    }

    pub fn get(&self, asset: &str) -> Option<&Holding> {
        self.holdings.iter().find(|h| h.asset == asset)
    }

    pub fn contains(&self, asset: &str) -> bool {
        self.get(asset).is_some()
    }

    /// A new view with one asset removed (e.g. after it was sold).
    pub fn without_asset(&self, asset: &str) -> Self {
        Self {
            holdings: self
                .holdings
                .iter()
                .filter(|h| h.asset != asset)
                .cloned()
                .collect(),
        }
    }
}

/// Reads balances and builds valued, dust-filtered snapshots.
#[derive(Clone)]
pub struct PortfolioReader {
    exchange: Arc<dyn SpotExchange>,
    valuator: Valuator,
    trade_pair: String,
    dust_threshold: Decimal,
}

impl PortfolioReader {
    pub fn new(
        exchange: Arc<dyn SpotExchange>,
        valuator: Valuator,
        portfolio: &PortfolioConfig,
        trading: &TradingConfig,
    ) -> Self {
        Self {
            exchange,
            valuator,
            trade_pair: portfolio.trade_pair.clone(),
            dust_threshold: trading.dust_threshold,
        }
    }

    /// Fresh balances straight from the exchange.
    pub async fn balances(&self) -> Result<BalanceView> {
        Ok(BalanceView::from_balances(
            self.exchange.account_balances().await?,
        ))
    }

    /// Build the valued holdings list, dropping dust and unpriceable assets.
    pub async fn snapshot(&self) -> Result<PortfolioSnapshot> {
        let balances = self.exchange.account_balances().await?;
        let anchor = self.valuator.anchor().to_string();
        let anchor_price = self
            .valuator
            .value_of(Decimal::ONE, &anchor, self.valuator.stable())
            .await?;

        let mut holdings = Vec::new();
        for balance in balances {
            let total = balance.total();
            if total <= Decimal::ZERO {
                continue;
            }

            let anchor_value = self.anchor_value(&balance.asset, total).await?;
            let valuation_value = anchor_value * anchor_price;

            if valuation_value <= self.dust_threshold {
                debug!(
                    asset = %balance.asset,
                    %total,
                    %valuation_value,
                    "Ignoring dust holding"
                );
                continue;
            }

            holdings.push(Holding {
                asset: balance.asset,
                free: balance.free,
                locked: balance.locked,
                total,
                anchor_value,
                valuation_value,
            });
        }

        info!(
            holdings = holdings.len(),
            assets = ?holdings.iter().map(|h| h.asset.as_str()).collect::<Vec<_>>(),
            "Portfolio snapshot built"
        );
        Ok(PortfolioSnapshot::new(holdings))
    }

    /// Value an amount in the anchor asset.
    ///
    /// Tries the anchor pair first, then routes through the valuation currency
    /// and the trade pair. An asset with no route at all is worth zero.
    async fn anchor_value(&self, asset: &str, amount: Decimal) -> Result<Decimal> {
        let anchor = self.valuator.anchor();
        if asset == anchor {
            return Ok(amount);
        }

        let mut routes = vec![self.valuator.stable().to_string()];
        if self.trade_pair != self.valuator.stable() && self.trade_pair != anchor {
            routes.push(self.trade_pair.clone());
        }

        match self.valuator.value_of(amount, asset, anchor).await {
            Ok(value) => return Ok(value),
            Err(RebalanceError::PriceUnavailable { .. }) => {}
            Err(e) => return Err(e),
        }

        for via in routes {
            let hop = match self.valuator.value_of(amount, asset, &via).await {
                Ok(value) => value,
                Err(RebalanceError::PriceUnavailable { .. }) => continue,
                Err(e) => return Err(e),
            };
            match self.valuator.value_of(hop, &via, anchor).await {
                Ok(value) => return Ok(value),
                Err(RebalanceError::PriceUnavailable { .. }) => continue,
                Err(e) => return Err(e),
            }
        }

        debug!(%asset, "No price route, valuing at zero");
        Ok(Decimal::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::MockExchange;
    use rust_decimal_macros::dec;

    async fn setup(dust: Decimal) -> (Arc<MockExchange>, PortfolioReader) {
        let exchange = Arc::new(MockExchange::new());
        exchange.set_price("BTC", "USDT", dec!(50000)).await;
        exchange.set_price("ETH", "BTC", dec!(0.05)).await;
        exchange.set_price("ETH", "USDT", dec!(2500)).await;
        exchange.set_price("SHIB", "USDT", dec!(0.00001)).await;

        let portfolio = PortfolioConfig::default();
        let trading = TradingConfig {
            dust_threshold: dust,
            ..TradingConfig::default()
        };
        let valuator = Valuator::new(exchange.clone(), &portfolio);
        let reader = PortfolioReader::new(exchange.clone(), valuator, &portfolio, &trading);
        (exchange, reader)
    }

    #[tokio::test]
    async fn test_snapshot_values_holdings() {
        let (exchange, reader) = setup(dec!(10)).await;
        exchange.set_balance("BTC", dec!(0.1)).await;
        exchange
            .set_balance_with_locked("ETH", dec!(1), dec!(1))
            .await;
        exchange.set_balance("USDT", dec!(1000)).await;

        let snapshot = reader.snapshot().await.unwrap();

        let btc = snapshot.get("BTC").unwrap();
        assert_eq!(btc.anchor_value, dec!(0.1));
        assert_eq!(btc.valuation_value, dec!(5000));
        let eth = snapshot.get("ETH").unwrap();
        assert_eq!(eth.total, dec!(2));
        assert_eq!(eth.valuation_value, dec!(5000));
        assert_eq!(snapshot.get("USDT").unwrap().valuation_value, dec!(1000));
    }

    #[tokio::test]
    async fn test_dust_filtered_for_any_threshold() {
        for dust in [dec!(0), dec!(5), dec!(10), dec!(250)] {
            let (exchange, reader) = setup(dust).await;
            exchange.set_balance("USDT", dec!(9)).await;
            exchange.set_balance("ETH", dec!(0.1)).await; // $250
            exchange.set_balance("SHIB", dec!(1000)).await; // $0.01

            let snapshot = reader.snapshot().await.unwrap();

            for holding in snapshot.holdings() {
                assert!(holding.valuation_value > dust);
            }
            assert_eq!(snapshot.contains("USDT"), dust < dec!(9));
        }
    }

    #[tokio::test]
    async fn test_asset_without_btc_pair_routes_through_stable() {
        let (exchange, reader) = setup(dec!(0)).await;
        exchange.set_balance("SHIB", dec!(100000000)).await; // $1000

        let snapshot = reader.snapshot().await.unwrap();

        let shib = snapshot.get("SHIB").unwrap();
        assert_eq!(shib.valuation_value, dec!(1000));
    }

    #[tokio::test]
    async fn test_unpriceable_asset_excluded() {
        let (exchange, reader) = setup(dec!(0)).await;
        exchange.set_balance("DELISTED", dec!(5000)).await;
        exchange.set_balance("USDT", dec!(100)).await;

        let snapshot = reader.snapshot().await.unwrap();

        assert!(!snapshot.contains("DELISTED"));
        assert!(snapshot.contains("USDT"));
    }

    #[tokio::test]
    async fn test_without_asset_returns_new_view() {
        let (exchange, reader) = setup(dec!(10)).await;
        exchange.set_balance("BTC", dec!(0.1)).await;
        exchange.set_balance("USDT", dec!(1000)).await;

        let snapshot = reader.snapshot().await.unwrap();
        let trimmed = snapshot.without_asset("BTC");

        assert!(snapshot.contains("BTC"));
        assert!(!trimmed.contains("BTC"));
        assert_eq!(trimmed.holdings().len(), 1);
    }

    #[tokio::test]
    async fn test_balance_view_free_and_total() {
        let (exchange, reader) = setup(dec!(10)).await;
        exchange
            .set_balance_with_locked("USDT", dec!(40), dec!(60))
            .await;

        let view = reader.balances().await.unwrap();

        assert_eq!(view.free("USDT"), dec!(40));
        assert_eq!(view.total("USDT"), dec!(100));
        assert_eq!(view.free("ETH"), Decimal::ZERO);
    }
}
