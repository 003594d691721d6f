//! One full rebalancing pass.
//!
//! Steps run strictly in sequence and every decision reads fresh balances.
//! A failure in one asset's step is recorded and the pass moves on.

use super::dispatcher::{DispatchOutcome, OrderDispatcher, OrderIntent};
use super::funds::FundsVerifier;
use super::substitutes::SubstituteAllocator;
use crate::config::{Config, PortfolioConfig, TradingConfig};
use crate::error::{RebalanceError, Result};
use crate::exchange::SpotExchange;
use crate::portfolio::{
    AllocationEngine, AllocationGap, Budget, PortfolioReader, PortfolioSnapshot, Valuator,
};
use crate::signal::{SignalGate, TrendSignal};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A step that failed for one asset.
#[derive(Debug, Clone)]
pub struct StepFailure {
    pub asset: String,
    pub error: RebalanceError,
}

/// Summary of one pass.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub cancelled_orders: usize,
    pub budget: Option<Budget>,
    /// Budget was at or below the minimum trade size
    pub underfunded: bool,
    pub orders: Vec<DispatchOutcome>,
    pub failures: Vec<StepFailure>,
}

impl CycleReport {
    fn new() -> Self {
        Self {
            started_at: Utc::now(),
            finished_at: None,
            cancelled_orders: 0,
            budget: None,
            underfunded: false,
            orders: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub fn placed_count(&self) -> usize {
        self.orders.iter().filter(|o| o.is_placed()).count()
    }

    fn record(&mut self, asset: &str, result: Result<DispatchOutcome>) {
        match result {
            Ok(outcome) => self.orders.push(outcome),
            Err(error) => self.fail(asset, error),
        }
    }

    fn fail(&mut self, asset: &str, error: RebalanceError) {
        warn!(%asset, %error, "Step failed, continuing with next asset");
        self.failures.push(StepFailure {
            asset: asset.to_string(),
            error,
        });
    }
}

/// Read-only view of where the portfolio stands.
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub snapshot: PortfolioSnapshot,
    pub budget: Budget,
    pub gaps: Vec<AllocationGap>,
}

/// Drives the per-cycle pipeline against one exchange account.
pub struct RebalanceCycle {
    exchange: Arc<dyn SpotExchange>,
    portfolio: PortfolioConfig,
    trading: TradingConfig,
    valuator: Valuator,
    reader: PortfolioReader,
    engine: AllocationEngine,
    gate: SignalGate,
    dispatcher: OrderDispatcher,
    funds: FundsVerifier,
    substitutes: SubstituteAllocator,
}

impl RebalanceCycle {
    pub fn new(
        exchange: Arc<dyn SpotExchange>,
        signal: Arc<dyn TrendSignal>,
        config: &Config,
    ) -> Self {
        let portfolio = &config.portfolio;
        let trading = &config.trading;

        let valuator = Valuator::new(exchange.clone(), portfolio);
        let reader = PortfolioReader::new(exchange.clone(), valuator.clone(), portfolio, trading);
        let engine = AllocationEngine::new(valuator.clone(), portfolio, trading);
        let gate = SignalGate::new(signal, &portfolio.trade_pair);
        let dispatcher = OrderDispatcher::new(exchange.clone(), config.execution.clone());
        let funds = FundsVerifier::new(
            reader.clone(),
            valuator.clone(),
            dispatcher.clone(),
            portfolio,
            trading,
        );
        let substitutes = SubstituteAllocator::new(
            exchange.clone(),
            valuator.clone(),
            funds.clone(),
            dispatcher.clone(),
            portfolio,
            trading,
            &config.signal,
        );

        Self {
            exchange,
            portfolio: portfolio.clone(),
            trading: trading.clone(),
            valuator,
            reader,
            engine,
            gate,
            dispatcher,
            funds,
            substitutes,
        }
    }

    /// Run one pass. Only a failure to read the account aborts it.
    pub async fn run_cycle(&mut self) -> Result<CycleReport> {
        let mut report = CycleReport::new();
        self.gate.reset();

        report.cancelled_orders = self.cancel_stale_orders().await?;

        let snapshot = self.reader.snapshot().await?;
        let budget = self.engine.compute_budget(&snapshot);
        report.budget = Some(budget);
        info!(
            base_total = %budget.base_total,
            valuation_total = %budget.valuation_total,
            anchor = %self.portfolio.anchor_asset,
            currency = %self.portfolio.valuation_currency,
            "💰 Budget"
        );

        if budget.valuation_total <= self.trading.min_trade_value {
            info!(
                total = %budget.valuation_total,
                min = %self.trading.min_trade_value,
                "Need more funds in the account, skipping cycle"
            );
            report.underfunded = true;
            report.finished_at = Some(Utc::now());
            return Ok(report);
        }

        let working = self.exit_bearish_substitutes(&snapshot, &mut report).await;

        if self.portfolio.fee_floor_enabled() {
            self.top_up_fee_asset(&working, &mut report).await;
        }

        self.trade_core_allocations(&budget, &working, &mut report)
            .await;

        match self
            .substitutes
            .allocate(&budget, &mut self.gate, &working)
            .await
        {
            Ok(outcomes) => report.orders.extend(outcomes),
            Err(e) => report.fail("substitutes", e),
        }

        report.finished_at = Some(Utc::now());
        info!(
            orders = report.orders.len(),
            placed = report.placed_count(),
            failures = report.failures.len(),
            "🏁 Cycle complete"
        );
        Ok(report)
    }

    /// Snapshot, budget and per-asset gaps without trading.
    pub async fn status(&self) -> Result<StatusReport> {
        let snapshot = self.reader.snapshot().await?;
        let budget = self.engine.compute_budget(&snapshot);

        let mut gaps = Vec::new();
        for target in &self.portfolio.allocation {
            let current = snapshot
                .get(&target.asset)
                .map(|h| h.valuation_value)
                .unwrap_or(Decimal::ZERO);
            match self.engine.gap(&target.asset, current, &budget).await {
                Ok(gap) => gaps.push(gap),
                Err(e) => warn!(asset = %target.asset, error = %e, "Could not compute gap"),
            }
        }

        Ok(StatusReport {
            snapshot,
            budget,
            gaps,
        })
    }

    /// Cancel every open order so no funds stay locked into the pass.
    async fn cancel_stale_orders(&self) -> Result<usize> {
        let orders = self.exchange.open_orders().await?;
        if orders.is_empty() {
            return Ok(0);
        }
        if self.dispatcher.is_dry_run() {
            info!(count = orders.len(), "Dry run, leaving open orders in place");
            return Ok(0);
        }

        let mut cancelled = 0;
        for order in orders {
            match self
                .exchange
                .cancel_order(&order.symbol, order.order_id)
                .await
            {
                Ok(()) => {
                    debug!(symbol = %order.symbol, order_id = order.order_id, "Cancelled stale order");
                    cancelled += 1;
                }
                Err(e) => warn!(
                    symbol = %order.symbol,
                    order_id = order.order_id,
                    error = %e,
                    "Failed to cancel order"
                ),
            }
        }
        info!(cancelled, "Stale orders cancelled");
        Ok(cancelled)
    }

    /// Sell held substitutes whose trend turned, returning the reduced view.
    async fn exit_bearish_substitutes(
        &mut self,
        snapshot: &PortfolioSnapshot,
        report: &mut CycleReport,
    ) -> PortfolioSnapshot {
        let mut working = snapshot.clone();
        let held: Vec<String> = self
            .funds
            .substitute_holdings(snapshot)
            .iter()
            .map(|h| h.asset.clone())
            .collect();

        for asset in held {
            match self.gate.is_tradeable(&asset).await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => {
                    report.fail(&asset, e);
                    continue;
                }
            }

            info!(%asset, "📉 Substitute turned bearish, selling");
            let result = self.sell_all(&asset).await;
            report.record(&asset, result);
            working = working.without_asset(&asset);
        }

        if working.holdings().len() != snapshot.holdings().len() {
            info!(
                assets = ?working.holdings().iter().map(|h| h.asset.as_str()).collect::<Vec<_>>(),
                "Updated holdings"
            );
        }
        working
    }

    /// Buy whole units of the fee asset up to its minimum holding.
    async fn top_up_fee_asset(&self, working: &PortfolioSnapshot, report: &mut CycleReport) {
        let asset = &self.portfolio.fee_asset;
        let balance = match self.reader.balances().await {
            Ok(view) => view.total(asset),
            Err(e) => return report.fail(asset, e),
        };

        let short = (self.portfolio.fee_asset_min_holding - balance).ceil();
        if short <= Decimal::ZERO {
            return;
        }

        info!(%asset, %short, %balance, "Short of minimum fee asset holding, buying");
        let result = self.funds.buy(short, asset, working, true).await;
        report.record(asset, result);
    }

    async fn trade_core_allocations(
        &mut self,
        budget: &Budget,
        working: &PortfolioSnapshot,
        report: &mut CycleReport,
    ) {
        let targets = self.portfolio.allocation.clone();
        for target in targets {
            let asset = target.asset.as_str();
            if asset == self.portfolio.trade_pair {
                debug!(%asset, "Trade pair is held as cash");
                continue;
            }
            if let Err(e) = self.trade_core_asset(asset, budget, working, report).await {
                report.fail(asset, e);
            }
        }
    }

    async fn trade_core_asset(
        &mut self,
        asset: &str,
        budget: &Budget,
        working: &PortfolioSnapshot,
        report: &mut CycleReport,
    ) -> Result<()> {
        let balances = self.reader.balances().await?;
        let total = balances.total(asset);
        let current_value = self
            .valuator
            .value_of(total, asset, &self.portfolio.valuation_currency)
            .await?;

        if !self.gate.is_tradeable(asset).await? {
            let floor_held =
                asset == self.portfolio.fee_asset && self.portfolio.fee_floor_enabled();
            if current_value > self.trading.min_trade_value && !floor_held {
                info!(%asset, %current_value, "📉 Bearish, selling holding");
                let result = self.sell_all(asset).await;
                report.record(asset, result);
            } else {
                debug!(%asset, "Bearish, nothing to sell");
            }
            return Ok(());
        }

        let gap = self.engine.gap(asset, current_value, budget).await?;
        if !self.engine.is_actionable(&gap) {
            debug!(%asset, delta = %gap.valuation_delta, "Within threshold, no trade");
            return Ok(());
        }

        if gap.is_buy() {
            info!(%asset, delta = %gap.valuation_delta, quantity = %gap.quantity_delta, "📈 Under target, buying");
            let floor_applies =
                asset == self.portfolio.fee_asset && self.portfolio.fee_floor_enabled();
            let result = self
                .funds
                .buy(gap.quantity_delta, asset, working, floor_applies)
                .await;
            report.record(asset, result);
        } else if self.trading.take_profit {
            info!(%asset, delta = %gap.valuation_delta, quantity = %gap.quantity_delta, "Over target, taking profit");
            let intent = OrderIntent::sell(asset, &self.portfolio.trade_pair, gap.quantity_delta);
            let result = self.dispatcher.dispatch(&intent).await;
            report.record(asset, result);
        } else {
            debug!(%asset, delta = %gap.valuation_delta, "Over target, take profit disabled");
        }
        Ok(())
    }

    /// Market-sell the whole free balance of an asset.
    async fn sell_all(&self, asset: &str) -> Result<DispatchOutcome> {
        let free = self.reader.balances().await?.free(asset);
        self.dispatcher
            .dispatch(&OrderIntent::sell(asset, &self.portfolio.trade_pair, free))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TargetWeight;
    use crate::exchange::{MockExchange, NewOrder, OrderSide};
    use crate::signal::StaticSignal;
    use rust_decimal_macros::dec;

    async fn setup(
        allocation: &[(&str, Decimal)],
        bearish: &[&str],
        tweak: impl FnOnce(&mut Config),
    ) -> (Arc<MockExchange>, RebalanceCycle) {
        let exchange = Arc::new(MockExchange::new());
        exchange.set_price("BTC", "USDT", dec!(50000)).await;
        exchange.set_price("ETH", "USDT", dec!(2000)).await;
        exchange.set_price("ADA", "USDT", dec!(0.5)).await;
        exchange.set_price("BNB", "USDT", dec!(250)).await;

        let mut config = Config::default();
        config.portfolio.allocation = allocation
            .iter()
            .map(|(asset, fraction)| TargetWeight {
                asset: asset.to_string(),
                fraction: *fraction,
            })
            .collect();
        config.trading.min_trade_value = dec!(10);
        config.execution.dry_run = false;
        config.signal.bearish = bearish.iter().map(|s| s.to_string()).collect();
        tweak(&mut config);

        let signal = Arc::new(StaticSignal::from_config(
            &config.signal,
            &config.portfolio.trade_pair,
        ));
        let cycle = RebalanceCycle::new(exchange.clone(), signal, &config);
        (exchange, cycle)
    }

    async fn hold_balanced(exchange: &MockExchange) {
        exchange.set_balance("BTC", dec!(0.1)).await; // $5000
        exchange.set_balance("ETH", dec!(1.5)).await; // $3000
        exchange.set_balance("ADA", dec!(4000)).await; // $2000
    }

    fn balanced() -> [(&'static str, Decimal); 3] {
        [("BTC", dec!(0.5)), ("ETH", dec!(0.3)), ("ADA", dec!(0.2))]
    }

    fn sides(log: &[NewOrder]) -> Vec<(String, OrderSide)> {
        log.iter().map(|o| (o.symbol.clone(), o.side)).collect()
    }

    #[tokio::test]
    async fn test_balanced_portfolio_issues_no_orders() {
        let (exchange, mut cycle) = setup(&balanced(), &[], |_| {}).await;
        hold_balanced(&exchange).await;

        let report = cycle.run_cycle().await.unwrap();

        assert_eq!(report.budget.unwrap().valuation_total, dec!(10000));
        assert!(report.orders.is_empty());
        assert!(report.failures.is_empty());
        assert!(exchange.order_log().await.is_empty());
    }

    #[tokio::test]
    async fn test_stale_orders_cancelled_first() {
        let (exchange, mut cycle) = setup(&balanced(), &[], |_| {}).await;
        hold_balanced(&exchange).await;
        let id = exchange.add_open_order("ETHUSDT", dec!(1900), dec!(1)).await;

        let report = cycle.run_cycle().await.unwrap();

        assert_eq!(report.cancelled_orders, 1);
        assert_eq!(exchange.cancelled_orders().await, vec![id]);
    }

    #[tokio::test]
    async fn test_dry_run_leaves_open_orders() {
        let (exchange, mut cycle) = setup(&balanced(), &[], |c| {
            c.execution.dry_run = true;
        })
        .await;
        hold_balanced(&exchange).await;
        exchange.add_open_order("ETHUSDT", dec!(1900), dec!(1)).await;

        let report = cycle.run_cycle().await.unwrap();

        assert_eq!(report.cancelled_orders, 0);
        assert!(exchange.cancelled_orders().await.is_empty());
        assert_eq!(exchange.open_orders().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_underfunded_account_skips_cycle() {
        let (exchange, mut cycle) = setup(&balanced(), &[], |c| {
            c.trading.min_trade_value = dec!(50);
        })
        .await;
        exchange.set_balance("USDT", dec!(40)).await;

        let report = cycle.run_cycle().await.unwrap();

        assert!(report.underfunded);
        assert!(exchange.order_log().await.is_empty());
    }

    #[tokio::test]
    async fn test_bearish_core_asset_sold_in_full() {
        let (exchange, mut cycle) = setup(&balanced(), &["ETH"], |_| {}).await;
        hold_balanced(&exchange).await;

        cycle.run_cycle().await.unwrap();

        let log = exchange.order_log().await;
        assert_eq!(sides(&log), vec![("ETHUSDT".to_string(), OrderSide::Sell)]);
        assert_eq!(log[0].quantity, dec!(1.5));
        assert_eq!(exchange.balance_of("ETH").await, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_over_target_sold_only_with_take_profit() {
        let allocation = [("BTC", dec!(0.4)), ("ETH", dec!(0.3)), ("ADA", dec!(0.2))];

        let (exchange, mut cycle) = setup(&allocation, &[], |_| {}).await;
        hold_balanced(&exchange).await;
        cycle.run_cycle().await.unwrap();
        let log = exchange.order_log().await;
        assert_eq!(sides(&log), vec![("BTCUSDT".to_string(), OrderSide::Sell)]);
        // $1000 over target at $50000
        assert_eq!(log[0].quantity, dec!(0.02));

        let (exchange, mut cycle) = setup(&allocation, &[], |c| {
            c.trading.take_profit = false;
        })
        .await;
        hold_balanced(&exchange).await;
        cycle.run_cycle().await.unwrap();
        assert!(exchange.order_log().await.is_empty());
    }

    #[tokio::test]
    async fn test_bearish_substitute_exited_before_core() {
        let (exchange, mut cycle) = setup(&balanced(), &["ENJ"], |c| {
            c.trading.min_trade_value = dec!(200);
        })
        .await;
        hold_balanced(&exchange).await;
        exchange.set_price("ENJ", "USDT", dec!(1)).await;
        exchange.set_balance("ENJ", dec!(300)).await;

        let report = cycle.run_cycle().await.unwrap();

        let log = exchange.order_log().await;
        assert_eq!(sides(&log), vec![("ENJUSDT".to_string(), OrderSide::Sell)]);
        assert_eq!(exchange.balance_of("ENJ").await, Decimal::ZERO);
        assert_eq!(report.placed_count(), 1);
    }

    #[tokio::test]
    async fn test_fee_asset_topped_up_to_minimum() {
        let (exchange, mut cycle) = setup(&balanced(), &[], |c| {
            c.portfolio.fee_asset_min_holding = dec!(2);
        })
        .await;
        hold_balanced(&exchange).await;
        exchange.set_balance("BNB", dec!(0.5)).await;
        exchange.set_balance("USDT", dec!(1000)).await;

        cycle.run_cycle().await.unwrap();

        let log = exchange.order_log().await;
        assert_eq!(log[0].symbol, "BNBUSDT");
        assert_eq!(log[0].side, OrderSide::Buy);
        // ceil(2 - 0.5) = 2, less the fee buffer
        assert_eq!(log[0].quantity, dec!(1.9989));
    }

    #[tokio::test]
    async fn test_unpriceable_core_asset_does_not_stop_cycle() {
        let allocation = [("BTC", dec!(0.4)), ("DOGE", dec!(0.1)), ("ETH", dec!(0.3))];
        let (exchange, mut cycle) = setup(&allocation, &[], |_| {}).await;
        exchange.set_balance("BTC", dec!(0.1)).await; // $5000, target $4000
        exchange.set_balance("ETH", dec!(1.5)).await; // $3000, on target
        exchange.set_balance("ADA", dec!(4000)).await; // $2000 substitute holding

        let report = cycle.run_cycle().await.unwrap();

        assert!(report.failures.iter().any(|f| f.asset == "DOGE"));
        assert!(exchange
            .order_log()
            .await
            .iter()
            .any(|o| o.symbol == "BTCUSDT" && o.side == OrderSide::Sell));
    }

    #[tokio::test]
    async fn test_status_reports_gaps_without_trading() {
        let (exchange, cycle) = setup(&balanced(), &[], |_| {}).await;
        exchange.set_balance("BTC", dec!(0.1)).await;
        exchange.set_balance("USDT", dec!(5000)).await;

        let status = cycle.status().await.unwrap();

        assert_eq!(status.budget.valuation_total, dec!(10000));
        assert_eq!(status.gaps.len(), 3);
        assert_eq!(status.gaps[1].asset, "ETH");
        assert_eq!(status.gaps[1].valuation_delta, dec!(3000));
        assert!(exchange.order_log().await.is_empty());
    }
}
