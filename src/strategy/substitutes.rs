//! Opportunistic allocation of leftover trade-pair funds to substitutes.

use super::dispatcher::{DispatchOutcome, OrderDispatcher, OrderIntent};
use super::funds::FundsVerifier;
use crate::config::{PortfolioConfig, SignalConfig, TradingConfig};
use crate::error::Result;
use crate::exchange::{pair_symbol, SpotExchange};
use crate::portfolio::{Budget, PortfolioSnapshot, Valuator};
use crate::signal::SignalGate;
use crate::utils::decimal::mean;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A non-core asset considered for leftover funds.
#[derive(Debug, Clone, PartialEq)]
pub struct SubstituteCandidate {
    pub asset: String,
    pub passes_signal: bool,
    pub mean_volume: Decimal,
}

/// Ranks substitutes by recent volume and buys a capped slice of each.
#[derive(Clone)]
pub struct SubstituteAllocator {
    exchange: Arc<dyn SpotExchange>,
    valuator: Valuator,
    funds: FundsVerifier,
    dispatcher: OrderDispatcher,
    substitutes: Vec<String>,
    trade_pair: String,
    valuation_currency: String,
    max_fraction: Decimal,
    min_trade_value: Decimal,
    rebuy_held: bool,
    volume_interval: String,
    volume_lookback: u16,
}

impl SubstituteAllocator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        exchange: Arc<dyn SpotExchange>,
        valuator: Valuator,
        funds: FundsVerifier,
        dispatcher: OrderDispatcher,
        portfolio: &PortfolioConfig,
        trading: &TradingConfig,
        signal: &SignalConfig,
    ) -> Self {
        Self {
            exchange,
            valuator,
            funds,
            dispatcher,
            substitutes: portfolio.substitutes.clone(),
            trade_pair: portfolio.trade_pair.clone(),
            valuation_currency: portfolio.valuation_currency.clone(),
            max_fraction: trading.max_substitute_fraction,
            min_trade_value: trading.min_trade_value,
            rebuy_held: trading.rebuy_held_substitutes,
            volume_interval: signal.volume_interval.clone(),
            volume_lookback: signal.volume_lookback,
        }
    }

    /// Mean candle volume of `asset` against the trade pair.
    async fn mean_volume(&self, asset: &str) -> Result<Decimal> {
        let symbol = pair_symbol(asset, &self.trade_pair);
        let candles = self
            .exchange
            .candles(&symbol, &self.volume_interval, self.volume_lookback)
            .await?;
        let volumes: Vec<Decimal> = candles.iter().map(|c| c.volume).collect();
        Ok(mean(&volumes))
    }

    /// Bullish substitutes, highest mean volume first.
    ///
    /// Held substitutes are left out unless re-buying is enabled. Assets whose
    /// signal or volume cannot be read are dropped for this cycle.
    pub async fn rank(
        &self,
        gate: &mut SignalGate,
        snapshot: &PortfolioSnapshot,
    ) -> Vec<SubstituteCandidate> {
        let mut candidates = Vec::new();

        for asset in &self.substitutes {
            if snapshot.contains(asset) && !self.rebuy_held {
                debug!(%asset, "Substitute already held, skipping");
                continue;
            }

            let passes_signal = match gate.is_tradeable(asset).await {
                Ok(passes) => passes,
                Err(e) => {
                    warn!(%asset, error = %e, "Skipping substitute");
                    continue;
                }
            };
            if !passes_signal {
                continue;
            }

            match self.mean_volume(asset).await {
                Ok(mean_volume) => candidates.push(SubstituteCandidate {
                    asset: asset.clone(),
                    passes_signal,
                    mean_volume,
                }),
                Err(e) => warn!(%asset, error = %e, "No volume data, skipping substitute"),
            }
        }

        candidates.sort_by(|a, b| b.mean_volume.cmp(&a.mean_volume));
        candidates
    }

    /// Spend leftover trade-pair funds on ranked substitutes.
    ///
    /// Each purchase spends at most `budget × max_fraction`, less any value of
    /// that asset already held. After every attempted purchase the remaining
    /// value drops by the whole `budget × max_fraction`, whatever was spent.
    pub async fn allocate(
        &self,
        budget: &Budget,
        gate: &mut SignalGate,
        snapshot: &PortfolioSnapshot,
    ) -> Result<Vec<DispatchOutcome>> {
        let max_order = budget.valuation_total * self.max_fraction;
        let mut remaining = self.funds.trade_pair_value().await?;
        let mut outcomes = Vec::new();

        if remaining <= self.min_trade_value || max_order <= self.min_trade_value {
            debug!(%remaining, %max_order, "No room for substitutes");
            return Ok(outcomes);
        }

        let candidates = self.rank(gate, snapshot).await;
        info!(
            %remaining,
            %max_order,
            candidates = ?candidates.iter().map(|c| c.asset.as_str()).collect::<Vec<_>>(),
            "Allocating substitutes"
        );

        for candidate in candidates {
            if remaining <= self.min_trade_value {
                break;
            }

            let held = snapshot
                .get(&candidate.asset)
                .map(|h| h.valuation_value)
                .unwrap_or(Decimal::ZERO);
            let cap = max_order - held;
            if cap <= self.min_trade_value {
                debug!(asset = %candidate.asset, %cap, "Substitute cap already filled");
                continue;
            }

            let spend = remaining.min(cap);
            match self.buy(&candidate.asset, spend).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => warn!(asset = %candidate.asset, error = %e, "Substitute buy failed"),
            }
            remaining -= max_order;
        }

        Ok(outcomes)
    }

    async fn buy(&self, asset: &str, spend: Decimal) -> Result<DispatchOutcome> {
        let quantity = self
            .valuator
            .value_of(spend, &self.valuation_currency, asset)
            .await?;
        info!(%asset, %spend, %quantity, "🔄 Buying substitute");
        self.dispatcher
            .dispatch(&OrderIntent::buy(asset, &self.trade_pair, quantity))
            .await
    }
}
