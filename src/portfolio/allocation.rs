//! Budget computation and per-asset allocation gaps.

use super::snapshot::PortfolioSnapshot;
use super::valuation::Valuator;
use crate::config::{PortfolioConfig, TargetWeight, TradingConfig};
use crate::error::Result;
use rust_decimal::Decimal;
use tracing::debug;

/// Total portfolio value, derived once per cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Budget {
    /// Total in the anchor asset
    pub base_total: Decimal,
    /// Total in the valuation currency
    pub valuation_total: Decimal,
}

/// Signed difference between target and actual holding of one asset.
#[derive(Debug, Clone, PartialEq)]
pub struct AllocationGap {
    pub asset: String,
    pub target_value: Decimal,
    pub current_value: Decimal,
    /// `target_value - current_value`; positive means buy
    pub valuation_delta: Decimal,
    /// `|valuation_delta|` in asset units
    pub quantity_delta: Decimal,
}

impl AllocationGap {
    pub fn is_buy(&self) -> bool {
        self.valuation_delta > Decimal::ZERO
    }

    pub fn is_sell(&self) -> bool {
        self.valuation_delta < Decimal::ZERO
    }
}

/// Compares holdings against the configured target fractions.
#[derive(Clone)]
pub struct AllocationEngine {
    targets: Vec<TargetWeight>,
    valuator: Valuator,
    fee_asset: String,
    fee_asset_min_holding: Decimal,
    min_trade_value: Decimal,
}

impl AllocationEngine {
    pub fn new(valuator: Valuator, portfolio: &PortfolioConfig, trading: &TradingConfig) -> Self {
        Self {
            targets: portfolio.allocation.clone(),
            valuator,
            fee_asset: portfolio.fee_asset.clone(),
            fee_asset_min_holding: portfolio.fee_asset_min_holding,
            min_trade_value: trading.min_trade_value,
        }
    }

    /// Sum of all filtered holdings.
    pub fn compute_budget(&self, snapshot: &PortfolioSnapshot) -> Budget {
        snapshot.holdings().iter().fold(
            Budget {
                base_total: Decimal::ZERO,
                valuation_total: Decimal::ZERO,
            },
            |budget, h| Budget {
                base_total: budget.base_total + h.anchor_value,
                valuation_total: budget.valuation_total + h.valuation_value,
            },
        )
    }

    /// Configured fraction for an asset; unallocated assets target zero.
    pub fn target_fraction(&self, asset: &str) -> Decimal {
        self.targets
            .iter()
            .find(|t| t.asset == asset)
            .map(|t| t.fraction)
            .unwrap_or(Decimal::ZERO)
    }

    /// Gap between the target and the current value of `asset`.
    ///
    /// The fee asset's target never drops below its configured minimum holding.
    pub async fn gap(
        &self,
        asset: &str,
        current_value: Decimal,
        budget: &Budget,
    ) -> Result<AllocationGap> {
        let stable = self.valuator.stable();
        let mut target_value = budget.valuation_total * self.target_fraction(asset);

        if asset == self.fee_asset && self.fee_asset_min_holding > Decimal::ZERO {
            let floor = self
                .valuator
                .value_of(self.fee_asset_min_holding, asset, stable)
                .await?
                .ceil();
            target_value = target_value.max(floor);
        }

        let valuation_delta = target_value - current_value;
        let quantity_delta = self
            .valuator
            .value_of(valuation_delta.abs(), stable, asset)
            .await?;

        debug!(
            %asset,
            %target_value,
            %current_value,
            %valuation_delta,
            %quantity_delta,
            "Allocation gap"
        );

        Ok(AllocationGap {
            asset: asset.to_string(),
            target_value,
            current_value,
            valuation_delta,
            quantity_delta,
        })
    }

    /// Only gaps larger than the minimum trade size are worth an order.
    pub fn is_actionable(&self, gap: &AllocationGap) -> bool {
        gap.valuation_delta.abs() > self.min_trade_value
    }
}
