//! Cross-asset valuation through the exchange's average-price oracle.

use crate::config::PortfolioConfig;
use crate::error::{RebalanceError, Result};
use crate::exchange::{pair_symbol, SpotExchange};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::trace;

/// Converts amounts between assets at the current average price.
#[derive(Clone)]
pub struct Valuator {
    exchange: Arc<dyn SpotExchange>,
    /// Stable valuation currency (e.g. "USDT")
    stable: String,
    /// Major asset quoted against most others (e.g. "BTC")
    anchor: String,
}

impl Valuator {
    pub fn new(exchange: Arc<dyn SpotExchange>, portfolio: &PortfolioConfig) -> Self {
        Self {
            exchange,
            stable: portfolio.valuation_currency.clone(),
            anchor: portfolio.anchor_asset.clone(),
        }
    }

    /// Average price of `base` quoted in `quote`.
    ///
    /// Unknown pairs and non-positive quotes are `PriceUnavailable`; network
    /// failures stay transport errors.
    pub async fn price(&self, base: &str, quote: &str) -> Result<Decimal> {
        let symbol = pair_symbol(base, quote);
        match self.exchange.avg_price(&symbol).await {
            Ok(price) if price > Decimal::ZERO => Ok(price),
            Ok(_) => Err(RebalanceError::price_unavailable(base, quote)),
            Err(e) if e.is_unknown_symbol() => Err(RebalanceError::price_unavailable(base, quote)),
            Err(e) => Err(e.into()),
        }
    }

    /// Value of `amount` units of `from` expressed in `to`.
    ///
    /// Quotes sourced from the stable currency, or from the anchor towards a
    /// non-stable asset, are inverted from the `to`+`from` pair because the
    /// reverse pair usually does not exist.
    pub async fn value_of(&self, amount: Decimal, from: &str, to: &str) -> Result<Decimal> {
        if from == to || amount.is_zero() {
            return Ok(amount);
        }

        let value = if from == self.stable || (from == self.anchor && to != self.stable) {
            amount / self.price(to, from).await?
        } else {
            self.price(from, to).await? * amount
        };

        trace!(%amount, %from, %to, %value, "Valued");
        Ok(value)
    }

    pub fn stable(&self) -> &str {
        &self.stable
    }

    pub fn anchor(&self) -> &str {
        &self.anchor
    }
}
