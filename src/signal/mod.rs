//! Trend signal gate.
//!
//! The trend provider itself is external; the gate only asks it whether a
//! pair is bullish and remembers the answer for the rest of the cycle so one
//! decision chain never sees conflicting answers for the same asset.

use crate::config::SignalConfig;
use crate::error::{RebalanceError, Result};
use crate::exchange::pair_symbol;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// External trend-signal provider.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TrendSignal: Send + Sync {
    /// Whether `pair_symbol` (e.g. "ETHUSDT") is currently in a bullish regime.
    async fn is_bullish(&self, pair_symbol: &str) -> anyhow::Result<bool>;
}

/// Provider answering from configuration: every pair gets the default answer
/// except the explicitly bearish assets.
#[derive(Debug, Clone)]
pub struct StaticSignal {
    default_bullish: bool,
    bearish: HashSet<String>,
}

impl StaticSignal {
    pub fn from_config(config: &SignalConfig, trade_pair: &str) -> Self {
        Self {
            default_bullish: config.default_bullish,
            bearish: config
                .bearish
                .iter()
                .map(|asset| pair_symbol(asset, trade_pair))
                .collect(),
        }
    }
}

#[async_trait]
impl TrendSignal for StaticSignal {
    async fn is_bullish(&self, pair_symbol: &str) -> anyhow::Result<bool> {
        Ok(self.default_bullish && !self.bearish.contains(pair_symbol))
    }
}

/// Per-cycle memoizing wrapper around a [`TrendSignal`].
pub struct SignalGate {
    provider: Arc<dyn TrendSignal>,
    trade_pair: String,
    cache: HashMap<String, bool>,
}

impl SignalGate {
    pub fn new(provider: Arc<dyn TrendSignal>, trade_pair: &str) -> Self {
        Self {
            provider,
            trade_pair: trade_pair.to_string(),
            cache: HashMap::new(),
        }
    }

    /// Whether `asset` may be bought this cycle.
    ///
    /// Provider failures are returned as `SignalUnavailable` and not cached,
    /// so callers skip the asset instead of treating it as bearish.
    pub async fn is_tradeable(&mut self, asset: &str) -> Result<bool> {
        if let Some(&answer) = self.cache.get(asset) {
            return Ok(answer);
        }

        let symbol = pair_symbol(asset, &self.trade_pair);
        let answer = self.provider.is_bullish(&symbol).await.map_err(|e| {
            RebalanceError::SignalUnavailable {
                asset: asset.to_string(),
                reason: e.to_string(),
            }
        })?;

        debug!(%asset, %symbol, bullish = answer, "Trend signal");
        self.cache.insert(asset.to_string(), answer);
        Ok(answer)
    }

    /// Forget all answers; called at the start of every cycle.
    pub fn reset(&mut self) {
        self.cache.clear();
    }
}
