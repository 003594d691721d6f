//! Error types for exchange calls and rebalancing steps.

use rust_decimal::Decimal;
use thiserror::Error;

/// Binance error code for an unknown trading pair.
const INVALID_SYMBOL_CODE: i64 = -1121;

/// Failure of a single exchange call.
#[derive(Debug, Clone, Error)]
pub enum ExchangeError {
    /// Network failure or request timeout.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The exchange answered with an error body.
    #[error("exchange error {code} (HTTP {status}): {msg}")]
    Api { status: u16, code: i64, msg: String },

    /// The response could not be decoded.
    #[error("failed to decode response: {0}")]
    Decode(String),

    /// The trading pair does not exist on the venue.
    #[error("unknown symbol {0}")]
    UnknownSymbol(String),
}

impl ExchangeError {
    /// True when the exchange actively declined the request.
    pub fn is_rejection(&self) -> bool {
        matches!(self, ExchangeError::Api { .. })
    }

    pub fn is_unknown_symbol(&self) -> bool {
        match self {
            ExchangeError::UnknownSymbol(_) => true,
            ExchangeError::Api { code, .. } => *code == INVALID_SYMBOL_CODE,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for ExchangeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ExchangeError::Decode(err.to_string())
        } else {
            ExchangeError::Transport(err.to_string())
        }
    }
}

/// Failure of one rebalancing step. Always local to the asset in progress.
#[derive(Debug, Clone, Error)]
pub enum RebalanceError {
    #[error("no price path from {from} to {to}")]
    PriceUnavailable { from: String, to: String },

    #[error("insufficient funds to buy {asset}: need {required}, have {available}")]
    InsufficientFunds {
        asset: String,
        required: Decimal,
        available: Decimal,
    },

    #[error("order on {symbol} rejected: {reason}")]
    OrderRejected { symbol: String, reason: String },

    #[error("trend signal unavailable for {asset}: {reason}")]
    SignalUnavailable { asset: String, reason: String },

    #[error(transparent)]
    Transport(#[from] ExchangeError),
}

impl RebalanceError {
    pub fn price_unavailable(from: &str, to: &str) -> Self {
        RebalanceError::PriceUnavailable {
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, RebalanceError>;
