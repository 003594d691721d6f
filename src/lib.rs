//! # Spot Rebalancer
//!
//! Periodic portfolio rebalancing agent for Binance spot accounts.
//!
//! ## Architecture
//!
//! - `config`: Configuration management and validation
//! - `error`: Exchange and rebalancing error types
//! - `exchange`: Binance spot REST client and in-memory mock
//! - `portfolio`: Valuation, holdings snapshot and allocation gaps
//! - `signal`: Trend signal gate
//! - `strategy`: Funds cascade, substitutes, order dispatch and the cycle
//! - `utils`: Shared utilities and decimal arithmetic

pub mod config;
pub mod error;
pub mod exchange;
pub mod portfolio;
pub mod signal;
pub mod strategy;
pub mod utils;

pub use config::Config;
pub use error::{ExchangeError, RebalanceError};
