//! Portfolio state and targets.
//!
//! - `valuation`: cross-asset conversion through average prices
//! - `snapshot`: dust-filtered holdings and fresh balance views
//! - `allocation`: budget and per-asset gaps against target fractions

mod allocation;
mod snapshot;
mod valuation;

pub use allocation::{AllocationEngine, AllocationGap, Budget};
pub use snapshot::{BalanceView, Holding, PortfolioReader, PortfolioSnapshot};
pub use valuation::Valuator;
