//! Rebalancing strategy.
//!
//! Contains the core logic for:
//! - Quantizing orders to lot and tick sizes
//! - Dispatching orders with a bounded retry
//! - Verifying funds and liquidating holdings to cover buys
//! - Allocating leftover funds to substitute assets
//! - Running a full rebalancing cycle

mod cycle;
mod dispatcher;
mod funds;
mod quantizer;
mod substitutes;

pub use cycle::{CycleReport, RebalanceCycle, StatusReport, StepFailure};
pub use dispatcher::{DispatchOutcome, OrderDispatcher, OrderIntent};
pub use funds::{CascadeOutcome, FundsDecision, FundsVerifier};
pub use quantizer::{limit_price, quantize};
pub use substitutes::{SubstituteAllocator, SubstituteCandidate};
