//! Atomic payment settlement: reserve-commit state machine, request-time
//! orchestration, and the background settlement-retry sweeper.

pub mod error;
pub mod facilitator;
pub mod ledger;
pub mod orchestrator;
pub mod signature;
pub mod state;
pub mod sweeper;
pub mod types;

#[cfg(test)]
mod integration_tests;

pub use error::PaymentError;
pub use facilitator::{HttpFacilitator, SettlementFacilitator, SettlementRequest};
pub use ledger::PaymentLedger;
pub use orchestrator::PaymentGate;
pub use state::PaymentState;
pub use sweeper::SettlementSweeper;
pub use types::{PaymentPayload, PaymentRequirements, PaymentTransaction};
