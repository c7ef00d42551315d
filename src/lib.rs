//! tollgate - Payment-Gated API Gateway
//!
//! Exactly-once billing with at-most-one service delivery per payment:
//! a client is never charged without receiving the result, and never
//! receives the result without settlement (or a verifiable retry path).
//!
//! # Modules
//!
//! - [`config`] - YAML application configuration
//! - [`logging`] - tracing initialization (rolling file + stdout)
//! - [`db`] - PostgreSQL connection pool
//! - [`payment`] - reserve-commit state machine, orchestrator, sweeper
//! - [`billing`] - credit/metered fallback, webhook idempotency ledger
//! - [`gateway`] - HTTP router, middleware wiring, handlers

pub mod billing;
pub mod config;
pub mod db;
pub mod gateway;
pub mod logging;
pub mod payment;

// Convenient re-exports at crate root
pub use billing::{CreditGuard, CreditLedger, FundingStrategy, WebhookLedger};
pub use config::AppConfig;
pub use db::Database;
pub use payment::{
    PaymentError, PaymentGate, PaymentLedger, PaymentState, PaymentTransaction, SettlementSweeper,
};
