//! Shared application state for the gateway.

use std::sync::Arc;

use crate::billing::{CreditGuard, CreditLedger, WebhookLedger};
use crate::db::Database;
use crate::payment::{PaymentGate, PaymentLedger};

/// Shared state handed to every handler and middleware. Everything in here
/// is either immutable configuration or a store handle; cross-request
/// coordination lives in PostgreSQL, never in this struct.
pub struct AppState {
    pub db: Arc<Database>,
    pub payment_gate: Arc<PaymentGate>,
    pub credit_guard: Arc<CreditGuard>,
    pub payment_ledger: Arc<PaymentLedger>,
    pub credit_ledger: Arc<CreditLedger>,
    pub webhook_ledger: Arc<WebhookLedger>,
    pub jwt_secret: String,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<Database>,
        payment_gate: Arc<PaymentGate>,
        credit_guard: Arc<CreditGuard>,
        payment_ledger: Arc<PaymentLedger>,
        credit_ledger: Arc<CreditLedger>,
        webhook_ledger: Arc<WebhookLedger>,
        jwt_secret: String,
    ) -> Self {
        Self {
            db,
            payment_gate,
            credit_guard,
            payment_ledger,
            credit_ledger,
            webhook_ledger,
            jwt_secret,
        }
    }
}
