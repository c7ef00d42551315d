//! Settlement Orchestrator
//!
//! Wraps one priced request end-to-end: verify -> reserve -> execute ->
//! settle. The invariants this file protects:
//!
//! - settlement is attempted if and only if the service executed successfully
//! - the client receives the service result only if settlement succeeded
//! - a repeated nonce never re-executes the service

use axum::body::{Body, to_bytes};
use axum::http::{HeaderValue, Request, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use chrono::Duration as ChronoDuration;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::PriceConfig;

use super::error::PaymentError;
use super::facilitator::{SettlementFacilitator, SettlementRequest};
use super::ledger::PaymentLedger;
use super::signature::verify_authorization;
use super::state::PaymentState;
use super::types::{
    PAYMENT_HEADER, PaymentOption, PaymentPayload, PaymentRequirements, PaymentTransaction,
    SETTLEMENT_HEADER,
};

/// Largest handler body the gate will buffer for settlement caching.
const MAX_RESULT_BYTES: usize = 16 * 1024 * 1024;

/// Request-scoped settlement gate.
///
/// Constructed once at startup and shared through AppState. Holds no mutable
/// state of its own; all coordination goes through the ledger's conditional
/// writes.
pub struct PaymentGate {
    ledger: Arc<PaymentLedger>,
    facilitator: Option<Arc<dyn SettlementFacilitator>>,
    price: PriceConfig,
    reservation_ttl: ChronoDuration,
    facilitator_url: Option<String>,
}

impl PaymentGate {
    /// Build the gate. A missing facilitator is only legal when the
    /// deployment explicitly opted into development mode; this is checked
    /// here so the bypass can never be enabled by accident.
    pub fn new(
        ledger: Arc<PaymentLedger>,
        facilitator: Option<Arc<dyn SettlementFacilitator>>,
        facilitator_url: Option<String>,
        price: PriceConfig,
        reservation_ttl_secs: u64,
        development_mode: bool,
    ) -> Result<Self, PaymentError> {
        if facilitator.is_none() && !development_mode {
            return Err(PaymentError::Internal(
                "no settlement facilitator configured outside development mode".to_string(),
            ));
        }

        Ok(Self {
            ledger,
            facilitator,
            price,
            reservation_ttl: ChronoDuration::seconds(reservation_ttl_secs as i64),
            facilitator_url,
        })
    }

    /// The structured 402 body: everything a client needs to pay.
    pub fn requirements(&self, err: &PaymentError) -> PaymentRequirements {
        PaymentRequirements {
            error: err.to_string(),
            error_code: err.code().to_string(),
            description: self.price.description.clone(),
            accepts: self
                .price
                .networks
                .iter()
                .map(|n| PaymentOption {
                    network: n.network.clone(),
                    pay_to: n.pay_to.clone(),
                    amount: self.price.amount_micros.to_string(),
                    asset: self.price.asset.clone(),
                })
                .collect(),
            facilitator: self.facilitator_url.clone(),
        }
    }

    /// Handle one priced request. This is mounted as axum middleware.
    pub async fn handle(&self, request: Request<Body>, next: Next) -> Response {
        // Development bypass. `new` already refused this without the dev flag.
        let Some(facilitator) = self.facilitator.clone() else {
            warn!("Development mode: passing priced request through un-charged");
            return next.run(request).await;
        };

        // Steps 2-3: extract and locally validate the payment payload.
        let payload = match self.extract_payload(&request) {
            Ok(payload) => payload,
            Err(err) => return self.payment_required(err),
        };

        // Step 4: counterparty verification (one retry inside the client).
        let settlement_request = SettlementRequest::from_payload(&payload);
        match facilitator.verify(&settlement_request).await {
            Ok(outcome) if outcome.is_valid => {}
            Ok(outcome) => {
                let reason = outcome
                    .invalid_reason
                    .unwrap_or_else(|| "payment rejected".to_string());
                return self.payment_required(PaymentError::VerificationRejected(reason));
            }
            Err(err) => return error_response(&err),
        }

        // Step 5: idempotent reservation.
        let endpoint = request.uri().path().to_string();
        let candidate = PaymentTransaction::candidate(
            &payload,
            &endpoint,
            self.price.amount_micros,
            self.reservation_ttl,
        );
        let (record, was_created) = match self.ledger.reserve_or_fetch(&candidate).await {
            Ok(outcome) => outcome,
            Err(err) => return error_response(&err),
        };

        if !was_created {
            return self.resolve_existing(record);
        }

        // Step 6: we own the reservation; start executing.
        match self
            .ledger
            .transition(&record.id, PaymentState::Reserved, PaymentState::Executing)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                warn!(nonce = %record.nonce, "Reservation advanced by a concurrent actor");
                return error_response(&PaymentError::DuplicateInProgress);
            }
            Err(err) => return error_response(&err),
        }

        let response = next.run(request).await;
        let (parts, body) = response.into_parts();
        let body_bytes = match to_bytes(body, MAX_RESULT_BYTES).await {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(nonce = %record.nonce, error = %e, "Failed to buffer handler response");
                let _ = self
                    .ledger
                    .expire(&record.id, PaymentState::Executing, "handler body unreadable")
                    .await;
                return error_response(&PaymentError::Internal("handler body unreadable".into()));
            }
        };

        // Step 7: failed execution releases the reservation; the handler's
        // own error goes back unchanged. Settlement is never attempted.
        if !parts.status.is_success() {
            match self
                .ledger
                .expire(&record.id, PaymentState::Executing, "service execution failed")
                .await
            {
                Ok(true) => {
                    info!(nonce = %record.nonce, status = %parts.status, "Execution failed, reservation released")
                }
                Ok(false) => warn!(nonce = %record.nonce, "Expire lost CAS after failed execution"),
                Err(err) => error!(nonce = %record.nonce, error = %err, "Expire failed"),
            }
            return Response::from_parts(parts, Body::from(body_bytes));
        }

        // Step 8: execution succeeded; move to SETTLING before any money
        // moves, persisting the handler result in the same statement so a
        // crash mid-settle can still be reconciled into a replayable row.
        let cached = cache_result(&parts, &body_bytes);
        match self.ledger.begin_settlement(&record.id, &cached).await {
            Ok(true) => {}
            Ok(false) => {
                // The sweeper expired us mid-execution. The nonce is dead;
                // the client was not charged.
                warn!(nonce = %record.nonce, "Transaction expired during execution");
                return self.payment_required(PaymentError::NonceExpired);
            }
            Err(err) => return error_response(&err),
        }

        // Steps 9-10 run on a detached task: once settlement has begun, a
        // client disconnect must not abort the charge. The sweeper reconciles
        // if this process dies instead.
        let ledger = self.ledger.clone();
        let record_id = record.id.clone();
        let nonce = record.nonce.clone();
        let settle_task = tokio::spawn(async move {
            settle_and_finalize(
                &ledger,
                facilitator.as_ref(),
                &record_id,
                &nonce,
                &settlement_request,
            )
            .await
        });

        match settle_task.await {
            Ok(Ok(settlement_id)) => {
                let mut response = Response::from_parts(parts, Body::from(body_bytes));
                if let Ok(value) = HeaderValue::from_str(&settlement_id) {
                    response.headers_mut().insert(SETTLEMENT_HEADER, value);
                }
                response
            }
            Ok(Err(err)) => error_response(&err),
            Err(e) => {
                error!(error = %e, "Settlement task panicked");
                error_response(&PaymentError::Internal("settlement task failed".into()))
            }
        }
    }

    fn extract_payload(&self, request: &Request<Body>) -> Result<PaymentPayload, PaymentError> {
        let header = request
            .headers()
            .get(PAYMENT_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or(PaymentError::MissingPayment)?;

        let payload = PaymentPayload::from_header(header)?;

        // Amount must match the verified price before any row is written.
        let amount = payload.amount_micros()?;
        if amount != self.price.amount_micros {
            return Err(PaymentError::AmountMismatch {
                expected: self.price.amount_micros,
                got: amount,
            });
        }

        let network = self
            .price
            .networks
            .iter()
            .find(|n| n.network == payload.network)
            .ok_or_else(|| PaymentError::UnsupportedNetwork(payload.network.clone()))?;

        if payload.receiver != network.pay_to {
            return Err(PaymentError::ReceiverMismatch);
        }

        // Local signature check before spending a facilitator round-trip.
        verify_authorization(&payload)?;

        Ok(payload)
    }

    /// The nonce already has a row: replay, conflict, or expired.
    fn resolve_existing(&self, record: PaymentTransaction) -> Response {
        match record.state {
            PaymentState::Completed => {
                info!(nonce = %record.nonce, "Replaying completed transaction");
                replay_response(&record)
            }
            PaymentState::Expired => self.payment_required(PaymentError::NonceExpired),
            _ => {
                info!(nonce = %record.nonce, state = %record.state, "Duplicate nonce in progress");
                error_response(&PaymentError::DuplicateInProgress)
            }
        }
    }

    fn payment_required(&self, err: PaymentError) -> Response {
        let status = StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::PAYMENT_REQUIRED);
        (status, axum::Json(self.requirements(&err))).into_response()
    }
}

/// Settle a transaction in SETTLING and finalize the row. Runs on the
/// detached settle task; the sweeper has its own transactional variant.
async fn settle_and_finalize(
    ledger: &PaymentLedger,
    facilitator: &dyn SettlementFacilitator,
    record_id: &str,
    nonce: &str,
    request: &SettlementRequest,
) -> Result<String, PaymentError> {
    match facilitator.settle(request).await {
        Ok(outcome) if outcome.success => {
            let settlement_id = outcome
                .transaction
                .unwrap_or_else(|| "unidentified".to_string());
            if ledger.complete(record_id, &settlement_id).await? {
                info!(nonce = %nonce, settlement_id = %settlement_id, "Payment settled");
                Ok(settlement_id)
            } else {
                // CAS miss after a successful settle: another actor finalized
                // first. Re-read so the client still gets the recorded id.
                warn!(nonce = %nonce, "Completion lost CAS after successful settle");
                match ledger.get_by_nonce(nonce).await? {
                    Some(record) if record.state == PaymentState::Completed => Ok(record
                        .settlement_id
                        .unwrap_or_else(|| "unidentified".to_string())),
                    _ => Err(PaymentError::Internal(
                        "settled transaction not completed".to_string(),
                    )),
                }
            }
        }
        Ok(outcome) => {
            let reason = outcome
                .error_reason
                .unwrap_or_else(|| "settlement rejected".to_string());
            if !ledger.fail_settlement(record_id, &reason).await? {
                warn!(nonce = %nonce, "Fail-settlement lost CAS");
            }
            warn!(nonce = %nonce, reason = %reason, "Settlement failed, client not charged");
            Err(PaymentError::SettlementFailed(reason))
        }
        Err(err) => {
            let reason = err.to_string();
            if !ledger.fail_settlement(record_id, &reason).await? {
                warn!(nonce = %nonce, "Fail-settlement lost CAS");
            }
            warn!(nonce = %nonce, reason = %reason, "Settlement unreachable, client not charged");
            Err(PaymentError::SettlementFailed(reason))
        }
    }
}

/// Snapshot the handler response for idempotent replay. Body bytes are kept
/// base64-encoded so replays are byte-identical.
fn cache_result(parts: &axum::http::response::Parts, body: &[u8]) -> serde_json::Value {
    let content_type = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream");
    json!({
        "status": parts.status.as_u16(),
        "contentType": content_type,
        "bodyB64": BASE64.encode(body),
    })
}

/// Rebuild the cached response verbatim for a completed transaction.
fn replay_response(record: &PaymentTransaction) -> Response {
    let Some(cached) = &record.service_result else {
        error!(nonce = %record.nonce, "Completed transaction has no cached result");
        return error_response(&PaymentError::Internal("cached result missing".into()));
    };

    let status = cached
        .get("status")
        .and_then(|v| v.as_u64())
        .and_then(|s| StatusCode::from_u16(s as u16).ok())
        .unwrap_or(StatusCode::OK);
    let content_type = cached
        .get("contentType")
        .and_then(|v| v.as_str())
        .unwrap_or("application/octet-stream")
        .to_string();
    let body = cached
        .get("bodyB64")
        .and_then(|v| v.as_str())
        .and_then(|b| BASE64.decode(b).ok())
        .unwrap_or_default();

    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    if let Ok(value) = HeaderValue::from_str(&content_type) {
        response.headers_mut().insert(header::CONTENT_TYPE, value);
    }
    if let Some(settlement_id) = &record.settlement_id {
        if let Ok(value) = HeaderValue::from_str(settlement_id) {
            response.headers_mut().insert(SETTLEMENT_HEADER, value);
        }
    }
    response
}

/// Error responses outside the 402 shape. Every body states the charge
/// status; a response built here means no settlement was recorded.
pub fn error_response(err: &PaymentError) -> Response {
    let status = StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = json!({
        "error": err.to_string(),
        "errorCode": err.code(),
        "retry": err.retryable(),
        "charged": false,
    });
    (status, axum::Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NetworkConfig;
    use crate::payment::facilitator::MockFacilitator;
    use sqlx::PgPool;

    fn price() -> PriceConfig {
        PriceConfig {
            amount_micros: 1000,
            asset: "USDC".to_string(),
            description: "scan".to_string(),
            networks: vec![NetworkConfig {
                network: "base-sepolia".to_string(),
                pay_to: "0xrecv".to_string(),
            }],
        }
    }

    fn gate(facilitator: Option<Arc<dyn SettlementFacilitator>>, dev: bool) -> PaymentGate {
        // The pool is never touched by the pure-logic tests below.
        let pool = PgPool::connect_lazy("postgresql://localhost/unused").unwrap();
        PaymentGate::new(
            Arc::new(PaymentLedger::new(pool)),
            facilitator,
            Some("http://localhost:8403".to_string()),
            price(),
            600,
            dev,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_gate_refuses_silent_bypass() {
        let pool = PgPool::connect_lazy("postgresql://localhost/unused").unwrap();
        let result = PaymentGate::new(
            Arc::new(PaymentLedger::new(pool)),
            None,
            None,
            price(),
            600,
            false,
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_requirements_body_lists_networks() {
        let gate = gate(Some(Arc::new(MockFacilitator::new())), false);
        let requirements = gate.requirements(&PaymentError::MissingPayment);
        assert_eq!(requirements.error_code, "PAYMENT_REQUIRED");
        assert_eq!(requirements.accepts.len(), 1);
        assert_eq!(requirements.accepts[0].amount, "1000");
        assert_eq!(requirements.accepts[0].pay_to, "0xrecv");
        assert_eq!(
            requirements.facilitator.as_deref(),
            Some("http://localhost:8403")
        );
    }

    #[tokio::test]
    async fn test_extract_payload_checks_before_any_row() {
        let gate = gate(Some(Arc::new(MockFacilitator::new())), false);

        let payload =
            crate::payment::signature::signed_test_payload("n-1", 500, "base-sepolia", "0xrecv");
        let request = Request::builder()
            .uri("/api/v1/scan")
            .header(PAYMENT_HEADER, payload.to_header())
            .body(Body::empty())
            .unwrap();
        // Wrong amount aborts before reservation
        assert!(matches!(
            gate.extract_payload(&request),
            Err(PaymentError::AmountMismatch { expected: 1000, got: 500 })
        ));

        let payload =
            crate::payment::signature::signed_test_payload("n-1", 1000, "polygon", "0xrecv");
        let request = Request::builder()
            .uri("/api/v1/scan")
            .header(PAYMENT_HEADER, payload.to_header())
            .body(Body::empty())
            .unwrap();
        assert!(matches!(
            gate.extract_payload(&request),
            Err(PaymentError::UnsupportedNetwork(_))
        ));

        let payload =
            crate::payment::signature::signed_test_payload("n-1", 1000, "base-sepolia", "0xother");
        let request = Request::builder()
            .uri("/api/v1/scan")
            .header(PAYMENT_HEADER, payload.to_header())
            .body(Body::empty())
            .unwrap();
        assert!(matches!(
            gate.extract_payload(&request),
            Err(PaymentError::ReceiverMismatch)
        ));

        let payload =
            crate::payment::signature::signed_test_payload("n-1", 1000, "base-sepolia", "0xrecv");
        let request = Request::builder()
            .uri("/api/v1/scan")
            .header(PAYMENT_HEADER, payload.to_header())
            .body(Body::empty())
            .unwrap();
        assert!(gate.extract_payload(&request).is_ok());
    }

    #[tokio::test]
    async fn test_missing_header_is_missing_payment() {
        let gate = gate(Some(Arc::new(MockFacilitator::new())), false);
        let request = Request::builder()
            .uri("/api/v1/scan")
            .body(Body::empty())
            .unwrap();
        assert!(matches!(
            gate.extract_payload(&request),
            Err(PaymentError::MissingPayment)
        ));
    }

    #[test]
    fn test_cache_and_replay_are_byte_identical() {
        let response = Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::empty())
            .unwrap();
        let (parts, _) = response.into_parts();
        let body = br#"{"verdict":"clean"}"#;
        let cached = cache_result(&parts, body);

        let payload = PaymentPayload {
            payer: "0xpayer".to_string(),
            receiver: "0xrecv".to_string(),
            amount: "1000".to_string(),
            network: "base-sepolia".to_string(),
            nonce: "n-1".to_string(),
            public_key: "00".repeat(32),
            signature: String::new(),
        };
        let mut record = PaymentTransaction::candidate(
            &payload,
            "/api/v1/scan",
            1000,
            ChronoDuration::seconds(600),
        );
        record.state = PaymentState::Completed;
        record.settlement_id = Some("settle-9".to_string());
        record.service_result = Some(cached);

        let replayed = replay_response(&record);
        assert_eq!(replayed.status(), StatusCode::OK);
        assert_eq!(
            replayed.headers().get(SETTLEMENT_HEADER).unwrap(),
            "settle-9"
        );
        assert_eq!(
            replayed.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
    }
}
