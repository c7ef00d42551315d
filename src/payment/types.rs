//! Payment payload and transaction record types

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;
use utoipa::ToSchema;

use super::error::PaymentError;
use super::state::PaymentState;

/// Name of the request header carrying the signed payment payload
pub const PAYMENT_HEADER: &str = "X-Payment";

/// Name of the response header carrying the settlement confirmation
pub const SETTLEMENT_HEADER: &str = "X-Settlement-Id";

/// One reserve-commit cycle. Mirrors a row of `payment_transactions_tb`.
/// API-facing views are built from this; the record itself never leaves
/// the process.
#[derive(Debug, Clone)]
pub struct PaymentTransaction {
    /// Server-generated ULID
    pub id: String,
    /// Client-supplied idempotency key, globally unique
    pub nonce: String,
    pub payer: String,
    pub receiver: String,
    pub endpoint: String,
    /// Integer micro-units of the settlement asset. Never floating point.
    pub amount_micros: i64,
    pub network: String,
    pub state: PaymentState,
    /// Signed authorization as submitted; the sweeper re-settles from it
    pub payload: PaymentPayload,
    /// Facilitator-assigned id, set on the transition into COMPLETED
    pub settlement_id: Option<String>,
    pub attempt_count: i32,
    pub last_error: Option<String>,
    /// Cached handler result; written with the EXECUTING -> SETTLING
    /// transition, visible to clients only once COMPLETED
    pub service_result: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
    pub settled_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
}

impl PaymentTransaction {
    /// Build a RESERVED candidate from a verified payload.
    ///
    /// The caller must have checked the payload amount against the configured
    /// price already; a candidate is never written with an unverified amount.
    pub fn candidate(
        payload: &PaymentPayload,
        endpoint: &str,
        amount_micros: i64,
        ttl: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Ulid::new().to_string(),
            nonce: payload.nonce.clone(),
            payer: payload.payer.clone(),
            receiver: payload.receiver.clone(),
            endpoint: endpoint.to_string(),
            amount_micros,
            network: payload.network.clone(),
            state: PaymentState::Reserved,
            payload: payload.clone(),
            settlement_id: None,
            attempt_count: 0,
            last_error: None,
            service_result: None,
            created_at: now,
            executed_at: None,
            settled_at: None,
            expires_at: now + ttl,
        }
    }
}

/// Signed payment authorization submitted by the client in `X-Payment`.
///
/// The header value is base64-encoded JSON. The amount is a string-encoded
/// integer in atomic units so that no client-side float ever touches it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PaymentPayload {
    pub payer: String,
    pub receiver: String,
    pub amount: String,
    pub network: String,
    pub nonce: String,
    /// Ed25519 public key of the payer, hex-encoded (32 bytes)
    pub public_key: String,
    /// Ed25519 signature over the canonical message, base64-encoded (64 bytes)
    pub signature: String,
}

impl PaymentPayload {
    /// Decode from the raw `X-Payment` header value.
    ///
    /// Any decoding failure is reported as malformed; the orchestrator treats
    /// it identically to a missing payment.
    pub fn from_header(value: &str) -> Result<Self, PaymentError> {
        let raw = BASE64
            .decode(value.trim())
            .map_err(|e| PaymentError::MalformedPayment(format!("invalid base64: {}", e)))?;
        serde_json::from_slice(&raw)
            .map_err(|e| PaymentError::MalformedPayment(format!("invalid json: {}", e)))
    }

    /// Encode into an `X-Payment` header value. Used by clients and tests.
    pub fn to_header(&self) -> String {
        let json = serde_json::to_vec(self).expect("payload serialization cannot fail");
        BASE64.encode(json)
    }

    /// Parse the string-encoded amount into micro-units.
    pub fn amount_micros(&self) -> Result<i64, PaymentError> {
        let amount: i64 = self
            .amount
            .parse()
            .map_err(|_| PaymentError::MalformedPayment(format!("bad amount: {}", self.amount)))?;
        if amount <= 0 {
            return Err(PaymentError::MalformedPayment(
                "amount must be positive".to_string(),
            ));
        }
        Ok(amount)
    }

    /// Canonical byte string covered by the payer's signature.
    pub fn signing_message(&self) -> Vec<u8> {
        format!(
            "{}|{}|{}|{}|{}",
            self.payer, self.receiver, self.amount, self.network, self.nonce
        )
        .into_bytes()
    }
}

/// Accepted way to pay, returned in the 402 body.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PaymentOption {
    pub network: String,
    pub pay_to: String,
    /// String-encoded integer micro-units
    #[schema(example = "1000")]
    pub amount: String,
    #[schema(example = "USDC")]
    pub asset: String,
}

/// Structured 402 response body: everything a client needs to construct and
/// submit a valid payment.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirements {
    pub error: String,
    pub error_code: String,
    pub description: String,
    pub accepts: Vec<PaymentOption>,
    /// Base URL of the settlement facilitator
    #[serde(skip_serializing_if = "Option::is_none")]
    pub facilitator: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_payload() -> PaymentPayload {
        PaymentPayload {
            payer: "0xpayer".to_string(),
            receiver: "0xreceiver".to_string(),
            amount: "1000".to_string(),
            network: "base-sepolia".to_string(),
            nonce: "abc-123".to_string(),
            public_key: "00".repeat(32),
            signature: BASE64.encode([0u8; 64]),
        }
    }

    #[test]
    fn test_header_roundtrip() {
        let payload = sample_payload();
        let header = payload.to_header();
        let decoded = PaymentPayload::from_header(&header).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn test_from_header_rejects_garbage() {
        assert!(matches!(
            PaymentPayload::from_header("not base64 at all!!"),
            Err(PaymentError::MalformedPayment(_))
        ));
        // Valid base64, invalid JSON
        let junk = BASE64.encode(b"hello world");
        assert!(matches!(
            PaymentPayload::from_header(&junk),
            Err(PaymentError::MalformedPayment(_))
        ));
    }

    #[test]
    fn test_amount_micros_parses_string_integer() {
        let payload = sample_payload();
        assert_eq!(payload.amount_micros().unwrap(), 1000);
    }

    #[test]
    fn test_amount_micros_rejects_float_and_negative() {
        let mut payload = sample_payload();
        payload.amount = "10.5".to_string();
        assert!(payload.amount_micros().is_err());

        payload.amount = "-5".to_string();
        assert!(payload.amount_micros().is_err());

        payload.amount = "0".to_string();
        assert!(payload.amount_micros().is_err());
    }

    #[test]
    fn test_signing_message_binds_all_fields() {
        let a = sample_payload();
        let mut b = sample_payload();
        b.nonce = "different".to_string();
        assert_ne!(a.signing_message(), b.signing_message());

        let mut c = sample_payload();
        c.amount = "1001".to_string();
        assert_ne!(a.signing_message(), c.signing_message());
    }

    #[test]
    fn test_candidate_starts_reserved() {
        let payload = sample_payload();
        let tx = PaymentTransaction::candidate(&payload, "/api/v1/scan", 1000, Duration::seconds(600));
        assert_eq!(tx.state, PaymentState::Reserved);
        assert_eq!(tx.nonce, "abc-123");
        assert_eq!(tx.amount_micros, 1000);
        assert!(tx.settlement_id.is_none());
        assert!(tx.service_result.is_none());
        assert!(tx.expires_at > tx.created_at);
        // ULID is 26 chars
        assert_eq!(tx.id.len(), 26);
    }
}
