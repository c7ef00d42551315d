//! Gateway API envelope and response data types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::payment::types::PaymentTransaction;

/// Uniform API envelope for the gateway's own endpoints. Priced-route
/// responses are the protected handler's own bytes and do not use this.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    /// Response code: 0 for success, non-zero for errors
    pub code: i32,
    /// Response message
    pub msg: String,
    /// Response data (only present when code == 0)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    /// Create success response
    pub fn success(data: T) -> Self {
        Self {
            code: 0,
            msg: "ok".to_string(),
            data: Some(data),
        }
    }

    /// Create error response
    pub fn error(code: i32, msg: impl Into<String>) -> ApiResponse<()> {
        ApiResponse {
            code,
            msg: msg.into(),
            data: None,
        }
    }
}

pub mod error_codes {
    // Success
    pub const SUCCESS: i32 = 0;

    // Client errors (1xxx)
    pub const INVALID_PARAMETER: i32 = 1001;
    pub const INSUFFICIENT_FUNDS: i32 = 1002;

    // Auth errors (2xxx)
    pub const MISSING_AUTH: i32 = 2001;
    pub const AUTH_FAILED: i32 = 2002;

    // Resource errors (4xxx)
    pub const PAYMENT_NOT_FOUND: i32 = 4001;

    // Server errors (5xxx)
    pub const INTERNAL_ERROR: i32 = 5000;
    pub const SERVICE_UNAVAILABLE: i32 = 5001;
}

/// Health check response data
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthData {
    #[schema(example = "ok")]
    pub status: String,
    #[schema(example = "up")]
    pub database: String,
    pub version: String,
}

/// Operator/client view of a payment transaction.
///
/// The cached result stays private until COMPLETED; this view never carries
/// it at all. Replay goes through the priced route itself.
#[derive(Debug, Serialize, ToSchema)]
pub struct PaymentStatusData {
    pub nonce: String,
    #[schema(example = "COMPLETED")]
    pub state: String,
    pub endpoint: String,
    #[schema(example = 1000)]
    pub amount_micros: i64,
    pub network: String,
    pub attempt_count: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settlement_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settled_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
}

impl From<&PaymentTransaction> for PaymentStatusData {
    fn from(tx: &PaymentTransaction) -> Self {
        Self {
            nonce: tx.nonce.clone(),
            state: tx.state.to_string(),
            endpoint: tx.endpoint.clone(),
            amount_micros: tx.amount_micros,
            network: tx.network.clone(),
            attempt_count: tx.attempt_count,
            settlement_id: tx.settlement_id.clone(),
            last_error: tx.last_error.clone(),
            created_at: tx.created_at,
            settled_at: tx.settled_at,
            expires_at: tx.expires_at,
        }
    }
}

/// Credit balance response data
#[derive(Debug, Serialize, ToSchema)]
pub struct BalanceData {
    pub account_id: String,
    #[schema(example = 250000)]
    pub balance_micros: i64,
    pub metered_enabled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payment::state::PaymentState;
    use crate::payment::types::PaymentPayload;

    #[test]
    fn test_envelope_success_and_error() {
        let ok = ApiResponse::success(42);
        assert_eq!(ok.code, 0);
        assert_eq!(ok.data, Some(42));

        let err = ApiResponse::<()>::error(error_codes::INVALID_PARAMETER, "bad");
        assert_eq!(err.code, 1001);
        assert!(err.data.is_none());
        let json = serde_json::to_string(&err).unwrap();
        assert!(!json.contains("data"), "error envelope omits data");
    }

    #[test]
    fn test_status_view_never_carries_result_or_payload() {
        let payload = PaymentPayload {
            payer: "0xpayer".to_string(),
            receiver: "0xrecv".to_string(),
            amount: "1000".to_string(),
            network: "base-sepolia".to_string(),
            nonce: "n-1".to_string(),
            public_key: "00".repeat(32),
            signature: "sig".to_string(),
        };
        let mut tx = PaymentTransaction::candidate(
            &payload,
            "/api/v1/scan",
            1000,
            chrono::Duration::seconds(600),
        );
        tx.state = PaymentState::Completed;
        tx.service_result = Some(serde_json::json!({"bodyB64": "c2VjcmV0"}));

        let view = PaymentStatusData::from(&tx);
        let json = serde_json::to_string(&view).unwrap();
        assert!(!json.contains("c2VjcmV0"));
        assert!(!json.contains("signature"));
        assert!(json.contains("COMPLETED"));
    }
}
