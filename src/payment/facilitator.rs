//! Settlement counterparty client.
//!
//! The facilitator is an external service with two calls: `verify` checks a
//! signed payment payload without moving funds, `settle` executes the
//! transfer. Both are consumed behind a trait so the orchestrator and the
//! sweeper never care which transport is underneath.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::FacilitatorConfig;

use super::error::PaymentError;
use super::types::PaymentPayload;

/// Request body for both `/verify` and `/settle`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementRequest {
    pub payment: PaymentPayload,
    pub network: String,
    /// String-encoded integer micro-units, mirrors the payload amount
    pub amount: String,
    pub receiver: String,
}

impl SettlementRequest {
    pub fn from_payload(payload: &PaymentPayload) -> Self {
        Self {
            payment: payload.clone(),
            network: payload.network.clone(),
            amount: payload.amount.clone(),
            receiver: payload.receiver.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyOutcome {
    pub is_valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invalid_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettleOutcome {
    pub success: bool,
    /// Facilitator-assigned settlement id, present on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
}

/// Verification and settlement interface of the external counterparty.
#[async_trait]
pub trait SettlementFacilitator: Send + Sync {
    /// Facilitator name for logging
    fn name(&self) -> &'static str;

    async fn verify(&self, request: &SettlementRequest) -> Result<VerifyOutcome, PaymentError>;

    async fn settle(&self, request: &SettlementRequest) -> Result<SettleOutcome, PaymentError>;
}

/// HTTP facilitator client with a bounded timeout and exactly one retry
/// after a short fixed delay on connection failure or counterparty 5xx.
pub struct HttpFacilitator {
    client: reqwest::Client,
    base_url: String,
    retry_delay: Duration,
}

impl HttpFacilitator {
    pub fn new(config: &FacilitatorConfig) -> Result<Self, PaymentError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| PaymentError::Internal(format!("http client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            retry_delay: Duration::from_millis(config.retry_delay_ms),
        })
    }

    /// One POST attempt. `Err` here means transient (connect error or 5xx);
    /// a 4xx is decoded as a definite counterparty answer where possible.
    async fn post_once<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        request: &SettlementRequest,
    ) -> Result<T, String> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| format!("{} unreachable: {}", url, e))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(format!("{} returned {}", url, status));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| format!("{} bad response body: {}", url, e))
    }

    async fn post_with_retry<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        request: &SettlementRequest,
    ) -> Result<T, PaymentError> {
        match self.post_once(path, request).await {
            Ok(outcome) => Ok(outcome),
            Err(first_error) => {
                tracing::warn!(
                    path = path,
                    error = %first_error,
                    "Facilitator call failed, retrying once"
                );
                tokio::time::sleep(self.retry_delay).await;
                self.post_once(path, request)
                    .await
                    .map_err(PaymentError::FacilitatorUnavailable)
            }
        }
    }
}

#[async_trait]
impl SettlementFacilitator for HttpFacilitator {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn verify(&self, request: &SettlementRequest) -> Result<VerifyOutcome, PaymentError> {
        self.post_with_retry("/verify", request).await
    }

    async fn settle(&self, request: &SettlementRequest) -> Result<SettleOutcome, PaymentError> {
        self.post_with_retry("/settle", request).await
    }
}

/// In-memory facilitator for development and tests.
///
/// Scriptable: `fail_settles(n)` makes the next n settle calls fail, after
/// which settles succeed with a deterministic settlement id.
#[cfg(any(test, feature = "mock-api"))]
pub struct MockFacilitator {
    verify_valid: std::sync::atomic::AtomicBool,
    settle_failures: std::sync::atomic::AtomicUsize,
    verify_calls: std::sync::atomic::AtomicUsize,
    settle_calls: std::sync::atomic::AtomicUsize,
}

#[cfg(any(test, feature = "mock-api"))]
impl MockFacilitator {
    pub fn new() -> Self {
        Self {
            verify_valid: std::sync::atomic::AtomicBool::new(true),
            settle_failures: std::sync::atomic::AtomicUsize::new(0),
            verify_calls: std::sync::atomic::AtomicUsize::new(0),
            settle_calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    pub fn reject_verifies(&self) {
        self.verify_valid
            .store(false, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn fail_settles(&self, n: usize) {
        self.settle_failures
            .store(n, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn verify_count(&self) -> usize {
        self.verify_calls.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub fn settle_count(&self) -> usize {
        self.settle_calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(any(test, feature = "mock-api"))]
impl Default for MockFacilitator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(any(test, feature = "mock-api"))]
#[async_trait]
impl SettlementFacilitator for MockFacilitator {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn verify(&self, _request: &SettlementRequest) -> Result<VerifyOutcome, PaymentError> {
        use std::sync::atomic::Ordering;
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        if self.verify_valid.load(Ordering::SeqCst) {
            Ok(VerifyOutcome {
                is_valid: true,
                invalid_reason: None,
            })
        } else {
            Ok(VerifyOutcome {
                is_valid: false,
                invalid_reason: Some("mock rejection".to_string()),
            })
        }
    }

    async fn settle(&self, request: &SettlementRequest) -> Result<SettleOutcome, PaymentError> {
        use std::sync::atomic::Ordering;
        self.settle_calls.fetch_add(1, Ordering::SeqCst);

        let remaining = self.settle_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.settle_failures.store(remaining - 1, Ordering::SeqCst);
            return Ok(SettleOutcome {
                success: false,
                transaction: None,
                error_reason: Some("mock settle timeout".to_string()),
            });
        }

        Ok(SettleOutcome {
            success: true,
            transaction: Some(format!("mock-settlement-{}", request.payment.nonce)),
            error_reason: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> SettlementRequest {
        let payload = PaymentPayload {
            payer: "0xpayer".to_string(),
            receiver: "0xrecv".to_string(),
            amount: "1000".to_string(),
            network: "base-sepolia".to_string(),
            nonce: "n-1".to_string(),
            public_key: "00".repeat(32),
            signature: String::new(),
        };
        SettlementRequest::from_payload(&payload)
    }

    #[test]
    fn test_wire_types_roundtrip_camel_case() {
        let outcome = VerifyOutcome {
            is_valid: false,
            invalid_reason: Some("bad sig".to_string()),
        };
        let json = serde_json::to_string(&outcome).unwrap();
        assert!(json.contains("isValid"));
        assert!(json.contains("invalidReason"));

        let settle: SettleOutcome =
            serde_json::from_str(r#"{"success":true,"transaction":"0xdead"}"#).unwrap();
        assert!(settle.success);
        assert_eq!(settle.transaction.as_deref(), Some("0xdead"));
        assert!(settle.error_reason.is_none());
    }

    #[tokio::test]
    async fn test_mock_settle_fails_then_recovers() {
        let mock = MockFacilitator::new();
        mock.fail_settles(2);

        let req = request();
        assert!(!mock.settle(&req).await.unwrap().success);
        assert!(!mock.settle(&req).await.unwrap().success);

        let third = mock.settle(&req).await.unwrap();
        assert!(third.success);
        assert_eq!(third.transaction.as_deref(), Some("mock-settlement-n-1"));
        assert_eq!(mock.settle_count(), 3);
    }

    #[tokio::test]
    async fn test_mock_verify_rejection() {
        let mock = MockFacilitator::new();
        mock.reject_verifies();
        let outcome = mock.verify(&request()).await.unwrap();
        assert!(!outcome.is_valid);
        assert_eq!(outcome.invalid_reason.as_deref(), Some("mock rejection"));
    }
}
