//! Billing for credential-authenticated clients, and the per-request
//! funding-strategy selection shared with the crypto-payment path.

pub mod credits;
pub mod error;
pub mod guard;
pub mod metered;
pub mod webhooks;

pub use credits::{AccountFunding, CreditLedger};
pub use error::BillingError;
pub use guard::{Claims, CreditGuard, decode_claims};
pub use metered::{HttpUsageReporter, UsageReport, UsageReporter};
pub use webhooks::{WebhookEvent, WebhookLedger};

use axum::http::HeaderMap;
use axum::http::header;

use crate::payment::types::PAYMENT_HEADER;

/// How one request intends to pay. Resolved once per request from headers;
/// the two strategies implement the same "verify funding, execute, then
/// charge" contract through different stores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FundingStrategy {
    /// Signed payment payload in `X-Payment`, settled by the facilitator
    CryptoPayment,
    /// `Authorization: Bearer` token, charged to credits or metered billing
    Credential { token: String },
    /// Neither: the 402 requirements body tells the client its options
    Unfunded,
}

impl FundingStrategy {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        if headers.contains_key(PAYMENT_HEADER) {
            return FundingStrategy::CryptoPayment;
        }

        if let Some(auth) = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()) {
            if let Some(token) = auth.strip_prefix("Bearer ") {
                return FundingStrategy::Credential {
                    token: token.to_string(),
                };
            }
        }

        FundingStrategy::Unfunded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_payment_header_wins() {
        let mut headers = HeaderMap::new();
        headers.insert(PAYMENT_HEADER, HeaderValue::from_static("abc"));
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer t"));
        assert_eq!(
            FundingStrategy::from_headers(&headers),
            FundingStrategy::CryptoPayment
        );
    }

    #[test]
    fn test_bearer_token_selects_credential() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer t1"));
        assert_eq!(
            FundingStrategy::from_headers(&headers),
            FundingStrategy::Credential {
                token: "t1".to_string()
            }
        );
    }

    #[test]
    fn test_non_bearer_auth_is_unfunded() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic xyz"));
        assert_eq!(
            FundingStrategy::from_headers(&headers),
            FundingStrategy::Unfunded
        );
    }

    #[test]
    fn test_bare_request_is_unfunded() {
        assert_eq!(
            FundingStrategy::from_headers(&HeaderMap::new()),
            FundingStrategy::Unfunded
        );
    }
}
