//! Credit/metered billing guard.
//!
//! The credential-authenticated counterpart of the payment gate, with the
//! same execute-then-charge discipline: confirm funding is available, run
//! the handler, and only charge for a successful response. If the charge
//! cannot land, the response body is discarded; a client is never billed
//! for nothing and never served for free.

use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use jsonwebtoken::{DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, warn};

use super::credits::CreditLedger;
use super::error::BillingError;
use super::metered::{UsageReport, UsageReporter};

/// Largest handler body the guard will buffer.
const MAX_RESULT_BYTES: usize = 16 * 1024 * 1024;

/// JWT claims injected by the auth middleware. Token issuance lives in the
/// account service, not here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // Subject (account id)
    pub exp: usize,  // Expiration time (as UTC timestamp)
    pub iat: usize,  // Issued at
}

pub fn decode_claims(token: &str, secret: &str) -> Result<Claims, BillingError> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|_| BillingError::Unauthorized)
}

/// Per-request guard for credential-authenticated clients.
pub struct CreditGuard {
    credits: Arc<CreditLedger>,
    reporter: Option<Arc<dyn UsageReporter>>,
    amount_micros: i64,
}

impl CreditGuard {
    pub fn new(
        credits: Arc<CreditLedger>,
        reporter: Option<Arc<dyn UsageReporter>>,
        amount_micros: i64,
    ) -> Self {
        Self {
            credits,
            reporter,
            amount_micros,
        }
    }

    /// Wrap one priced request for the given account.
    pub async fn handle(&self, account_id: &str, request: Request<Body>, next: Next) -> Response {
        // Funding pre-check before any work. Metered billing only counts if
        // a reporter is actually wired.
        let funding = match self.credits.funding(account_id).await {
            Ok(funding) => funding,
            Err(err) => return billing_error_response(&err),
        };
        let metered_available = funding.metered_enabled && self.reporter.is_some();
        if funding.balance_micros < self.amount_micros && !metered_available {
            return billing_error_response(&BillingError::InsufficientFunds);
        }

        let endpoint = request.uri().path().to_string();
        let response = next.run(request).await;
        let (parts, body) = response.into_parts();
        let body_bytes = match to_bytes(body, MAX_RESULT_BYTES).await {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(account = %account_id, error = %e, "Failed to buffer handler response");
                return billing_error_response(&BillingError::Internal(
                    "handler body unreadable".to_string(),
                ));
            }
        };

        // Only successful executions are billable.
        if !parts.status.is_success() {
            return Response::from_parts(parts, Body::from(body_bytes));
        }

        // First choice: the atomic conditional decrement. A race-loss here is
        // not an error, it selects the metered fallback.
        match self.credits.deduct(account_id, self.amount_micros).await {
            Ok(true) => return Response::from_parts(parts, Body::from(body_bytes)),
            Ok(false) => {}
            Err(err) => {
                error!(account = %account_id, error = %err, "Credit deduction errored");
                return billing_error_response(&err);
            }
        }

        // Metered fallback: a fresh report id per call, never deduplicated.
        if let Some(reporter) = &self.reporter {
            if funding.metered_enabled {
                let usage = UsageReport::new(account_id, &endpoint, self.amount_micros);
                match reporter.report(&usage).await {
                    Ok(()) => {
                        return Response::from_parts(parts, Body::from(body_bytes));
                    }
                    Err(err) => {
                        // Both charge paths lost after a successful execution.
                        // The cost is absorbed: billing anyway would charge
                        // for a body the client never receives.
                        warn!(
                            account = %account_id,
                            endpoint = %endpoint,
                            report_id = %usage.report_id,
                            amount_micros = self.amount_micros,
                            error = %err,
                            "Execution succeeded but neither charge path landed; discarding result"
                        );
                        return billing_error_response(&BillingError::InsufficientFunds);
                    }
                }
            }
        }

        // Balance raced away and no metered relationship: same absorption.
        warn!(
            account = %account_id,
            endpoint = %endpoint,
            amount_micros = self.amount_micros,
            "Balance consumed concurrently and no metered fallback; discarding result"
        );
        billing_error_response(&BillingError::InsufficientFunds)
    }
}

pub fn billing_error_response(err: &BillingError) -> Response {
    let status = StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = json!({
        "error": err.to_string(),
        "errorCode": err.code(),
        "charged": false,
    });
    (status, axum::Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header, encode};

    fn token(secret: &str, exp_offset_secs: i64) -> String {
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            sub: "acct-1".to_string(),
            exp: (now + exp_offset_secs) as usize,
            iat: now as usize,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn test_decode_valid_token() {
        let token = token("secret", 3600);
        let claims = decode_claims(&token, "secret").unwrap();
        assert_eq!(claims.sub, "acct-1");
    }

    #[test]
    fn test_decode_rejects_wrong_secret() {
        let token = token("secret", 3600);
        assert!(matches!(
            decode_claims(&token, "other"),
            Err(BillingError::Unauthorized)
        ));
    }

    #[test]
    fn test_decode_rejects_expired_token() {
        let token = token("secret", -3600);
        assert!(matches!(
            decode_claims(&token, "secret"),
            Err(BillingError::Unauthorized)
        ));
    }
}
