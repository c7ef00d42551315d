//! Payment Error Types

use thiserror::Error;

/// Payment error taxonomy
///
/// Error codes are stable strings used in API responses; the HTTP status
/// mapping encodes the charge-status contract: every 402/409/503 response
/// means "you have not been charged".
#[derive(Error, Debug, Clone)]
pub enum PaymentError {
    // === Client input errors ===
    #[error("Payment required")]
    MissingPayment,

    #[error("Malformed payment payload: {0}")]
    MalformedPayment(String),

    #[error("Payment amount mismatch: expected {expected}, got {got}")]
    AmountMismatch { expected: i64, got: i64 },

    #[error("Unsupported settlement network: {0}")]
    UnsupportedNetwork(String),

    #[error("Payment receiver does not match configured address")]
    ReceiverMismatch,

    // === Verification failures ===
    #[error("Payment authorization signature is invalid")]
    InvalidSignature,

    #[error("Facilitator rejected payment: {0}")]
    VerificationRejected(String),

    // === Concurrency conflicts ===
    #[error("Payment with this nonce is already in progress")]
    DuplicateInProgress,

    #[error("Nonce expired, submit a new payment")]
    NonceExpired,

    // === Settlement failures ===
    #[error("Settlement failed: {0}")]
    SettlementFailed(String),

    #[error("Facilitator unreachable: {0}")]
    FacilitatorUnavailable(String),

    // === Infrastructure errors ===
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Transaction not found: {0}")]
    NotFound(String),
}

impl PaymentError {
    /// Get the error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            PaymentError::MissingPayment => "PAYMENT_REQUIRED",
            PaymentError::MalformedPayment(_) => "MALFORMED_PAYMENT",
            PaymentError::AmountMismatch { .. } => "AMOUNT_MISMATCH",
            PaymentError::UnsupportedNetwork(_) => "UNSUPPORTED_NETWORK",
            PaymentError::ReceiverMismatch => "RECEIVER_MISMATCH",
            PaymentError::InvalidSignature => "INVALID_SIGNATURE",
            PaymentError::VerificationRejected(_) => "VERIFICATION_REJECTED",
            PaymentError::DuplicateInProgress => "DUPLICATE_IN_PROGRESS",
            PaymentError::NonceExpired => "NONCE_EXPIRED",
            PaymentError::SettlementFailed(_) => "SETTLEMENT_FAILED",
            PaymentError::FacilitatorUnavailable(_) => "FACILITATOR_UNAVAILABLE",
            PaymentError::DatabaseError(_) => "DATABASE_ERROR",
            PaymentError::Internal(_) => "INTERNAL_ERROR",
            PaymentError::NotFound(_) => "PAYMENT_NOT_FOUND",
        }
    }

    /// Get HTTP status code suggestion
    pub fn http_status(&self) -> u16 {
        match self {
            PaymentError::MissingPayment
            | PaymentError::MalformedPayment(_)
            | PaymentError::AmountMismatch { .. }
            | PaymentError::UnsupportedNetwork(_)
            | PaymentError::ReceiverMismatch
            | PaymentError::InvalidSignature
            | PaymentError::VerificationRejected(_)
            | PaymentError::NonceExpired => 402,
            PaymentError::DuplicateInProgress => 409,
            PaymentError::SettlementFailed(_) | PaymentError::FacilitatorUnavailable(_) => 503,
            PaymentError::NotFound(_) => 404,
            PaymentError::DatabaseError(_) | PaymentError::Internal(_) => 500,
        }
    }

    /// Whether the client may retry with the same payment payload
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            PaymentError::SettlementFailed(_) | PaymentError::FacilitatorUnavailable(_)
        )
    }
}

impl From<sqlx::Error> for PaymentError {
    fn from(e: sqlx::Error) -> Self {
        PaymentError::DatabaseError(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(PaymentError::MissingPayment.code(), "PAYMENT_REQUIRED");
        assert_eq!(
            PaymentError::DuplicateInProgress.code(),
            "DUPLICATE_IN_PROGRESS"
        );
        assert_eq!(
            PaymentError::SettlementFailed("timeout".into()).code(),
            "SETTLEMENT_FAILED"
        );
    }

    #[test]
    fn test_http_status() {
        assert_eq!(PaymentError::MissingPayment.http_status(), 402);
        assert_eq!(PaymentError::InvalidSignature.http_status(), 402);
        assert_eq!(PaymentError::NonceExpired.http_status(), 402);
        assert_eq!(PaymentError::DuplicateInProgress.http_status(), 409);
        assert_eq!(
            PaymentError::SettlementFailed("timeout".into()).http_status(),
            503
        );
        assert_eq!(
            PaymentError::DatabaseError("down".into()).http_status(),
            500
        );
    }

    #[test]
    fn test_retryable_only_for_settlement_failures() {
        assert!(PaymentError::SettlementFailed("x".into()).retryable());
        assert!(PaymentError::FacilitatorUnavailable("x".into()).retryable());
        assert!(!PaymentError::DuplicateInProgress.retryable());
        assert!(!PaymentError::MissingPayment.retryable());
    }

    #[test]
    fn test_amount_mismatch_display() {
        let err = PaymentError::AmountMismatch {
            expected: 1000,
            got: 500,
        };
        assert_eq!(
            err.to_string(),
            "Payment amount mismatch: expected 1000, got 500"
        );
    }
}
