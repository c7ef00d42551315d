//! Billing Error Types

use thiserror::Error;

/// Errors on the credential-authenticated billing path
#[derive(Error, Debug, Clone)]
pub enum BillingError {
    #[error("Client is not authenticated")]
    Unauthorized,

    #[error("Insufficient funds: no credit balance or metered billing available")]
    InsufficientFunds,

    #[error("Usage report failed: {0}")]
    ReportFailed(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BillingError {
    /// Get the error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            BillingError::Unauthorized => "UNAUTHORIZED",
            BillingError::InsufficientFunds => "INSUFFICIENT_FUNDS",
            BillingError::ReportFailed(_) => "USAGE_REPORT_FAILED",
            BillingError::DatabaseError(_) => "DATABASE_ERROR",
            BillingError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Get HTTP status code suggestion
    pub fn http_status(&self) -> u16 {
        match self {
            BillingError::Unauthorized => 401,
            BillingError::InsufficientFunds | BillingError::ReportFailed(_) => 402,
            BillingError::DatabaseError(_) | BillingError::Internal(_) => 500,
        }
    }
}

impl From<sqlx::Error> for BillingError {
    fn from(e: sqlx::Error) -> Self {
        BillingError::DatabaseError(e.to_string())
    }
}
