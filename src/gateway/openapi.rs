//! OpenAPI document for the gateway's own endpoints.
//!
//! Priced routes are mounted by the embedding service and documented there.

use utoipa::OpenApi;

use super::handlers;
use super::types::{BalanceData, HealthData, PaymentStatusData};
use crate::billing::webhooks::WebhookEvent;
use crate::payment::types::{PaymentOption, PaymentRequirements};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "tollgate",
        description = "Payment-gated API gateway with atomic reserve-commit settlement"
    ),
    paths(
        handlers::health_check,
        handlers::get_payment,
        handlers::get_balance,
        handlers::post_webhook,
    ),
    components(schemas(
        HealthData,
        PaymentStatusData,
        BalanceData,
        WebhookEvent,
        PaymentRequirements,
        PaymentOption,
    ))
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_document_builds() {
        let doc = ApiDoc::openapi();
        let json = doc.to_json().unwrap();
        assert!(json.contains("/api/v1/health"));
        assert!(json.contains("/api/v1/payments/{nonce}"));
    }
}
