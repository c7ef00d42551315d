//! Gateway HTTP handlers: health, payment status, balance, webhooks.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::billing::{Claims, WebhookEvent};

use super::state::AppState;
use super::types::{ApiResponse, BalanceData, HealthData, PaymentStatusData, error_codes};

type HandlerError = (StatusCode, Json<ApiResponse<()>>);

fn internal_error(msg: impl Into<String>) -> HandlerError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ApiResponse::<()>::error(error_codes::INTERNAL_ERROR, msg)),
    )
}

/// GET /api/v1/health
#[utoipa::path(
    get,
    path = "/api/v1/health",
    responses((status = 200, description = "Service healthy", body = HealthData))
)]
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<ApiResponse<HealthData>> {
    let database = match state.db.health_check().await {
        Ok(()) => "up".to_string(),
        Err(e) => {
            error!(error = %e, "Database health check failed");
            "down".to_string()
        }
    };

    Json(ApiResponse::success(HealthData {
        status: "ok".to_string(),
        database,
        version: env!("CARGO_PKG_VERSION").to_string(),
    }))
}

/// GET /api/v1/payments/{nonce}
///
/// Operator/client visibility into one reserve-commit cycle: state,
/// attempts, last error, settlement id. Never the cached result body.
#[utoipa::path(
    get,
    path = "/api/v1/payments/{nonce}",
    params(("nonce" = String, Path, description = "Client payment nonce")),
    responses(
        (status = 200, description = "Transaction status", body = PaymentStatusData),
        (status = 404, description = "Unknown nonce")
    )
)]
pub async fn get_payment(
    State(state): State<Arc<AppState>>,
    Path(nonce): Path<String>,
) -> Result<Json<ApiResponse<PaymentStatusData>>, HandlerError> {
    let record = state
        .payment_ledger
        .get_by_nonce(&nonce)
        .await
        .map_err(|e| internal_error(e.to_string()))?
        .ok_or((
            StatusCode::NOT_FOUND,
            Json(ApiResponse::<()>::error(
                error_codes::PAYMENT_NOT_FOUND,
                "No transaction for this nonce",
            )),
        ))?;

    Ok(Json(ApiResponse::success(PaymentStatusData::from(&record))))
}

/// GET /api/v1/billing/balance
///
/// Requires a Bearer token; claims are injected by the auth middleware.
#[utoipa::path(
    get,
    path = "/api/v1/billing/balance",
    responses(
        (status = 200, description = "Account funding", body = BalanceData),
        (status = 401, description = "Missing or invalid token")
    )
)]
pub async fn get_balance(
    State(state): State<Arc<AppState>>,
    axum::Extension(claims): axum::Extension<Claims>,
) -> Result<Json<ApiResponse<BalanceData>>, HandlerError> {
    let funding = state
        .credit_ledger
        .funding(&claims.sub)
        .await
        .map_err(|e| internal_error(e.to_string()))?;

    Ok(Json(ApiResponse::success(BalanceData {
        account_id: claims.sub,
        balance_micros: funding.balance_micros,
        metered_enabled: funding.metered_enabled,
    })))
}

/// POST /api/v1/webhooks/billing
///
/// The provider's signature is verified by upstream middleware; here the
/// event is claimed before any side effect, and unclaimed again if the side
/// effect fails so the provider's redelivery can land.
#[utoipa::path(
    post,
    path = "/api/v1/webhooks/billing",
    request_body = WebhookEvent,
    responses(
        (status = 200, description = "Processed (or already processed)"),
        (status = 500, description = "Processing failed; provider should redeliver")
    )
)]
pub async fn post_webhook(
    State(state): State<Arc<AppState>>,
    Json(event): Json<WebhookEvent>,
) -> Result<Json<ApiResponse<String>>, HandlerError> {
    let already_processed = state
        .webhook_ledger
        .claim(&event.event_id, &event.event_type)
        .await
        .map_err(|e| internal_error(e.to_string()))?;

    if already_processed {
        info!(event_id = %event.event_id, "Webhook redelivery ignored");
        return Ok(Json(ApiResponse::success("already processed".to_string())));
    }

    if let Err(e) = apply_webhook(&state, &event).await {
        // Release the claim so a genuine provider retry can be reprocessed.
        if let Err(unclaim_err) = state.webhook_ledger.unclaim(&event.event_id).await {
            error!(
                event_id = %event.event_id,
                error = %unclaim_err,
                "Failed to release webhook claim after processing error"
            );
        }
        error!(event_id = %event.event_id, error = %e, "Webhook processing failed");
        return Err(internal_error(e));
    }

    Ok(Json(ApiResponse::success("processed".to_string())))
}

async fn apply_webhook(state: &AppState, event: &WebhookEvent) -> Result<(), String> {
    match event.event_type.as_str() {
        "credit.topup.completed" => {
            let account_id = event
                .payload
                .get("accountId")
                .and_then(|v| v.as_str())
                .ok_or("topup event missing accountId")?;
            let amount_micros = event
                .payload
                .get("amountMicros")
                .and_then(|v| v.as_i64())
                .ok_or("topup event missing amountMicros")?;

            state
                .credit_ledger
                .deposit(account_id, amount_micros)
                .await
                .map_err(|e| e.to_string())?;

            info!(
                event_id = %event.event_id,
                account = %account_id,
                amount_micros = amount_micros,
                "Credited top-up"
            );
            Ok(())
        }
        other => {
            // Unknown types are claimed and dropped: redelivering them
            // would not make them more known.
            warn!(event_id = %event.event_id, event_type = %other, "Ignoring unknown webhook type");
            Ok(())
        }
    }
}

/// Demo protected endpoint standing in for the real priced service.
///
/// [SECURITY WARNING] Development/testing only; real deployments mount their
/// own handlers on the priced router.
#[cfg(feature = "mock-api")]
pub async fn mock_scan(body: axum::body::Bytes) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "verdict": "clean",
        "bytesScanned": body.len(),
    }))
}
