pub mod handlers;
pub mod openapi;
pub mod state;
pub mod types;

use axum::{
    Json,
    Router,
    body::Body,
    extract::State,
    http::{Request, StatusCode, header},
    middleware::{Next, from_fn_with_state},
    response::Response,
    routing::{get, post},
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;

// OpenAPI / Swagger UI
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::billing::{FundingStrategy, decode_claims, guard::billing_error_response};
use state::AppState;
use types::{ApiResponse, error_codes};

/// Funding middleware for priced routes.
///
/// The strategy is resolved once per request from headers: a signed
/// `X-Payment` payload goes through the settlement gate, a Bearer token
/// through the credit guard. Both enforce the same contract: verify funding,
/// execute, then charge. A bare request falls into the gate, which answers
/// with the structured 402 telling the client its options.
async fn charge_middleware(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    match FundingStrategy::from_headers(request.headers()) {
        FundingStrategy::CryptoPayment | FundingStrategy::Unfunded => {
            state.payment_gate.handle(request, next).await
        }
        FundingStrategy::Credential { token } => {
            match decode_claims(&token, &state.jwt_secret) {
                Ok(claims) => state.credit_guard.handle(&claims.sub, request, next).await,
                Err(err) => billing_error_response(&err),
            }
        }
    }
}

/// Axum middleware for JWT authentication on account endpoints.
async fn jwt_auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, (StatusCode, Json<ApiResponse<()>>)> {
    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or((
            StatusCode::UNAUTHORIZED,
            Json(ApiResponse::<()>::error(
                error_codes::MISSING_AUTH,
                "Missing Authorization header",
            )),
        ))?;

    let token = auth_header.strip_prefix("Bearer ").ok_or((
        StatusCode::UNAUTHORIZED,
        Json(ApiResponse::<()>::error(
            error_codes::AUTH_FAILED,
            "Invalid token format",
        )),
    ))?;

    match decode_claims(token, &state.jwt_secret) {
        Ok(claims) => {
            request.extensions_mut().insert(claims);
            Ok(next.run(request).await)
        }
        Err(_) => Err((
            StatusCode::UNAUTHORIZED,
            Json(ApiResponse::<()>::error(
                error_codes::AUTH_FAILED,
                "Invalid or expired token",
            )),
        )),
    }
}

/// Build the full gateway router. The caller supplies the protected service
/// routes; everything mounted under `/api/v1/paid` goes through the funding
/// middleware.
pub fn build_router(state: Arc<AppState>, protected: Router<Arc<AppState>>) -> Router {
    let priced_routes = protected.layer(from_fn_with_state(state.clone(), charge_middleware));

    let billing_routes = Router::new()
        .route("/balance", get(handlers::get_balance))
        .layer(from_fn_with_state(state.clone(), jwt_auth_middleware));

    Router::new()
        // Health check
        .route("/api/v1/health", get(handlers::health_check))
        // Settlement visibility
        .route("/api/v1/payments/{nonce}", get(handlers::get_payment))
        // Credential billing
        .nest("/api/v1/billing", billing_routes)
        // Billing provider callbacks (signature verified upstream)
        .route("/api/v1/webhooks/billing", post(handlers::post_webhook))
        // Priced service routes
        .nest("/api/v1/paid", priced_routes)
        .with_state(state)
        // OpenAPI / Swagger UI (stateless, added after with_state)
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", openapi::ApiDoc::openapi()))
}

/// Demo priced routes for local development.
#[cfg(feature = "mock-api")]
pub fn mock_protected_routes() -> Router<Arc<AppState>> {
    Router::new().route("/scan", post(handlers::mock_scan))
}

/// Start the HTTP gateway and serve until shutdown is signalled.
pub async fn run_server(
    host: &str,
    port: u16,
    state: Arc<AppState>,
    protected: Router<Arc<AppState>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let app = build_router(state, protected);

    let addr = format!("{}:{}", host, port);
    let listener = match TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            eprintln!("❌ FATAL: Failed to bind to {}: {}", addr, e);
            eprintln!(
                "   Hint: Port {} may already be in use. Check with: lsof -i :{}",
                port, port
            );
            std::process::exit(1);
        }
    };

    println!("🚀 Gateway listening on http://{}", addr);
    println!("📖 API Docs: http://{}/docs", addr);
    println!("💰 Priced routes: /api/v1/paid/*");

    let shutdown_signal = async move {
        shutdown.changed().await.ok();
    };

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
    {
        eprintln!("❌ FATAL: Server error: {}", e);
        std::process::exit(1);
    }
}
