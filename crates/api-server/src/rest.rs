//! REST API handlers for variant assignment, the subscription and
//! cancellation submissions, plus operational endpoints.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use retention_billing::CancellationLedger;
use retention_core::types::{Arm, SubmissionReceipt, SubscriptionRef};
use retention_flow::FlowEngine;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;
use utoipa::ToSchema;

use crate::error::{ApiError, INVALID_USER_ID};
use crate::extract::ApiJson;

/// Shared application state for REST handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: FlowEngine<CancellationLedger>,
    pub ledger: Arc<CancellationLedger>,
    pub node_id: String,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        engine: FlowEngine<CancellationLedger>,
        ledger: Arc<CancellationLedger>,
        node_id: String,
    ) -> Self {
        Self {
            engine,
            ledger,
            node_id,
            start_time: Instant::now(),
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VariantRequest {
    pub user_id: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct VariantResponse {
    pub variant: Arm,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SubscriptionResponse {
    pub subscription: SubscriptionRef,
}

/// Documented shape of a cancellation submission. The handler takes raw
/// JSON so every malformed field is reported the same way.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CancellationRequest {
    pub user_id: String,
    pub subscription_id: String,
    pub downsell_variant: Arm,
    pub reason: String,
    pub accepted_downsell: bool,
}

/// POST /api/variant: Deterministic A/B arm for a user.
#[utoipa::path(
    post,
    path = "/api/variant",
    tag = "Experiment",
    request_body = VariantRequest,
    responses(
        (status = 200, description = "Assigned arm", body = VariantResponse),
        (status = 400, description = "Missing or invalid user id", body = crate::error::ErrorResponse),
    )
)]
pub async fn handle_variant(
    State(state): State<AppState>,
    body: Result<ApiJson<Value>, ApiError>,
) -> Result<Json<VariantResponse>, ApiError> {
    // An unreadable body has no user id either.
    let body = body.map(|ApiJson(body)| body).unwrap_or_default();
    let user_id = body.get("userId").and_then(Value::as_str).unwrap_or_default();

    let arm = state.engine.assigner().assign(user_id).map_err(|e| {
        warn!(error = %e, "Variant request rejected");
        metrics::counter!("api.validation_errors").increment(1);
        ApiError::new(StatusCode::BAD_REQUEST, INVALID_USER_ID)
    })?;

    metrics::counter!("api.variant_assignments", "variant" => arm.as_str()).increment(1);
    Ok(Json(VariantResponse { variant: arm }))
}

/// GET /api/subscription: The subscription being cancelled.
#[utoipa::path(
    get,
    path = "/api/subscription",
    tag = "Cancellation",
    responses(
        (status = 200, description = "Current subscription", body = SubscriptionResponse),
        (status = 500, description = "Subscription unavailable", body = crate::error::ErrorResponse),
    )
)]
pub async fn handle_subscription(
    State(state): State<AppState>,
) -> Result<Json<SubscriptionResponse>, ApiError> {
    let subscription = state.ledger.subscriptions().current()?;
    Ok(Json(SubscriptionResponse { subscription }))
}

/// POST /api/cancellation: Record a finished cancellation flow.
#[utoipa::path(
    post,
    path = "/api/cancellation",
    tag = "Cancellation",
    request_body = CancellationRequest,
    responses(
        (status = 200, description = "Cancellation recorded", body = SubmissionReceipt),
        (status = 400, description = "Invalid request data", body = crate::error::ErrorResponse),
        (status = 500, description = "Internal server error", body = crate::error::ErrorResponse),
    )
)]
pub async fn handle_cancellation(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<Value>,
) -> Result<Json<SubmissionReceipt>, ApiError> {
    let receipt = state.ledger.record(&payload)?;
    metrics::counter!("api.cancellations").increment(1);
    Ok(Json(receipt))
}

/// GET /health: Health check endpoint.
#[utoipa::path(
    get,
    path = "/health",
    tag = "Operations",
    responses((status = 200, description = "Service is healthy", body = HealthResponse))
)]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        node_id: state.node_id.clone(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        active_flows: state.engine.active_flows(),
        cancellations: state.ledger.len(),
    })
}

/// GET /ready: Readiness probe.
/// Ready once the seeded subscription can be served.
#[utoipa::path(
    get,
    path = "/ready",
    tag = "Operations",
    responses(
        (status = 200, description = "Ready for traffic"),
        (status = 503, description = "Not ready"),
    )
)]
pub async fn readiness(State(state): State<AppState>) -> StatusCode {
    match state.ledger.subscriptions().current() {
        Ok(_) => StatusCode::OK,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// GET /live: Liveness probe.
#[utoipa::path(
    get,
    path = "/live",
    tag = "Operations",
    responses((status = 200, description = "Process is alive"))
)]
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub node_id: String,
    pub uptime_secs: u64,
    pub active_flows: usize,
    pub cancellations: usize,
}
