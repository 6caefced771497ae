//! Server-side flow session endpoints.
//!
//! A client either drives a flow step by step through these routes or keeps
//! the state itself and posts the final payload to `/api/cancellation`.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use retention_core::error::RetentionError;
use retention_core::types::{Offer, SubmissionReceipt};
use retention_flow::{FlowEvent, FlowSnapshot};
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::{ApiError, INVALID_USER_ID};
use crate::extract::{ApiJson, ApiPath};
use crate::rest::AppState;

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StartFlowRequest {
    #[serde(default)]
    pub user_id: String,
    /// Defaults to the user's own subscription.
    #[serde(default)]
    pub subscription_id: Option<String>,
    /// Flow state saved by the client, to resume where the user left off.
    #[serde(default)]
    #[schema(value_type = Option<Object>)]
    pub state: Option<Value>,
}

fn not_found(flow_id: Uuid) -> ApiError {
    ApiError::from(RetentionError::FlowNotFound(flow_id))
}

/// POST /api/flows: Open a flow, optionally resuming saved state.
#[utoipa::path(
    post,
    path = "/api/flows",
    tag = "Flows",
    request_body = StartFlowRequest,
    responses(
        (status = 201, description = "Flow opened", body = FlowSnapshot),
        (status = 400, description = "Invalid user id or saved state", body = crate::error::ErrorResponse),
        (status = 409, description = "Saved state cannot be resumed", body = crate::error::ErrorResponse),
        (status = 503, description = "Too many active flows", body = crate::error::ErrorResponse),
    )
)]
pub async fn handle_start_flow(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<StartFlowRequest>,
) -> Result<(StatusCode, Json<FlowSnapshot>), ApiError> {
    if request.user_id.trim().is_empty() {
        warn!("Flow start without user id");
        metrics::counter!("api.validation_errors").increment(1);
        return Err(ApiError::new(StatusCode::BAD_REQUEST, INVALID_USER_ID));
    }

    let subscription = state
        .ledger
        .subscriptions()
        .resolve(&request.user_id, request.subscription_id.as_deref())?;

    let snapshot = match request.state.as_ref().filter(|raw| !raw.is_null()) {
        Some(raw) => state.engine.restore(&request.user_id, subscription, raw)?,
        None => state.engine.start(&request.user_id, subscription)?,
    };
    Ok((StatusCode::CREATED, Json(snapshot)))
}

/// GET /api/flows/:id: Current state of a flow.
#[utoipa::path(
    get,
    path = "/api/flows/{id}",
    tag = "Flows",
    params(("id" = Uuid, Path, description = "Flow id")),
    responses(
        (status = 200, description = "Flow snapshot", body = FlowSnapshot),
        (status = 404, description = "Flow not found", body = crate::error::ErrorResponse),
    )
)]
pub async fn handle_get_flow(
    State(state): State<AppState>,
    ApiPath(flow_id): ApiPath<Uuid>,
) -> Result<Json<FlowSnapshot>, ApiError> {
    state
        .engine
        .get(&flow_id)
        .map(Json)
        .ok_or_else(|| not_found(flow_id))
}

/// POST /api/flows/:id/events: Advance a flow with a user answer.
#[utoipa::path(
    post,
    path = "/api/flows/{id}/events",
    tag = "Flows",
    params(("id" = Uuid, Path, description = "Flow id")),
    request_body = FlowEvent,
    responses(
        (status = 200, description = "Updated flow", body = FlowSnapshot),
        (status = 400, description = "Unknown or malformed event", body = crate::error::ErrorResponse),
        (status = 404, description = "Flow not found", body = crate::error::ErrorResponse),
        (status = 409, description = "Event not allowed at this step", body = crate::error::ErrorResponse),
    )
)]
pub async fn handle_flow_event(
    State(state): State<AppState>,
    ApiPath(flow_id): ApiPath<Uuid>,
    ApiJson(event): ApiJson<FlowEvent>,
) -> Result<Json<FlowSnapshot>, ApiError> {
    let snapshot = state.engine.apply(&flow_id, event)?;
    metrics::counter!("api.flow_events", "trigger" => event.trigger()).increment(1);
    Ok(Json(snapshot))
}

/// GET /api/flows/:id/offer: The priced downsell for this flow.
#[utoipa::path(
    get,
    path = "/api/flows/{id}/offer",
    tag = "Flows",
    params(("id" = Uuid, Path, description = "Flow id")),
    responses(
        (status = 200, description = "Priced offer", body = Offer),
        (status = 404, description = "Flow not found", body = crate::error::ErrorResponse),
        (status = 409, description = "No arm resolved yet", body = crate::error::ErrorResponse),
    )
)]
pub async fn handle_flow_offer(
    State(state): State<AppState>,
    ApiPath(flow_id): ApiPath<Uuid>,
) -> Result<Json<Offer>, ApiError> {
    Ok(Json(state.engine.offer(&flow_id)?))
}

/// POST /api/flows/:id/confirm: Submit the cancellation for this flow.
#[utoipa::path(
    post,
    path = "/api/flows/{id}/confirm",
    tag = "Flows",
    params(("id" = Uuid, Path, description = "Flow id")),
    responses(
        (status = 200, description = "Cancellation recorded", body = SubmissionReceipt),
        (status = 400, description = "Collected answers failed validation", body = crate::error::ErrorResponse),
        (status = 404, description = "Flow not found", body = crate::error::ErrorResponse),
        (status = 409, description = "Not at confirmation, or already submitting", body = crate::error::ErrorResponse),
    )
)]
pub async fn handle_confirm_flow(
    State(state): State<AppState>,
    ApiPath(flow_id): ApiPath<Uuid>,
) -> Result<Json<SubmissionReceipt>, ApiError> {
    let receipt = state.engine.confirm(&flow_id).await?;
    info!(flow_id = %flow_id, cancellation_id = %receipt.cancellation.id, "Flow confirmed");
    Ok(Json(receipt))
}

/// POST /api/flows/:id/restart: Back to the first question.
#[utoipa::path(
    post,
    path = "/api/flows/{id}/restart",
    tag = "Flows",
    params(("id" = Uuid, Path, description = "Flow id")),
    responses(
        (status = 200, description = "Flow restarted", body = FlowSnapshot),
        (status = 404, description = "Flow not found", body = crate::error::ErrorResponse),
        (status = 409, description = "Flow already submitted or submitting", body = crate::error::ErrorResponse),
    )
)]
pub async fn handle_restart_flow(
    State(state): State<AppState>,
    ApiPath(flow_id): ApiPath<Uuid>,
) -> Result<Json<FlowSnapshot>, ApiError> {
    Ok(Json(state.engine.restart(&flow_id)?))
}

/// DELETE /api/flows/:id: Discard a flow.
#[utoipa::path(
    delete,
    path = "/api/flows/{id}",
    tag = "Flows",
    params(("id" = Uuid, Path, description = "Flow id")),
    responses(
        (status = 204, description = "Flow closed"),
        (status = 404, description = "Flow not found", body = crate::error::ErrorResponse),
    )
)]
pub async fn handle_close_flow(
    State(state): State<AppState>,
    ApiPath(flow_id): ApiPath<Uuid>,
) -> Result<StatusCode, ApiError> {
    if state.engine.close(&flow_id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found(flow_id))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use crate::server::tests::{send, test_app, USER_1_SUB_ID};
    use axum::http::StatusCode;
    use axum::Router;
    use serde_json::{json, Value};

    async fn open(app: &Router, body: Value) -> String {
        let (status, body) = send(app, "POST", "/api/flows", Some(body)).await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["flowId"].as_str().unwrap().to_string()
    }

    async fn event(app: &Router, id: &str, event: Value) -> (StatusCode, Value) {
        send(app, "POST", &format!("/api/flows/{id}/events"), Some(event)).await
    }

    #[tokio::test]
    async fn test_accept_flow_end_to_end() {
        let (app, state) = test_app();
        let id = open(&app, json!({"userId": "user-2"})).await;

        let (_, snapshot) = send(&app, "GET", &format!("/api/flows/{id}"), None).await;
        assert_eq!(snapshot["state"]["currentStep"], "job_question");
        assert_eq!(snapshot["state"]["arm"], "B");

        for e in [
            json!({"type": "answer_found_job", "foundJob": false}),
            json!({"type": "continue"}),
            json!({"type": "answer_job_help", "needsHelp": true}),
        ] {
            let (status, _) = event(&app, &id, e).await;
            assert_eq!(status, StatusCode::OK);
        }

        let (status, offer) = send(&app, "GET", &format!("/api/flows/{id}/offer"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(offer["discountedPrice"], 1500);
        assert_eq!(offer["discount"], 1000);

        let (_, snapshot) = event(&app, &id, json!({"type": "answer_downsell", "accept": true})).await;
        assert_eq!(snapshot["state"]["currentStep"], "confirmation");

        let (status, receipt) = send(&app, "POST", &format!("/api/flows/{id}/confirm"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(receipt["message"], "Subscription updated with discount");
        assert_eq!(receipt["cancellation"]["accepted_downsell"], true);
        assert_eq!(receipt["cancellation"]["reason"], "still_looking");
        assert_eq!(state.ledger.len(), 1);

        let (_, snapshot) = send(&app, "GET", &format!("/api/flows/{id}"), None).await;
        assert_eq!(snapshot["state"]["currentStep"], "success");

        let (status, body) = send(&app, "POST", &format!("/api/flows/{id}/confirm"), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body, json!({"error": "Invalid flow state"}));
        assert_eq!(state.ledger.len(), 1);
    }

    #[tokio::test]
    async fn test_decline_skips_confirmation() {
        let (app, state) = test_app();
        let id = open(&app, json!({"userId": "user-2"})).await;
        event(&app, &id, json!({"type": "answer_found_job", "foundJob": false})).await;
        event(&app, &id, json!({"type": "continue"})).await;
        event(&app, &id, json!({"type": "answer_job_help", "needsHelp": false})).await;

        let (status, snapshot) =
            event(&app, &id, json!({"type": "answer_downsell", "accept": false})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(snapshot["state"]["currentStep"], "success");
        assert!(state.ledger.is_empty());
    }

    #[tokio::test]
    async fn test_illegal_event_conflicts() {
        let (app, _) = test_app();
        let id = open(&app, json!({"userId": "user-1"})).await;

        let (status, body) = event(&app, &id, json!({"type": "answer_downsell", "accept": true})).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body, json!({"error": "Invalid flow state"}));

        let (status, _) = event(&app, &id, json!({"type": "submission_accepted"})).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = send(&app, "POST", &format!("/api/flows/{id}/confirm"), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_unknown_flow() {
        let (app, _) = test_app();
        let id = uuid::Uuid::new_v4();
        for (method, uri) in [
            ("GET", format!("/api/flows/{id}")),
            ("GET", format!("/api/flows/{id}/offer")),
            ("POST", format!("/api/flows/{id}/confirm")),
            ("POST", format!("/api/flows/{id}/restart")),
            ("DELETE", format!("/api/flows/{id}")),
        ] {
            let (status, body) = send(&app, method, &uri, None).await;
            assert_eq!(status, StatusCode::NOT_FOUND, "{method} {uri}");
            assert_eq!(body, json!({"error": "Flow not found"}));
        }
    }

    #[tokio::test]
    async fn test_malformed_event_rejected() {
        let (app, _) = test_app();
        let id = open(&app, json!({"userId": "user-2"})).await;
        for bad in [
            json!({"type": "skip_to_confirmation"}),
            json!({"type": "answer_found_job"}),
            json!({"type": "answer_found_job", "foundJob": "yes"}),
            json!({"type": "answer_found_job", "found_job": true}),
        ] {
            let (status, body) = event(&app, &id, bad.clone()).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{bad}");
            assert_eq!(body, json!({"error": "Invalid request data"}));
        }

        let (status, body) = send(&app, "GET", "/api/flows/not-a-uuid", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, json!({"error": "Flow not found"}));

        let (_, snapshot) = send(&app, "GET", &format!("/api/flows/{id}"), None).await;
        assert_eq!(snapshot["state"]["currentStep"], "job_question");
    }

    #[tokio::test]
    async fn test_start_rejects_foreign_subscription() {
        let (app, state) = test_app();
        for body in [
            json!({"userId": "user-1", "subscriptionId": "123e4567-e89b-12d3-a456-426614174000"}),
            json!({"userId": "user-3"}),
        ] {
            let (status, body) = send(&app, "POST", "/api/flows", Some(body)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body, json!({"error": "Invalid request data"}));
        }
        assert_eq!(state.engine.active_flows(), 0);

        let id = open(&app, json!({"userId": "user-1", "subscriptionId": USER_1_SUB_ID})).await;
        let (_, snapshot) = send(&app, "GET", &format!("/api/flows/{id}"), None).await;
        assert_eq!(snapshot["subscriptionId"], USER_1_SUB_ID);
    }

    #[tokio::test]
    async fn test_resume_rejects_unreachable_state() {
        let (app, state) = test_app();
        let forged = json!({"currentStep": "confirmation", "acceptedDownsell": false});
        let (status, body) =
            send(&app, "POST", "/api/flows", Some(json!({"userId": "user-2", "state": forged}))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body, json!({"error": "Invalid flow state"}));
        assert_eq!(state.engine.active_flows(), 0);
        assert!(state.ledger.is_empty());
    }

    #[tokio::test]
    async fn test_start_requires_user_id() {
        let (app, _) = test_app();
        let (status, body) = send(&app, "POST", "/api/flows", Some(json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({"error": "Invalid user ID"}));
    }

    #[tokio::test]
    async fn test_resume_saved_state() {
        let (app, _) = test_app();
        let saved = json!({
            "currentStep": "downsell_offer",
            "foundJob": false,
            "needsJobHelp": true,
            "cancellationReason": "still_looking",
        });
        let id = open(&app, json!({"userId": "user-2", "state": saved.clone()})).await;

        // The arm is re-derived from the user id.
        let (_, snapshot) = send(&app, "GET", &format!("/api/flows/{id}"), None).await;
        assert_eq!(snapshot["state"]["currentStep"], "downsell_offer");
        assert_eq!(snapshot["state"]["arm"], "B");
        assert_eq!(snapshot["offer"]["discountedPrice"], 1500);

        // A client-supplied arm that disagrees is refused.
        let mut forged = saved;
        forged["arm"] = json!("A");
        let (status, body) =
            send(&app, "POST", "/api/flows", Some(json!({"userId": "user-2", "state": forged}))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body, json!({"error": "Invalid flow state"}));
    }

    #[tokio::test]
    async fn test_resume_rejects_malformed_state() {
        let (app, state) = test_app();
        let saved = json!({"currentStep": "job_help", "foundJob": "no"});
        let (status, body) = send(&app, "POST", "/api/flows", Some(json!({"userId": "user-2", "state": saved}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({"error": "Invalid request data"}));
        assert_eq!(state.engine.active_flows(), 0);
    }

    #[tokio::test]
    async fn test_restart_and_close() {
        let (app, state) = test_app();
        let id = open(&app, json!({"userId": "user-1"})).await;
        event(&app, &id, json!({"type": "answer_found_job", "foundJob": true})).await;

        let (status, snapshot) = send(&app, "POST", &format!("/api/flows/{id}/restart"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(snapshot["state"]["currentStep"], "job_question");
        assert_eq!(snapshot["state"]["arm"], "A");

        let (status, _) = send(&app, "DELETE", &format!("/api/flows/{id}"), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(state.engine.active_flows(), 0);
    }
}
