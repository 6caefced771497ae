//! Mapping from domain errors to HTTP responses.
//!
//! Clients get a fixed message per error class. The underlying error is
//! logged here and never echoed back.

use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use retention_core::error::RetentionError;
use retention_core::validation::PUBLIC_VALIDATION_MESSAGE;
use serde::Serialize;
use tracing::{debug, error, warn};
use utoipa::ToSchema;

pub const INVALID_USER_ID: &str = "Invalid user ID";
pub const INTERNAL_ERROR: &str = "Internal server error";
pub const FLOW_NOT_FOUND: &str = "Flow not found";
pub const INVALID_FLOW_STATE: &str = "Invalid flow state";
pub const SUBMISSION_IN_FLIGHT: &str = "Submission already in progress";
pub const SERVICE_BUSY: &str = "Too many active flows";

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: &'static str,
}

impl ApiError {
    pub fn new(status: StatusCode, message: &'static str) -> Self {
        Self { status, message }
    }
}

impl From<RetentionError> for ApiError {
    fn from(e: RetentionError) -> Self {
        match &e {
            RetentionError::InvalidInput(_) | RetentionError::Validation(_) => {
                warn!(error = %e, "Rejected request");
                metrics::counter!("api.validation_errors").increment(1);
                ApiError::new(StatusCode::BAD_REQUEST, PUBLIC_VALIDATION_MESSAGE)
            }
            RetentionError::FlowNotFound(_) => {
                ApiError::new(StatusCode::NOT_FOUND, FLOW_NOT_FOUND)
            }
            RetentionError::InvalidState(_) => {
                warn!(error = %e, "Illegal flow operation");
                ApiError::new(StatusCode::CONFLICT, INVALID_FLOW_STATE)
            }
            RetentionError::SubmissionInFlight(_) => {
                ApiError::new(StatusCode::CONFLICT, SUBMISSION_IN_FLIGHT)
            }
            RetentionError::CapacityExceeded(_) => {
                warn!(error = %e, "Flow capacity reached");
                ApiError::new(StatusCode::SERVICE_UNAVAILABLE, SERVICE_BUSY)
            }
            RetentionError::Config(_)
            | RetentionError::Serialization(_)
            | RetentionError::Internal(_) => {
                error!(error = ?e, "Request failed");
                metrics::counter!("api.errors").increment(1);
                ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR)
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        warn!(error = %rejection.body_text(), "Rejected request body");
        metrics::counter!("api.validation_errors").increment(1);
        ApiError::new(StatusCode::BAD_REQUEST, PUBLIC_VALIDATION_MESSAGE)
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        debug!(error = %rejection.body_text(), "Unparseable path parameter");
        ApiError::new(StatusCode::NOT_FOUND, FLOW_NOT_FOUND)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                error: self.message.to_string(),
            }),
        )
            .into_response()
    }
}
