//! OpenAPI specification, served as JSON at `/api-docs/openapi.json`.

use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Subscription Retention API",
        version = "0.1.0",
        description = "Cancellation flow with an A/B tested downsell offer.\n\nAssigns experiment arms, drives flow sessions and records cancellations.",
        license(name = "MIT"),
    ),
    tags(
        (name = "Experiment", description = "Deterministic downsell arm assignment"),
        (name = "Cancellation", description = "Subscription lookup and cancellation submission"),
        (name = "Flows", description = "Server-side cancellation flow sessions"),
        (name = "Operations", description = "Health, readiness, and liveness probes"),
    ),
    paths(
        // Experiment
        crate::rest::handle_variant,
        // Cancellation
        crate::rest::handle_subscription,
        crate::rest::handle_cancellation,
        // Flows
        crate::flow_rest::handle_start_flow,
        crate::flow_rest::handle_get_flow,
        crate::flow_rest::handle_flow_event,
        crate::flow_rest::handle_flow_offer,
        crate::flow_rest::handle_confirm_flow,
        crate::flow_rest::handle_restart_flow,
        crate::flow_rest::handle_close_flow,
        // Operations
        crate::rest::health_check,
        crate::rest::readiness,
        crate::rest::liveness,
    ),
    components(schemas(
        // Domain types
        retention_core::types::Arm,
        retention_core::types::SubscriptionStatus,
        retention_core::types::SubscriptionRef,
        retention_core::types::Offer,
        retention_core::types::CancellationRecord,
        retention_core::types::SubmissionReceipt,
        retention_flow::Step,
        retention_flow::FlowEvent,
        retention_flow::FlowState,
        retention_flow::FlowSnapshot,
        // Request/response types
        crate::rest::VariantRequest,
        crate::rest::VariantResponse,
        crate::rest::SubscriptionResponse,
        crate::rest::CancellationRequest,
        crate::rest::HealthResponse,
        crate::flow_rest::StartFlowRequest,
        crate::error::ErrorResponse,
    ))
)]
pub struct ApiDoc;
