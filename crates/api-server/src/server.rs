//! API server: HTTP routes and the Prometheus exporter.

use crate::flow_rest;
use crate::rest::{self, AppState};
use crate::swagger::ApiDoc;
use axum::routing::{get, post};
use axum::{Json, Router};
use retention_core::config::AppConfig;
use std::net::SocketAddr;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use utoipa::OpenApi;

/// Main API server.
pub struct ApiServer {
    config: AppConfig,
    state: AppState,
}

impl ApiServer {
    pub fn new(config: AppConfig, state: AppState) -> Self {
        Self { config, state }
    }

    /// Start the HTTP REST server.
    pub async fn start_http(&self) -> anyhow::Result<()> {
        let app = router(self.state.clone());

        let addr = SocketAddr::new(
            self.config.api.host.parse()?,
            self.config.api.http_port,
        );

        info!(addr = %addr, "Starting HTTP server");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }

    /// Start the metrics server on a separate port.
    pub async fn start_metrics(&self) -> anyhow::Result<()> {
        let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
        let handle = builder
            .with_http_listener(SocketAddr::new(
                self.config.api.host.parse()?,
                self.config.metrics.port,
            ))
            .install_recorder()?;

        info!(port = self.config.metrics.port, "Metrics exporter started");

        // Keep the handle alive
        std::mem::forget(handle);
        Ok(())
    }
}

/// All routes with middleware, bound to `state`.
pub fn router(state: AppState) -> Router {
    Router::new()
        // Experiment and cancellation
        .route("/api/variant", post(rest::handle_variant))
        .route("/api/subscription", get(rest::handle_subscription))
        .route("/api/cancellation", post(rest::handle_cancellation))
        // Flow sessions
        .route("/api/flows", post(flow_rest::handle_start_flow))
        .route(
            "/api/flows/:id",
            get(flow_rest::handle_get_flow).delete(flow_rest::handle_close_flow),
        )
        .route("/api/flows/:id/events", post(flow_rest::handle_flow_event))
        .route("/api/flows/:id/offer", get(flow_rest::handle_flow_offer))
        .route("/api/flows/:id/confirm", post(flow_rest::handle_confirm_flow))
        .route("/api/flows/:id/restart", post(flow_rest::handle_restart_flow))
        // Operational endpoints
        .route("/health", get(rest::health_check))
        .route("/ready", get(rest::readiness))
        .route("/live", get(rest::liveness))
        .route("/api-docs/openapi.json", get(|| async { Json(ApiDoc::openapi()) }))
        // Middleware
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
