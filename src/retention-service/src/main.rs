//! Retention service: subscription cancellation flow with an A/B tested
//! downsell offer.
//!
//! Main entry point that wires the stores and the flow engine and starts the
//! server.

use clap::Parser;
use retention_api::{ApiServer, AppState};
use retention_billing::{CancellationLedger, SubscriptionStore};
use retention_core::config::AppConfig;
use retention_core::event_bus::TracingSink;
use retention_core::experimentation::VariantAssigner;
use retention_flow::FlowEngine;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "retention-service")]
#[command(about = "Subscription cancellation flow with an A/B tested downsell offer")]
#[command(version)]
struct Cli {
    /// Node identifier (overrides config)
    #[arg(long, env = "RETENTION__NODE_ID")]
    node_id: Option<String>,

    /// HTTP port (overrides config)
    #[arg(long, env = "RETENTION__API__HTTP_PORT")]
    http_port: Option<u16>,

    /// Metrics port (overrides config)
    #[arg(long, env = "RETENTION__METRICS__PORT")]
    metrics_port: Option<u16>,

    /// Idle seconds before a flow session is dropped (overrides config)
    #[arg(long, env = "RETENTION__FLOW__SESSION_TTL_SECS")]
    session_ttl_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "retention_service=info,retention_flow=info,retention_billing=info,tower_http=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("Retention service starting up");

    // Load configuration
    let mut config = AppConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    // Apply CLI overrides
    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }
    if let Some(port) = cli.http_port {
        config.api.http_port = port;
    }
    if let Some(port) = cli.metrics_port {
        config.metrics.port = port;
    }
    if let Some(ttl) = cli.session_ttl_secs {
        config.flow.session_ttl_secs = ttl;
    }

    info!(
        node_id = %config.node_id,
        http_port = config.api.http_port,
        session_ttl_secs = config.flow.session_ttl_secs,
        max_active_flows = config.flow.max_active_flows,
        "Configuration loaded"
    );

    // Engine and ledger must bucket users identically.
    let assigner = VariantAssigner::new();
    let subscriptions = SubscriptionStore::from_config(&config.billing);
    let ledger = Arc::new(CancellationLedger::new(subscriptions).with_assigner(assigner));
    let engine = FlowEngine::new(ledger.clone())
        .with_assigner(assigner)
        .with_event_sink(Arc::new(TracingSink))
        .with_node_id(config.node_id.clone())
        .with_max_active_flows(config.flow.max_active_flows);

    let state = AppState::new(engine.clone(), ledger, config.node_id.clone());
    let api_server = ApiServer::new(config.clone(), state);

    // Start metrics exporter
    if config.metrics.enabled {
        if let Err(e) = api_server.start_metrics().await {
            error!(error = %e, "Failed to start metrics exporter");
        }
    }

    // Spawn session sweeper
    let ttl = Duration::from_secs(config.flow.session_ttl_secs);
    let sweep_every = Duration::from_secs(config.flow.sweep_interval_secs.max(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(sweep_every);
        loop {
            interval.tick().await;
            let expired = engine.sweep_expired(ttl);
            if expired > 0 {
                info!(expired, active = engine.active_flows(), "Expired idle flows");
            }
        }
    });

    info!("Retention service is ready to serve traffic");

    // Start HTTP server (blocks until shutdown)
    api_server.start_http().await?;

    Ok(())
}
