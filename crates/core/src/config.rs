use serde::Deserialize;

use crate::error::RetentionResult;

/// Root application configuration. Loaded from environment variables
/// with the prefix `RETENTION__`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub flow: FlowConfig,
    #[serde(default)]
    pub billing: BillingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default functions
fn default_node_id() -> String {
    "node-01".to_string()
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_http_port() -> u16 {
    8080
}
fn default_metrics_enabled() -> bool {
    true
}
fn default_metrics_port() -> u16 {
    9091
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            port: default_metrics_port(),
        }
    }
}

// ─── Flow Config ────────────────────────────────────────────────────────
#[derive(Debug, Clone, Deserialize)]
pub struct FlowConfig {
    /// Idle flows older than this are dropped by the sweeper.
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_max_active_flows")]
    pub max_active_flows: usize,
}

fn default_session_ttl_secs() -> u64 { 1800 }
fn default_sweep_interval_secs() -> u64 { 60 }
fn default_max_active_flows() -> usize { 100_000 }

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            session_ttl_secs: default_session_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            max_active_flows: default_max_active_flows(),
        }
    }
}

// ─── Billing Config ─────────────────────────────────────────────────────
/// Seed for the in-memory subscription store.
#[derive(Debug, Clone, Deserialize)]
pub struct BillingConfig {
    #[serde(default = "default_subscription_id")]
    pub subscription_id: String,
    #[serde(default = "default_subscription_user_id")]
    pub user_id: String,
    /// Monthly price in minor units.
    #[serde(default = "default_monthly_price")]
    pub monthly_price: u64,
}

fn default_subscription_id() -> String { "123e4567-e89b-12d3-a456-426614174000".to_string() }
fn default_subscription_user_id() -> String { "550e8400-e29b-41d4-a716-446655440001".to_string() }
fn default_monthly_price() -> u64 { 2500 }

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            subscription_id: default_subscription_id(),
            user_id: default_subscription_user_id(),
            monthly_price: default_monthly_price(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            api: ApiConfig::default(),
            metrics: MetricsConfig::default(),
            flow: FlowConfig::default(),
            billing: BillingConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn load() -> RetentionResult<Self> {
        let builder = config::Config::builder().add_source(
            config::Environment::with_prefix("RETENTION")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        Ok(config.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.api.http_port, 8080);
        assert_eq!(config.metrics.port, 9091);
        assert_eq!(config.flow.session_ttl_secs, 1800);
        assert_eq!(config.billing.monthly_price, 2500);
    }

    #[test]
    fn test_partial_sections_fall_back_to_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"api": {"http_port": 3000}, "billing": {}}"#).unwrap();
        assert_eq!(config.api.http_port, 3000);
        assert_eq!(config.api.host, "0.0.0.0");
        assert_eq!(config.node_id, "node-01");
        assert_eq!(config.billing.subscription_id, default_subscription_id());
    }
}
