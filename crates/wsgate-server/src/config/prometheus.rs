//! Prometheus metrics configuration.

use std::net::SocketAddr;

use serde::Deserialize;

/// Default Prometheus bind address.
pub const DEFAULT_PROMETHEUS_BIND: &str = "0.0.0.0:9600";

/// Prometheus metrics configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PrometheusConfig {
    /// Enable the metrics HTTP endpoint.
    pub enabled: bool,
    /// Bind address for the metrics endpoint.
    #[serde(default = "default_prometheus_bind")]
    pub bind: SocketAddr,
}

fn default_prometheus_bind() -> SocketAddr {
    DEFAULT_PROMETHEUS_BIND.parse().unwrap()
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind: default_prometheus_bind(),
        }
    }
}
