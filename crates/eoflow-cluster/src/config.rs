// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for the cluster connector and resource templates.

use std::time::Duration;

/// Series fetched for every batch job unless configured otherwise.
pub const DEFAULT_METRICS: &[&str] = &[
    "cpu/usage_rate",
    "memory/usage",
    "network/rx_rate",
    "network/tx_rate",
];

/// Cluster access configuration.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Base URL of the control-plane REST API.
    pub api_url: String,
    /// Base URL of the metrics API, if metrics are collected.
    pub metrics_url: Option<String>,
    /// Namespace all objects are created in.
    pub namespace: String,
    /// Bearer token sent with every request.
    pub token: Option<String>,
    /// Connect timeout.
    pub connect_timeout: Duration,
    /// Read timeout.
    pub read_timeout: Duration,
    /// Interval between readiness polls.
    pub poll_interval: Duration,
    /// Deadline for a single readiness watch.
    pub watch_timeout: Duration,
    /// Storage class for task volumes. Cluster default when unset.
    pub storage_class: Option<String>,
    /// Requested size of each task volume.
    pub volume_size: String,
    /// Metric series fetched for finished batch jobs.
    pub metrics: Vec<String>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            api_url: "https://127.0.0.1:8443".to_string(),
            metrics_url: None,
            namespace: "eoflow".to_string(),
            token: None,
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_secs(1),
            watch_timeout: Duration::from_secs(3600),
            storage_class: None,
            volume_size: "5Gi".to_string(),
            metrics: DEFAULT_METRICS.iter().map(|m| m.to_string()).collect(),
        }
    }
}

impl ClusterConfig {
    /// Create a configuration for the given API server and namespace.
    pub fn new(api_url: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            namespace: namespace.into(),
            ..Self::default()
        }
    }

    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `EOFLOW_CLUSTER_URL`: control-plane API URL (required)
    /// - `EOFLOW_METRICS_URL`: metrics API URL (optional)
    /// - `EOFLOW_NAMESPACE`: namespace (default: "eoflow")
    /// - `EOFLOW_CLUSTER_TOKEN`: bearer token (optional)
    /// - `EOFLOW_CONNECT_TIMEOUT_SECS`: connect timeout (default: 5)
    /// - `EOFLOW_READ_TIMEOUT_SECS`: read timeout (default: 30)
    /// - `EOFLOW_POLL_INTERVAL_MS`: readiness poll interval (default: 1000)
    /// - `EOFLOW_WATCH_TIMEOUT_SECS`: readiness deadline (default: 3600)
    /// - `EOFLOW_STORAGE_CLASS`: storage class for task volumes (optional)
    /// - `EOFLOW_VOLUME_SIZE`: task volume size (default: "5Gi")
    /// - `EOFLOW_METRICS`: comma-separated metric series (default: cpu, memory, network)
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_url = std::env::var("EOFLOW_CLUSTER_URL")
            .map_err(|_| ConfigError::MissingEnvVar("EOFLOW_CLUSTER_URL"))?;

        let defaults = Self::default();

        let metrics = match std::env::var("EOFLOW_METRICS") {
            Ok(list) => list
                .split(',')
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .map(str::to_string)
                .collect(),
            Err(_) => defaults.metrics,
        };

        Ok(Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            metrics_url: std::env::var("EOFLOW_METRICS_URL")
                .ok()
                .map(|url| url.trim_end_matches('/').to_string()),
            namespace: std::env::var("EOFLOW_NAMESPACE").unwrap_or(defaults.namespace),
            token: std::env::var("EOFLOW_CLUSTER_TOKEN").ok(),
            connect_timeout: Duration::from_secs(env_u64("EOFLOW_CONNECT_TIMEOUT_SECS", 5)?),
            read_timeout: Duration::from_secs(env_u64("EOFLOW_READ_TIMEOUT_SECS", 30)?),
            poll_interval: Duration::from_millis(env_u64("EOFLOW_POLL_INTERVAL_MS", 1000)?),
            watch_timeout: Duration::from_secs(env_u64("EOFLOW_WATCH_TIMEOUT_SECS", 3600)?),
            storage_class: std::env::var("EOFLOW_STORAGE_CLASS").ok(),
            volume_size: std::env::var("EOFLOW_VOLUME_SIZE").unwrap_or(defaults.volume_size),
            metrics,
        })
    }

    /// Set the metrics API URL.
    pub fn with_metrics_url(mut self, url: impl Into<String>) -> Self {
        self.metrics_url = Some(url.into());
        self
    }

    /// Set the bearer token.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the read timeout.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set the readiness poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the readiness deadline.
    pub fn with_watch_timeout(mut self, timeout: Duration) -> Self {
        self.watch_timeout = timeout;
        self
    }

    /// Set the storage class for task volumes.
    pub fn with_storage_class(mut self, class: impl Into<String>) -> Self {
        self.storage_class = Some(class.into());
        self
    }

    /// Set the task volume size.
    pub fn with_volume_size(mut self, size: impl Into<String>) -> Self {
        self.volume_size = size.into();
        self
    }

    /// Replace the metric allow-list.
    pub fn with_metrics<S: Into<String>>(mut self, metrics: impl IntoIterator<Item = S>) -> Self {
        self.metrics = metrics.into_iter().map(Into::into).collect();
        self
    }
}

fn env_u64(name: &'static str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(name) {
        Ok(value) => value
            .parse()
            .map_err(|_| ConfigError::InvalidNumber(name)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),
    /// A numeric environment variable could not be parsed.
    #[error("Invalid number in environment variable: {0}")]
    InvalidNumber(&'static str),
}
