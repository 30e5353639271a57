// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! REST connector backed by reqwest.

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde_json::Value;
use tracing::{debug, warn};

use super::{Api, Connector, Document, Verb};
use crate::config::ClusterConfig;
use crate::error::{ClusterError, Result};

/// Header selecting the tenant on the metrics service.
pub const TENANT_HEADER: &str = "Hawkular-Tenant";

/// Connector talking to a real cluster over HTTPS.
#[derive(Debug, Clone)]
pub struct RestConnector {
    client: reqwest::Client,
    api_url: String,
    metrics_url: Option<String>,
    namespace: String,
    token: Option<String>,
}

impl RestConnector {
    /// Build a connector from configuration.
    pub fn new(config: &ClusterConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .read_timeout(config.read_timeout)
            .build()
            .map_err(|e| ClusterError::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            metrics_url: config
                .metrics_url
                .as_ref()
                .map(|url| url.trim_end_matches('/').to_string()),
            namespace: config.namespace.clone(),
            token: config.token.clone(),
        })
    }

    fn url(&self, api: Api, path: &str) -> Result<String> {
        let base = match api {
            Api::ControlPlane => self.api_url.as_str(),
            Api::Metrics => self
                .metrics_url
                .as_deref()
                .ok_or_else(|| ClusterError::Transport("No metrics URL configured".to_string()))?,
        };
        Ok(format!("{}{}", base, path))
    }
}

#[async_trait]
impl Connector for RestConnector {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn request(
        &self,
        api: Api,
        verb: Verb,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Document> {
        let url = self.url(api, path)?;
        let method = match verb {
            Verb::Get => reqwest::Method::GET,
            Verb::Post => reqwest::Method::POST,
            Verb::Delete => reqwest::Method::DELETE,
        };

        let mut request = self.client.request(method, &url);
        if let Some(token) = &self.token {
            request = request.header(AUTHORIZATION, format!("Bearer {}", token));
        }
        if api == Api::Metrics {
            request = request.header(TENANT_HEADER, &self.namespace);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        debug!(%verb, %api, path = %path, "Cluster request");

        let response = request.send().await.map_err(|e| map_transport_error(&url, e))?;
        let status = response.status();
        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("json"));

        let text = response
            .text()
            .await
            .map_err(|e| map_transport_error(&url, e))?;

        if !status.is_success() {
            if status.as_u16() != 404 {
                warn!(%verb, path = %path, status = status.as_u16(), "Cluster request failed");
            }
            return Err(ClusterError::Api {
                code: status.as_u16(),
                body: text,
            });
        }

        if text.is_empty() {
            return Ok(Document::Empty);
        }
        if is_json {
            return serde_json::from_str(&text)
                .map(Document::Json)
                .map_err(|e| ClusterError::Decode(format!("{} {}: {}", verb, path, e)));
        }
        Ok(Document::Text(text))
    }
}

fn map_transport_error(url: &str, err: reqwest::Error) -> ClusterError {
    if err.is_timeout() {
        ClusterError::Timeout(format!("{}: {}", url, err))
    } else if err.is_decode() {
        ClusterError::Decode(format!("{}: {}", url, err))
    } else {
        ClusterError::Transport(format!("{}: {}", url, err))
    }
}
