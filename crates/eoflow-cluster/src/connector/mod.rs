// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cluster connectors.
//!
//! A connector performs single REST calls against the cluster. It knows
//! nothing about resource kinds or lifecycles; that lives in
//! [`crate::template`].

pub mod mock;
pub mod rest;

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use serde_json::Value;

use crate::error::Result;

pub use mock::MockCluster;
pub use rest::RestConnector;

/// Which cluster endpoint a request goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Api {
    /// The Kubernetes/OpenShift REST API.
    ControlPlane,
    /// The metrics service.
    Metrics,
}

/// HTTP verb of a connector request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum Verb {
    /// Read.
    Get,
    /// Create.
    Post,
    /// Remove.
    Delete,
}

/// A decoded response body.
#[derive(Debug, Clone, PartialEq)]
pub enum Document {
    /// `application/json` body.
    Json(Value),
    /// Any other non-empty body, e.g. pod logs.
    Text(String),
    /// No body.
    Empty,
}

impl Document {
    /// The JSON value, if this is a JSON document.
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Document::Json(value) => Some(value),
            _ => None,
        }
    }

    /// Consume into a JSON value. Text bodies are parsed; empty bodies become `null`.
    pub fn into_json(self) -> Result<Value> {
        match self {
            Document::Json(value) => Ok(value),
            Document::Text(text) => serde_json::from_str(&text)
                .map_err(|e| crate::error::ClusterError::Decode(e.to_string())),
            Document::Empty => Ok(Value::Null),
        }
    }

    /// Consume into text. JSON documents are re-serialized.
    pub fn into_text(self) -> String {
        match self {
            Document::Json(value) => value.to_string(),
            Document::Text(text) => text,
            Document::Empty => String::new(),
        }
    }
}

/// Performs REST calls against a cluster.
///
/// Implementations apply authentication and timeouts and map every non-2xx
/// response to [`ClusterError::Api`](crate::ClusterError::Api). They never
/// retry.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Namespace objects are created in.
    fn namespace(&self) -> &str;

    /// Perform one request.
    ///
    /// `path` is relative to the base URL of `api` and may carry a query
    /// string. `body` is sent as JSON.
    async fn request(
        &self,
        api: Api,
        verb: Verb,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Document>;

    /// Poll `path` with GET every `interval`.
    ///
    /// The first request is sent immediately. The stream never ends on its
    /// own; drop it to stop polling. Errors are yielded as items and do not
    /// end the stream.
    fn watch<'a>(
        &'a self,
        api: Api,
        path: &'a str,
        interval: Duration,
    ) -> BoxStream<'a, Result<Document>> {
        futures::stream::unfold(false, move |started| async move {
            if started {
                tokio::time::sleep(interval).await;
            }
            let item = self.request(api, Verb::Get, path, None).await;
            Some((item, true))
        })
        .boxed()
    }
}
