// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! REST connector tests against a mock HTTP server.

use std::time::Duration;

use eoflow_cluster::{
    Api, ClusterConfig, ClusterError, ConfigTemplate, Connector, Document, ManagedResource,
    RestConnector, Verb, WatchControl,
};
use serde_json::{Map, json};
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn connector(server: &MockServer) -> RestConnector {
    let config = ClusterConfig::new(server.uri(), "openeo")
        .with_metrics_url(format!("{}/hawkular/metrics", server.uri()))
        .with_token("test-token")
        .with_read_timeout(Duration::from_millis(500));
    RestConnector::new(&config).unwrap()
}

#[tokio::test]
async fn test_json_response_with_bearer_token() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/namespaces/openeo/configmaps/cfg-1"))
        .and(header("Authorization", "Bearer test-token"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"metadata": {"name": "cfg-1"}})),
        )
        .mount(&server)
        .await;

    let document = connector(&server)
        .request(
            Api::ControlPlane,
            Verb::Get,
            "/api/v1/namespaces/openeo/configmaps/cfg-1",
            None,
        )
        .await
        .unwrap();

    assert_eq!(document.as_json().unwrap()["metadata"]["name"], "cfg-1");
}

#[tokio::test]
async fn test_text_response_for_logs() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/namespaces/openeo/pods/job-1-abc/log"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", "text/plain")
                .set_body_string("line 1\nline 2\n"),
        )
        .mount(&server)
        .await;

    let document = connector(&server)
        .request(
            Api::ControlPlane,
            Verb::Get,
            "/api/v1/namespaces/openeo/pods/job-1-abc/log",
            None,
        )
        .await
        .unwrap();

    assert_eq!(document, Document::Text("line 1\nline 2\n".to_string()));
}

#[tokio::test]
async fn test_empty_body_is_empty_document() {
    let server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/api/v1/namespaces/openeo/configmaps/cfg-1"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let document = connector(&server)
        .request(
            Api::ControlPlane,
            Verb::Delete,
            "/api/v1/namespaces/openeo/configmaps/cfg-1",
            None,
        )
        .await
        .unwrap();

    assert_eq!(document, Document::Empty);
}

#[tokio::test]
async fn test_non_success_status_is_api_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/apis/batch/v1/namespaces/openeo/jobs"))
        .respond_with(ResponseTemplate::new(409).set_body_string("AlreadyExists"))
        .mount(&server)
        .await;

    let err = connector(&server)
        .request(
            Api::ControlPlane,
            Verb::Post,
            "/apis/batch/v1/namespaces/openeo/jobs",
            Some(&json!({"metadata": {"name": "job-1"}})),
        )
        .await
        .unwrap_err();

    assert_eq!(
        err,
        ClusterError::Api {
            code: 409,
            body: "AlreadyExists".to_string()
        }
    );
}

#[tokio::test]
async fn test_metrics_request_carries_tenant_header() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/hawkular/metrics/gauges/data"))
        .and(query_param("tags", "descriptor_name:memory/usage,pod_name:job-1-abc"))
        .and(header("Hawkular-Tenant", "openeo"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"value": 1024}])))
        .mount(&server)
        .await;

    let document = connector(&server)
        .request(
            Api::Metrics,
            Verb::Get,
            "/gauges/data?tags=descriptor_name:memory/usage,pod_name:job-1-abc",
            None,
        )
        .await
        .unwrap();

    assert_eq!(document.as_json().unwrap()[0]["value"], 1024);
}

#[tokio::test]
async fn test_read_timeout() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/namespaces/openeo/pods"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .mount(&server)
        .await;

    let err = connector(&server)
        .request(
            Api::ControlPlane,
            Verb::Get,
            "/api/v1/namespaces/openeo/pods",
            None,
        )
        .await
        .unwrap_err();

    assert!(err.is_unavailable(), "unexpected error: {}", err);
}

#[tokio::test]
async fn test_unreachable_cluster_is_transport_error() {
    let config = ClusterConfig::new("http://127.0.0.1:1", "openeo")
        .with_connect_timeout(Duration::from_millis(200));
    let connector = RestConnector::new(&config).unwrap();

    let err = connector
        .request(Api::ControlPlane, Verb::Get, "/api/v1", None)
        .await
        .unwrap_err();

    assert!(err.is_unavailable(), "unexpected error: {}", err);
}

#[tokio::test]
async fn test_config_map_lifecycle_over_http() {
    let server = MockServer::start().await;
    let template = ConfigTemplate::for_task("job-1", "task-1", &Map::new(), &[]);
    let stored = {
        use eoflow_cluster::ResourceTemplate;
        template.document()
    };

    Mock::given(method("POST"))
        .and(path("/api/v1/namespaces/openeo/configmaps"))
        .and(body_partial_json(json!({"kind": "ConfigMap"})))
        .respond_with(ResponseTemplate::new(201).set_body_json(stored.clone()))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!(
            "/api/v1/namespaces/openeo/configmaps/{}",
            stored["metadata"]["name"].as_str().unwrap()
        )))
        .respond_with(ResponseTemplate::new(200).set_body_json(stored.clone()))
        .mount(&server)
        .await;

    let connector = connector(&server);
    let mut config = ManagedResource::new(template);
    let control = WatchControl::new(Duration::from_millis(10), Duration::from_secs(2));

    config.create(&connector, true, &control).await.unwrap();
}
