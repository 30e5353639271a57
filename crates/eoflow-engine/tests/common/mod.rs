// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared helpers for engine integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use eoflow_cluster::{ClusterConfig, MockCluster, ResourceKind};
use eoflow_engine::{
    EngineConfig, ImageCatalog, JobExecutionService, JobStore, OrchestrationEngine,
    SqliteJobStore, Task,
};
use eoflow_graph::{Registries, process_graph_of};
use serde_json::{Value, json};

pub const NAMESPACE: &str = "eoflow-test";

/// Engine configuration with millisecond polling.
pub fn test_config() -> EngineConfig {
    let cluster = ClusterConfig::new("http://mock", NAMESPACE)
        .with_poll_interval(Duration::from_millis(1))
        .with_watch_timeout(Duration::from_secs(5))
        .with_metrics(["cpu/usage_rate", "memory/usage"]);
    EngineConfig::new(cluster)
        .with_database_url("sqlite::memory:")
        .with_build_timeout(Duration::from_secs(5))
        .with_batch_timeout(Duration::from_secs(5))
}

pub fn engine(cluster: &MockCluster) -> OrchestrationEngine {
    OrchestrationEngine::new(
        Arc::new(cluster.clone()),
        ImageCatalog::builtin(),
        test_config(),
    )
}

pub async fn store() -> Arc<SqliteJobStore> {
    Arc::new(SqliteJobStore::from_url("sqlite::memory:").await.unwrap())
}

pub async fn service(cluster: &MockCluster) -> (JobExecutionService, Arc<SqliteJobStore>) {
    let store = store().await;
    let service = JobExecutionService::new(
        store.clone() as Arc<dyn JobStore>,
        engine(cluster),
        Registries::builtin(),
    );
    (service, store)
}

/// `min_time(filter_bbox(get_collection s2a))`.
pub fn min_time_request() -> Value {
    json!({
        "process_graph": {
            "process_id": "min_time",
            "args": {
                "imagery": {
                    "process_id": "filter_bbox",
                    "args": {
                        "left": 10.0, "right": 11.0, "top": 50.0, "bottom": 49.0,
                        "srs": "EPSG:4326",
                        "imagery": {"product_id": "s2a_prd_msil1c"}
                    }
                }
            }
        }
    })
}

/// `min_time(NDVI(filter_daterange(get_collection s2a)))` with a GTiff output.
pub fn ndvi_request() -> Value {
    json!({
        "process_graph": {
            "process_id": "min_time",
            "args": {
                "imagery": {
                    "process_id": "NDVI",
                    "args": {
                        "red": "B04",
                        "nir": "B08",
                        "imagery": {
                            "process_id": "filter_daterange",
                            "args": {
                                "from": "2017-01-01",
                                "to": "2017-01-31",
                                "imagery": {
                                    "process_id": "get_collection",
                                    "args": {"product_id": "s2a_prd_msil1c"}
                                }
                            }
                        }
                    }
                }
            }
        },
        "output": {"format": "GTiff"}
    })
}

/// Compile a request into stored-shape tasks named `task-{seq}`.
pub fn compile_tasks(request: &Value, job_id: &str) -> Vec<Task> {
    let graph = process_graph_of(request).unwrap();
    let output = request.get("output");
    eoflow_graph::compile(graph, job_id, output, &Registries::builtin())
        .unwrap()
        .into_iter()
        .map(|spec| Task::from_spec(format!("task-{}", spec.seq_num), job_id, spec))
        .collect()
}

/// Wait until a batch job running `process` exists.
pub async fn wait_for_batch_job(cluster: &MockCluster, process: &str) {
    for _ in 0..5000 {
        for name in cluster.object_names(ResourceKind::BatchJob).await {
            if let Some(job) = cluster.object(ResourceKind::BatchJob, &name).await
                && job["metadata"]["labels"]["eoflow.io/process-id"] == process
            {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("no batch job for {} was created", process);
}

/// Assert that nothing but image streams is left in the cluster.
pub async fn assert_cleaned_up(cluster: &MockCluster) {
    for kind in [
        ResourceKind::Volume,
        ResourceKind::Config,
        ResourceKind::Build,
        ResourceKind::BatchJob,
    ] {
        assert!(
            cluster.object_names(kind).await.is_empty(),
            "{} objects left behind",
            kind
        );
    }
    assert!(cluster.pod_names().await.is_empty());
}
