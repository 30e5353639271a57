// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Orchestration engine tests against the mock cluster.

mod common;

use std::sync::Mutex;

use async_trait::async_trait;
use eoflow_cluster::{LifecycleError, MockCluster, ResourceKind, Verb, template_id};
use eoflow_engine::{EngineError, Task, TaskObserver, TaskOutcome, data_path};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
}

impl Recorder {
    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn push(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

#[async_trait]
impl TaskObserver for Recorder {
    async fn task_started(&self, task: &Task) -> Result<(), EngineError> {
        self.push(format!("started {}", task.seq_num));
        Ok(())
    }

    async fn task_finished(&self, task: &Task, _outcome: &TaskOutcome) -> Result<(), EngineError> {
        self.push(format!("finished {}", task.seq_num));
        Ok(())
    }

    async fn task_failed(&self, task: &Task, error: &EngineError) -> Result<(), EngineError> {
        let state = if error.is_cancelled() { "canceled" } else { "failed" };
        self.push(format!("{} {}", state, task.seq_num));
        Ok(())
    }
}

async fn posted(cluster: &MockCluster, kind: ResourceKind) -> Vec<Value> {
    let collection = kind.collection_path(common::NAMESPACE);
    cluster
        .requests()
        .await
        .into_iter()
        .filter(|r| r.verb == Verb::Post && r.path == collection)
        .filter_map(|r| r.body)
        .collect()
}

#[tokio::test]
async fn test_run_job_to_completion() {
    let cluster = MockCluster::new(common::NAMESPACE);
    let engine = common::engine(&cluster);
    let tasks = common::compile_tasks(&common::min_time_request(), "job-1");
    let recorder = Recorder::default();

    let outcomes = engine
        .run("job-1", &tasks, &recorder, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcomes.len(), 3);
    assert_eq!(
        recorder.events(),
        vec![
            "started 0", "finished 0", "started 1", "finished 1", "started 2", "finished 2"
        ]
    );

    let min_time = &outcomes[1];
    assert_eq!(
        min_time.image,
        "image-registry.local:5000/eoflow-test/min-time:latest"
    );
    assert!(!min_time.image_reused);
    assert!(min_time.build_logs.as_deref().unwrap().contains("processing done"));
    assert!(min_time.logs.as_deref().unwrap().contains("processing done"));

    let metrics = min_time.metrics.as_ref().unwrap().as_object().unwrap();
    assert_eq!(metrics.len(), 1);
    let series = metrics.values().next().unwrap();
    assert_eq!(series["memory/usage"][1]["value"], 0.75);
    assert_eq!(series["cpu/usage_rate"].as_array().unwrap().len(), 2);

    common::assert_cleaned_up(&cluster).await;
    assert_eq!(
        cluster.object_names(ResourceKind::ImageStream).await,
        vec!["convert", "filter-s2", "min-time"]
    );
}

#[tokio::test]
async fn test_images_reused_across_jobs() {
    let cluster = MockCluster::new(common::NAMESPACE);
    let engine = common::engine(&cluster);
    let cancel = CancellationToken::new();

    let first = common::compile_tasks(&common::min_time_request(), "job-1");
    engine
        .run("job-1", &first, &Recorder::default(), &cancel)
        .await
        .unwrap();
    let builds = cluster.count_requests(Verb::Post, ResourceKind::Build).await;
    assert_eq!(builds, 3);

    let second = common::compile_tasks(&common::min_time_request(), "job-2");
    let outcomes = engine
        .run("job-2", &second, &Recorder::default(), &cancel)
        .await
        .unwrap();

    assert!(outcomes.iter().all(|o| o.image_reused && o.build_logs.is_none()));
    assert_eq!(
        cluster.count_requests(Verb::Post, ResourceKind::Build).await,
        builds
    );
}

#[tokio::test]
async fn test_concurrent_jobs_share_image_streams() {
    let cluster = MockCluster::new(common::NAMESPACE);
    let engine = common::engine(&cluster);
    let cancel = CancellationToken::new();
    let first = common::compile_tasks(&common::min_time_request(), "job-a");
    let second = common::compile_tasks(&common::min_time_request(), "job-b");
    let (recorder_a, recorder_b) = (Recorder::default(), Recorder::default());

    let (a, b) = tokio::join!(
        engine.run("job-a", &first, &recorder_a, &cancel),
        engine.run("job-b", &second, &recorder_b, &cancel),
    );

    let (a, b) = (a.unwrap(), b.unwrap());
    for (a, b) in a.iter().zip(&b) {
        assert_eq!(a.image, b.image);
    }
    assert_eq!(
        cluster.count_requests(Verb::Delete, ResourceKind::ImageStream).await,
        0
    );
    common::assert_cleaned_up(&cluster).await;
    assert_eq!(
        cluster.object_names(ResourceKind::ImageStream).await,
        vec!["convert", "filter-s2", "min-time"]
    );
}

#[tokio::test]
async fn test_seeded_images_skip_builds() {
    let cluster = MockCluster::new(common::NAMESPACE);
    for process in ["filter-s2", "min_time", "convert"] {
        cluster.seed_image(process).await;
    }
    let engine = common::engine(&cluster);
    let tasks = common::compile_tasks(&common::min_time_request(), "job-1");

    let outcomes = engine
        .run("job-1", &tasks, &Recorder::default(), &CancellationToken::new())
        .await
        .unwrap();

    assert!(outcomes.iter().all(|o| o.image_reused));
    assert_eq!(cluster.count_requests(Verb::Post, ResourceKind::Build).await, 0);
    assert_eq!(cluster.count_requests(Verb::Post, ResourceKind::ImageStream).await, 0);
}

#[tokio::test]
async fn test_consumer_mounts_producer_output() {
    let cluster = MockCluster::new(common::NAMESPACE);
    let engine = common::engine(&cluster);
    let tasks = common::compile_tasks(&common::min_time_request(), "job-1");

    engine
        .run("job-1", &tasks, &Recorder::default(), &CancellationToken::new())
        .await
        .unwrap();

    let producer_claim = template_id(ResourceKind::Volume, "job-1", "task-0");
    let output_claim = template_id(ResourceKind::Volume, "job-1", "task-1");
    let jobs = posted(&cluster, ResourceKind::BatchJob).await;
    assert_eq!(jobs.len(), 3);

    let pod = &jobs[1]["spec"]["template"]["spec"];
    let volumes = pod["volumes"].as_array().unwrap();
    let claim = |name: &str| {
        volumes
            .iter()
            .find(|v| v["name"] == name)
            .unwrap_or_else(|| panic!("no pod volume {}", name))
            .clone()
    };
    assert_eq!(claim(&producer_claim)["persistentVolumeClaim"]["readOnly"], true);
    assert_eq!(claim(&output_claim)["persistentVolumeClaim"]["readOnly"], Value::Null);
    assert_eq!(claim("pvc-eodc")["persistentVolumeClaim"]["readOnly"], true);

    let mounts = pod["containers"][0]["volumeMounts"].as_array().unwrap();
    let mount = |path: &str| {
        mounts
            .iter()
            .find(|m| m["mountPath"] == path)
            .unwrap_or_else(|| panic!("no mount at {}", path))
            .clone()
    };
    assert_eq!(mount(&data_path("job-1", "task-0"))["readOnly"], true);
    assert_eq!(mount(&data_path("job-1", "task-1"))["name"], output_claim.as_str());
    assert_eq!(mount("/job_results")["subPath"], "job-1");
    assert_eq!(mount("/job_config")["name"], template_id(ResourceKind::Config, "job-1", "task-1").as_str());

    // The first task has no inputs.
    let first_volumes = jobs[0]["spec"]["template"]["spec"]["volumes"].as_array().unwrap();
    assert!(first_volumes.iter().all(|v| v["name"] != output_claim.as_str()));

    let configs = posted(&cluster, ResourceKind::Config).await;
    assert_eq!(
        configs[1]["data"]["input_mounts.json"],
        json!([data_path("job-1", "task-0")]).to_string()
    );
    assert_eq!(configs[0]["data"]["input_mounts.json"], "[]");
    let args: Value =
        serde_json::from_str(configs[0]["data"]["config.json"].as_str().unwrap()).unwrap();
    assert_eq!(args, Value::Object(tasks[0].args.clone()));
}

#[tokio::test]
async fn test_failed_task_stops_job_and_cleans_up() {
    let cluster = MockCluster::new(common::NAMESPACE);
    cluster.fail_process("min_time").await;
    cluster.set_logs("min_time", "Traceback: out of memory\n").await;
    let engine = common::engine(&cluster);
    let tasks = common::compile_tasks(&common::min_time_request(), "job-1");
    let recorder = Recorder::default();

    let err = engine
        .run("job-1", &tasks, &recorder, &CancellationToken::new())
        .await
        .unwrap_err();

    match &err {
        EngineError::TaskFailed {
            seq_num,
            process_id,
            source,
            logs,
        } => {
            assert_eq!(*seq_num, 1);
            assert_eq!(process_id, "min_time");
            assert!(matches!(
                source,
                LifecycleError::Failed {
                    kind: ResourceKind::BatchJob,
                    ..
                }
            ));
            assert_eq!(logs.as_deref(), Some("Traceback: out of memory\n"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(err.cluster_error().is_none());
    assert_eq!(
        recorder.events(),
        vec!["started 0", "finished 0", "started 1", "failed 1"]
    );
    common::assert_cleaned_up(&cluster).await;
}

#[tokio::test]
async fn test_failed_build_reports_build_logs() {
    let cluster = MockCluster::new(common::NAMESPACE);
    cluster.fail_build("filter-s2").await;
    let engine = common::engine(&cluster);
    let tasks = common::compile_tasks(&common::min_time_request(), "job-1");

    let err = engine
        .run("job-1", &tasks, &Recorder::default(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(
        &err,
        EngineError::TaskFailed {
            seq_num: 0,
            source: LifecycleError::Failed {
                kind: ResourceKind::Build,
                ..
            },
            ..
        }
    ));
    assert!(err.logs().unwrap().contains("processing done"));
    assert_eq!(cluster.count_requests(Verb::Post, ResourceKind::BatchJob).await, 0);
    common::assert_cleaned_up(&cluster).await;
}

#[tokio::test]
async fn test_cancel_running_task() {
    let cluster = MockCluster::new(common::NAMESPACE);
    cluster.hold_process("min_time").await;
    let engine = common::engine(&cluster);
    let tasks = common::compile_tasks(&common::min_time_request(), "job-1");
    let cancel = CancellationToken::new();

    let run = {
        let task_cancel = cancel.clone();
        let recorder = std::sync::Arc::new(Recorder::default());
        let observer = recorder.clone();
        let handle = tokio::spawn(async move {
            let result = engine.run("job-1", &tasks, observer.as_ref(), &task_cancel).await;
            (result, observer.events())
        });
        common::wait_for_batch_job(&cluster, "min-time").await;
        cancel.cancel();
        handle
    };

    let (result, events) = run.await.unwrap();
    let err = result.unwrap_err();
    assert!(err.is_cancelled());
    assert!(matches!(err, EngineError::Cancelled { seq_num: 1, .. }));
    assert_eq!(events, vec!["started 0", "finished 0", "started 1", "canceled 1"]);
    common::assert_cleaned_up(&cluster).await;
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let cluster = MockCluster::new(common::NAMESPACE);
    let engine = common::engine(&cluster);
    let tasks = common::compile_tasks(&common::min_time_request(), "job-1");
    let recorder = Recorder::default();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = engine.run("job-1", &tasks, &recorder, &cancel).await.unwrap_err();

    assert!(matches!(err, EngineError::Cancelled { seq_num: 0, .. }));
    assert_eq!(recorder.events(), vec!["canceled 0"]);
    assert!(cluster.requests().await.is_empty());
}

#[tokio::test]
async fn test_conflicts_are_recreated() {
    let cluster = MockCluster::new(common::NAMESPACE);
    cluster.inject_conflicts(ResourceKind::Volume, 1).await;
    cluster.inject_conflicts(ResourceKind::BatchJob, 1).await;
    let engine = common::engine(&cluster);
    let tasks = common::compile_tasks(&common::min_time_request(), "job-1");

    engine
        .run("job-1", &tasks, &Recorder::default(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(cluster.count_requests(Verb::Post, ResourceKind::Volume).await, 4);
    assert_eq!(cluster.count_requests(Verb::Post, ResourceKind::BatchJob).await, 4);
    common::assert_cleaned_up(&cluster).await;
}

#[tokio::test]
async fn test_repeated_conflict_fails_task() {
    let cluster = MockCluster::new(common::NAMESPACE);
    cluster.inject_conflicts(ResourceKind::Config, 2).await;
    let engine = common::engine(&cluster);
    let tasks = common::compile_tasks(&common::min_time_request(), "job-1");

    let err = engine
        .run("job-1", &tasks, &Recorder::default(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        EngineError::TaskFailed {
            seq_num: 0,
            source: LifecycleError::Conflict {
                kind: ResourceKind::Config,
                ..
            },
            ..
        }
    ));
    common::assert_cleaned_up(&cluster).await;
}

#[tokio::test]
async fn test_unknown_image() {
    let cluster = MockCluster::new(common::NAMESPACE);
    let engine = eoflow_engine::OrchestrationEngine::new(
        std::sync::Arc::new(cluster.clone()),
        eoflow_engine::ImageCatalog::new(Default::default()),
        common::test_config(),
    );
    let tasks = common::compile_tasks(&common::min_time_request(), "job-1");

    let err = engine
        .run("job-1", &tasks, &Recorder::default(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::UnknownImage(ref p) if p == "filter-s2"));
    common::assert_cleaned_up(&cluster).await;
}

#[tokio::test]
async fn test_probe() {
    let cluster = MockCluster::new(common::NAMESPACE);
    let engine = common::engine(&cluster);
    engine.probe().await.unwrap();

    cluster.set_unavailable(true).await;
    assert!(engine.probe().await.unwrap_err().is_unavailable());
}
