// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Orchestration engine.
//!
//! Runs the tasks of one job strictly in sequence order. Each task gets its
//! own cluster resources:
//!
//! ```text
//! take inputs ─▶ output volume ─▶ config ─▶ image ─▶ batch job ─▶ delete config
//!  (arena)        (wait Bound)    (wait)   (reuse     (wait,       delete inputs
//!                                           or build)  logs,       register output
//!                                                      metrics,    (arena)
//!                                                      delete)
//! ```
//!
//! Container layout of every task:
//!
//! | Path | Source |
//! |------|--------|
//! | `/eodc` | shared product claim, read-only |
//! | `/job_config` | task config map (`config.json`, `input_mounts.json`) |
//! | `/job_data/{job}/{task}` | task output volume |
//! | `/job_data/{job}/{producer}` | each input volume, read-only |
//! | `/job_results` | shared results claim, sub path `{job}` |
//!
//! On failure or cancellation the failing task's batch job, build, config
//! and output volume are deleted together with every volume still held.

use std::sync::Arc;

use async_trait::async_trait;
use eoflow_cluster::template::pods_path;
use eoflow_cluster::{
    Api, BatchJobTemplate, BuildTemplate, BuiltImage, ClusterError, ConfigTemplate, Connector,
    ImageBuild, ImageStreamTemplate, LifecycleError, ManagedResource, Mount, ResourceTemplate,
    Verb, VolumeTemplate, WatchControl,
};
use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::catalog::ImageCatalog;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::model::Task;
use crate::volumes::{HeldVolume, VolumeArena};

/// Mount path of the shared product claim.
pub const PRODUCT_MOUNT: &str = "/eodc";
/// Mount path of the task config map.
pub const CONFIG_MOUNT: &str = "/job_config";
/// Root of task output mounts.
pub const DATA_MOUNT: &str = "/job_data";
/// Mount path of the shared results claim.
pub const RESULTS_MOUNT: &str = "/job_results";

/// Where a task's output volume is mounted.
pub fn data_path(job_id: &str, task_id: &str) -> String {
    format!("{}/{}/{}", DATA_MOUNT, job_id, task_id)
}

/// Result of one finished task.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskOutcome {
    /// Image the task ran.
    pub image: String,
    /// Whether the image already existed.
    pub image_reused: bool,
    /// Build logs, when the image was built for this task.
    pub build_logs: Option<String>,
    /// Container logs.
    pub logs: Option<String>,
    /// Metrics keyed by pod name, then series.
    pub metrics: Option<Value>,
}

impl TaskOutcome {
    /// Build and container logs in one text.
    pub fn all_logs(&self) -> Option<String> {
        match (&self.build_logs, &self.logs) {
            (Some(build), Some(run)) => Some(format!("{}\n{}", build.trim_end(), run)),
            (build, run) => build.clone().or_else(|| run.clone()),
        }
    }
}

/// Logs and metrics of a completed batch job.
#[derive(Debug, Clone, PartialEq)]
pub struct Deployment {
    /// Container logs.
    pub logs: Option<String>,
    /// Metrics keyed by pod name, then series.
    pub metrics: Option<Value>,
}

/// Receives task progress.
#[async_trait]
pub trait TaskObserver: Send + Sync {
    /// A task is about to provision its resources.
    async fn task_started(&self, task: &Task) -> Result<(), EngineError>;

    /// A task's batch job succeeded.
    async fn task_finished(&self, task: &Task, outcome: &TaskOutcome) -> Result<(), EngineError>;

    /// A task failed or was canceled. Errors returned here are logged only.
    async fn task_failed(&self, task: &Task, error: &EngineError) -> Result<(), EngineError>;
}

/// Drives tasks through their cluster resources.
pub struct OrchestrationEngine {
    connector: Arc<dyn Connector>,
    catalog: ImageCatalog,
    config: EngineConfig,
}

impl OrchestrationEngine {
    /// Create an engine.
    pub fn new(connector: Arc<dyn Connector>, catalog: ImageCatalog, config: EngineConfig) -> Self {
        Self {
            connector,
            catalog,
            config,
        }
    }

    /// The image catalog.
    pub fn catalog(&self) -> &ImageCatalog {
        &self.catalog
    }

    /// The configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Check that the control plane answers.
    pub async fn probe(&self) -> Result<(), ClusterError> {
        let connector = self.connector.as_ref();
        let path = format!("{}?limit=1", pods_path(connector.namespace()));
        connector
            .request(Api::ControlPlane, Verb::Get, &path, None)
            .await?;
        Ok(())
    }

    fn control(&self, cancel: &CancellationToken) -> WatchControl {
        WatchControl::from_config(&self.config.cluster).with_cancel(cancel.clone())
    }

    /// Run every task of a job in sequence order.
    ///
    /// Returns the outcome of each task. Volumes still held when the run
    /// ends, successfully or not, are deleted.
    pub async fn run(
        &self,
        job_id: &str,
        tasks: &[Task],
        observer: &dyn TaskObserver,
        cancel: &CancellationToken,
    ) -> Result<Vec<TaskOutcome>, EngineError> {
        let mut ordered: Vec<&Task> = tasks.iter().collect();
        ordered.sort_by_key(|task| task.seq_num);

        let mut arena = VolumeArena::plan(
            ordered
                .iter()
                .map(|&task| (task.seq_num, task.depends_on.as_slice())),
        )?;

        info!(job_id = %job_id, tasks = ordered.len(), "Running job");
        let result = self
            .run_tasks(job_id, &ordered, &mut arena, observer, cancel)
            .await;

        for mut volume in arena.drain() {
            self.discard(&mut volume.resource).await;
        }
        result
    }

    async fn run_tasks(
        &self,
        job_id: &str,
        tasks: &[&Task],
        arena: &mut VolumeArena,
        observer: &dyn TaskObserver,
        cancel: &CancellationToken,
    ) -> Result<Vec<TaskOutcome>, EngineError> {
        let mut outcomes = Vec::with_capacity(tasks.len());

        for task in tasks {
            if cancel.is_cancelled() {
                let err = cancelled(task);
                if let Err(observer_err) = observer.task_failed(task, &err).await {
                    warn!(job_id = %job_id, error = %observer_err, "Failed to record task cancellation");
                }
                return Err(err);
            }

            observer.task_started(task).await?;
            info!(job_id = %job_id, seq_num = task.seq_num, process_id = %task.process_id, "Task started");

            match self.run_task(job_id, task, arena, cancel).await {
                Ok(outcome) => {
                    info!(
                        job_id = %job_id,
                        seq_num = task.seq_num,
                        process_id = %task.process_id,
                        image_reused = outcome.image_reused,
                        "Task finished"
                    );
                    observer.task_finished(task, &outcome).await?;
                    outcomes.push(outcome);
                }
                Err(err) => {
                    warn!(job_id = %job_id, seq_num = task.seq_num, error = %err, "Task failed");
                    if let Err(observer_err) = observer.task_failed(task, &err).await {
                        warn!(job_id = %job_id, error = %observer_err, "Failed to record task failure");
                    }
                    return Err(err);
                }
            }
        }

        Ok(outcomes)
    }

    async fn run_task(
        &self,
        job_id: &str,
        task: &Task,
        arena: &mut VolumeArena,
        cancel: &CancellationToken,
    ) -> Result<TaskOutcome, EngineError> {
        let mut inputs = arena.take_inputs(task.seq_num, &task.depends_on)?;
        let input_paths: Vec<String> = inputs.iter().map(|v| v.mount_path.clone()).collect();

        let mut output = HeldVolume::new(
            task.seq_num,
            data_path(job_id, &task.id),
            VolumeTemplate::for_task(job_id, &task.id, &self.config.cluster),
        );
        let mut config = ManagedResource::new(ConfigTemplate::for_task(
            job_id,
            &task.id,
            &task.args,
            &input_paths,
        ));

        let result = self
            .execute(job_id, task, &mut output, &mut config, &inputs, cancel)
            .await;

        self.discard(&mut config).await;
        for input in &mut inputs {
            self.discard(&mut input.resource).await;
        }

        match result {
            Ok(outcome) => {
                arena.register(output)?;
                Ok(outcome)
            }
            Err(err) => {
                self.discard(&mut output.resource).await;
                Err(err)
            }
        }
    }

    async fn execute(
        &self,
        job_id: &str,
        task: &Task,
        output: &mut HeldVolume,
        config: &mut ManagedResource<ConfigTemplate>,
        inputs: &[HeldVolume],
        cancel: &CancellationToken,
    ) -> Result<TaskOutcome, EngineError> {
        let connector = self.connector.as_ref();
        let control = self.control(cancel);

        output
            .resource
            .create(connector, true, &control)
            .await
            .map_err(|e| task_error(task, e, None))?;
        config
            .create(connector, true, &control)
            .await
            .map_err(|e| task_error(task, e, None))?;

        let built = self.build_image(job_id, task, cancel).await?;
        let deployment = self
            .deploy(job_id, task, &built.image, config, output, inputs, cancel)
            .await?;

        Ok(TaskOutcome {
            image: built.image,
            image_reused: built.reused,
            build_logs: built.logs,
            logs: deployment.logs,
            metrics: deployment.metrics,
        })
    }

    /// Reuse or build the image of a task's process.
    ///
    /// A failed build is deleted after its logs are captured into the error.
    pub async fn build_image(
        &self,
        job_id: &str,
        task: &Task,
        cancel: &CancellationToken,
    ) -> Result<BuiltImage, EngineError> {
        let spec = self
            .catalog
            .get(&task.process_id)
            .ok_or_else(|| EngineError::UnknownImage(task.process_id.clone()))?;

        let connector = self.connector.as_ref();
        let stream = ImageStreamTemplate::for_process(&task.process_id);
        let build = BuildTemplate::for_task(
            job_id,
            &task.id,
            &task.process_id,
            &stream,
            spec.source.clone(),
        );
        let mut image_build = ImageBuild::new(stream, build);
        let control = self
            .control(cancel)
            .with_timeout(self.config.build_timeout);

        match image_build.run(connector, &control).await {
            Ok(built) => Ok(built),
            Err(err) => {
                let logs = image_build.logs(connector).await;
                if let Err(cleanup_err) = image_build.cleanup(connector).await {
                    warn!(build = %image_build.build().name(), error = %cleanup_err, "Failed to delete build");
                }
                Err(task_error(task, err, logs))
            }
        }
    }

    /// Run a task's batch job and collect its logs and metrics.
    ///
    /// The batch job is deleted afterwards whether it succeeded or not.
    /// Volumes are left in place.
    #[allow(clippy::too_many_arguments)]
    pub async fn deploy(
        &self,
        job_id: &str,
        task: &Task,
        image: &str,
        config: &ManagedResource<ConfigTemplate>,
        output: &HeldVolume,
        inputs: &[HeldVolume],
        cancel: &CancellationToken,
    ) -> Result<Deployment, EngineError> {
        let connector = self.connector.as_ref();

        let mut template = BatchJobTemplate::for_task(job_id, &task.id, &task.process_id, image)
            .with_resources(self.catalog.resources_for(&task.process_id))
            .with_mount(Mount::claim(&self.config.product_volume, PRODUCT_MOUNT).read_only())
            .with_mount(Mount::config_map(config.name(), CONFIG_MOUNT))
            .with_mount(Mount::claim(output.name(), &output.mount_path));
        for input in inputs {
            template = template.with_mount(Mount::claim(input.name(), &input.mount_path).read_only());
        }
        template = template.with_mount(
            Mount::claim(&self.config.results_volume, RESULTS_MOUNT).with_sub_path(job_id),
        );

        let mut batch = ManagedResource::new(template);
        let control = self
            .control(cancel)
            .with_timeout(self.config.batch_timeout);

        let created = batch.create(connector, true, &control).await;
        let logs = self.pod_logs(&mut batch).await;

        let deployment = match created {
            Ok(()) => {
                let metrics = self.metrics(&batch).await;
                Ok(Deployment { logs, metrics })
            }
            Err(err) => Err(task_error(task, err, logs)),
        };

        self.discard(&mut batch).await;
        deployment
    }

    async fn pod_logs(&self, batch: &mut ManagedResource<BatchJobTemplate>) -> Option<String> {
        match batch.logs(self.connector.as_ref()).await {
            Ok(logs) => logs,
            Err(err) => {
                warn!(job = %batch.name(), error = %err, "Failed to fetch job logs");
                None
            }
        }
    }

    async fn metrics(&self, batch: &ManagedResource<BatchJobTemplate>) -> Option<Value> {
        let pod = batch.links().pod.clone()?;
        match batch
            .metrics(self.connector.as_ref(), &self.config.cluster.metrics)
            .await
        {
            Ok(series) => {
                let mut by_pod = Map::new();
                by_pod.insert(pod, json!(series));
                Some(Value::Object(by_pod))
            }
            Err(err) => {
                warn!(job = %batch.name(), error = %err, "Failed to fetch job metrics");
                None
            }
        }
    }

    async fn discard<T: ResourceTemplate>(&self, resource: &mut ManagedResource<T>) {
        match resource.delete(self.connector.as_ref()).await {
            Ok(()) => debug!(kind = %resource.template().kind(), name = %resource.name(), "Deleted"),
            Err(err) => warn!(
                kind = %resource.template().kind(),
                name = %resource.name(),
                error = %err,
                "Failed to delete cluster object"
            ),
        }
    }
}

fn cancelled(task: &Task) -> EngineError {
    EngineError::Cancelled {
        seq_num: task.seq_num,
        process_id: task.process_id.clone(),
    }
}

fn task_error(task: &Task, err: LifecycleError, logs: Option<String>) -> EngineError {
    if err.is_cancelled() {
        return cancelled(task);
    }
    EngineError::TaskFailed {
        seq_num: task.seq_num,
        process_id: task.process_id.clone(),
        source: err,
        logs,
    }
}
