// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Job execution service.
//!
//! Accepts submissions, stores the compiled job, runs it on a spawned worker
//! and records progress. Each running job owns a [`CancellationToken`] that
//! [`JobExecutionService::cancel`] trips.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use eoflow_graph::{Registries, process_graph_of};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::engine::{OrchestrationEngine, TaskObserver, TaskOutcome};
use crate::error::{EngineError, Result, ServiceError};
use crate::model::{Job, JobStatus, Task, TaskStatus, TaskUpdate};
use crate::store::JobStore;

/// Records task progress in the job store.
struct StoreObserver {
    store: Arc<dyn JobStore>,
}

impl StoreObserver {
    async fn update(&self, task: &Task, update: TaskUpdate) -> std::result::Result<(), EngineError> {
        self.store
            .update_task(&task.id, &update)
            .await
            .map_err(|e| EngineError::Observer(e.to_string()))
    }
}

#[async_trait]
impl TaskObserver for StoreObserver {
    async fn task_started(&self, task: &Task) -> std::result::Result<(), EngineError> {
        self.update(task, TaskUpdate::status(TaskStatus::Running)).await
    }

    async fn task_finished(
        &self,
        task: &Task,
        outcome: &TaskOutcome,
    ) -> std::result::Result<(), EngineError> {
        let update = TaskUpdate::status(TaskStatus::Finished)
            .with_logs(outcome.all_logs())
            .with_metrics(outcome.metrics.clone());
        self.update(task, update).await
    }

    async fn task_failed(
        &self,
        task: &Task,
        error: &EngineError,
    ) -> std::result::Result<(), EngineError> {
        let update = if error.is_cancelled() {
            TaskUpdate::status(TaskStatus::Canceled)
        } else {
            TaskUpdate::status(TaskStatus::Error).with_error(error.to_string())
        };
        self.update(task, update.with_logs(error.logs().map(str::to_string)))
            .await
    }
}

/// Submits, runs and cancels jobs.
///
/// Cloning yields a handle to the same service.
#[derive(Clone)]
pub struct JobExecutionService {
    store: Arc<dyn JobStore>,
    engine: Arc<OrchestrationEngine>,
    registries: Arc<Registries>,
    running: Arc<Mutex<HashMap<String, CancellationToken>>>,
}

impl JobExecutionService {
    /// Create a service.
    pub fn new(
        store: Arc<dyn JobStore>,
        engine: OrchestrationEngine,
        registries: Registries,
    ) -> Self {
        Self {
            store,
            engine: Arc::new(engine),
            registries: Arc::new(registries),
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Validate and store a submission.
    ///
    /// The request is `{"process_graph": {...}, "output": {...}?}`. Nothing
    /// is stored when the graph does not compile.
    pub async fn submit(&self, user_id: &str, request: &Value) -> Result<Job> {
        let process_graph = process_graph_of(request)?;
        let output = request.get("output").filter(|output| !output.is_null());

        let job_id = Uuid::new_v4().to_string();
        let specs = eoflow_graph::compile(process_graph, &job_id, output, &self.registries)?;

        if let Some(spec) = specs
            .iter()
            .find(|spec| !self.engine.catalog().contains(&spec.process_id))
        {
            return Err(ServiceError::MissingImage(spec.process_id.clone()));
        }

        let job = Job::new(&job_id, user_id, process_graph.clone(), output.cloned());
        let tasks: Vec<Task> = specs
            .into_iter()
            .map(|spec| Task::from_spec(Uuid::new_v4().to_string(), &job_id, spec))
            .collect();

        self.store.insert_job_with_tasks(&job, &tasks).await?;
        info!(job_id = %job.id, user_id = %user_id, tasks = tasks.len(), "Job created");
        Ok(job)
    }

    /// Queue a created job and spawn its worker.
    ///
    /// The job is `queued` when this returns. The handle resolves to the
    /// job's final status.
    pub async fn start_processing(&self, job_id: &str) -> Result<JoinHandle<Result<JobStatus>>> {
        let job = self.get_job(job_id).await?;
        if !self
            .store
            .transition_job(job_id, JobStatus::Queued, None)
            .await?
        {
            return Err(invalid_transition(job_id, job.status, JobStatus::Queued));
        }

        self.running
            .lock()
            .await
            .insert(job_id.to_string(), CancellationToken::new());
        info!(job_id = %job_id, "Job queued");

        let service = self.clone();
        let job_id = job_id.to_string();
        Ok(tokio::spawn(async move { service.run_job(&job_id).await }))
    }

    /// Run a queued job to completion. This is the worker body.
    ///
    /// Returns the status the job ended in. A job canceled before its worker
    /// started ends as `canceled` without touching the cluster.
    pub async fn run_job(&self, job_id: &str) -> Result<JobStatus> {
        let cancel = self
            .running
            .lock()
            .await
            .entry(job_id.to_string())
            .or_default()
            .clone();

        let result = self.drive(job_id, &cancel).await;
        self.running.lock().await.remove(job_id);
        result
    }

    async fn drive(&self, job_id: &str, cancel: &CancellationToken) -> Result<JobStatus> {
        if !self
            .store
            .transition_job(job_id, JobStatus::Running, None)
            .await?
        {
            let job = self.get_job(job_id).await?;
            if job.status == JobStatus::Canceled {
                info!(job_id = %job_id, "Job canceled before start");
                return Ok(JobStatus::Canceled);
            }
            return Err(invalid_transition(job_id, job.status, JobStatus::Running));
        }
        info!(job_id = %job_id, "Job running");

        let tasks = self.store.list_tasks(job_id).await?;
        let observer = StoreObserver {
            store: self.store.clone(),
        };

        match self.engine.run(job_id, &tasks, &observer, cancel).await {
            Ok(outcomes) => {
                if self
                    .store
                    .transition_job(job_id, JobStatus::Finished, None)
                    .await?
                {
                    info!(job_id = %job_id, tasks = outcomes.len(), "Job finished");
                    return Ok(JobStatus::Finished);
                }
                // Canceled while the last task completed.
                Ok(self.get_job(job_id).await?.status)
            }
            Err(err) if err.is_cancelled() => {
                self.store
                    .transition_job(job_id, JobStatus::Canceled, None)
                    .await?;
                self.store.cancel_pending_tasks(job_id).await?;
                info!(job_id = %job_id, "Job canceled");
                Ok(JobStatus::Canceled)
            }
            Err(err) => {
                let message = err.to_string();
                error!(job_id = %job_id, error = %message, "Job failed");
                self.store
                    .transition_job(job_id, JobStatus::Error, Some(&message))
                    .await?;
                self.store.cancel_pending_tasks(job_id).await?;

                match err.cluster_error() {
                    Some(cluster) if cluster.is_unavailable() => {
                        Err(ServiceError::ClusterUnavailable(cluster.clone()))
                    }
                    _ => Ok(JobStatus::Error),
                }
            }
        }
    }

    /// Cancel a queued or running job.
    ///
    /// The job and its pending tasks are `canceled` when this returns. A
    /// running worker stops at its next watch and deletes the resources it
    /// holds.
    pub async fn cancel(&self, job_id: &str) -> Result<()> {
        if !self
            .store
            .transition_job(job_id, JobStatus::Canceled, None)
            .await?
        {
            let job = self.get_job(job_id).await?;
            return Err(invalid_transition(job_id, job.status, JobStatus::Canceled));
        }

        let tasks = self.store.cancel_pending_tasks(job_id).await?;
        match self.running.lock().await.get(job_id) {
            Some(token) => token.cancel(),
            None => warn!(job_id = %job_id, "No worker registered for canceled job"),
        }
        info!(job_id = %job_id, tasks, "Job canceled");
        Ok(())
    }

    /// Load a job.
    pub async fn get_job(&self, job_id: &str) -> Result<Job> {
        self.store
            .get_job(job_id)
            .await?
            .ok_or_else(|| ServiceError::JobNotFound(job_id.to_string()))
    }

    /// Tasks of a job in sequence order.
    pub async fn list_tasks(&self, job_id: &str) -> Result<Vec<Task>> {
        self.get_job(job_id).await?;
        Ok(self.store.list_tasks(job_id).await?)
    }

    /// Check the job store and the cluster.
    pub async fn health_check(&self) -> Result<()> {
        self.store.health_check().await?;
        self.engine
            .probe()
            .await
            .map_err(ServiceError::ClusterUnavailable)
    }
}

fn invalid_transition(job_id: &str, from: JobStatus, to: JobStatus) -> ServiceError {
    ServiceError::InvalidTransition {
        job_id: job_id.to_string(),
        from,
        to,
    }
}
