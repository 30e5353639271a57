// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for eoflow-engine.

use eoflow_cluster::{ClusterError, LifecycleError};
use eoflow_graph::GraphValidationError;
use thiserror::Error;

use crate::model::JobStatus;
use crate::volumes::VolumeError;

/// Result type using [`ServiceError`].
pub type Result<T> = std::result::Result<T, ServiceError>;

/// Job store errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migration failed.
    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// A stored record could not be decoded.
    #[error("Corrupt record '{id}': {reason}")]
    Corrupt {
        /// Job or task id.
        id: String,
        /// What could not be decoded.
        reason: String,
    },

    /// A record could not be encoded.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Orchestration errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EngineError {
    /// A cluster resource of the task failed.
    #[error("Task {seq_num} ({process_id}) failed: {source}")]
    TaskFailed {
        /// Failing task.
        seq_num: u32,
        /// Process of the failing task.
        process_id: String,
        /// Lifecycle error of the failing resource.
        source: LifecycleError,
        /// Build or container logs captured before cleanup.
        logs: Option<String>,
    },

    /// The job was canceled while this task was pending or running.
    #[error("Task {seq_num} ({process_id}) canceled")]
    Cancelled {
        /// Interrupted task.
        seq_num: u32,
        /// Process of the interrupted task.
        process_id: String,
    },

    /// No image source is registered for a process.
    #[error("No image registered for process '{0}'")]
    UnknownImage(String),

    /// Volume hand-off between tasks is inconsistent.
    #[error("Volume error: {0}")]
    Volume(#[from] VolumeError),

    /// Recording task progress failed.
    #[error("Observer error: {0}")]
    Observer(String),
}

impl EngineError {
    /// Whether the run stopped because of cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, EngineError::Cancelled { .. })
    }

    /// Underlying cluster error, if any.
    pub fn cluster_error(&self) -> Option<&ClusterError> {
        match self {
            EngineError::TaskFailed { source, .. } => source.cluster_error(),
            _ => None,
        }
    }

    /// Logs captured from the failing resource.
    pub fn logs(&self) -> Option<&str> {
        match self {
            EngineError::TaskFailed { logs, .. } => logs.as_deref(),
            _ => None,
        }
    }
}

/// Job execution service errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ServiceError {
    /// The submitted process graph is invalid.
    #[error("Validation failed: {0}")]
    Validation(#[from] GraphValidationError),

    /// A compiled task has no image source.
    #[error("No image registered for process '{0}'")]
    MissingImage(String),

    /// Job does not exist.
    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// The requested status change is not allowed from the current status.
    #[error("Invalid transition for job {job_id}: {from} -> {to}")]
    InvalidTransition {
        /// Job id.
        job_id: String,
        /// Current status.
        from: JobStatus,
        /// Requested status.
        to: JobStatus,
    },

    /// The cluster cannot be reached.
    #[error("Cluster unavailable: {0}")]
    ClusterUnavailable(ClusterError),

    /// Job store failed.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Orchestration failed outside of a task.
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),
}
