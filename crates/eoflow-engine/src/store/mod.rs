// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persistence of jobs and tasks.

pub mod sqlite;

pub use self::sqlite::SqliteJobStore;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::model::{Job, JobStatus, Task, TaskUpdate};

/// Storage for job and task records.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a job and all of its tasks atomically.
    async fn insert_job_with_tasks(&self, job: &Job, tasks: &[Task]) -> Result<(), StoreError>;

    /// Load a job.
    async fn get_job(&self, job_id: &str) -> Result<Option<Job>, StoreError>;

    /// Tasks of a job in sequence order.
    async fn list_tasks(&self, job_id: &str) -> Result<Vec<Task>, StoreError>;

    /// Move a job to `to` if its current status is one of
    /// [`JobStatus::predecessors`]. Returns whether the job changed.
    ///
    /// `error` replaces the stored message when given.
    async fn transition_job(
        &self,
        job_id: &str,
        to: JobStatus,
        error: Option<&str>,
    ) -> Result<bool, StoreError>;

    /// Apply a partial update to a task.
    ///
    /// The status only changes while the task is pending. A finished,
    /// failed or canceled task keeps its status; the other fields still apply.
    async fn update_task(&self, task_id: &str, update: &TaskUpdate) -> Result<(), StoreError>;

    /// Mark every pending task of a job as canceled. Returns how many changed.
    async fn cancel_pending_tasks(&self, job_id: &str) -> Result<u64, StoreError>;

    /// Check that the store is reachable.
    async fn health_check(&self) -> Result<(), StoreError>;
}
