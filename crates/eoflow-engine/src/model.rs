// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Job and task records.
//!
//! Status transitions only move forward:
//!
//! ```text
//! created ──▶ queued ──▶ running ──▶ finished
//!               │           │  └────▶ error
//!               └───────────┴───────▶ canceled
//! ```

use chrono::{DateTime, Utc};
use eoflow_graph::TaskSpec;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Status of a job.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum JobStatus {
    /// Validated and stored, not yet scheduled.
    Created,
    /// Scheduled, waiting for its worker.
    Queued,
    /// Tasks are executing.
    Running,
    /// Canceled by the user.
    Canceled,
    /// Every task finished.
    Finished,
    /// A task failed.
    Error,
}

impl JobStatus {
    /// States a job may be in before moving to `self`.
    pub fn predecessors(self) -> &'static [JobStatus] {
        match self {
            JobStatus::Created => &[],
            JobStatus::Queued => &[JobStatus::Created],
            JobStatus::Running => &[JobStatus::Queued],
            JobStatus::Finished | JobStatus::Error => &[JobStatus::Running],
            JobStatus::Canceled => &[JobStatus::Queued, JobStatus::Running],
        }
    }

    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        next.predecessors().contains(&self)
    }

    /// Whether no further transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Canceled | JobStatus::Finished | JobStatus::Error
        )
    }
}

/// Status of a task.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TaskStatus {
    /// Stored with its job.
    Created,
    /// Waiting for its turn.
    Queued,
    /// Resources are being provisioned or the batch job is running.
    Running,
    /// Batch job succeeded.
    Finished,
    /// Job was canceled before this task finished.
    Canceled,
    /// Task failed.
    Error,
}

impl TaskStatus {
    /// States a task is still pending in; canceling a job cancels these.
    pub const PENDING: [TaskStatus; 3] = [
        TaskStatus::Created,
        TaskStatus::Queued,
        TaskStatus::Running,
    ];

    /// Whether the task has not reached a final state.
    pub fn is_pending(self) -> bool {
        Self::PENDING.contains(&self)
    }
}

/// A submitted process graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Job id (uuid v4).
    pub id: String,
    /// Submitting user.
    pub user_id: String,
    /// Process graph as submitted.
    pub process_graph: Value,
    /// Output specification, when the submission carried one.
    pub output: Option<Value>,
    /// Current status.
    pub status: JobStatus,
    /// Failure message.
    pub error: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last status change.
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// A new job in `created`.
    pub fn new(
        id: impl Into<String>,
        user_id: impl Into<String>,
        process_graph: Value,
        output: Option<Value>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            user_id: user_id.into(),
            process_graph,
            output,
            status: JobStatus::Created,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// One compiled step of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Task id (uuid v4).
    pub id: String,
    /// Owning job.
    pub job_id: String,
    /// Process the task runs.
    pub process_id: String,
    /// Position in execution order.
    pub seq_num: u32,
    /// Current status.
    pub status: TaskStatus,
    /// Arguments handed to the process container.
    pub args: Map<String, Value>,
    /// Sequence numbers of the tasks whose output this task reads.
    pub depends_on: Vec<u32>,
    /// Failure message.
    pub error: Option<String>,
    /// Build and container logs.
    pub logs: Option<String>,
    /// Resource metrics of the batch job, keyed by pod name.
    pub metrics: Option<Value>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update.
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// A new task in `created` from its compiled form.
    pub fn from_spec(id: impl Into<String>, job_id: impl Into<String>, spec: TaskSpec) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            job_id: job_id.into(),
            process_id: spec.process_id,
            seq_num: spec.seq_num,
            status: TaskStatus::Created,
            args: spec.args,
            depends_on: spec.depends_on,
            error: None,
            logs: None,
            metrics: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update of a task record. `None` fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskUpdate {
    /// New status.
    pub status: Option<TaskStatus>,
    /// Failure message.
    pub error: Option<String>,
    /// Logs.
    pub logs: Option<String>,
    /// Metrics.
    pub metrics: Option<Value>,
}

impl TaskUpdate {
    /// Change only the status.
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Set the failure message.
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Set the logs.
    pub fn with_logs(mut self, logs: Option<String>) -> Self {
        self.logs = logs;
        self
    }

    /// Set the metrics.
    pub fn with_metrics(mut self, metrics: Option<Value>) -> Self {
        self.metrics = metrics;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::str::FromStr;

    const ALL: [JobStatus; 6] = [
        JobStatus::Created,
        JobStatus::Queued,
        JobStatus::Running,
        JobStatus::Canceled,
        JobStatus::Finished,
        JobStatus::Error,
    ];

    #[test]
    fn test_forward_transitions() {
        assert!(JobStatus::Created.can_transition_to(JobStatus::Queued));
        assert!(JobStatus::Queued.can_transition_to(JobStatus::Running));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Finished));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Error));
        assert!(JobStatus::Queued.can_transition_to(JobStatus::Canceled));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Canceled));
    }

    #[test]
    fn test_illegal_transitions() {
        assert!(!JobStatus::Created.can_transition_to(JobStatus::Running));
        assert!(!JobStatus::Created.can_transition_to(JobStatus::Canceled));
        assert!(!JobStatus::Queued.can_transition_to(JobStatus::Finished));
        assert!(!JobStatus::Running.can_transition_to(JobStatus::Queued));

        for status in ALL.into_iter().filter(|s| s.is_terminal()) {
            for next in ALL {
                assert!(
                    !status.can_transition_to(next),
                    "{} -> {} must be rejected",
                    status,
                    next
                );
            }
        }
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(JobStatus::Canceled.to_string(), "canceled");
        assert_eq!(JobStatus::from_str("running").unwrap(), JobStatus::Running);
        assert_eq!(TaskStatus::from_str("error").unwrap(), TaskStatus::Error);
        assert!(JobStatus::from_str("cancelled").is_err());
        assert_eq!(json!(TaskStatus::Finished), json!("finished"));
    }

    #[test]
    fn test_pending_task_states() {
        assert!(TaskStatus::Created.is_pending());
        assert!(TaskStatus::Running.is_pending());
        assert!(!TaskStatus::Finished.is_pending());
        assert!(!TaskStatus::Error.is_pending());
    }

    #[test]
    fn test_task_from_spec() {
        let spec = TaskSpec {
            seq_num: 1,
            process_id: "min_time".to_string(),
            args: Map::new(),
            depends_on: vec![0],
        };

        let task = Task::from_spec("t-1", "job-1", spec);

        assert_eq!(task.status, TaskStatus::Created);
        assert_eq!(task.seq_num, 1);
        assert_eq!(task.depends_on, vec![0]);
        assert!(task.logs.is_none());
    }
}
