// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed job store.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tracing::debug;

use super::JobStore;
use crate::error::StoreError;
use crate::model::{Job, JobStatus, Task, TaskStatus, TaskUpdate};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/sqlite");

/// SQLite-backed job store.
#[derive(Debug, Clone)]
pub struct SqliteJobStore {
    pool: SqlitePool,
}

impl SqliteJobStore {
    /// Create a store on an existing pool. Migrations are not run.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to `url`, creating the database if missing, and run migrations.
    ///
    /// In-memory databases get a single long-lived connection so that every
    /// query sees the same database.
    pub async fn from_url(url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = if url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(5)
                .connect_with(options)
                .await?
        };

        Self::migrate(&pool).await?;
        debug!(url = %url, "Job store ready");
        Ok(Self { pool })
    }

    /// Apply the embedded migrations to `pool`.
    pub async fn migrate(pool: &SqlitePool) -> Result<(), StoreError> {
        MIGRATOR.run(pool).await?;
        Ok(())
    }

    /// The underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[derive(sqlx::FromRow)]
struct JobRow {
    id: String,
    user_id: String,
    process_graph: String,
    output: Option<String>,
    status: String,
    error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<JobRow> for Job {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, StoreError> {
        Ok(Job {
            process_graph: decode(&row.id, "process_graph", &row.process_graph)?,
            output: row
                .output
                .as_deref()
                .map(|output| decode(&row.id, "output", output))
                .transpose()?,
            status: JobStatus::from_str(&row.status).map_err(|_| corrupt(&row.id, "status"))?,
            id: row.id,
            user_id: row.user_id,
            error: row.error,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: String,
    job_id: String,
    process_id: String,
    seq_num: i64,
    status: String,
    args: String,
    depends_on: String,
    error: Option<String>,
    logs: Option<String>,
    metrics: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TaskRow> for Task {
    type Error = StoreError;

    fn try_from(row: TaskRow) -> Result<Self, StoreError> {
        Ok(Task {
            seq_num: u32::try_from(row.seq_num).map_err(|_| corrupt(&row.id, "seq_num"))?,
            status: TaskStatus::from_str(&row.status).map_err(|_| corrupt(&row.id, "status"))?,
            args: decode::<Map<String, Value>>(&row.id, "args", &row.args)?,
            depends_on: decode(&row.id, "depends_on", &row.depends_on)?,
            metrics: row
                .metrics
                .as_deref()
                .map(|metrics| decode(&row.id, "metrics", metrics))
                .transpose()?,
            id: row.id,
            job_id: row.job_id,
            process_id: row.process_id,
            error: row.error,
            logs: row.logs,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn decode<T: serde::de::DeserializeOwned>(id: &str, column: &str, raw: &str) -> Result<T, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::Corrupt {
        id: id.to_string(),
        reason: format!("{}: {}", column, e),
    })
}

fn corrupt(id: &str, column: &str) -> StoreError {
    StoreError::Corrupt {
        id: id.to_string(),
        reason: format!("invalid {}", column),
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn insert_job_with_tasks(&self, job: &Job, tasks: &[Task]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO jobs (id, user_id, process_graph, output, status, error, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.id)
        .bind(&job.user_id)
        .bind(job.process_graph.to_string())
        .bind(job.output.as_ref().map(Value::to_string))
        .bind(job.status.to_string())
        .bind(&job.error)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&mut *tx)
        .await?;

        for task in tasks {
            sqlx::query(
                r#"
                INSERT INTO tasks (id, job_id, process_id, seq_num, status, args, depends_on,
                                   error, logs, metrics, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&task.id)
            .bind(&task.job_id)
            .bind(&task.process_id)
            .bind(i64::from(task.seq_num))
            .bind(task.status.to_string())
            .bind(Value::Object(task.args.clone()).to_string())
            .bind(serde_json::to_string(&task.depends_on)?)
            .bind(&task.error)
            .bind(&task.logs)
            .bind(task.metrics.as_ref().map(Value::to_string))
            .bind(task.created_at)
            .bind(task.updated_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!(job_id = %job.id, tasks = tasks.len(), "Stored job");
        Ok(())
    }

    async fn get_job(&self, job_id: &str) -> Result<Option<Job>, StoreError> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            SELECT id, user_id, process_graph, output, status, error, created_at, updated_at
            FROM jobs
            WHERE id = ?
            "#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Job::try_from).transpose()
    }

    async fn list_tasks(&self, job_id: &str) -> Result<Vec<Task>, StoreError> {
        let rows = sqlx::query_as::<_, TaskRow>(
            r#"
            SELECT id, job_id, process_id, seq_num, status, args, depends_on,
                   error, logs, metrics, created_at, updated_at
            FROM tasks
            WHERE job_id = ?
            ORDER BY seq_num ASC
            "#,
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Task::try_from).collect()
    }

    async fn transition_job(
        &self,
        job_id: &str,
        to: JobStatus,
        error: Option<&str>,
    ) -> Result<bool, StoreError> {
        let from = to.predecessors();
        if from.is_empty() {
            return Ok(false);
        }

        let placeholders = vec!["?"; from.len()].join(", ");
        let sql = format!(
            "UPDATE jobs SET status = ?, error = COALESCE(?, error), updated_at = ? \
             WHERE id = ? AND status IN ({})",
            placeholders
        );

        let mut query = sqlx::query(&sql)
            .bind(to.to_string())
            .bind(error)
            .bind(Utc::now())
            .bind(job_id);
        for status in from {
            query = query.bind(status.to_string());
        }

        let changed = query.execute(&self.pool).await?.rows_affected() > 0;
        debug!(job_id = %job_id, to = %to, changed, "Job transition");
        Ok(changed)
    }

    async fn update_task(&self, task_id: &str, update: &TaskUpdate) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE tasks
            SET status = CASE
                    WHEN status IN (?, ?, ?) THEN COALESCE(?, status)
                    ELSE status
                END,
                error = COALESCE(?, error),
                logs = COALESCE(?, logs),
                metrics = COALESCE(?, metrics),
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(TaskStatus::PENDING[0].to_string())
        .bind(TaskStatus::PENDING[1].to_string())
        .bind(TaskStatus::PENDING[2].to_string())
        .bind(update.status.map(|s| s.to_string()))
        .bind(&update.error)
        .bind(&update.logs)
        .bind(update.metrics.as_ref().map(Value::to_string))
        .bind(Utc::now())
        .bind(task_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn cancel_pending_tasks(&self, job_id: &str) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET status = ?, updated_at = ?
            WHERE job_id = ? AND status IN (?, ?, ?)
            "#,
        )
        .bind(TaskStatus::Canceled.to_string())
        .bind(Utc::now())
        .bind(job_id)
        .bind(TaskStatus::PENDING[0].to_string())
        .bind(TaskStatus::PENDING[1].to_string())
        .bind(TaskStatus::PENDING[2].to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
