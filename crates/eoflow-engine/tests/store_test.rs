// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Job store tests on in-memory SQLite.

mod common;

use eoflow_engine::{Job, JobStatus, JobStore, SqliteJobStore, Task, TaskStatus, TaskUpdate};
use eoflow_graph::TaskSpec;
use serde_json::{Map, json};

fn job(id: &str) -> Job {
    Job::new(
        id,
        "user-1",
        json!({"process_id": "min_time"}),
        Some(json!({"format": "GTiff"})),
    )
}

fn task(job_id: &str, seq_num: u32, process_id: &str, depends_on: Vec<u32>) -> Task {
    let mut args = Map::new();
    args.insert("job_id".to_string(), json!(job_id));
    Task::from_spec(
        format!("{}-task-{}", job_id, seq_num),
        job_id,
        TaskSpec {
            seq_num,
            process_id: process_id.to_string(),
            args,
            depends_on,
        },
    )
}

async fn stored_job(store: &SqliteJobStore, id: &str) {
    let tasks = vec![
        task(id, 2, "convert", vec![1]),
        task(id, 0, "filter-s2", vec![]),
        task(id, 1, "min_time", vec![0]),
    ];
    store.insert_job_with_tasks(&job(id), &tasks).await.unwrap();
}

#[tokio::test]
async fn test_insert_and_load() {
    let store = common::store().await;
    stored_job(&store, "job-1").await;

    let loaded = store.get_job("job-1").await.unwrap().unwrap();
    assert_eq!(loaded.status, JobStatus::Created);
    assert_eq!(loaded.user_id, "user-1");
    assert_eq!(loaded.process_graph["process_id"], "min_time");
    assert_eq!(loaded.output, Some(json!({"format": "GTiff"})));

    let tasks = store.list_tasks("job-1").await.unwrap();
    let order: Vec<(u32, &str)> = tasks
        .iter()
        .map(|t| (t.seq_num, t.process_id.as_str()))
        .collect();
    assert_eq!(
        order,
        vec![(0, "filter-s2"), (1, "min_time"), (2, "convert")]
    );
    assert_eq!(tasks[2].depends_on, vec![1]);
    assert_eq!(tasks[2].args["job_id"], "job-1");
    assert!(tasks.iter().all(|t| t.status == TaskStatus::Created));
}

#[tokio::test]
async fn test_missing_job() {
    let store = common::store().await;
    assert!(store.get_job("nope").await.unwrap().is_none());
    assert!(store.list_tasks("nope").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_insert_is_atomic() {
    let store = common::store().await;
    // Duplicate seq_num violates UNIQUE(job_id, seq_num).
    let tasks = vec![
        task("job-1", 0, "filter-s2", vec![]),
        Task {
            id: "other".to_string(),
            ..task("job-1", 0, "min_time", vec![])
        },
    ];

    assert!(store.insert_job_with_tasks(&job("job-1"), &tasks).await.is_err());
    assert!(store.get_job("job-1").await.unwrap().is_none());
    assert!(store.list_tasks("job-1").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_transitions_are_conditional() {
    let store = common::store().await;
    stored_job(&store, "job-1").await;

    assert!(!store.transition_job("job-1", JobStatus::Running, None).await.unwrap());
    assert!(store.transition_job("job-1", JobStatus::Queued, None).await.unwrap());
    assert!(!store.transition_job("job-1", JobStatus::Queued, None).await.unwrap());
    assert!(store.transition_job("job-1", JobStatus::Running, None).await.unwrap());
    assert!(
        store
            .transition_job("job-1", JobStatus::Error, Some("task 1 failed"))
            .await
            .unwrap()
    );
    assert!(!store.transition_job("job-1", JobStatus::Canceled, None).await.unwrap());
    assert!(!store.transition_job("job-1", JobStatus::Finished, None).await.unwrap());

    let loaded = store.get_job("job-1").await.unwrap().unwrap();
    assert_eq!(loaded.status, JobStatus::Error);
    assert_eq!(loaded.error.as_deref(), Some("task 1 failed"));
    assert!(loaded.updated_at >= loaded.created_at);
}

#[tokio::test]
async fn test_transition_unknown_job() {
    let store = common::store().await;
    assert!(!store.transition_job("nope", JobStatus::Queued, None).await.unwrap());
    assert!(!store.transition_job("nope", JobStatus::Created, None).await.unwrap());
}

#[tokio::test]
async fn test_update_task_keeps_unset_fields() {
    let store = common::store().await;
    stored_job(&store, "job-1").await;
    let task_id = "job-1-task-1";

    store
        .update_task(
            task_id,
            &TaskUpdate::status(TaskStatus::Finished)
                .with_logs(Some("done\n".to_string()))
                .with_metrics(Some(json!({"pod-1": {"memory/usage": [1, 2]}}))),
        )
        .await
        .unwrap();
    store
        .update_task(task_id, &TaskUpdate::default().with_error("late error"))
        .await
        .unwrap();

    let tasks = store.list_tasks("job-1").await.unwrap();
    let updated = &tasks[1];
    assert_eq!(updated.status, TaskStatus::Finished);
    assert_eq!(updated.logs.as_deref(), Some("done\n"));
    assert_eq!(updated.metrics.as_ref().unwrap()["pod-1"]["memory/usage"][1], 2);
    assert_eq!(updated.error.as_deref(), Some("late error"));
    assert_eq!(tasks[0].status, TaskStatus::Created);
}

#[tokio::test]
async fn test_cancel_pending_tasks() {
    let store = common::store().await;
    stored_job(&store, "job-1").await;
    stored_job(&store, "job-2").await;
    store
        .update_task("job-1-task-0", &TaskUpdate::status(TaskStatus::Finished))
        .await
        .unwrap();
    store
        .update_task("job-1-task-1", &TaskUpdate::status(TaskStatus::Running))
        .await
        .unwrap();

    let canceled = store.cancel_pending_tasks("job-1").await.unwrap();

    assert_eq!(canceled, 2);
    let statuses: Vec<TaskStatus> = store
        .list_tasks("job-1")
        .await
        .unwrap()
        .iter()
        .map(|t| t.status)
        .collect();
    assert_eq!(
        statuses,
        vec![TaskStatus::Finished, TaskStatus::Canceled, TaskStatus::Canceled]
    );
    assert!(
        store
            .list_tasks("job-2")
            .await
            .unwrap()
            .iter()
            .all(|t| t.status == TaskStatus::Created)
    );
}

#[tokio::test]
async fn test_terminal_task_status_is_final() {
    let store = common::store().await;
    stored_job(&store, "job-1").await;
    store
        .update_task("job-1-task-0", &TaskUpdate::status(TaskStatus::Finished))
        .await
        .unwrap();
    store.cancel_pending_tasks("job-1").await.unwrap();

    store
        .update_task("job-1-task-1", &TaskUpdate::status(TaskStatus::Running))
        .await
        .unwrap();
    store
        .update_task(
            "job-1-task-0",
            &TaskUpdate::status(TaskStatus::Error).with_error("late failure"),
        )
        .await
        .unwrap();

    let tasks = store.list_tasks("job-1").await.unwrap();
    assert_eq!(tasks[1].status, TaskStatus::Canceled);
    assert_eq!(tasks[0].status, TaskStatus::Finished);
    assert_eq!(tasks[0].error.as_deref(), Some("late failure"));
}

#[tokio::test]
async fn test_file_database_persists() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite:{}", dir.path().join("jobs.db").display());

    {
        let store = SqliteJobStore::from_url(&url).await.unwrap();
        stored_job(&store, "job-1").await;
        store.pool().close().await;
    }

    let reopened = SqliteJobStore::from_url(&url).await.unwrap();
    reopened.health_check().await.unwrap();
    assert!(reopened.get_job("job-1").await.unwrap().is_some());
    assert_eq!(reopened.list_tasks("job-1").await.unwrap().len(), 3);
}
