// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! eoflow engine - run one process graph submission against a cluster.
//!
//! Usage: `eoflow-engine <request.json> [user-id]`
//!
//! Submits the request, runs the job to completion and prints the task
//! summary. Ctrl-C cancels the job and waits for cleanup.

use std::sync::Arc;

use anyhow::Context;
use eoflow_cluster::RestConnector;
use eoflow_engine::{
    EngineConfig, JobExecutionService, JobStore, OrchestrationEngine, SqliteJobStore,
};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "eoflow_engine=info,eoflow_cluster=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    let mut args = std::env::args().skip(1);
    let request_path = args
        .next()
        .context("usage: eoflow-engine <request.json> [user-id]")?;
    let user_id = args.next().unwrap_or_else(|| "anonymous".to_string());

    let config = EngineConfig::from_env()?;
    info!(
        cluster = %config.cluster.api_url,
        namespace = %config.cluster.namespace,
        database = %config.database_url,
        "Starting eoflow engine"
    );

    let request: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(&request_path)
            .with_context(|| format!("Failed to read {}", request_path))?,
    )?;

    let store: Arc<dyn JobStore> = Arc::new(SqliteJobStore::from_url(&config.database_url).await?);
    let connector = Arc::new(RestConnector::new(&config.cluster)?);
    let registries = config.registries()?;
    let engine = OrchestrationEngine::new(connector, config.load_image_catalog()?, config);
    let service = JobExecutionService::new(store, engine, registries);

    service.health_check().await?;
    info!("Job store and cluster reachable");

    let job = service.submit(&user_id, &request).await?;
    let mut worker = service.start_processing(&job.id).await?;

    let status = tokio::select! {
        result = &mut worker => result??,
        _ = tokio::signal::ctrl_c() => {
            info!(job_id = %job.id, "Shutdown signal received, canceling job");
            service.cancel(&job.id).await?;
            worker.await??
        }
    };

    for task in service.list_tasks(&job.id).await? {
        info!(
            seq_num = task.seq_num,
            process_id = %task.process_id,
            status = %task.status,
            error = task.error.as_deref().unwrap_or(""),
            "Task"
        );
    }
    info!(job_id = %job.id, status = %status, "Job done");

    Ok(())
}
