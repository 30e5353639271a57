// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Job execution for eoflow.
//!
//! Ties the graph compiler and the cluster templates together:
//!
//! ```text
//!   submit(request)
//!        │ compile (eoflow-graph)
//!        ▼
//! ┌──────────────┐   insert job + tasks   ┌──────────────┐
//! │ JobExecution │───────────────────────▶│   JobStore   │
//! │   Service    │◀─── TaskObserver ──────│   (sqlite)   │
//! └──────┬───────┘                        └──────────────┘
//!        │ start_processing: spawn worker
//!        ▼
//! ┌──────────────┐   VolumeArena   ┌──────────────────────────────┐
//! │Orchestration │────────────────▶│ volume · config · image ·    │
//! │   Engine     │  dyn Connector  │ batch job  (eoflow-cluster)  │
//! └──────────────┘                 └──────────────────────────────┘
//! ```
//!
//! Job states move forward only, see [`model`]. Canceling a job trips the
//! worker's [`CancellationToken`](tokio_util::sync::CancellationToken); the
//! engine then deletes whatever the current task created.

#![deny(missing_docs)]

pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod model;
pub mod service;
pub mod store;
pub mod volumes;

pub use catalog::{CatalogError, ImageCatalog, ImageSpec};
pub use config::{ConfigError, EngineConfig};
pub use engine::{Deployment, OrchestrationEngine, TaskObserver, TaskOutcome, data_path};
pub use error::{EngineError, Result, ServiceError, StoreError};
pub use model::{Job, JobStatus, Task, TaskStatus, TaskUpdate};
pub use service::JobExecutionService;
pub use store::{JobStore, SqliteJobStore};
pub use volumes::{HeldVolume, VolumeArena, VolumeError};
