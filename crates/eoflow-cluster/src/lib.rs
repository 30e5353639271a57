// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cluster access for eoflow.
//!
//! This crate talks to a Kubernetes/OpenShift control plane and manages the
//! four kinds of objects a task needs:
//!
//! | Template | Cluster object | Ready when |
//! |----------|----------------|------------|
//! | [`VolumeTemplate`] | PersistentVolumeClaim | `status.phase == Bound` |
//! | [`ImageBuild`] | ImageStream + Build | repository assigned and build pod `Succeeded` |
//! | [`ConfigTemplate`] | ConfigMap | object carries the submitted data |
//! | [`BatchJobTemplate`] | Job | `status.succeeded` present |
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                  ManagedResource<T>                     │
//! │   create (409 → delete + retry once) · watch · delete   │
//! └────────────────────────────┬────────────────────────────┘
//!                              │ dyn Connector
//!               ┌──────────────┴──────────────┐
//!               ▼                             ▼
//!      ┌─────────────────┐           ┌─────────────────┐
//!      │  RestConnector  │           │   MockCluster   │
//!      │  reqwest, TLS   │           │   in-memory     │
//!      └────────┬────────┘           └─────────────────┘
//!               │
//!      control plane API · metrics API
//! ```
//!
//! Connectors perform single requests with connect/read timeouts and never
//! retry. The only automatic retry anywhere is the single delete-and-recreate
//! after a create conflict.

#![deny(missing_docs)]

pub mod config;
pub mod connector;
pub mod document;
pub mod error;
pub mod template;

pub use config::{ClusterConfig, ConfigError, DEFAULT_METRICS};
pub use connector::{Api, Connector, Document, MockCluster, RestConnector, Verb};
pub use error::{ClusterError, LifecycleError, Result};
pub use template::{
    BatchJobTemplate, BuildSource, BuildTemplate, BuiltImage, CONFIG_FILE, ComputeResources,
    ConfigTemplate, INPUT_MOUNTS_FILE, ImageBuild, ImageStreamTemplate, ManagedResource, Mount,
    MountSource, Observed, Readiness, ResourceKind, ResourceStatus, ResourceTemplate, SelfLinks,
    VolumeTemplate, WatchControl, sanitize_name, template_id,
};
