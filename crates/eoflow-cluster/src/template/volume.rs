// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Volume template: a persistent volume claim holding one task's output.

use std::collections::BTreeMap;

use serde_json::{Value, json};

use super::{Observed, Readiness, ResourceKind, ResourceTemplate, str_at, template_id};
use crate::config::ClusterConfig;
use crate::document::{
    JOB_LABEL, ObjectMeta, PersistentVolumeClaim, PersistentVolumeClaimSpec, ResourceRequirements,
    TASK_LABEL,
};

/// A `ReadWriteOnce` claim, ready once bound.
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeTemplate {
    metadata: ObjectMeta,
    storage_class: Option<String>,
    size: String,
}

impl VolumeTemplate {
    /// Claim with an explicit name and size.
    pub fn new(name: impl Into<String>, size: impl Into<String>) -> Self {
        Self {
            metadata: ObjectMeta::new(name),
            storage_class: None,
            size: size.into(),
        }
    }

    /// Output claim of a task, sized and classed from configuration.
    pub fn for_task(job_id: &str, task_id: &str, config: &ClusterConfig) -> Self {
        let name = template_id(ResourceKind::Volume, job_id, task_id);
        let mut template = Self::new(name, config.volume_size.clone());
        template.metadata = template
            .metadata
            .with_label(JOB_LABEL, job_id)
            .with_label(TASK_LABEL, task_id);
        template.storage_class = config.storage_class.clone();
        template
    }

    /// Use a storage class instead of the cluster default.
    pub fn with_storage_class(mut self, class: impl Into<String>) -> Self {
        self.storage_class = Some(class.into());
        self
    }

    /// Requested size.
    pub fn size(&self) -> &str {
        &self.size
    }
}

impl ResourceTemplate for VolumeTemplate {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Volume
    }

    fn name(&self) -> &str {
        &self.metadata.name
    }

    fn document(&self) -> Value {
        let claim = PersistentVolumeClaim {
            api_version: "v1".to_string(),
            kind: "PersistentVolumeClaim".to_string(),
            metadata: self.metadata.clone(),
            spec: PersistentVolumeClaimSpec {
                storage_class_name: self.storage_class.clone(),
                access_modes: vec!["ReadWriteOnce".to_string()],
                resources: ResourceRequirements {
                    requests: BTreeMap::from([("storage".to_string(), self.size.clone())]),
                    limits: BTreeMap::new(),
                },
            },
        };
        json!(claim)
    }

    fn readiness(&self, observed: &Observed<'_>) -> Readiness {
        match str_at(observed.instance, "/status/phase") {
            Some("Bound") => Readiness::Ready,
            Some("Lost") => Readiness::Failed("claim lost its volume".to_string()),
            _ => Readiness::Pending,
        }
    }
}
