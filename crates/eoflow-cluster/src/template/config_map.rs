// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Config template: task arguments and input mount paths as a config map.

use std::collections::BTreeMap;

use serde_json::{Map, Value, json};

use super::{Observed, Readiness, ResourceKind, ResourceTemplate, template_id};
use crate::document::{ConfigMap, JOB_LABEL, ObjectMeta, TASK_LABEL};

/// File holding the task arguments.
pub const CONFIG_FILE: &str = "config.json";

/// File listing the mount paths of upstream outputs.
pub const INPUT_MOUNTS_FILE: &str = "input_mounts.json";

/// A config map, ready once it carries the submitted data.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigTemplate {
    metadata: ObjectMeta,
    data: BTreeMap<String, String>,
}

impl ConfigTemplate {
    /// Config map for one task.
    pub fn for_task(
        job_id: &str,
        task_id: &str,
        args: &Map<String, Value>,
        input_mounts: &[String],
    ) -> Self {
        let data = BTreeMap::from([
            (CONFIG_FILE.to_string(), Value::Object(args.clone()).to_string()),
            (INPUT_MOUNTS_FILE.to_string(), json!(input_mounts).to_string()),
        ]);
        Self {
            metadata: ObjectMeta::new(template_id(ResourceKind::Config, job_id, task_id))
                .with_label(JOB_LABEL, job_id)
                .with_label(TASK_LABEL, task_id),
            data,
        }
    }

    /// Submitted data.
    pub fn data(&self) -> &BTreeMap<String, String> {
        &self.data
    }
}

impl ResourceTemplate for ConfigTemplate {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Config
    }

    fn name(&self) -> &str {
        &self.metadata.name
    }

    fn document(&self) -> Value {
        json!(ConfigMap {
            api_version: "v1".to_string(),
            kind: "ConfigMap".to_string(),
            metadata: self.metadata.clone(),
            data: self.data.clone(),
        })
    }

    fn readiness(&self, observed: &Observed<'_>) -> Readiness {
        let stored = observed.instance.get("data");
        let complete = self.data.iter().all(|(key, value)| {
            stored.and_then(|d| d.get(key)).and_then(Value::as_str) == Some(value.as_str())
        });
        if complete {
            Readiness::Ready
        } else {
            Readiness::Pending
        }
    }
}
