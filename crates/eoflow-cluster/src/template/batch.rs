// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Batch job template: one container running a task to completion.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use super::{
    ManagedResource, Observed, Readiness, ResourceKind, ResourceTemplate, count_at, sanitize_name,
    str_at, template_id,
};
use crate::connector::{Api, Connector, Verb};
use crate::document::{
    ClaimSource, ConfigMapSource, Container, JOB_LABEL, Job, JobSpec, ObjectMeta, PROCESS_LABEL,
    PodSpec, PodTemplateSpec, PodVolume, ResourceRequirements, TASK_LABEL, VolumeMount,
};
use crate::error::ClusterError;

const BACKOFF_LIMIT: u32 = 2;

/// What backs a mount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountSource {
    /// A persistent volume claim, by name.
    Claim(String),
    /// A config map, by name.
    ConfigMap(String),
}

/// One mount of the task container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    /// What backs the mount.
    pub source: MountSource,
    /// Path inside the container.
    pub mount_path: String,
    /// Mount read-only.
    pub read_only: bool,
    /// Sub path of the source to mount.
    pub sub_path: Option<String>,
}

impl Mount {
    /// Mount a claim read-write.
    pub fn claim(claim: impl Into<String>, mount_path: impl Into<String>) -> Self {
        Self {
            source: MountSource::Claim(claim.into()),
            mount_path: mount_path.into(),
            read_only: false,
            sub_path: None,
        }
    }

    /// Mount a config map.
    pub fn config_map(name: impl Into<String>, mount_path: impl Into<String>) -> Self {
        Self {
            source: MountSource::ConfigMap(name.into()),
            mount_path: mount_path.into(),
            read_only: true,
            sub_path: None,
        }
    }

    /// Make the mount read-only.
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Mount only a sub path of the source.
    pub fn with_sub_path(mut self, sub_path: impl Into<String>) -> Self {
        self.sub_path = Some(sub_path.into());
        self
    }

    fn source_name(&self) -> &str {
        match &self.source {
            MountSource::Claim(name) | MountSource::ConfigMap(name) => name,
        }
    }
}

/// CPU and memory requests and limits of a task container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeResources {
    /// CPU request, e.g. `500m`.
    pub cpu_request: String,
    /// CPU limit.
    pub cpu_limit: String,
    /// Memory request, e.g. `1Gi`.
    pub memory_request: String,
    /// Memory limit.
    pub memory_limit: String,
}

impl Default for ComputeResources {
    fn default() -> Self {
        Self {
            cpu_request: "500m".to_string(),
            cpu_limit: "1".to_string(),
            memory_request: "1Gi".to_string(),
            memory_limit: "2Gi".to_string(),
        }
    }
}

impl ComputeResources {
    fn requirements(&self) -> ResourceRequirements {
        ResourceRequirements {
            requests: BTreeMap::from([
                ("cpu".to_string(), self.cpu_request.clone()),
                ("memory".to_string(), self.memory_request.clone()),
            ]),
            limits: BTreeMap::from([
                ("cpu".to_string(), self.cpu_limit.clone()),
                ("memory".to_string(), self.memory_limit.clone()),
            ]),
        }
    }
}

/// A batch job running one task container.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchJobTemplate {
    metadata: ObjectMeta,
    container: String,
    image: String,
    mounts: Vec<Mount>,
    resources: ComputeResources,
}

impl BatchJobTemplate {
    /// Job running `image` for one task.
    pub fn for_task(job_id: &str, task_id: &str, process_id: &str, image: &str) -> Self {
        Self {
            metadata: ObjectMeta::new(template_id(ResourceKind::BatchJob, job_id, task_id))
                .with_label(JOB_LABEL, job_id)
                .with_label(TASK_LABEL, task_id)
                .with_label(PROCESS_LABEL, sanitize_name(process_id)),
            container: sanitize_name(process_id),
            image: image.to_string(),
            mounts: Vec::new(),
            resources: ComputeResources::default(),
        }
    }

    /// Add a mount.
    pub fn with_mount(mut self, mount: Mount) -> Self {
        self.mounts.push(mount);
        self
    }

    /// Set requests and limits.
    pub fn with_resources(mut self, resources: ComputeResources) -> Self {
        self.resources = resources;
        self
    }

    /// Mounts, in declaration order.
    pub fn mounts(&self) -> &[Mount] {
        &self.mounts
    }

    /// Image the container runs.
    pub fn image(&self) -> &str {
        &self.image
    }

    fn pod_volumes(&self) -> Vec<PodVolume> {
        let mut volumes: Vec<PodVolume> = Vec::new();
        for mount in &self.mounts {
            let name = mount.source_name();
            if volumes.iter().any(|v| v.name == name) {
                continue;
            }
            volumes.push(match &mount.source {
                MountSource::Claim(claim) => PodVolume {
                    name: claim.clone(),
                    persistent_volume_claim: Some(ClaimSource {
                        claim_name: claim.clone(),
                        read_only: mount.read_only,
                    }),
                    config_map: None,
                },
                MountSource::ConfigMap(config) => PodVolume {
                    name: config.clone(),
                    persistent_volume_claim: None,
                    config_map: Some(ConfigMapSource {
                        name: config.clone(),
                    }),
                },
            });
        }
        volumes
    }
}

impl ResourceTemplate for BatchJobTemplate {
    fn kind(&self) -> ResourceKind {
        ResourceKind::BatchJob
    }

    fn name(&self) -> &str {
        &self.metadata.name
    }

    fn document(&self) -> Value {
        let volume_mounts = self
            .mounts
            .iter()
            .map(|mount| VolumeMount {
                name: mount.source_name().to_string(),
                mount_path: mount.mount_path.clone(),
                read_only: mount.read_only,
                sub_path: mount.sub_path.clone(),
            })
            .collect();

        json!(Job {
            api_version: "batch/v1".to_string(),
            kind: "Job".to_string(),
            metadata: self.metadata.clone(),
            spec: JobSpec {
                backoff_limit: Some(BACKOFF_LIMIT),
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        name: self.metadata.name.clone(),
                        labels: self.metadata.labels.clone(),
                    }),
                    spec: PodSpec {
                        containers: vec![Container {
                            name: self.container.clone(),
                            image: self.image.clone(),
                            volume_mounts,
                            resources: self.resources.requirements(),
                        }],
                        volumes: self.pod_volumes(),
                        restart_policy: "OnFailure".to_string(),
                    },
                },
            },
        })
    }

    fn readiness(&self, observed: &Observed<'_>) -> Readiness {
        let status = observed.instance;
        if count_at(status, "/status/succeeded") > 0 {
            return Readiness::Ready;
        }
        if count_at(status, "/status/failed") > 0 {
            let reason = status
                .pointer("/status/conditions")
                .and_then(Value::as_array)
                .and_then(|conditions| {
                    conditions
                        .iter()
                        .find(|c| c.get("type").and_then(Value::as_str) == Some("Failed"))
                })
                .and_then(|c| str_at(c, "/message").or_else(|| str_at(c, "/reason")))
                .unwrap_or("job pod failed");
            return Readiness::Failed(reason.to_string());
        }
        if count_at(status, "/status/active") > 0 {
            return Readiness::Running;
        }
        Readiness::Pending
    }

    fn pod_selector(&self) -> Option<String> {
        Some(format!("job-name={}", self.metadata.name))
    }
}

impl ManagedResource<BatchJobTemplate> {
    /// Fetch the given metric series for the job's pod.
    ///
    /// Returns series name to raw data points. Series the metrics service
    /// has no data for are absent. Requires the pod to be known, i.e. a
    /// completed watch.
    pub async fn metrics(
        &self,
        connector: &dyn Connector,
        series: &[String],
    ) -> Result<BTreeMap<String, Value>, ClusterError> {
        let mut metrics = BTreeMap::new();
        let Some(pod) = self.links.pod.as_deref() else {
            return Ok(metrics);
        };

        for descriptor in series {
            let path = format!(
                "/gauges/data?tags=descriptor_name:{},pod_name:{}",
                urlencoding::encode(descriptor),
                urlencoding::encode(pod)
            );
            let data = connector
                .request(Api::Metrics, Verb::Get, &path, None)
                .await?
                .into_json()?;
            if !data.is_null() {
                metrics.insert(descriptor.clone(), data);
            }
        }

        debug!(pod = %pod, series = metrics.len(), "Fetched job metrics");
        Ok(metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template() -> BatchJobTemplate {
        BatchJobTemplate::for_task("job-1", "task-2", "NDVI", "registry/ns/ndvi:latest")
            .with_mount(Mount::claim("pvc-eodc", "/eodc").read_only())
            .with_mount(Mount::config_map("cfg-1", "/job_config"))
            .with_mount(Mount::claim("vol-out", "/job_data/job-1/task-2"))
            .with_mount(Mount::claim("pvc-results", "/job_results").with_sub_path("job-1"))
    }

    #[test]
    fn test_job_document() {
        let doc = template().document();
        let pod = &doc["spec"]["template"]["spec"];
        let container = &pod["containers"][0];

        assert_eq!(doc["apiVersion"], "batch/v1");
        assert_eq!(pod["restartPolicy"], "OnFailure");
        assert_eq!(container["name"], "ndvi");
        assert_eq!(container["image"], "registry/ns/ndvi:latest");
        assert_eq!(container["resources"]["limits"]["memory"], "2Gi");
        assert_eq!(container["volumeMounts"].as_array().unwrap().len(), 4);
        assert_eq!(container["volumeMounts"][0]["readOnly"], true);
        assert_eq!(container["volumeMounts"][3]["subPath"], "job-1");
        assert_eq!(pod["volumes"][1]["configMap"]["name"], "cfg-1");
        assert_eq!(pod["volumes"][0]["persistentVolumeClaim"]["readOnly"], true);
    }

    #[test]
    fn test_shared_source_yields_one_pod_volume() {
        let template = BatchJobTemplate::for_task("j", "t", "convert", "img")
            .with_mount(Mount::claim("vol-a", "/in/a"))
            .with_mount(Mount::claim("vol-a", "/in/b"));
        let doc = template.document();
        assert_eq!(doc["spec"]["template"]["spec"]["volumes"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_readiness() {
        let template = template();
        let cases = [
            (json!({"status": {}}), Readiness::Pending),
            (json!({"status": {"active": 1}}), Readiness::Running),
            (json!({"status": {"succeeded": 1}}), Readiness::Ready),
            (
                json!({"status": {"failed": 3, "conditions": [
                    {"type": "Failed", "reason": "BackoffLimitExceeded"}
                ]}}),
                Readiness::Failed("BackoffLimitExceeded".to_string()),
            ),
        ];

        for (instance, expected) in cases {
            let observed = Observed {
                instance: &instance,
                pod: None,
            };
            assert_eq!(template.readiness(&observed), expected);
        }
        assert_eq!(
            template.pod_selector().as_deref(),
            Some(format!("job-name={}", template.name()).as_str())
        );
    }
}
