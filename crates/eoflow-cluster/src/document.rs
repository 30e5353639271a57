// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Typed desired-state documents for the cluster objects eoflow creates.
//!
//! Only the fields eoflow sets are modelled. Observed state is read back as
//! raw JSON, since status shapes differ between cluster versions.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Label naming the job an object belongs to.
pub const JOB_LABEL: &str = "eoflow.io/job-id";
/// Label naming the task an object belongs to.
pub const TASK_LABEL: &str = "eoflow.io/task-id";
/// Label naming the process an object runs or builds.
pub const PROCESS_LABEL: &str = "eoflow.io/process-id";

// =============================================================================
// Common
// =============================================================================

/// Object metadata.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ObjectMeta {
    /// Object name.
    pub name: String,
    /// Labels.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl ObjectMeta {
    /// Metadata with the standard managed-by label.
    pub fn new(name: impl Into<String>) -> Self {
        let mut labels = BTreeMap::new();
        labels.insert(
            "app.kubernetes.io/managed-by".to_string(),
            "eoflow".to_string(),
        );
        Self {
            name: name.into(),
            labels,
        }
    }

    /// Add a label.
    pub fn with_label(mut self, key: &str, value: impl Into<String>) -> Self {
        self.labels.insert(key.to_string(), value.into());
        self
    }
}

/// Compute resource requests and limits.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ResourceRequirements {
    /// Requested amounts, e.g. `{"cpu": "500m"}`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub requests: BTreeMap<String, String>,
    /// Upper bounds.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub limits: BTreeMap<String, String>,
}

// =============================================================================
// PersistentVolumeClaim
// =============================================================================

/// A persistent volume claim.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PersistentVolumeClaim {
    /// API version
    pub api_version: String,
    /// Kind
    pub kind: String,
    /// Metadata
    pub metadata: ObjectMeta,
    /// Spec
    pub spec: PersistentVolumeClaimSpec,
}

/// Claim spec.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PersistentVolumeClaimSpec {
    /// Storage class; the cluster default applies when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class_name: Option<String>,
    /// Access modes.
    pub access_modes: Vec<String>,
    /// Requested storage.
    pub resources: ResourceRequirements,
}

// =============================================================================
// ImageStream / Build
// =============================================================================

/// An image stream tracking built images of one process.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImageStream {
    /// API version
    pub api_version: String,
    /// Kind
    pub kind: String,
    /// Metadata
    pub metadata: ObjectMeta,
    /// Spec
    pub spec: ImageStreamSpec,
}

/// Image stream spec.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ImageStreamSpec {
    /// Tags the stream tracks.
    pub tags: Vec<TagReference>,
}

/// A tag of an image stream.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TagReference {
    /// Tag name.
    pub name: String,
}

/// A container image build from a git repository.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Build {
    /// API version
    pub api_version: String,
    /// Kind
    pub kind: String,
    /// Metadata
    pub metadata: ObjectMeta,
    /// Spec
    pub spec: BuildSpec,
}

/// Build spec.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct BuildSpec {
    /// Where the sources come from.
    pub source: BuildSource,
    /// How the image is built.
    pub strategy: BuildStrategy,
    /// Where the image is pushed.
    pub output: BuildOutput,
}

/// Build source.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BuildSource {
    /// Source type, always `Git`.
    #[serde(rename = "type")]
    pub source_type: String,
    /// Repository.
    pub git: GitSource,
    /// Directory inside the repository holding the Dockerfile.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_dir: Option<String>,
}

/// A git repository reference.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct GitSource {
    /// Clone URI.
    pub uri: String,
    /// Branch, tag or commit.
    #[serde(rename = "ref")]
    pub git_ref: String,
}

/// Build strategy.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BuildStrategy {
    /// Strategy type, always `Docker`.
    #[serde(rename = "type")]
    pub strategy_type: String,
    /// Docker strategy options.
    pub docker_strategy: DockerStrategy,
}

/// Docker build options.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DockerStrategy {
    /// Dockerfile path relative to the context dir.
    pub dockerfile_path: String,
}

/// Build output.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct BuildOutput {
    /// Push target.
    pub to: ObjectReference,
}

/// Reference to another object.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ObjectReference {
    /// Kind of the referenced object.
    pub kind: String,
    /// Name of the referenced object.
    pub name: String,
}

// =============================================================================
// ConfigMap
// =============================================================================

/// A config map.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMap {
    /// API version
    pub api_version: String,
    /// Kind
    pub kind: String,
    /// Metadata
    pub metadata: ObjectMeta,
    /// File name to content.
    pub data: BTreeMap<String, String>,
}

// =============================================================================
// Job
// =============================================================================

/// A batch job running one container to completion.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// API version
    pub api_version: String,
    /// Kind
    pub kind: String,
    /// Metadata
    pub metadata: ObjectMeta,
    /// Spec
    pub spec: JobSpec,
}

/// Job spec.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobSpec {
    /// Retries before the job is marked failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_limit: Option<u32>,
    /// Pod template.
    pub template: PodTemplateSpec,
}

/// Pod template.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PodTemplateSpec {
    /// Pod metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ObjectMeta>,
    /// Pod spec.
    pub spec: PodSpec,
}

/// Pod spec.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodSpec {
    /// Containers.
    pub containers: Vec<Container>,
    /// Volumes available to the containers.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<PodVolume>,
    /// Restart policy.
    pub restart_policy: String,
}

/// A container.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    /// Container name.
    pub name: String,
    /// Image reference.
    pub image: String,
    /// Mounts.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_mounts: Vec<VolumeMount>,
    /// Resource requests and limits.
    pub resources: ResourceRequirements,
}

/// A volume mount.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VolumeMount {
    /// Pod volume name.
    pub name: String,
    /// Path inside the container.
    pub mount_path: String,
    /// Mount read-only.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub read_only: bool,
    /// Sub path of the volume to mount.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_path: Option<String>,
}

/// A volume of a pod.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodVolume {
    /// Pod volume name.
    pub name: String,
    /// Backing claim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent_volume_claim: Option<ClaimSource>,
    /// Backing config map.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_map: Option<ConfigMapSource>,
}

/// Claim backing a pod volume.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClaimSource {
    /// Claim name.
    pub claim_name: String,
    /// Mount read-only.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub read_only: bool,
}

/// Config map backing a pod volume.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ConfigMapSource {
    /// Config map name.
    pub name: String,
}
