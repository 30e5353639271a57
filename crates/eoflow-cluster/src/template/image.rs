// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Image templates: a per-process image stream and the build filling it.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{
    ManagedResource, Observed, Readiness, ResourceKind, ResourceTemplate, WatchControl,
    list_objects, sanitize_name, str_at, template_id,
};
use crate::connector::Connector;
use crate::document::{
    Build, BuildOutput, BuildSpec, BuildStrategy, DockerStrategy, GitSource, ImageStream,
    ImageStreamSpec, JOB_LABEL, ObjectMeta, ObjectReference, PROCESS_LABEL, TASK_LABEL,
    TagReference,
};
use crate::error::LifecycleError;

/// Tag every build pushes to.
pub const LATEST_TAG: &str = "latest";

const DOCKERFILE: &str = "Dockerfile";

// =============================================================================
// ImageStream
// =============================================================================

/// Image stream shared by every task running one process.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageStreamTemplate {
    metadata: ObjectMeta,
}

impl ImageStreamTemplate {
    /// Stream for a process, named from the sanitized process id.
    pub fn for_process(process_id: &str) -> Self {
        Self {
            metadata: ObjectMeta::new(sanitize_name(process_id))
                .with_label(PROCESS_LABEL, sanitize_name(process_id)),
        }
    }

    /// Registry repository the stream publishes, once assigned.
    pub fn repository(observed: &Value) -> Option<&str> {
        str_at(observed, "/status/dockerImageRepository").filter(|r| !r.is_empty())
    }

    /// Whether the `latest` tag points at a pushed image.
    pub fn latest_resolved(observed: &Value) -> bool {
        observed
            .pointer("/status/tags")
            .and_then(Value::as_array)
            .is_some_and(|tags| {
                tags.iter().any(|tag| {
                    tag.get("tag").and_then(Value::as_str) == Some(LATEST_TAG)
                        && tag
                            .get("items")
                            .and_then(Value::as_array)
                            .is_some_and(|items| !items.is_empty())
                })
            })
    }
}

impl ResourceTemplate for ImageStreamTemplate {
    fn kind(&self) -> ResourceKind {
        ResourceKind::ImageStream
    }

    fn name(&self) -> &str {
        &self.metadata.name
    }

    fn document(&self) -> Value {
        json!(ImageStream {
            api_version: "image.openshift.io/v1".to_string(),
            kind: "ImageStream".to_string(),
            metadata: self.metadata.clone(),
            spec: ImageStreamSpec {
                tags: vec![TagReference {
                    name: LATEST_TAG.to_string(),
                }],
            },
        })
    }

    fn readiness(&self, observed: &Observed<'_>) -> Readiness {
        if Self::repository(observed.instance).is_some() {
            Readiness::Ready
        } else {
            Readiness::Pending
        }
    }

    fn shared(&self) -> bool {
        true
    }
}

// =============================================================================
// Build
// =============================================================================

/// Where a process image is built from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildSource {
    /// Git clone URI.
    pub git_uri: String,
    /// Branch, tag or commit.
    #[serde(default = "default_ref")]
    pub git_ref: String,
    /// Directory holding the Dockerfile.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_dir: Option<String>,
}

fn default_ref() -> String {
    "master".to_string()
}

/// A Docker-strategy build pushing to an image stream's `latest` tag.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildTemplate {
    metadata: ObjectMeta,
    image_stream: String,
    source: BuildSource,
}

impl BuildTemplate {
    /// Build of `process_id` for one task.
    pub fn for_task(
        job_id: &str,
        task_id: &str,
        process_id: &str,
        image_stream: &ImageStreamTemplate,
        source: BuildSource,
    ) -> Self {
        Self {
            metadata: ObjectMeta::new(template_id(ResourceKind::Build, job_id, task_id))
                .with_label(JOB_LABEL, job_id)
                .with_label(TASK_LABEL, task_id)
                .with_label(PROCESS_LABEL, sanitize_name(process_id)),
            image_stream: image_stream.name().to_string(),
            source,
        }
    }
}

impl ResourceTemplate for BuildTemplate {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Build
    }

    fn name(&self) -> &str {
        &self.metadata.name
    }

    fn document(&self) -> Value {
        json!(Build {
            api_version: "build.openshift.io/v1".to_string(),
            kind: "Build".to_string(),
            metadata: self.metadata.clone(),
            spec: BuildSpec {
                source: crate::document::BuildSource {
                    source_type: "Git".to_string(),
                    git: GitSource {
                        uri: self.source.git_uri.clone(),
                        git_ref: self.source.git_ref.clone(),
                    },
                    context_dir: self.source.context_dir.clone(),
                },
                strategy: BuildStrategy {
                    strategy_type: "Docker".to_string(),
                    docker_strategy: DockerStrategy {
                        dockerfile_path: DOCKERFILE.to_string(),
                    },
                },
                output: BuildOutput {
                    to: ObjectReference {
                        kind: "ImageStreamTag".to_string(),
                        name: format!("{}:{}", self.image_stream, LATEST_TAG),
                    },
                },
            },
        })
    }

    fn readiness(&self, observed: &Observed<'_>) -> Readiness {
        if let Some(pod) = observed.pod {
            match str_at(pod, "/status/phase") {
                Some("Succeeded") => return Readiness::Ready,
                Some("Failed") => {
                    let reason = str_at(pod, "/status/reason").unwrap_or("build pod failed");
                    return Readiness::Failed(reason.to_string());
                }
                Some("Running") => return Readiness::Running,
                _ => {}
            }
        }

        match str_at(observed.instance, "/status/phase") {
            Some("Complete") => Readiness::Ready,
            Some(phase @ ("Failed" | "Error" | "Cancelled")) => {
                let reason = str_at(observed.instance, "/status/message").unwrap_or(phase);
                Readiness::Failed(reason.to_string())
            }
            Some("Running") => Readiness::Running,
            _ => Readiness::Pending,
        }
    }

    fn pod_selector(&self) -> Option<String> {
        Some(format!("openshift.io/build.name={}", self.metadata.name))
    }
}

// =============================================================================
// ImageBuild
// =============================================================================

/// Outcome of [`ImageBuild::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltImage {
    /// Image reference to run.
    pub image: String,
    /// Build logs, when a build ran.
    pub logs: Option<String>,
    /// Whether an existing image was reused.
    pub reused: bool,
}

/// An image stream plus the build that fills it.
///
/// The stream outlives the build; only the build is transient.
#[derive(Debug, Clone)]
pub struct ImageBuild {
    stream: ManagedResource<ImageStreamTemplate>,
    build: ManagedResource<BuildTemplate>,
}

impl ImageBuild {
    /// Pair a stream with the build filling it.
    pub fn new(stream: ImageStreamTemplate, build: BuildTemplate) -> Self {
        Self {
            stream: ManagedResource::new(stream),
            build: ManagedResource::new(build),
        }
    }

    /// The image stream.
    pub fn stream(&self) -> &ManagedResource<ImageStreamTemplate> {
        &self.stream
    }

    /// The build.
    pub fn build(&self) -> &ManagedResource<BuildTemplate> {
        &self.build
    }

    /// Image of an existing stream whose `latest` tag is resolved.
    pub async fn existing_image(
        &self,
        connector: &dyn Connector,
    ) -> Result<Option<String>, LifecycleError> {
        let Some(observed) = self.stream.fetch(connector).await? else {
            return Ok(None);
        };
        if !ImageStreamTemplate::latest_resolved(&observed) {
            return Ok(None);
        }
        Ok(ImageStreamTemplate::repository(&observed)
            .map(|repository| format!("{}:{}", repository, LATEST_TAG)))
    }

    /// Reuse the process image or build it.
    ///
    /// An existing stream is adopted, never replaced. When another task is
    /// already building the process image, its result is awaited and reused.
    /// A fresh build waits for completion, captures logs and deletes the
    /// build object. On failure the build is left in place so the caller can
    /// read its [`logs`](Self::logs) before calling [`cleanup`](Self::cleanup).
    pub async fn run(
        &mut self,
        connector: &dyn Connector,
        control: &WatchControl,
    ) -> Result<BuiltImage, LifecycleError> {
        if let Some(image) = self.existing_image(connector).await? {
            info!(image_stream = %self.stream.name(), image = %image, "Reusing process image");
            return Ok(BuiltImage {
                image,
                logs: None,
                reused: true,
            });
        }

        self.stream.create(connector, true, control).await?;
        if let Some(image) = self.await_peer_build(connector, control).await? {
            info!(image_stream = %self.stream.name(), image = %image, "Reusing image built by another task");
            return Ok(BuiltImage {
                image,
                logs: None,
                reused: true,
            });
        }

        let repository = self
            .stream
            .observed()
            .and_then(ImageStreamTemplate::repository)
            .map(str::to_string)
            .ok_or_else(|| LifecycleError::MissingField {
                kind: ResourceKind::ImageStream,
                name: self.stream.name().to_string(),
                field: "status.dockerImageRepository",
            })?;

        self.build.create(connector, true, control).await?;
        let logs = self.logs(connector).await;
        self.cleanup(connector).await?;

        let image = format!("{}:{}", repository, LATEST_TAG);
        info!(image_stream = %self.stream.name(), image = %image, "Built process image");
        Ok(BuiltImage {
            image,
            logs,
            reused: false,
        })
    }

    /// Builds of the same process started by other tasks and not yet done.
    async fn peer_builds(&self, connector: &dyn Connector) -> Result<Vec<String>, LifecycleError> {
        let collection = ResourceKind::Build.collection_path(connector.namespace());
        let selector = format!("{}={}", PROCESS_LABEL, self.stream.name());
        let builds = list_objects(connector, &collection, &selector).await?;

        Ok(builds
            .iter()
            .filter(|build| {
                !matches!(
                    str_at(build, "/status/phase"),
                    Some("Complete" | "Failed" | "Error" | "Cancelled")
                )
            })
            .filter_map(|build| str_at(build, "/metadata/name"))
            .filter(|name| *name != self.build.name())
            .map(str::to_string)
            .collect())
    }

    /// Wait while another task builds the process image.
    ///
    /// Returns the image once the stream resolves, or `None` when no peer
    /// build is in flight or the last one ended without resolving it.
    async fn await_peer_build(
        &self,
        connector: &dyn Connector,
        control: &WatchControl,
    ) -> Result<Option<String>, LifecycleError> {
        let deadline = Instant::now() + control.timeout;

        loop {
            // Builds first: one finishing in between has already resolved the stream.
            let peers = self.peer_builds(connector).await?;
            if let Some(image) = self.existing_image(connector).await? {
                return Ok(Some(image));
            }
            if peers.is_empty() {
                return Ok(None);
            }
            debug!(image_stream = %self.stream.name(), builds = ?peers, "Waiting for running image build");

            tokio::select! {
                biased;
                _ = control.cancel.cancelled() => {
                    return Err(LifecycleError::Cancelled {
                        kind: ResourceKind::ImageStream,
                        name: self.stream.name().to_string(),
                    });
                }
                _ = tokio::time::sleep_until(deadline) => {
                    return Err(LifecycleError::WatchTimeout {
                        kind: ResourceKind::ImageStream,
                        name: self.stream.name().to_string(),
                        timeout: control.timeout,
                    });
                }
                _ = tokio::time::sleep(control.interval) => {}
            }
        }
    }

    /// Build logs. Failures to fetch them are logged and yield `None`.
    pub async fn logs(&mut self, connector: &dyn Connector) -> Option<String> {
        match self.build.logs(connector).await {
            Ok(logs) => logs,
            Err(err) => {
                warn!(build = %self.build.name(), error = %err, "Failed to fetch build logs");
                None
            }
        }
    }

    /// Delete the build and its pod. The image stream is kept.
    pub async fn cleanup(&mut self, connector: &dyn Connector) -> Result<(), LifecycleError> {
        self.build.delete(connector).await
    }
}
