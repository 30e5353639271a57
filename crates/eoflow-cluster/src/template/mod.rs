// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Resource templates and their lifecycle.
//!
//! A [`ResourceTemplate`] describes one cluster object: its kind, name,
//! desired document and readiness predicate. [`ManagedResource`] drives a
//! template through its lifecycle:
//!
//! ```text
//! Initialized ──create──▶ Created ──watch──▶ Pending/Running ──▶ Finished
//!                  │                                     │
//!                  │ 409: delete, wait gone, retry once  └──────▶ Error
//!                  ▼
//!             Conflict (second 409)
//! ```
//!
//! A [`shared`](ResourceTemplate::shared) template adopts the existing object
//! on 409 instead of replacing it. Objects are only removed by an explicit
//! [`ManagedResource::delete`].

mod batch;
mod config_map;
mod image;
mod volume;

pub use batch::{BatchJobTemplate, ComputeResources, Mount, MountSource};
pub use config_map::{CONFIG_FILE, ConfigTemplate, INPUT_MOUNTS_FILE};
pub use image::{
    BuildSource, BuildTemplate, BuiltImage, ImageBuild, ImageStreamTemplate, LATEST_TAG,
};
pub use volume::VolumeTemplate;

use std::time::Duration;

use futures::StreamExt;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ClusterConfig;
use crate::connector::{Api, Connector, Verb};
use crate::error::{ClusterError, LifecycleError};

/// Kinds of cluster objects eoflow manages.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "lowercase")]
pub enum ResourceKind {
    /// Persistent volume claim holding one task's output.
    Volume,
    /// Image stream of one process.
    ImageStream,
    /// Image build.
    Build,
    /// Config map with task arguments.
    Config,
    /// Batch job running one task.
    BatchJob,
}

impl ResourceKind {
    /// Name prefix for generated ids.
    pub fn prefix(&self) -> &'static str {
        match self {
            ResourceKind::Volume => "vol",
            ResourceKind::ImageStream => "is",
            ResourceKind::Build => "build",
            ResourceKind::Config => "cfg",
            ResourceKind::BatchJob => "job",
        }
    }

    /// REST path of the collection in `namespace`.
    pub fn collection_path(&self, namespace: &str) -> String {
        match self {
            ResourceKind::Volume => {
                format!("/api/v1/namespaces/{}/persistentvolumeclaims", namespace)
            }
            ResourceKind::ImageStream => format!(
                "/apis/image.openshift.io/v1/namespaces/{}/imagestreams",
                namespace
            ),
            ResourceKind::Build => {
                format!("/apis/build.openshift.io/v1/namespaces/{}/builds", namespace)
            }
            ResourceKind::Config => format!("/api/v1/namespaces/{}/configmaps", namespace),
            ResourceKind::BatchJob => format!("/apis/batch/v1/namespaces/{}/jobs", namespace),
        }
    }
}

/// Deterministic object name for a task's resource of `kind`.
///
/// `<prefix>-<first 20 hex chars of sha256(job:task:kind)>`, a valid DNS-1123
/// label.
pub fn template_id(kind: ResourceKind, job_id: &str, task_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}:{}:{}", job_id, task_id, kind).as_bytes());
    let hex = hasher
        .finalize()
        .iter()
        .take(10)
        .map(|b| format!("{:02x}", b))
        .collect::<String>();
    format!("{}-{}", kind.prefix(), hex)
}

/// Turn an arbitrary id into a DNS-1123 label.
pub fn sanitize_name(raw: &str) -> String {
    let mut name: String = raw
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    name.truncate(63);
    name.trim_matches('-').to_string()
}

/// REST path of the pod collection in `namespace`.
pub fn pods_path(namespace: &str) -> String {
    format!("/api/v1/namespaces/{}/pods", namespace)
}

/// Links to the created object and its backing pod.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelfLinks {
    /// Collection the object was posted to.
    pub collection: String,
    /// The object itself, once created.
    pub instance: Option<String>,
    /// Name of the backing pod, once known.
    pub pod: Option<String>,
}

/// Lifecycle state of a managed resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum ResourceStatus {
    /// Not yet submitted.
    Initialized,
    /// Accepted by the cluster.
    Created,
    /// Waiting for the cluster to act.
    Pending,
    /// Work in progress.
    Running,
    /// Ready or completed.
    Finished,
    /// Reached a failure state.
    Error,
}

/// Result of evaluating a readiness predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// Not ready, nothing running yet.
    Pending,
    /// Not ready, work in progress.
    Running,
    /// Ready.
    Ready,
    /// Failed with a reason.
    Failed(String),
}

/// What a poll observed.
#[derive(Debug, Clone, Copy)]
pub struct Observed<'a> {
    /// The object as returned by GET.
    pub instance: &'a Value,
    /// The backing pod, if the kind has one and it exists.
    pub pod: Option<&'a Value>,
}

/// Describes one cluster object.
pub trait ResourceTemplate: Send + Sync {
    /// Object kind.
    fn kind(&self) -> ResourceKind;

    /// Object name.
    fn name(&self) -> &str;

    /// Desired-state document posted on creation.
    fn document(&self) -> Value;

    /// Readiness predicate evaluated on every poll.
    fn readiness(&self, observed: &Observed<'_>) -> Readiness;

    /// Label selector of the backing pod, for kinds that run one.
    fn pod_selector(&self) -> Option<String> {
        None
    }

    /// Whether tasks of other jobs use the same object. A create conflict
    /// then adopts the existing object.
    fn shared(&self) -> bool {
        false
    }
}

/// Bounds of a readiness watch.
#[derive(Debug, Clone)]
pub struct WatchControl {
    /// Interval between polls.
    pub interval: Duration,
    /// Deadline for the whole watch.
    pub timeout: Duration,
    /// Cancels the watch.
    pub cancel: CancellationToken,
}

impl WatchControl {
    /// Create watch bounds with a fresh cancellation token.
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            cancel: CancellationToken::new(),
        }
    }

    /// Watch bounds from cluster configuration.
    pub fn from_config(config: &ClusterConfig) -> Self {
        Self::new(config.poll_interval, config.watch_timeout)
    }

    /// Use the given cancellation token.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Use a different deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// A template together with its lifecycle state.
#[derive(Debug, Clone)]
pub struct ManagedResource<T> {
    template: T,
    links: SelfLinks,
    status: ResourceStatus,
    observed: Option<Value>,
}

impl<T: ResourceTemplate> ManagedResource<T> {
    /// Wrap a template. Nothing is sent to the cluster yet.
    pub fn new(template: T) -> Self {
        Self {
            template,
            links: SelfLinks::default(),
            status: ResourceStatus::Initialized,
            observed: None,
        }
    }

    /// The template.
    pub fn template(&self) -> &T {
        &self.template
    }

    /// Object name.
    pub fn name(&self) -> &str {
        self.template.name()
    }

    /// Links set by creation and watching.
    pub fn links(&self) -> &SelfLinks {
        &self.links
    }

    /// Current lifecycle state.
    pub fn status(&self) -> ResourceStatus {
        self.status
    }

    /// Object as last observed by a successful watch.
    pub fn observed(&self) -> Option<&Value> {
        self.observed.as_ref()
    }

    fn instance_path(&self, connector: &dyn Connector) -> String {
        format!(
            "{}/{}",
            self.template.kind().collection_path(connector.namespace()),
            self.template.name()
        )
    }

    /// Submit the object and optionally wait for readiness.
    ///
    /// A 409 removes the existing object, waits until it is gone and retries
    /// once. A second 409 is [`LifecycleError::Conflict`]. Shared templates
    /// adopt the existing object instead.
    pub async fn create(
        &mut self,
        connector: &dyn Connector,
        watch: bool,
        control: &WatchControl,
    ) -> Result<(), LifecycleError> {
        let kind = self.template.kind();
        let collection = kind.collection_path(connector.namespace());
        let instance = self.instance_path(connector);
        let document = self.template.document();

        match post(connector, &collection, &document).await {
            Ok(()) => {}
            Err(err) if err.is_conflict() && self.template.shared() => {
                info!(kind = %kind, template_id = %self.name(), "Adopting existing shared object");
            }
            Err(err) if err.is_conflict() => {
                warn!(
                    kind = %kind,
                    template_id = %self.name(),
                    "Object already exists, deleting and recreating"
                );
                self.remove_all(connector, &instance).await?;
                self.wait_gone(connector, &instance, control).await?;

                match post(connector, &collection, &document).await {
                    Ok(()) => {}
                    Err(err) if err.is_conflict() => {
                        self.status = ResourceStatus::Error;
                        return Err(LifecycleError::Conflict {
                            kind,
                            name: self.name().to_string(),
                        });
                    }
                    Err(err) => {
                        self.status = ResourceStatus::Error;
                        return Err(err.into());
                    }
                }
            }
            Err(err) => {
                self.status = ResourceStatus::Error;
                return Err(err.into());
            }
        }

        self.links = SelfLinks {
            collection,
            instance: Some(instance),
            pod: None,
        };
        self.status = ResourceStatus::Created;
        info!(kind = %kind, template_id = %self.name(), "Created cluster object");

        if watch {
            self.wait_ready(connector, control).await?;
        }
        Ok(())
    }

    /// Poll until the readiness predicate holds.
    ///
    /// Returns the observed object. Ends early on a failure state, the
    /// deadline, cancellation or a connector error.
    pub async fn wait_ready(
        &mut self,
        connector: &dyn Connector,
        control: &WatchControl,
    ) -> Result<Value, LifecycleError> {
        let kind = self.template.kind();
        let instance = self.instance_path(connector);
        let deadline = Instant::now() + control.timeout;
        let mut polls = connector.watch(Api::ControlPlane, &instance, control.interval);

        loop {
            let item = tokio::select! {
                biased;
                _ = control.cancel.cancelled() => {
                    debug!(kind = %kind, template_id = %self.name(), "Watch cancelled");
                    return Err(LifecycleError::Cancelled {
                        kind,
                        name: self.name().to_string(),
                    });
                }
                _ = tokio::time::sleep_until(deadline) => {
                    self.status = ResourceStatus::Error;
                    return Err(LifecycleError::WatchTimeout {
                        kind,
                        name: self.name().to_string(),
                        timeout: control.timeout,
                    });
                }
                item = polls.next() => item,
            };

            let observed = match item {
                Some(Ok(document)) => document.into_json()?,
                Some(Err(err)) => {
                    self.status = ResourceStatus::Error;
                    return Err(err.into());
                }
                None => {
                    return Err(ClusterError::Transport("Watch stream ended".to_string()).into());
                }
            };

            let pod = self.find_pod(connector).await?;
            let readiness = self.template.readiness(&Observed {
                instance: &observed,
                pod: pod.as_ref(),
            });

            match readiness {
                Readiness::Ready => {
                    self.status = ResourceStatus::Finished;
                    self.observed = Some(observed.clone());
                    debug!(kind = %kind, template_id = %self.name(), "Object ready");
                    return Ok(observed);
                }
                Readiness::Failed(reason) => {
                    self.status = ResourceStatus::Error;
                    self.observed = Some(observed);
                    return Err(LifecycleError::Failed {
                        kind,
                        name: self.name().to_string(),
                        reason,
                    });
                }
                Readiness::Pending => self.status = ResourceStatus::Pending,
                Readiness::Running => self.status = ResourceStatus::Running,
            }
        }
    }

    /// Remove the object and its backing pods. Missing objects are ignored.
    pub async fn delete(&mut self, connector: &dyn Connector) -> Result<(), LifecycleError> {
        let instance = self.instance_path(connector);
        self.remove_all(connector, &instance).await?;
        self.links.instance = None;
        info!(kind = %self.template.kind(), template_id = %self.name(), "Deleted cluster object");
        Ok(())
    }

    /// Current state of the object, `None` when it does not exist.
    pub async fn fetch(&self, connector: &dyn Connector) -> Result<Option<Value>, ClusterError> {
        let instance = self.instance_path(connector);
        match connector
            .request(Api::ControlPlane, Verb::Get, &instance, None)
            .await
        {
            Ok(document) => document.into_json().map(Some),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Logs of the backing pod, `None` when there is no pod.
    pub async fn logs(&mut self, connector: &dyn Connector) -> Result<Option<String>, ClusterError> {
        if self.links.pod.is_none() {
            self.find_pod(connector).await?;
        }
        let Some(pod) = self.links.pod.clone() else {
            return Ok(None);
        };

        let path = format!("{}/{}/log", pods_path(connector.namespace()), pod);
        match connector
            .request(Api::ControlPlane, Verb::Get, &path, None)
            .await
        {
            Ok(document) => Ok(Some(document.into_text())),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Look up the backing pod and remember its name.
    async fn find_pod(&mut self, connector: &dyn Connector) -> Result<Option<Value>, ClusterError> {
        let Some(selector) = self.template.pod_selector() else {
            return Ok(None);
        };

        let pod = list_pods(connector, &selector).await?.into_iter().next();
        if let Some(name) = pod
            .as_ref()
            .and_then(|p| p.pointer("/metadata/name"))
            .and_then(Value::as_str)
            && self.links.pod.as_deref() != Some(name)
        {
            debug!(template_id = %self.name(), pod = %name, "Resolved backing pod");
            self.links.pod = Some(name.to_string());
        }
        Ok(pod)
    }

    async fn remove_all(
        &mut self,
        connector: &dyn Connector,
        instance: &str,
    ) -> Result<(), ClusterError> {
        remove(connector, instance).await?;

        if let Some(selector) = self.template.pod_selector() {
            let pods_path = pods_path(connector.namespace());
            for pod in list_pods(connector, &selector).await? {
                if let Some(name) = pod.pointer("/metadata/name").and_then(Value::as_str) {
                    remove(connector, &format!("{}/{}", pods_path, name)).await?;
                }
            }
        }
        Ok(())
    }

    async fn wait_gone(
        &self,
        connector: &dyn Connector,
        instance: &str,
        control: &WatchControl,
    ) -> Result<(), LifecycleError> {
        let kind = self.template.kind();
        let deadline = Instant::now() + control.timeout;
        let mut polls = connector.watch(Api::ControlPlane, instance, control.interval);

        loop {
            let item = tokio::select! {
                biased;
                _ = control.cancel.cancelled() => {
                    return Err(LifecycleError::Cancelled {
                        kind,
                        name: self.name().to_string(),
                    });
                }
                _ = tokio::time::sleep_until(deadline) => {
                    return Err(LifecycleError::WatchTimeout {
                        kind,
                        name: self.name().to_string(),
                        timeout: control.timeout,
                    });
                }
                item = polls.next() => item,
            };

            match item {
                Some(Err(err)) if err.is_not_found() => return Ok(()),
                Some(Err(err)) => return Err(err.into()),
                Some(Ok(_)) => {}
                None => {
                    return Err(ClusterError::Transport("Watch stream ended".to_string()).into());
                }
            }
        }
    }
}

async fn post(
    connector: &dyn Connector,
    collection: &str,
    document: &Value,
) -> Result<(), ClusterError> {
    connector
        .request(Api::ControlPlane, Verb::Post, collection, Some(document))
        .await
        .map(|_| ())
}

async fn remove(connector: &dyn Connector, path: &str) -> Result<(), ClusterError> {
    match connector
        .request(Api::ControlPlane, Verb::Delete, path, None)
        .await
    {
        Ok(_) => Ok(()),
        Err(err) if err.is_not_found() => Ok(()),
        Err(err) => Err(err),
    }
}

async fn list_pods(connector: &dyn Connector, selector: &str) -> Result<Vec<Value>, ClusterError> {
    list_objects(connector, &pods_path(connector.namespace()), selector).await
}

/// Items of `collection` matching a label selector.
pub(crate) async fn list_objects(
    connector: &dyn Connector,
    collection: &str,
    selector: &str,
) -> Result<Vec<Value>, ClusterError> {
    let path = format!("{}?labelSelector={}", collection, encode_selector(selector));
    let list = connector
        .request(Api::ControlPlane, Verb::Get, &path, None)
        .await?
        .into_json()?;

    Ok(list
        .get("items")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default())
}

/// Percent-encode a label selector for use in a query string.
pub fn encode_selector(selector: &str) -> String {
    urlencoding::encode(selector).into_owned()
}

/// String at a JSON pointer.
pub(crate) fn str_at<'v>(value: &'v Value, pointer: &str) -> Option<&'v str> {
    value.pointer(pointer).and_then(Value::as_str)
}

/// Positive counter at a JSON pointer.
pub(crate) fn count_at(value: &Value, pointer: &str) -> u64 {
    value.pointer(pointer).and_then(Value::as_u64).unwrap_or(0)
}
