// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock cluster for testing.
//!
//! An in-memory control plane that answers the REST paths the templates use.
//! Objects progress on every GET: volumes bind, image streams get a
//! repository, builds and jobs start and then complete after a configurable
//! number of polls. Collections can be listed by label. Failures, conflicts
//! and jobs that never finish can be injected per process.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::Mutex;

use super::{Api, Connector, Document, Verb};
use crate::document::PROCESS_LABEL;
use crate::error::{ClusterError, Result};
use crate::template::{ResourceKind, pods_path, sanitize_name};

const ALL_KINDS: [ResourceKind; 5] = [
    ResourceKind::Volume,
    ResourceKind::ImageStream,
    ResourceKind::Build,
    ResourceKind::Config,
    ResourceKind::BatchJob,
];

/// A request the mock received.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    /// Target API.
    pub api: Api,
    /// HTTP verb.
    pub verb: Verb,
    /// Path including query string.
    pub path: String,
    /// JSON body.
    pub body: Option<Value>,
}

#[derive(Debug, Clone)]
struct StoredObject {
    kind: ResourceKind,
    document: Value,
    polls: u32,
}

#[derive(Debug, Default)]
struct MockState {
    objects: BTreeMap<(ResourceKind, String), StoredObject>,
    pods: BTreeMap<String, Value>,
    logs: HashMap<String, String>,
    conflicts: HashMap<ResourceKind, u32>,
    failing_jobs: HashSet<String>,
    failing_builds: HashSet<String>,
    held_jobs: HashSet<String>,
    unavailable: bool,
    requests: Vec<RecordedRequest>,
}

/// In-memory cluster.
///
/// Cloning yields a handle to the same cluster, so a test can keep one
/// handle for assertions while the code under test owns another.
#[derive(Debug, Clone)]
pub struct MockCluster {
    namespace: String,
    state: Arc<Mutex<MockState>>,
    /// Polls of a build or job before it completes.
    pub polls_to_complete: u32,
}

impl MockCluster {
    /// Create an empty cluster serving `namespace`.
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            state: Arc::new(Mutex::new(MockState::default())),
            polls_to_complete: 2,
        }
    }

    /// Answer the next `count` creations of `kind` with 409.
    pub async fn inject_conflicts(&self, kind: ResourceKind, count: u32) {
        self.state.lock().await.conflicts.insert(kind, count);
    }

    /// Make batch jobs running `process_id` fail.
    pub async fn fail_process(&self, process_id: &str) {
        self.state
            .lock()
            .await
            .failing_jobs
            .insert(sanitize_name(process_id));
    }

    /// Make image builds of `process_id` fail.
    pub async fn fail_build(&self, process_id: &str) {
        self.state
            .lock()
            .await
            .failing_builds
            .insert(sanitize_name(process_id));
    }

    /// Keep batch jobs running `process_id` active forever.
    pub async fn hold_process(&self, process_id: &str) {
        self.state
            .lock()
            .await
            .held_jobs
            .insert(sanitize_name(process_id));
    }

    /// Let held jobs of `process_id` complete.
    pub async fn release_process(&self, process_id: &str) {
        self.state
            .lock()
            .await
            .held_jobs
            .remove(&sanitize_name(process_id));
    }

    /// Refuse every request with a transport error.
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().await.unavailable = unavailable;
    }

    /// Logs returned for pods of `process_id`.
    pub async fn set_logs(&self, process_id: &str, logs: impl Into<String>) {
        self.state
            .lock()
            .await
            .logs
            .insert(sanitize_name(process_id), logs.into());
    }

    /// Store an object directly, as if it had been created earlier.
    pub async fn insert_object(&self, kind: ResourceKind, document: Value) {
        let name = document
            .pointer("/metadata/name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        self.state.lock().await.objects.insert(
            (kind, name),
            StoredObject {
                kind,
                document,
                polls: 0,
            },
        );
    }

    /// Store a resolved image stream for `process_id`.
    pub async fn seed_image(&self, process_id: &str) {
        let name = sanitize_name(process_id);
        let document = json!({
            "metadata": {"name": name},
            "status": {
                "dockerImageRepository": self.repository(&name),
                "tags": [{"tag": "latest", "items": [{"image": "sha256:seeded"}]}]
            }
        });
        self.insert_object(ResourceKind::ImageStream, document).await;
    }

    /// Every request received so far.
    pub async fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().await.requests.clone()
    }

    /// Number of `verb` requests against objects of `kind`.
    pub async fn count_requests(&self, verb: Verb, kind: ResourceKind) -> usize {
        let collection = kind.collection_path(&self.namespace);
        self.state
            .lock()
            .await
            .requests
            .iter()
            .filter(|r| r.verb == verb && r.path.starts_with(&collection))
            .count()
    }

    /// Names of the stored objects of `kind`.
    pub async fn object_names(&self, kind: ResourceKind) -> Vec<String> {
        self.state
            .lock()
            .await
            .objects
            .keys()
            .filter(|(k, _)| *k == kind)
            .map(|(_, name)| name.clone())
            .collect()
    }

    /// A stored object.
    pub async fn object(&self, kind: ResourceKind, name: &str) -> Option<Value> {
        self.state
            .lock()
            .await
            .objects
            .get(&(kind, name.to_string()))
            .map(|o| o.document.clone())
    }

    /// Names of the existing pods.
    pub async fn pod_names(&self) -> Vec<String> {
        self.state.lock().await.pods.keys().cloned().collect()
    }

    fn repository(&self, stream: &str) -> String {
        format!("image-registry.local:5000/{}/{}", self.namespace, stream)
    }

    fn route(&self, path: &str) -> Route {
        let (path, query) = match path.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (path, None),
        };

        let selector = query
            .and_then(|q| q.strip_prefix("labelSelector="))
            .and_then(decode_selector);

        let pods = pods_path(&self.namespace);
        if path == pods {
            return Route::PodList(selector);
        }
        if let Some(rest) = path.strip_prefix(&format!("{}/", pods)) {
            return match rest.strip_suffix("/log") {
                Some(pod) => Route::PodLog(pod.to_string()),
                None => Route::Pod(rest.to_string()),
            };
        }

        for kind in ALL_KINDS {
            let collection = kind.collection_path(&self.namespace);
            if path == collection {
                return Route::Collection(kind, selector);
            }
            if let Some(name) = path.strip_prefix(&format!("{}/", collection))
                && !name.contains('/')
            {
                return Route::Instance(kind, name.to_string());
            }
        }
        Route::Unknown
    }

    fn create(
        &self,
        state: &mut MockState,
        kind: ResourceKind,
        body: Option<&Value>,
    ) -> Result<Document> {
        if let Some(remaining) = state.conflicts.get_mut(&kind)
            && *remaining > 0
        {
            *remaining -= 1;
            return Err(api_error(409, "AlreadyExists"));
        }

        let mut document = body
            .cloned()
            .ok_or_else(|| api_error(400, "missing body"))?;
        let name = document
            .pointer("/metadata/name")
            .and_then(Value::as_str)
            .ok_or_else(|| api_error(422, "metadata.name is required"))?
            .to_string();

        if state.objects.contains_key(&(kind, name.clone())) {
            return Err(api_error(409, "AlreadyExists"));
        }

        let process = label(&document, PROCESS_LABEL);
        match kind {
            ResourceKind::Volume => document["status"] = json!({"phase": "Pending"}),
            ResourceKind::Build => {
                document["status"] = json!({"phase": "New"});
                state.pods.insert(
                    format!("{}-build", name),
                    pod(&format!("{}-build", name), "openshift.io/build.name", &name, &process),
                );
            }
            ResourceKind::BatchJob => {
                document["status"] = json!({});
                state.pods.insert(
                    format!("{}-pod", name),
                    pod(&format!("{}-pod", name), "job-name", &name, &process),
                );
            }
            ResourceKind::ImageStream | ResourceKind::Config => {}
        }

        state.objects.insert(
            (kind, name),
            StoredObject {
                kind,
                document: document.clone(),
                polls: 0,
            },
        );
        Ok(Document::Json(document))
    }

    fn observe(&self, state: &mut MockState, kind: ResourceKind, name: &str) -> Result<Document> {
        let key = (kind, name.to_string());
        let Some(object) = state.objects.get_mut(&key) else {
            return Err(api_error(404, "NotFound"));
        };
        object.polls += 1;
        let polls = object.polls;
        let process = label(&object.document, PROCESS_LABEL);
        let done = polls >= self.polls_to_complete;

        match object.kind {
            ResourceKind::Volume => object.document["status"] = json!({"phase": "Bound"}),
            ResourceKind::ImageStream => {
                if object.document.pointer("/status/dockerImageRepository").is_none() {
                    object.document["status"]["dockerImageRepository"] =
                        json!(self.repository(name));
                }
            }
            ResourceKind::Config => {}
            ResourceKind::Build => {
                let failed = state.failing_builds.contains(&process);
                let (phase, pod_phase) = match (done, failed) {
                    (false, _) => ("Running", "Running"),
                    (true, false) => ("Complete", "Succeeded"),
                    (true, true) => ("Failed", "Failed"),
                };
                object.document["status"] = json!({"phase": phase});
                let target = object
                    .document
                    .pointer("/spec/output/to/name")
                    .and_then(Value::as_str)
                    .and_then(|t| t.split(':').next())
                    .map(str::to_string);

                if let Some(pod) = state.pods.get_mut(&format!("{}-build", name)) {
                    pod["status"]["phase"] = json!(pod_phase);
                    if failed && done {
                        pod["status"]["reason"] = json!("DockerBuildFailed");
                    }
                }
                if done
                    && !failed
                    && let Some(stream) = target
                    && let Some(stream) = state.objects.get_mut(&(ResourceKind::ImageStream, stream))
                {
                    stream.document["status"]["tags"] =
                        json!([{"tag": "latest", "items": [{"image": format!("sha256:{}", name)}]}]);
                }
            }
            ResourceKind::BatchJob => {
                let held = state.held_jobs.contains(&process);
                let failed = state.failing_jobs.contains(&process);
                let (status, pod_phase) = match (done && !held, failed) {
                    (false, _) => (json!({"active": 1}), "Running"),
                    (true, false) => (json!({"succeeded": 1}), "Succeeded"),
                    (true, true) => (
                        json!({"failed": 1, "conditions": [
                            {"type": "Failed", "reason": "BackoffLimitExceeded",
                             "message": "Job has reached the specified backoff limit"}
                        ]}),
                        "Failed",
                    ),
                };
                object.document["status"] = status;
                if let Some(pod) = state.pods.get_mut(&format!("{}-pod", name)) {
                    pod["status"]["phase"] = json!(pod_phase);
                }
            }
        }

        let document = state
            .objects
            .get(&key)
            .map(|o| o.document.clone())
            .unwrap_or_default();
        Ok(Document::Json(document))
    }

    fn remove(&self, state: &mut MockState, kind: ResourceKind, name: &str) -> Result<Document> {
        if state.objects.remove(&(kind, name.to_string())).is_none() {
            return Err(api_error(404, "NotFound"));
        }
        let owner_label = match kind {
            ResourceKind::Build => Some("openshift.io/build.name"),
            ResourceKind::BatchJob => Some("job-name"),
            _ => None,
        };
        if let Some(owner_label) = owner_label {
            state
                .pods
                .retain(|_, pod| label(pod, owner_label) != name);
        }
        Ok(Document::Json(json!({"kind": "Status", "status": "Success"})))
    }

    fn pod_logs(&self, state: &MockState, pod_name: &str) -> Result<Document> {
        let pod = state
            .pods
            .get(pod_name)
            .ok_or_else(|| api_error(404, "NotFound"))?;
        let process = label(pod, PROCESS_LABEL);
        let logs = state
            .logs
            .get(&process)
            .cloned()
            .unwrap_or_else(|| format!("[{}] processing done\n", pod_name));
        Ok(Document::Text(logs))
    }
}

enum Route {
    Collection(ResourceKind, Option<(String, String)>),
    Instance(ResourceKind, String),
    PodList(Option<(String, String)>),
    Pod(String),
    PodLog(String),
    Unknown,
}

#[async_trait]
impl Connector for MockCluster {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn request(
        &self,
        api: Api,
        verb: Verb,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Document> {
        let mut state = self.state.lock().await;
        state.requests.push(RecordedRequest {
            api,
            verb,
            path: path.to_string(),
            body: body.cloned(),
        });

        if state.unavailable {
            return Err(ClusterError::Transport("connection refused".to_string()));
        }

        if api == Api::Metrics {
            return match verb {
                Verb::Get if path.starts_with("/gauges/data") => Ok(Document::Json(json!([
                    {"timestamp": 1_500_000_000_000u64, "value": 0.5},
                    {"timestamp": 1_500_000_060_000u64, "value": 0.75}
                ]))),
                _ => Err(api_error(404, "NotFound")),
            };
        }

        match (verb, self.route(path)) {
            (Verb::Post, Route::Collection(kind, _)) => self.create(&mut state, kind, body),
            (Verb::Get, Route::Collection(kind, selector)) => {
                let items: Vec<Value> = state
                    .objects
                    .values()
                    .filter(|object| {
                        object.kind == kind && matches_selector(&object.document, &selector)
                    })
                    .map(|object| object.document.clone())
                    .collect();
                Ok(Document::Json(json!({"kind": "List", "items": items})))
            }
            (Verb::Get, Route::Instance(kind, name)) => self.observe(&mut state, kind, &name),
            (Verb::Delete, Route::Instance(kind, name)) => self.remove(&mut state, kind, &name),
            (Verb::Get, Route::PodList(selector)) => {
                let items: Vec<Value> = state
                    .pods
                    .values()
                    .filter(|pod| matches_selector(pod, &selector))
                    .cloned()
                    .collect();
                Ok(Document::Json(json!({"kind": "PodList", "items": items})))
            }
            (Verb::Get, Route::Pod(name)) => state
                .pods
                .get(&name)
                .cloned()
                .map(Document::Json)
                .ok_or_else(|| api_error(404, "NotFound")),
            (Verb::Delete, Route::Pod(name)) => state
                .pods
                .remove(&name)
                .map(|_| Document::Empty)
                .ok_or_else(|| api_error(404, "NotFound")),
            (Verb::Get, Route::PodLog(name)) => self.pod_logs(&state, &name),
            _ => Err(api_error(404, "NotFound")),
        }
    }
}

fn api_error(code: u16, reason: &str) -> ClusterError {
    ClusterError::Api {
        code,
        body: json!({"kind": "Status", "reason": reason}).to_string(),
    }
}

fn label(document: &Value, key: &str) -> String {
    document
        .pointer("/metadata/labels")
        .and_then(|labels| labels.get(key))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn pod(name: &str, owner_label: &str, owner: &str, process: &str) -> Value {
    json!({
        "metadata": {
            "name": name,
            "labels": {owner_label: owner, PROCESS_LABEL: process}
        },
        "status": {"phase": "Pending"}
    })
}

fn matches_selector(document: &Value, selector: &Option<(String, String)>) -> bool {
    match selector {
        Some((key, value)) => label(document, key) == *value,
        None => true,
    }
}

fn decode_selector(encoded: &str) -> Option<(String, String)> {
    let decoded = urlencoding::decode(encoded).ok()?;
    decoded
        .split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_get_delete() {
        let cluster = MockCluster::new("test");
        let collection = ResourceKind::Config.collection_path("test");
        let body = json!({"metadata": {"name": "cfg-1"}, "data": {"a": "b"}});

        cluster
            .request(Api::ControlPlane, Verb::Post, &collection, Some(&body))
            .await
            .unwrap();
        let err = cluster
            .request(Api::ControlPlane, Verb::Post, &collection, Some(&body))
            .await
            .unwrap_err();
        assert!(err.is_conflict());

        let doc = cluster
            .request(Api::ControlPlane, Verb::Get, &format!("{}/cfg-1", collection), None)
            .await
            .unwrap();
        assert_eq!(doc.as_json().unwrap()["data"]["a"], "b");

        cluster
            .request(Api::ControlPlane, Verb::Delete, &format!("{}/cfg-1", collection), None)
            .await
            .unwrap();
        assert!(cluster.object_names(ResourceKind::Config).await.is_empty());
    }

    #[tokio::test]
    async fn test_job_progression_and_pod_lookup() {
        let cluster = MockCluster::new("test");
        let collection = ResourceKind::BatchJob.collection_path("test");
        let body = json!({"metadata": {"name": "job-1", "labels": {PROCESS_LABEL: "ndvi"}}});
        cluster
            .request(Api::ControlPlane, Verb::Post, &collection, Some(&body))
            .await
            .unwrap();

        let instance = format!("{}/job-1", collection);
        let first = cluster
            .request(Api::ControlPlane, Verb::Get, &instance, None)
            .await
            .unwrap();
        assert_eq!(first.as_json().unwrap()["status"]["active"], 1);
        let second = cluster
            .request(Api::ControlPlane, Verb::Get, &instance, None)
            .await
            .unwrap();
        assert_eq!(second.as_json().unwrap()["status"]["succeeded"], 1);

        let pods = cluster
            .request(
                Api::ControlPlane,
                Verb::Get,
                "/api/v1/namespaces/test/pods?labelSelector=job-name%3Djob-1",
                None,
            )
            .await
            .unwrap();
        assert_eq!(pods.as_json().unwrap()["items"][0]["metadata"]["name"], "job-1-pod");
    }

    #[tokio::test]
    async fn test_unavailable_cluster() {
        let cluster = MockCluster::new("test");
        cluster.set_unavailable(true).await;
        let err = cluster
            .request(Api::ControlPlane, Verb::Get, "/api/v1/namespaces/test/pods", None)
            .await
            .unwrap_err();
        assert!(err.is_unavailable());
    }
}
