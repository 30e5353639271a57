// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Process image catalog.
//!
//! Maps each process id to the git source its image is built from and the
//! compute resources its container gets. Loaded once and shared read-only.
//!
//! ```json
//! {
//!   "default_resources": {"cpu_request": "500m", "cpu_limit": "1",
//!                         "memory_request": "1Gi", "memory_limit": "2Gi"},
//!   "processes": {
//!     "NDVI": {"git_uri": "https://git.example/ndvi.git", "git_ref": "v2",
//!              "resources": {"cpu_request": "1", "cpu_limit": "2",
//!                            "memory_request": "2Gi", "memory_limit": "4Gi"}}
//!   }
//! }
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use eoflow_cluster::{BuildSource, ComputeResources};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Repository holding the built-in process images, one directory each.
pub const DEFAULT_REPOSITORY: &str = "https://git.eoflow.local/eoflow/processes.git";

/// Processes with built-in images.
const BUILTIN_PROCESSES: &[&str] = &[
    "filter-s1",
    "filter-s2",
    "NDVI",
    "min_time",
    "max_time",
    "mean_time",
    "convert",
];

/// Catalog loading errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CatalogError {
    /// Catalog file could not be read.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Catalog document could not be parsed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Image source and container sizing of one process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSpec {
    /// Where the image is built from.
    #[serde(flatten)]
    pub source: BuildSource,
    /// Requests and limits. Catalog defaults when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ComputeResources>,
}

/// Process id to image table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageCatalog {
    #[serde(default)]
    default_resources: ComputeResources,
    #[serde(default)]
    processes: BTreeMap<String, ImageSpec>,
}

impl ImageCatalog {
    /// Catalog with the given default resources and no processes.
    pub fn new(default_resources: ComputeResources) -> Self {
        Self {
            default_resources,
            processes: BTreeMap::new(),
        }
    }

    /// Register a process image.
    pub fn with_process(mut self, process_id: impl Into<String>, spec: ImageSpec) -> Self {
        self.processes.insert(process_id.into(), spec);
        self
    }

    /// Parse a catalog from JSON.
    pub fn from_json_str(json: &str) -> Result<Self, CatalogError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a catalog from a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Built-in catalog: every built-in process from [`DEFAULT_REPOSITORY`],
    /// one context directory per process.
    pub fn builtin() -> Self {
        BUILTIN_PROCESSES
            .iter()
            .fold(Self::default(), |catalog, process_id| {
                catalog.with_process(
                    *process_id,
                    ImageSpec {
                        source: BuildSource {
                            git_uri: DEFAULT_REPOSITORY.to_string(),
                            git_ref: "master".to_string(),
                            context_dir: Some(process_id.to_string()),
                        },
                        resources: None,
                    },
                )
            })
    }

    /// Image spec of a process.
    pub fn get(&self, process_id: &str) -> Option<&ImageSpec> {
        self.processes.get(process_id)
    }

    /// Whether a process has an image.
    pub fn contains(&self, process_id: &str) -> bool {
        self.processes.contains_key(process_id)
    }

    /// Resources for a process, falling back to the catalog defaults.
    pub fn resources_for(&self, process_id: &str) -> ComputeResources {
        self.get(process_id)
            .and_then(|spec| spec.resources.clone())
            .unwrap_or_else(|| self.default_resources.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_catalog() {
        let catalog = ImageCatalog::builtin();

        let ndvi = catalog.get("NDVI").unwrap();
        assert_eq!(ndvi.source.git_uri, DEFAULT_REPOSITORY);
        assert_eq!(ndvi.source.context_dir.as_deref(), Some("NDVI"));
        assert!(catalog.contains("convert"));
        assert!(catalog.contains("filter-s2"));
        assert!(!catalog.contains("filter_bbox"));
        assert_eq!(catalog.resources_for("NDVI"), ComputeResources::default());
    }

    #[test]
    fn test_catalog_from_json() {
        let catalog = ImageCatalog::from_json_str(
            r#"{
                "default_resources": {
                    "cpu_request": "250m", "cpu_limit": "500m",
                    "memory_request": "512Mi", "memory_limit": "1Gi"
                },
                "processes": {
                    "NDVI": {
                        "git_uri": "https://git.example/ndvi.git",
                        "resources": {
                            "cpu_request": "1", "cpu_limit": "2",
                            "memory_request": "2Gi", "memory_limit": "4Gi"
                        }
                    },
                    "min_time": {"git_uri": "https://git.example/min.git", "git_ref": "v3"}
                }
            }"#,
        )
        .unwrap();

        let ndvi = catalog.get("NDVI").unwrap();
        assert_eq!(ndvi.source.git_ref, "master");
        assert_eq!(catalog.resources_for("NDVI").memory_limit, "4Gi");
        assert_eq!(catalog.get("min_time").unwrap().source.git_ref, "v3");
        assert_eq!(catalog.resources_for("min_time").cpu_request, "250m");
        assert_eq!(catalog.resources_for("unknown").memory_request, "512Mi");
    }

    #[test]
    fn test_catalog_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("images.json");
        std::fs::write(
            &path,
            r#"{"processes": {"convert": {"git_uri": "https://git.example/convert.git"}}}"#,
        )
        .unwrap();

        let catalog = ImageCatalog::from_path(&path).unwrap();

        assert!(catalog.contains("convert"));
        assert_eq!(catalog.resources_for("convert"), ComputeResources::default());
    }

    #[test]
    fn test_invalid_catalog() {
        assert!(matches!(
            ImageCatalog::from_json_str(r#"{"processes": {"NDVI": {}}}"#),
            Err(CatalogError::Json(_))
        ));
    }
}
