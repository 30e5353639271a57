// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for eoflow-engine.

use std::path::PathBuf;
use std::time::Duration;

use eoflow_cluster::ClusterConfig;
use eoflow_graph::{FilterMapping, ProcessRegistry, ProductRegistry, RegistryError, Registries};

use crate::catalog::{CatalogError, ImageCatalog};

/// Engine configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Job store URL.
    pub database_url: String,
    /// Cluster access.
    pub cluster: ClusterConfig,
    /// Shared read-only claim holding the source products.
    pub product_volume: String,
    /// Shared claim receiving job results.
    pub results_volume: String,
    /// Deadline for an image build.
    pub build_timeout: Duration,
    /// Deadline for a batch job.
    pub batch_timeout: Duration,
    /// Process registry file. Built-in registry when unset.
    pub process_registry: Option<PathBuf>,
    /// Product registry file. Built-in registry when unset.
    pub product_registry: Option<PathBuf>,
    /// Product to extraction-process mapping file. Built-in mapping when unset.
    pub filter_mapping: Option<PathBuf>,
    /// Image catalog file. Built-in catalog when unset.
    pub image_catalog: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new(ClusterConfig::default())
    }
}

impl EngineConfig {
    /// Defaults around the given cluster configuration.
    pub fn new(cluster: ClusterConfig) -> Self {
        Self {
            database_url: "sqlite:eoflow.db".to_string(),
            cluster,
            product_volume: "pvc-eodc".to_string(),
            results_volume: "pvc-results".to_string(),
            build_timeout: Duration::from_secs(1800),
            batch_timeout: Duration::from_secs(3600),
            process_registry: None,
            product_registry: None,
            filter_mapping: None,
            image_catalog: None,
        }
    }

    /// Load configuration from environment variables.
    ///
    /// Cluster settings are read by [`ClusterConfig::from_env`]. In addition:
    /// - `EOFLOW_DATABASE_URL`: job store URL (default: "sqlite:eoflow.db")
    /// - `EOFLOW_PRODUCT_VOLUME`: product claim (default: "pvc-eodc")
    /// - `EOFLOW_RESULTS_VOLUME`: results claim (default: "pvc-results")
    /// - `EOFLOW_BUILD_TIMEOUT_SECS`: image build deadline (default: 1800)
    /// - `EOFLOW_BATCH_TIMEOUT_SECS`: batch job deadline (default: 3600)
    /// - `EOFLOW_PROCESS_REGISTRY`, `EOFLOW_PRODUCT_REGISTRY`,
    ///   `EOFLOW_FILTER_MAPPING`, `EOFLOW_IMAGE_CATALOG`: JSON files replacing
    ///   the built-in tables (optional)
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::new(ClusterConfig::from_env()?);

        Ok(Self {
            database_url: std::env::var("EOFLOW_DATABASE_URL").unwrap_or(defaults.database_url),
            product_volume: std::env::var("EOFLOW_PRODUCT_VOLUME")
                .unwrap_or(defaults.product_volume),
            results_volume: std::env::var("EOFLOW_RESULTS_VOLUME")
                .unwrap_or(defaults.results_volume),
            build_timeout: env_secs("EOFLOW_BUILD_TIMEOUT_SECS", defaults.build_timeout)?,
            batch_timeout: env_secs("EOFLOW_BATCH_TIMEOUT_SECS", defaults.batch_timeout)?,
            process_registry: std::env::var("EOFLOW_PROCESS_REGISTRY").ok().map(PathBuf::from),
            product_registry: std::env::var("EOFLOW_PRODUCT_REGISTRY").ok().map(PathBuf::from),
            filter_mapping: std::env::var("EOFLOW_FILTER_MAPPING").ok().map(PathBuf::from),
            image_catalog: std::env::var("EOFLOW_IMAGE_CATALOG").ok().map(PathBuf::from),
            cluster: defaults.cluster,
        })
    }

    /// Set the job store URL.
    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = url.into();
        self
    }

    /// Set the shared product and results claims.
    pub fn with_base_volumes(
        mut self,
        product_volume: impl Into<String>,
        results_volume: impl Into<String>,
    ) -> Self {
        self.product_volume = product_volume.into();
        self.results_volume = results_volume.into();
        self
    }

    /// Set the image build deadline.
    pub fn with_build_timeout(mut self, timeout: Duration) -> Self {
        self.build_timeout = timeout;
        self
    }

    /// Set the batch job deadline.
    pub fn with_batch_timeout(mut self, timeout: Duration) -> Self {
        self.batch_timeout = timeout;
        self
    }

    /// Set the image catalog file.
    pub fn with_image_catalog(mut self, path: impl Into<PathBuf>) -> Self {
        self.image_catalog = Some(path.into());
        self
    }

    /// Build the compiler registries, loading configured files.
    pub fn registries(&self) -> Result<Registries, RegistryError> {
        let processes = match &self.process_registry {
            Some(path) => ProcessRegistry::from_path(path)?,
            None => ProcessRegistry::builtin(),
        };
        let products = match &self.product_registry {
            Some(path) => ProductRegistry::from_path(path)?,
            None => ProductRegistry::builtin(),
        };
        let filter_mapping = match &self.filter_mapping {
            Some(path) => FilterMapping::from_path(path)?,
            None => FilterMapping::builtin(),
        };
        Ok(Registries::new(processes, products, filter_mapping))
    }

    /// Load the image catalog.
    pub fn load_image_catalog(&self) -> Result<ImageCatalog, CatalogError> {
        match &self.image_catalog {
            Some(path) => ImageCatalog::from_path(path),
            None => Ok(ImageCatalog::builtin()),
        }
    }
}

fn env_secs(name: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    match std::env::var(name) {
        Ok(value) => value
            .parse()
            .map(Duration::from_secs)
            .map_err(|_| ConfigError::InvalidNumber(name)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Cluster configuration is incomplete.
    #[error("Cluster configuration: {0}")]
    Cluster(#[from] eoflow_cluster::ConfigError),
    /// A numeric environment variable could not be parsed.
    #[error("Invalid number in environment variable: {0}")]
    InvalidNumber(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.product_volume, "pvc-eodc");
        assert_eq!(config.results_volume, "pvc-results");
        assert_eq!(config.batch_timeout, Duration::from_secs(3600));
        assert!(config.image_catalog.is_none());
    }

    #[test]
    fn test_builder_methods() {
        let config = EngineConfig::new(ClusterConfig::new("https://api:6443", "openeo"))
            .with_database_url("sqlite::memory:")
            .with_base_volumes("pvc-products", "pvc-out")
            .with_build_timeout(Duration::from_secs(60))
            .with_batch_timeout(Duration::from_secs(120));

        assert_eq!(config.database_url, "sqlite::memory:");
        assert_eq!(config.cluster.namespace, "openeo");
        assert_eq!(config.product_volume, "pvc-products");
        assert_eq!(config.results_volume, "pvc-out");
        assert_eq!(config.build_timeout, Duration::from_secs(60));
        assert_eq!(config.batch_timeout, Duration::from_secs(120));
    }

    #[test]
    fn test_builtin_tables() {
        let config = EngineConfig::default();
        let registries = config.registries().unwrap();
        assert!(registries.processes.get("NDVI").is_some());
        assert!(config.load_image_catalog().unwrap().contains("NDVI"));
    }

    #[test]
    fn test_missing_catalog_file() {
        let config = EngineConfig::default().with_image_catalog("/nonexistent/images.json");
        assert!(matches!(
            config.load_image_catalog(),
            Err(CatalogError::Io(_))
        ));
    }
}
