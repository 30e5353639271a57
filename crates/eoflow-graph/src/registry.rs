// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Process, product and filter-mapping registries.
//!
//! Registries are immutable values built once at startup (from the built-in
//! defaults or from JSON documents) and handed to the compiler. Nothing in
//! this crate keeps a global registry.

use std::collections::BTreeMap;
use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RegistryError;

/// How a registered process participates in a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ProcessKind {
    /// Restricts a data source; collapsed into one extraction task.
    Filter,
    /// Compute step with one or more upstream inputs.
    Operation,
}

/// Declared type of a process argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ArgumentType {
    /// JSON object.
    Dict,
    /// JSON array.
    Array,
    /// JSON number.
    Number,
    /// JSON string.
    String,
    /// Upstream graph node, or an array of nodes for multi-input operations.
    Imagery,
}

impl ArgumentType {
    /// Check whether a JSON value has this type.
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            ArgumentType::Dict => value.is_object(),
            ArgumentType::Array => value.is_array(),
            ArgumentType::Number => value.is_number(),
            ArgumentType::String => value.is_string(),
            ArgumentType::Imagery => match value {
                Value::Object(_) => true,
                Value::Array(items) => !items.is_empty() && items.iter().all(Value::is_object),
                _ => false,
            },
        }
    }
}

/// JSON type name of a value, for error messages.
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "dict",
    }
}

/// Declaration of one process argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    /// Declared value type.
    #[serde(rename = "type")]
    pub value_type: ArgumentType,
    /// Whether the argument must be present.
    #[serde(default)]
    pub required: bool,
    /// Regex a string argument must match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ParameterSpec {
    fn required(value_type: ArgumentType) -> Self {
        Self {
            value_type,
            required: true,
            pattern: None,
            description: None,
        }
    }

    fn optional(value_type: ArgumentType) -> Self {
        Self {
            required: false,
            ..Self::required(value_type)
        }
    }

    fn with_pattern(mut self, pattern: &str) -> Self {
        self.pattern = Some(pattern.to_string());
        self
    }
}

/// Declaration of a process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessSpec {
    /// Process identifier used in graphs.
    pub process_id: String,
    /// Filter or operation.
    #[serde(rename = "type")]
    pub kind: ProcessKind,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// Declared arguments.
    #[serde(default)]
    pub parameters: BTreeMap<String, ParameterSpec>,
}

/// A process with its argument patterns compiled.
#[derive(Debug, Clone)]
pub struct RegisteredProcess {
    spec: ProcessSpec,
    patterns: BTreeMap<String, Regex>,
}

impl RegisteredProcess {
    /// The process declaration.
    pub fn spec(&self) -> &ProcessSpec {
        &self.spec
    }

    /// Process identifier.
    pub fn process_id(&self) -> &str {
        &self.spec.process_id
    }

    /// Filter or operation.
    pub fn kind(&self) -> ProcessKind {
        self.spec.kind
    }

    /// Compiled pattern for a string argument, if one is declared.
    pub fn pattern(&self, argument: &str) -> Option<&Regex> {
        self.patterns.get(argument)
    }
}

/// Registry of processes that may appear in a graph.
#[derive(Debug, Clone, Default)]
pub struct ProcessRegistry {
    processes: BTreeMap<String, RegisteredProcess>,
}

impl ProcessRegistry {
    /// Build a registry, compiling every declared pattern.
    pub fn new(specs: impl IntoIterator<Item = ProcessSpec>) -> Result<Self, RegistryError> {
        let mut processes = BTreeMap::new();
        for spec in specs {
            let mut patterns = BTreeMap::new();
            for (name, param) in &spec.parameters {
                if let Some(pattern) = &param.pattern {
                    let regex =
                        Regex::new(pattern).map_err(|source| RegistryError::InvalidPattern {
                            process_id: spec.process_id.clone(),
                            argument: name.clone(),
                            source,
                        })?;
                    patterns.insert(name.clone(), regex);
                }
            }
            processes.insert(spec.process_id.clone(), RegisteredProcess { spec, patterns });
        }
        Ok(Self { processes })
    }

    /// Parse a registry from a JSON array of process declarations.
    pub fn from_json_str(json: &str) -> Result<Self, RegistryError> {
        let specs: Vec<ProcessSpec> = serde_json::from_str(json)?;
        Self::new(specs)
    }

    /// Load a registry from a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Look up a process.
    pub fn get(&self, process_id: &str) -> Option<&RegisteredProcess> {
        self.processes.get(process_id)
    }

    /// All registered process ids, sorted.
    pub fn process_ids(&self) -> Vec<String> {
        self.processes.keys().cloned().collect()
    }

    /// Number of registered processes.
    pub fn len(&self) -> usize {
        self.processes.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    /// Built-in openEO processes supported by the EODC backend.
    pub fn builtin() -> Self {
        use ArgumentType::*;

        let date = r"^\d{4}-\d{2}-\d{2}([T ]\d{2}:\d{2}(:\d{2})?)?$";
        let imagery = || ("imagery", ParameterSpec::required(Imagery));

        let specs = vec![
            process(
                "get_collection",
                ProcessKind::Filter,
                "Select a product as data source",
                vec![("product_id", ParameterSpec::required(String))],
            ),
            process(
                "filter_bbox",
                ProcessKind::Filter,
                "Restrict the data source to a bounding box",
                vec![
                    imagery(),
                    ("left", ParameterSpec::required(Number)),
                    ("right", ParameterSpec::required(Number)),
                    ("top", ParameterSpec::required(Number)),
                    ("bottom", ParameterSpec::required(Number)),
                    (
                        "srs",
                        ParameterSpec::optional(String).with_pattern(r"^EPSG:\d+$"),
                    ),
                ],
            ),
            process(
                "filter_daterange",
                ProcessKind::Filter,
                "Restrict the data source to a date range",
                vec![
                    imagery(),
                    ("from", ParameterSpec::required(String).with_pattern(date)),
                    ("to", ParameterSpec::required(String).with_pattern(date)),
                ],
            ),
            process(
                "filter_bands",
                ProcessKind::Filter,
                "Restrict the data source to a set of bands",
                vec![imagery(), ("bands", ParameterSpec::required(Array))],
            ),
            process(
                "NDVI",
                ProcessKind::Operation,
                "Normalized difference vegetation index",
                vec![
                    imagery(),
                    (
                        "red",
                        ParameterSpec::required(String).with_pattern(r"^B\d{1,2}A?$"),
                    ),
                    (
                        "nir",
                        ParameterSpec::required(String).with_pattern(r"^B\d{1,2}A?$"),
                    ),
                ],
            ),
            process(
                "min_time",
                ProcessKind::Operation,
                "Temporal minimum per pixel",
                vec![imagery()],
            ),
            process(
                "max_time",
                ProcessKind::Operation,
                "Temporal maximum per pixel",
                vec![imagery()],
            ),
            process(
                "mean_time",
                ProcessKind::Operation,
                "Temporal mean per pixel",
                vec![imagery()],
            ),
        ];

        Self::new(specs).expect("built-in process patterns are valid regexes")
    }
}

fn process(
    process_id: &str,
    kind: ProcessKind,
    description: &str,
    parameters: Vec<(&str, ParameterSpec)>,
) -> ProcessSpec {
    ProcessSpec {
        process_id: process_id.to_string(),
        kind,
        description: description.to_string(),
        parameters: parameters
            .into_iter()
            .map(|(name, spec)| (name.to_string(), spec))
            .collect(),
    }
}

/// Declaration of a product (satellite data collection).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductSpec {
    /// Product identifier used in graphs.
    pub product_id: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
}

/// Registry of products that may be used as data sources.
#[derive(Debug, Clone, Default)]
pub struct ProductRegistry {
    products: BTreeMap<String, ProductSpec>,
}

impl ProductRegistry {
    /// Build a registry from product declarations.
    pub fn new(specs: impl IntoIterator<Item = ProductSpec>) -> Self {
        Self {
            products: specs
                .into_iter()
                .map(|spec| (spec.product_id.clone(), spec))
                .collect(),
        }
    }

    /// Parse a registry from a JSON array of product declarations.
    pub fn from_json_str(json: &str) -> Result<Self, RegistryError> {
        let specs: Vec<ProductSpec> = serde_json::from_str(json)?;
        Ok(Self::new(specs))
    }

    /// Load a registry from a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Look up a product.
    pub fn get(&self, product_id: &str) -> Option<&ProductSpec> {
        self.products.get(product_id)
    }

    /// Whether a product is registered.
    pub fn contains(&self, product_id: &str) -> bool {
        self.products.contains_key(product_id)
    }

    /// All registered product ids, sorted.
    pub fn product_ids(&self) -> Vec<String> {
        self.products.keys().cloned().collect()
    }

    /// Built-in Sentinel products available in the EODC data store.
    pub fn builtin() -> Self {
        Self::new([
            ProductSpec {
                product_id: "s2a_prd_msil1c".to_string(),
                description: "Sentinel-2A Level-1C top-of-atmosphere reflectance".to_string(),
            },
            ProductSpec {
                product_id: "s1a_csar_grdh_iw".to_string(),
                description: "Sentinel-1A GRD high resolution, IW mode".to_string(),
            },
        ])
    }
}

/// Static mapping from product to the process that extracts it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilterMapping {
    mapping: BTreeMap<String, String>,
}

impl FilterMapping {
    /// Build a mapping from `(product_id, extraction process id)` pairs.
    pub fn new<K: Into<String>, V: Into<String>>(pairs: impl IntoIterator<Item = (K, V)>) -> Self {
        Self {
            mapping: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Parse a mapping from a JSON object.
    pub fn from_json_str(json: &str) -> Result<Self, RegistryError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a mapping from a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Extraction process for a product.
    pub fn extraction_process(&self, product_id: &str) -> Option<&str> {
        self.mapping.get(product_id).map(String::as_str)
    }

    /// Built-in extraction processes.
    pub fn builtin() -> Self {
        Self::new([
            ("s2a_prd_msil1c", "filter-s2"),
            ("s1a_csar_grdh_iw", "filter-s1"),
        ])
    }
}

/// The three registries the compiler needs, bundled for injection.
#[derive(Debug, Clone, Default)]
pub struct Registries {
    /// Registered processes.
    pub processes: ProcessRegistry,
    /// Registered products.
    pub products: ProductRegistry,
    /// Product to extraction-process table.
    pub filter_mapping: FilterMapping,
}

impl Registries {
    /// Bundle registries.
    pub fn new(
        processes: ProcessRegistry,
        products: ProductRegistry,
        filter_mapping: FilterMapping,
    ) -> Self {
        Self {
            processes,
            products,
            filter_mapping,
        }
    }

    /// Built-in registries.
    pub fn builtin() -> Self {
        Self::new(
            ProcessRegistry::builtin(),
            ProductRegistry::builtin(),
            FilterMapping::builtin(),
        )
    }
}
