// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Process graph compiler for eoflow.
//!
//! Turns an openEO process graph (a JSON tree of filter and operation steps)
//! into an ordered list of tasks that the engine can run one after another.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐     ┌────────────────┐     ┌──────────────────┐
//! │ process_graph (JSON) │────▶│   parse_node   │────▶│    Node tree     │
//! └──────────────────────┘     │  + validation  │     │ Filter/Operation │
//!                              └───────┬────────┘     └────────┬─────────┘
//!                                      │                       │
//!                              ┌───────▼────────┐     ┌────────▼─────────┐
//!                              │   Registries   │     │   build_tasks    │
//!                              │ processes      │     │ post-order walk  │
//!                              │ products       │     │ + convert task   │
//!                              │ filter mapping │     └────────┬─────────┘
//!                              └────────────────┘              │
//!                                                     ┌────────▼─────────┐
//!                                                     │  Vec<TaskSpec>   │
//!                                                     └──────────────────┘
//! ```
//!
//! | Process kind | Compiles to |
//! |--------------|-------------|
//! | `filter` | Merged into the nearest filter chain; the chain becomes one extraction task |
//! | `operation` | One task, after the tasks of all its inputs |
//!
//! # Example
//!
//! ```
//! use eoflow_graph::{Registries, compile};
//! use serde_json::json;
//!
//! let registries = Registries::builtin();
//! let graph = json!({
//!     "process_id": "min_time",
//!     "args": {"imagery": {"product_id": "s2a_prd_msil1c"}}
//! });
//!
//! let tasks = compile(&graph, "job-1", None, &registries).unwrap();
//! let ids: Vec<_> = tasks.iter().map(|t| t.process_id.as_str()).collect();
//! assert_eq!(ids, ["filter-s2", "min_time", "convert"]);
//! ```

#![deny(missing_docs)]

pub mod compile;
pub mod error;
pub mod node;
pub mod registry;
pub mod validation;

pub use compile::{
    CONVERT_PROCESS_ID, GraphCompiler, IMAGERY_ARGUMENT, PRODUCT_ARGUMENT, TaskSpec, build_tasks,
    compile,
};
pub use error::{GraphValidationError, RegistryError, Result};
pub use node::{FilterNode, Node, OperationNode};
pub use registry::{
    ArgumentType, FilterMapping, ParameterSpec, ProcessKind, ProcessRegistry, ProcessSpec,
    ProductRegistry, ProductSpec, RegisteredProcess, Registries,
};
pub use validation::{suggest_id, validate_arguments};

/// Extract the process graph from a submission body.
///
/// A submission is `{"process_graph": {...}, "output": {...}?}`.
pub fn process_graph_of(request: &serde_json::Value) -> Result<&serde_json::Value> {
    request
        .get("process_graph")
        .filter(|graph| graph.is_object())
        .ok_or(GraphValidationError::MissingProcessGraph)
}
