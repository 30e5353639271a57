// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Process graph compilation.
//!
//! Compilation happens in two passes:
//!
//! 1. **Parse**: the JSON payload is turned into a [`Node`] tree. Filter chains
//!    are collapsed into a single [`FilterNode`] whose arguments are the union
//!    of every filter in the chain; operations keep their inputs as sub nodes.
//!    All validation happens here.
//! 2. **Linearise**: the tree is flattened leaf-first into [`TaskSpec`]s and a
//!    synthetic `convert` task is appended.
//!
//! ```text
//!   min_time                         seq 0  filter-s2  {product_id, left, ...}
//!      │                                        │
//!   filter_bbox          ────▶       seq 1  min_time   {}
//!      │                                        │
//!   {product_id}                     seq 2  convert    {job_id}
//! ```

use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::error::{GraphValidationError, Result};
use crate::node::{FilterNode, Node, OperationNode};
use crate::registry::{
    ArgumentType, ProcessKind, RegisteredProcess, Registries, json_type_name,
};
use crate::validation::{suggest_id, validate_arguments};

/// Argument linking a node to its upstream input(s).
pub const IMAGERY_ARGUMENT: &str = "imagery";

/// Key naming the product of a filter chain leaf.
pub const PRODUCT_ARGUMENT: &str = "product_id";

/// Process id of the synthetic finishing task.
pub const CONVERT_PROCESS_ID: &str = "convert";

const ROOT_PATH: &str = "process_graph";

/// One compiled unit of execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Position in execution order, starting at 0.
    pub seq_num: u32,
    /// Process to run.
    pub process_id: String,
    /// Arguments handed to the process container.
    pub args: Map<String, Value>,
    /// Sequence numbers of the tasks whose output this task reads.
    #[serde(default)]
    pub depends_on: Vec<u32>,
}

/// Compiles process graphs against a set of registries.
#[derive(Debug, Clone, Copy)]
pub struct GraphCompiler<'a> {
    registries: &'a Registries,
}

impl<'a> GraphCompiler<'a> {
    /// Create a compiler over the given registries.
    pub fn new(registries: &'a Registries) -> Self {
        Self { registries }
    }

    /// Compile a process graph into an ordered task list.
    ///
    /// `output` is the optional output specification of the submission; it is
    /// passed to the `convert` task.
    pub fn compile(
        &self,
        process_graph: &Value,
        job_id: &str,
        output: Option<&Value>,
    ) -> Result<Vec<TaskSpec>> {
        let root = self.parse_node(process_graph)?;
        let tasks = build_tasks(&root, job_id, output);
        debug!(
            job_id = %job_id,
            task_count = tasks.len(),
            "Compiled process graph"
        );
        Ok(tasks)
    }

    /// Parse a graph payload into a node tree, validating it on the way.
    pub fn parse_node(&self, payload: &Value) -> Result<Node> {
        self.parse_at(payload, ROOT_PATH)
    }

    fn parse_at(&self, payload: &Value, path: &str) -> Result<Node> {
        let object = payload
            .as_object()
            .ok_or_else(|| GraphValidationError::InvalidNode {
                path: path.to_string(),
            })?;

        if let Some(product) = object.get(PRODUCT_ARGUMENT) {
            let product_id = product_leaf(product, path, "product")?;
            let mut args = Map::new();
            args.insert(
                PRODUCT_ARGUMENT.to_string(),
                Value::String(product_id.clone()),
            );
            return self.filter_node(product_id, args, path);
        }

        let (process, args) = self.resolve_process(object, path)?;
        match process.kind() {
            ProcessKind::Filter => self.parse_filter_chain(process, args, path),
            ProcessKind::Operation => self.parse_operation(process, args, path),
        }
    }

    /// Look up and validate the process of a node object.
    fn resolve_process<'g>(
        &self,
        object: &'g Map<String, Value>,
        path: &str,
    ) -> Result<(&'a RegisteredProcess, &'g Map<String, Value>)> {
        static EMPTY: OnceLock<Map<String, Value>> = OnceLock::new();

        let process_id = object
            .get("process_id")
            .and_then(Value::as_str)
            .ok_or_else(|| GraphValidationError::MissingProcessId {
                path: path.to_string(),
            })?;

        let process = self
            .registries
            .processes
            .get(process_id)
            .ok_or_else(|| GraphValidationError::UnknownProcess {
                path: path.to_string(),
                process_id: process_id.to_string(),
                suggestion: suggest_id(
                    process_id,
                    self.registries.processes.process_ids().iter().map(String::as_str),
                ),
            })?;

        let args = match object.get("args") {
            None => EMPTY.get_or_init(Map::new),
            Some(Value::Object(args)) => args,
            Some(_) => {
                return Err(GraphValidationError::InvalidArguments {
                    path: path.to_string(),
                });
            }
        };

        validate_arguments(path, process, args)?;
        Ok((process, args))
    }

    /// Walk a chain of filters down its `imagery` links, merging arguments.
    ///
    /// Arguments of filters nearer the root take precedence over the same key
    /// further down the chain.
    fn parse_filter_chain(
        &self,
        process: &RegisteredProcess,
        args: &Map<String, Value>,
        path: &str,
    ) -> Result<Node> {
        let mut merged = Map::new();
        let mut current_process = process;
        let mut current_args = args;
        let mut current_path = path.to_string();

        loop {
            for (key, value) in current_args {
                if key != IMAGERY_ARGUMENT {
                    merged.entry(key.clone()).or_insert_with(|| value.clone());
                }
            }

            if let Some(product) = current_args.get(PRODUCT_ARGUMENT) {
                let product_id =
                    product_leaf(product, &current_path, current_process.process_id())?;
                return self.filter_node(product_id, merged, &current_path);
            }

            let next = current_args.get(IMAGERY_ARGUMENT).ok_or_else(|| {
                GraphValidationError::MissingImagery {
                    path: current_path.clone(),
                    process_id: current_process.process_id().to_string(),
                }
            })?;
            let next_path = format!("{}.args.{}", current_path, IMAGERY_ARGUMENT);
            let next_object = next
                .as_object()
                .ok_or_else(|| GraphValidationError::InvalidNode {
                    path: next_path.clone(),
                })?;

            if let Some(product) = next_object.get(PRODUCT_ARGUMENT) {
                let product_id = product_leaf(product, &next_path, "product")?;
                merged
                    .entry(PRODUCT_ARGUMENT.to_string())
                    .or_insert_with(|| Value::String(product_id.clone()));
                return self.filter_node(product_id, merged, &next_path);
            }

            let (next_process, next_args) = self.resolve_process(next_object, &next_path)?;
            if next_process.kind() != ProcessKind::Filter {
                return Err(GraphValidationError::OperationInsideFilter {
                    path: next_path,
                    process_id: next_process.process_id().to_string(),
                });
            }

            current_process = next_process;
            current_args = next_args;
            current_path = next_path;
        }
    }

    fn parse_operation(
        &self,
        process: &RegisteredProcess,
        args: &Map<String, Value>,
        path: &str,
    ) -> Result<Node> {
        let mut own_args = Map::new();
        let mut inputs = Vec::new();

        for (key, value) in args {
            if key != IMAGERY_ARGUMENT {
                own_args.insert(key.clone(), value.clone());
                continue;
            }

            let input_path = format!("{}.args.{}", path, IMAGERY_ARGUMENT);
            match value {
                Value::Array(items) => {
                    for (index, item) in items.iter().enumerate() {
                        let item_path = format!("{}[{}]", input_path, index);
                        inputs.push(self.parse_at(item, &item_path)?);
                    }
                }
                other => inputs.push(self.parse_at(other, &input_path)?),
            }
        }

        if inputs.is_empty() {
            return Err(GraphValidationError::MissingImagery {
                path: path.to_string(),
                process_id: process.process_id().to_string(),
            });
        }

        Ok(Node::Operation(OperationNode {
            process_id: process.process_id().to_string(),
            args: own_args,
            inputs,
        }))
    }

    fn filter_node(
        &self,
        product_id: String,
        args: Map<String, Value>,
        path: &str,
    ) -> Result<Node> {
        if !self.registries.products.contains(&product_id) {
            return Err(GraphValidationError::UnknownProduct {
                path: path.to_string(),
                suggestion: suggest_id(
                    &product_id,
                    self.registries.products.product_ids().iter().map(String::as_str),
                ),
                product_id,
            });
        }

        let process_id = self
            .registries
            .filter_mapping
            .extraction_process(&product_id)
            .ok_or_else(|| GraphValidationError::UnmappedProduct {
                product_id: product_id.clone(),
            })?
            .to_string();

        Ok(Node::Filter(FilterNode {
            product_id,
            process_id,
            args,
        }))
    }
}

fn product_leaf(value: &Value, path: &str, process_id: &str) -> Result<String> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| GraphValidationError::InvalidArgumentType {
            path: path.to_string(),
            process_id: process_id.to_string(),
            argument: PRODUCT_ARGUMENT.to_string(),
            expected: ArgumentType::String,
            actual: json_type_name(value),
        })
}

/// Flatten a node tree into tasks, leaf first, and append `convert`.
///
/// Every task appears after the tasks it depends on. For the linear chain
/// `filter → op1 → ... → opN` the result is `[filter, op1, ..., opN, convert]`.
pub fn build_tasks(root: &Node, job_id: &str, output: Option<&Value>) -> Vec<TaskSpec> {
    let mut tasks = Vec::with_capacity(root.node_count() + 1);
    let root_seq = push_tasks(root, &mut tasks);

    let mut convert_args = Map::new();
    convert_args.insert("job_id".to_string(), json!(job_id));
    if let Some(output) = output.filter(|o| !o.is_null()) {
        convert_args.insert("output".to_string(), output.clone());
    }

    tasks.push(TaskSpec {
        seq_num: tasks.len() as u32,
        process_id: CONVERT_PROCESS_ID.to_string(),
        args: convert_args,
        depends_on: vec![root_seq],
    });

    tasks
}

fn push_tasks(node: &Node, tasks: &mut Vec<TaskSpec>) -> u32 {
    let depends_on = node
        .sub_nodes()
        .iter()
        .map(|input| push_tasks(input, tasks))
        .collect();

    let seq_num = tasks.len() as u32;
    tasks.push(TaskSpec {
        seq_num,
        process_id: node.process_id().to_string(),
        args: node.arguments().clone(),
        depends_on,
    });
    seq_num
}

/// Compile a process graph with the given registries.
///
/// Convenience wrapper around [`GraphCompiler::compile`].
pub fn compile(
    process_graph: &Value,
    job_id: &str,
    output: Option<&Value>,
    registries: &Registries,
) -> Result<Vec<TaskSpec>> {
    GraphCompiler::new(registries).compile(process_graph, job_id, output)
}
