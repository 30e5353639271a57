// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Parsed process graph nodes.

use serde_json::{Map, Value};

/// A parsed graph node. The process kind is resolved once at parse time.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// A collapsed chain of filters ending at one product.
    Filter(FilterNode),
    /// A compute step.
    Operation(OperationNode),
}

/// A chain of filter processes collapsed into one extraction step.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterNode {
    /// Product at the bottom of the chain.
    pub product_id: String,
    /// Extraction process the product maps to.
    pub process_id: String,
    /// Union of the arguments of every filter in the chain plus `product_id`.
    pub args: Map<String, Value>,
}

/// A compute step with its upstream inputs.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationNode {
    /// Registered process id.
    pub process_id: String,
    /// Arguments other than `imagery`, kept verbatim.
    pub args: Map<String, Value>,
    /// Upstream nodes, in argument order.
    pub inputs: Vec<Node>,
}

impl Node {
    /// Process that executes this node.
    pub fn process_id(&self) -> &str {
        match self {
            Node::Filter(node) => &node.process_id,
            Node::Operation(node) => &node.process_id,
        }
    }

    /// Arguments passed to the task.
    pub fn arguments(&self) -> &Map<String, Value> {
        match self {
            Node::Filter(node) => &node.args,
            Node::Operation(node) => &node.args,
        }
    }

    /// Upstream nodes. Filters are always leaves.
    pub fn sub_nodes(&self) -> &[Node] {
        match self {
            Node::Filter(_) => &[],
            Node::Operation(node) => &node.inputs,
        }
    }

    /// Whether this node is a collapsed filter chain.
    pub fn is_filter(&self) -> bool {
        matches!(self, Node::Filter(_))
    }

    /// Number of nodes in this subtree, root included.
    pub fn node_count(&self) -> usize {
        1 + self.sub_nodes().iter().map(Node::node_count).sum::<usize>()
    }
}
