// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for eoflow-graph.

use thiserror::Error;

use crate::registry::ArgumentType;

/// Result type using GraphValidationError.
pub type Result<T> = std::result::Result<T, GraphValidationError>;

/// Errors raised while parsing or validating a submitted process graph.
///
/// Every variant is reported before any task is emitted, so a failing
/// compilation never leaves partial state behind.
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
#[allow(missing_docs)] // Fields are self-documenting from variant docs
pub enum GraphValidationError {
    /// The request body carries no `process_graph` object.
    #[error("[G001] Request has no 'process_graph' object")]
    MissingProcessGraph,

    /// A graph node is not a JSON object.
    #[error("[G002] Node at '{path}' is not a JSON object")]
    InvalidNode { path: String },

    /// A node has neither `process_id` nor `product_id`.
    #[error("[G003] Node at '{path}' has neither 'process_id' nor 'product_id'")]
    MissingProcessId { path: String },

    /// The `args` member of a node is not an object.
    #[error("[G004] Node at '{path}' has non-object 'args'")]
    InvalidArguments { path: String },

    /// The process is not registered.
    #[error("[G010] Unknown process '{process_id}' at '{path}'{}", did_you_mean(.suggestion))]
    UnknownProcess {
        path: String,
        process_id: String,
        suggestion: Option<String>,
    },

    /// The product is not registered.
    #[error("[G011] Unknown product '{product_id}' at '{path}'{}", did_you_mean(.suggestion))]
    UnknownProduct {
        path: String,
        product_id: String,
        suggestion: Option<String>,
    },

    /// The product is registered but no extraction process is mapped to it.
    #[error("[G012] Product '{product_id}' has no extraction process")]
    UnmappedProduct { product_id: String },

    /// A required argument is absent.
    #[error("[G020] Process '{process_id}' at '{path}' is missing required argument '{argument}'")]
    MissingArgument {
        path: String,
        process_id: String,
        argument: String,
    },

    /// An argument value does not have the declared type.
    #[error(
        "[G021] Argument '{argument}' of process '{process_id}' at '{path}' must be {expected}, got {actual}"
    )]
    InvalidArgumentType {
        path: String,
        process_id: String,
        argument: String,
        expected: ArgumentType,
        actual: &'static str,
    },

    /// A string argument does not match the declared pattern.
    #[error(
        "[G022] Argument '{argument}' of process '{process_id}' at '{path}' does not match '{pattern}'"
    )]
    PatternMismatch {
        path: String,
        process_id: String,
        argument: String,
        pattern: String,
    },

    /// A node has no `imagery` input and does not name a product.
    #[error("[G030] Process '{process_id}' at '{path}' has no 'imagery' input")]
    MissingImagery { path: String, process_id: String },

    /// An operation appears below a filter; filter chains must end at a product.
    #[error(
        "[G031] Operation '{process_id}' at '{path}' cannot be the input of a filter chain"
    )]
    OperationInsideFilter { path: String, process_id: String },
}

fn did_you_mean(suggestion: &Option<String>) -> String {
    suggestion
        .as_ref()
        .map(|s| format!(". Did you mean '{}'?", s))
        .unwrap_or_default()
}

/// Errors raised while building registries from configuration.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RegistryError {
    /// A parameter pattern is not a valid regular expression.
    #[error("Invalid pattern for '{process_id}.{argument}': {source}")]
    InvalidPattern {
        /// Process declaring the parameter.
        process_id: String,
        /// Parameter name.
        argument: String,
        /// Regex compilation error.
        source: regex::Error,
    },

    /// Registry file could not be read.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Registry document could not be parsed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_process_with_suggestion() {
        let err = GraphValidationError::UnknownProcess {
            path: "process_graph".to_string(),
            process_id: "min_tme".to_string(),
            suggestion: Some("min_time".to_string()),
        };
        let msg = err.to_string();
        assert!(msg.starts_with("[G010]"));
        assert!(msg.contains("Did you mean 'min_time'?"));
    }

    #[test]
    fn test_unknown_product_without_suggestion() {
        let err = GraphValidationError::UnknownProduct {
            path: "process_graph.args.imagery".to_string(),
            product_id: "landsat".to_string(),
            suggestion: None,
        };
        let msg = err.to_string();
        assert!(msg.contains("'landsat'"));
        assert!(!msg.contains("Did you mean"));
    }

    #[test]
    fn test_invalid_argument_type_message() {
        let err = GraphValidationError::InvalidArgumentType {
            path: "process_graph".to_string(),
            process_id: "filter_bbox".to_string(),
            argument: "left".to_string(),
            expected: ArgumentType::Number,
            actual: "string",
        };
        assert!(err.to_string().contains("must be number, got string"));
    }
}
