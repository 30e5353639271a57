// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for eoflow-cluster.

use std::time::Duration;

use thiserror::Error;

use crate::template::ResourceKind;

/// Result type for connector calls.
pub type Result<T> = std::result::Result<T, ClusterError>;

/// Errors raised by a [`Connector`](crate::Connector).
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum ClusterError {
    /// The cluster answered with a non-2xx status.
    #[error("Cluster API returned {code}: {body}")]
    Api {
        /// HTTP status code.
        code: u16,
        /// Response body, as text.
        body: String,
    },

    /// The request could not be sent or the connection broke.
    #[error("Cluster transport error: {0}")]
    Transport(String),

    /// The connect or read timeout elapsed.
    #[error("Cluster request timed out: {0}")]
    Timeout(String),

    /// The response body could not be decoded.
    #[error("Failed to decode cluster response: {0}")]
    Decode(String),
}

impl ClusterError {
    /// HTTP status code, for API errors.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ClusterError::Api { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Whether the object already exists (HTTP 409).
    pub fn is_conflict(&self) -> bool {
        self.status_code() == Some(409)
    }

    /// Whether the object does not exist (HTTP 404).
    pub fn is_not_found(&self) -> bool {
        self.status_code() == Some(404)
    }

    /// Whether the cluster could not be reached at all.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            ClusterError::Transport(_) | ClusterError::Timeout(_)
        ) || self.status_code().is_some_and(|code| code >= 500)
    }
}

/// Errors raised while driving a resource through its lifecycle.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LifecycleError {
    /// Creation hit a name conflict twice in a row.
    #[error("{kind} '{name}' still conflicts after delete and recreate")]
    Conflict {
        /// Resource kind.
        kind: ResourceKind,
        /// Object name.
        name: String,
    },

    /// The resource reached a failure state.
    #[error("{kind} '{name}' failed: {reason}")]
    Failed {
        /// Resource kind.
        kind: ResourceKind,
        /// Object name.
        name: String,
        /// Failure reported by the cluster.
        reason: String,
    },

    /// The resource did not become ready before the deadline.
    #[error("{kind} '{name}' not ready after {timeout:?}")]
    WatchTimeout {
        /// Resource kind.
        kind: ResourceKind,
        /// Object name.
        name: String,
        /// Deadline that elapsed.
        timeout: Duration,
    },

    /// The watch was cancelled.
    #[error("Watching {kind} '{name}' was cancelled")]
    Cancelled {
        /// Resource kind.
        kind: ResourceKind,
        /// Object name.
        name: String,
    },

    /// A ready resource lacks a field the caller needs.
    #[error("{kind} '{name}' has no '{field}'")]
    MissingField {
        /// Resource kind.
        kind: ResourceKind,
        /// Object name.
        name: String,
        /// Missing field path.
        field: &'static str,
    },

    /// A connector call failed.
    #[error(transparent)]
    Cluster(#[from] ClusterError),
}

impl LifecycleError {
    /// Whether the error came from cancellation rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, LifecycleError::Cancelled { .. })
    }

    /// The underlying connector error, if any.
    pub fn cluster_error(&self) -> Option<&ClusterError> {
        match self {
            LifecycleError::Cluster(err) => Some(err),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        let conflict = ClusterError::Api {
            code: 409,
            body: "AlreadyExists".to_string(),
        };
        assert!(conflict.is_conflict());
        assert!(!conflict.is_not_found());
        assert!(!conflict.is_unavailable());

        let missing = ClusterError::Api {
            code: 404,
            body: String::new(),
        };
        assert!(missing.is_not_found());

        assert!(ClusterError::Timeout("read".to_string()).is_unavailable());
        assert!(
            ClusterError::Api {
                code: 503,
                body: String::new()
            }
            .is_unavailable()
        );
        assert_eq!(ClusterError::Decode("x".to_string()).status_code(), None);
    }

    #[test]
    fn test_lifecycle_error_messages() {
        let err = LifecycleError::Failed {
            kind: ResourceKind::BatchJob,
            name: "job-abc".to_string(),
            reason: "BackoffLimitExceeded".to_string(),
        };
        assert_eq!(err.to_string(), "batchjob 'job-abc' failed: BackoffLimitExceeded");

        let err: LifecycleError = ClusterError::Transport("connection refused".to_string()).into();
        assert!(err.cluster_error().is_some());
        assert!(!err.is_cancelled());
    }
}
