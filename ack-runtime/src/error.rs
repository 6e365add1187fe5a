//! Error types for the reconciliation engine.

use thiserror::Error;

use crate::store::{ErrorClass, ManagerError};

/// Errors raised by descriptor adapters and status projection.
///
/// These indicate malformed input (a programming error or a corrupt payload)
/// and are never retried.
#[derive(Debug, Error)]
pub enum DescriptorError {
    /// Object does not match the kind's schema.
    #[error("malformed object: {0}")]
    Malformed(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DescriptorError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }
}

/// Errors returned from a single reconciliation attempt.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Retry with backoff.
    #[error("{op} failed (transient): {source}")]
    Transient {
        op: &'static str,
        #[source]
        source: ManagerError,
    },

    /// Stop retrying until the desired spec changes.
    #[error("{0}")]
    Terminal(String),

    /// Remote state did not catch up within the sync pass budget.
    #[error("not converged after {passes} sync passes: {pending}")]
    NotConverged { passes: u32, pending: String },

    /// Descriptor rejected the resource.
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
}

impl ReconcileError {
    /// Classify a remote-call failure at the reconciler boundary.
    pub fn from_manager(op: &'static str, err: ManagerError) -> Self {
        match err.class() {
            ErrorClass::Transient => Self::Transient { op, source: err },
            ErrorClass::Terminal | ErrorClass::NotFound => {
                Self::Terminal(format!("{} failed: {}", op, err))
            }
        }
    }

    pub fn terminal(msg: impl Into<String>) -> Self {
        Self::Terminal(msg.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::NotConverged { .. })
    }
}
