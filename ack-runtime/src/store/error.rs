//! Errors reported by the external collaborators (provider SDK bindings and
//! the control-plane client).

use thiserror::Error;

/// How the reconciler treats a failed remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retried with backoff, no user-visible terminal state.
    Transient,
    /// Stops automatic retry until the desired spec changes.
    Terminal,
    /// The remote resource does not exist.
    NotFound,
}

/// Errors that can occur during remote or control-plane operations.
#[derive(Debug, Clone, Error)]
pub enum ManagerError {
    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Request was rate limited by the provider.
    #[error("throttled: {0}")]
    Throttled(String),

    /// Request timed out.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Optimistic concurrency conflict (stale resource version).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Provider endpoint unavailable.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// The desired spec was rejected by the provider.
    #[error("invalid: {0}")]
    Invalid(String),

    /// Credentials lack permission for the operation.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// Internal error.
    #[error("internal: {0}")]
    Internal(String),
}

impl ManagerError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ManagerError::NotFound(_) => ErrorClass::NotFound,
            ManagerError::Invalid(_) | ManagerError::AccessDenied(_) => ErrorClass::Terminal,
            ManagerError::Throttled(_)
            | ManagerError::Timeout(_)
            | ManagerError::Conflict(_)
            | ManagerError::Unavailable(_)
            | ManagerError::Internal(_) => ErrorClass::Transient,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.class() == ErrorClass::NotFound
    }
}

/// Result type for collaborator operations.
pub type Result<T> = std::result::Result<T, ManagerError>;
