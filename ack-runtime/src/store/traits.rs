//! Collaborator trait definitions.

use async_trait::async_trait;

use crate::compare::Delta;
use crate::runtime::RuntimeObject;
use crate::types::{Identifiers, Resource};

use super::error::Result;

/// Per-kind binding to the provider's API.
#[async_trait]
pub trait ResourceManager<R: Resource>: Send + Sync {
    /// Read the latest observed state. `Ok(None)` if it does not exist.
    async fn fetch(&self, identifiers: &Identifiers) -> Result<Option<R>>;

    /// Create the remote resource and return its observed state.
    async fn create(&self, desired: &R) -> Result<R>;

    /// Apply the fields named in `delta` and return the new observed state.
    async fn update(&self, desired: &R, observed: &R, delta: &Delta) -> Result<R>;

    /// Delete the remote resource. May return `NotFound`.
    async fn delete(&self, identifiers: &Identifiers) -> Result<()>;
}

/// Control-plane client used to persist the declarative object.
#[async_trait]
pub trait ObjectWriter: Send + Sync {
    /// Write the status subresource.
    async fn persist_status(&self, object: &RuntimeObject) -> Result<()>;

    /// Write metadata (finalizers, annotations).
    async fn persist_metadata(&self, object: &RuntimeObject) -> Result<()>;
}

/// Change notification from the control-plane watch layer.
///
/// Delivery is at-least-once and may be reordered.
#[derive(Debug, Clone)]
pub enum WatchEvent {
    /// Object created or changed.
    Applied(RuntimeObject),
    /// Object removed from the control plane.
    Deleted(RuntimeObject),
}

impl WatchEvent {
    pub fn object(&self) -> &RuntimeObject {
        match self {
            WatchEvent::Applied(obj) | WatchEvent::Deleted(obj) => obj,
        }
    }
}
