//! External collaborator abstractions.
//!
//! These traits abstract the per-kind provider SDK bindings and the
//! control-plane client, so the reconciler works with domain objects only.

pub mod error;
pub mod traits;

pub use error::{ErrorClass, ManagerError, Result};
pub use traits::{ObjectWriter, ResourceManager, WatchEvent};
