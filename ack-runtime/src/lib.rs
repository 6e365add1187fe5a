//! Generic reconciliation engine for externally-managed resources.
//!
//! A kind plugs in by implementing [`ResourceDescriptor`] and a
//! [`ResourceManager`]; the [`Reconciler`] and [`Controller`] are written
//! once and drive every kind the same way.
//!
//! # Example
//! ```ignore
//! use ack_runtime::{Controller, ControllerConfig, Reconciler, Registry};
//!
//! let reconciler = Reconciler::new(descriptor, manager, writer, config);
//! let registry = Registry::builder()
//!     .register(Arc::new(Controller::new(reconciler)))
//!     .build();
//! registry.run(events).await;
//! ```

pub mod audit;
pub mod backoff;
pub mod compare;
pub mod condition;
pub mod config;
pub mod controller;
pub mod descriptor;
pub mod error;
pub mod memory;
pub mod ownership;
pub mod queue;
pub mod reconciler;
pub mod registry;
pub mod runtime;
pub mod store;
pub mod types;

pub use audit::{AuditRecorder, ReconcileEvent, ReconcileResult};
pub use backoff::{Backoff, BackoffConfig};
pub use compare::{Delta, Difference, Equality, Field};
pub use condition::{Condition, ConditionStatus, ConditionType};
pub use config::{AdoptionPolicy, ConfigError, ControllerConfig, DeletionPolicy, MissingPolicy};
pub use controller::{Controller, ResourceState};
pub use descriptor::ResourceDescriptor;
pub use error::{DescriptorError, ReconcileError};
pub use memory::{InMemoryManager, MemoryObjectStore, Op};
pub use ownership::{Ownership, OwnershipTracker};
pub use queue::WorkQueue;
pub use reconciler::{Outcome, Reconciler};
pub use registry::{KindController, Registry, RegistryBuilder};
pub use runtime::{GroupKind, Object, ObjectMeta, RuntimeObject, Status};
pub use store::{ErrorClass, ManagerError, ObjectWriter, ResourceManager, WatchEvent};
pub use types::{Identifiers, Resource, ResourceKey, ResourceMetadata};
