//! Per-kind resource descriptor.
//!
//! The descriptor is the engine's only contact point with kind-specific
//! logic. The reconciler is written once and specialized only through this
//! trait. Implementations are stateless and shared by all workers of a kind.

use crate::compare::Delta;
use crate::error::DescriptorError;
use crate::runtime::{GroupKind, RuntimeObject};
use crate::types::{Identifiers, Resource};

pub trait ResourceDescriptor: Send + Sync + 'static {
    /// The typed resource this descriptor handles.
    type Resource: Resource;

    /// API group and kind of the resource type.
    fn group_kind(&self) -> GroupKind;

    /// Lookup key of a resource. Must not fail for a well-formed resource.
    fn identifiers(&self, resource: &Self::Resource) -> Identifiers;

    /// Differences between `a` and `b` over convergence-relevant fields only.
    fn delta(&self, a: &Self::Resource, b: &Self::Resource) -> Delta;

    /// True if the ownership tag names this controller.
    fn is_managed(&self, resource: &Self::Resource) -> bool;

    /// Controller named by the ownership tag, if any.
    fn owner(&self, resource: &Self::Resource) -> Option<String>;

    /// Set the ownership tag. No effect if already set.
    fn mark_managed(&self, resource: &mut Self::Resource);

    /// Clear the ownership tag. No effect if already clear.
    fn mark_unmanaged(&self, resource: &mut Self::Resource);

    /// Project observed remote fields into the declarative status of
    /// `resource`. Returns whether the status changed and needs persisting.
    fn update_cr_status(
        &self,
        resource: &mut Self::Resource,
        observed: &Self::Resource,
    ) -> Result<bool, DescriptorError>;

    /// A runtime object of this kind with no name, spec or status.
    fn empty_runtime_object(&self) -> RuntimeObject;

    fn resource_from_runtime_object(
        &self,
        object: &RuntimeObject,
    ) -> Result<Self::Resource, DescriptorError>;

    fn runtime_meta_object(&self, resource: &Self::Resource)
        -> Result<RuntimeObject, DescriptorError>;

    /// Finalizer guarding the control-plane object until remote teardown.
    fn finalizer_name(&self) -> String {
        let gk = self.group_kind();
        format!("finalizers.{}/{}", gk.group, gk.kind)
    }
}
