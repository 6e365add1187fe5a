//! Ownership tracking.
//!
//! Decides whether this controller may mutate a remote resource. Ownership
//! is re-derived from the remote tag and the recorded status on every
//! reconciliation and never cached, so a crash between create and mark is
//! recovered on the next attempt.

use tracing::debug;

use crate::config::AdoptionPolicy;
use crate::descriptor::ResourceDescriptor;
use crate::types::Resource;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ownership {
    /// Remote resource carries our tag.
    Managed,
    /// Untagged, but our status records creating it.
    Recovered,
    /// Untagged, pre-existing, and adoption is allowed.
    Adopt,
    /// Untagged or owned elsewhere; must not be touched.
    Conflict(String),
}

pub struct OwnershipTracker<'a, D: ResourceDescriptor> {
    descriptor: &'a D,
    adoption: AdoptionPolicy,
}

impl<'a, D: ResourceDescriptor> OwnershipTracker<'a, D> {
    pub fn new(descriptor: &'a D, adoption: AdoptionPolicy) -> Self {
        Self {
            descriptor,
            adoption,
        }
    }

    pub fn check(&self, desired: &D::Resource, observed: &D::Resource) -> Ownership {
        if self.descriptor.is_managed(observed) {
            return Ownership::Managed;
        }

        if let Some(owner) = self.descriptor.owner(observed) {
            return Ownership::Conflict(format!(
                "{} {} is managed by {}",
                self.descriptor.group_kind(),
                self.descriptor.identifiers(observed),
                owner
            ));
        }

        let recorded = desired
            .resource_metadata()
            .zip(observed.resource_metadata())
            .is_some_and(|(ours, theirs)| ours.same_arn(theirs));
        if recorded {
            debug!(
                "Ownership tag missing on {} but status records its creation",
                self.descriptor.identifiers(observed)
            );
            return Ownership::Recovered;
        }

        match self.adoption.for_object(desired.meta()) {
            AdoptionPolicy::Adopt => Ownership::Adopt,
            AdoptionPolicy::Never => Ownership::Conflict(format!(
                "{} {} already exists and is not managed by this controller",
                self.descriptor.group_kind(),
                self.descriptor.identifiers(observed)
            )),
        }
    }

    /// Mark `desired` so that create/update write our tag.
    pub fn claim(&self, desired: &mut D::Resource) {
        self.descriptor.mark_managed(desired);
    }

    pub fn release(&self, resource: &mut D::Resource) {
        self.descriptor.mark_unmanaged(resource);
    }
}
