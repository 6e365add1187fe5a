//! Resource kinds served by this controller.

pub mod bucket;
pub mod queue;

use std::collections::BTreeMap;

use ack_runtime::{Identifiers, ObjectMeta, Resource};

/// Remote tag naming the controller that manages a resource.
pub const MANAGED_BY_TAG: &str = "ack.runtime/managed-by";

/// Per-object override of the account a resource lives in.
pub const ACCOUNT_ANNOTATION: &str = "ack.runtime/owner-account-id";
/// Per-object override of the region a resource lives in.
pub const REGION_ANNOTATION: &str = "ack.runtime/region";

/// Default placement for objects without account/region annotations.
#[derive(Debug, Clone)]
pub struct Scope {
    pub account_id: String,
    pub region: String,
}

impl Scope {
    pub fn identifiers(&self, meta: &ObjectMeta, name: &str) -> Identifiers {
        Identifiers::new(
            meta.annotation(ACCOUNT_ANNOTATION)
                .unwrap_or(&self.account_id),
            meta.annotation(REGION_ANNOTATION).unwrap_or(&self.region),
            name,
        )
    }
}

pub fn is_managed_by(tags: &BTreeMap<String, String>, controller_id: &str) -> bool {
    tags.get(MANAGED_BY_TAG).is_some_and(|v| v == controller_id)
}

pub fn managed_by(tags: &BTreeMap<String, String>) -> Option<String> {
    tags.get(MANAGED_BY_TAG).cloned()
}

/// Copy provider identity and observed fields into `resource`'s status.
pub fn project_status<R, T>(
    resource: &mut R,
    observed: &R,
    field: impl Fn(&mut R) -> &mut T,
    value: &T,
) -> bool
where
    R: Resource,
    T: Clone + PartialEq,
{
    let mut changed = false;
    if let Some(metadata) = observed.resource_metadata() {
        if resource.resource_metadata() != Some(metadata) {
            resource.set_resource_metadata(metadata.clone());
            changed = true;
        }
    }
    let current = field(resource);
    if *current != *value {
        *current = value.clone();
        changed = true;
    }
    changed
}
