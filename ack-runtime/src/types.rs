//! Resource identity and the polymorphic resource trait.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::condition::Condition;
use crate::runtime::{GroupKind, ObjectMeta};

/// Key sufficient to locate and re-fetch a remote resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identifiers {
    pub account_id: String,
    pub region: String,
    pub name: String,
}

impl Identifiers {
    pub fn new(
        account_id: impl Into<String>,
        region: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            account_id: account_id.into(),
            region: region.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for Identifiers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.account_id, self.region, self.name)
    }
}

/// Serialization key for queueing, backoff and lifecycle tracking.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey {
    pub group_kind: GroupKind,
    pub identifiers: Identifiers,
}

impl ResourceKey {
    pub fn new(group_kind: GroupKind, identifiers: Identifiers) -> Self {
        Self {
            group_kind,
            identifiers,
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.group_kind, self.identifiers)
    }
}

/// Provider-assigned identity, recorded in the declarative status once the
/// remote resource exists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arn: Option<String>,
    pub owner_account_id: String,
    pub region: String,
}

impl ResourceMetadata {
    /// ARNs compare case-insensitively.
    pub fn same_arn(&self, other: &ResourceMetadata) -> bool {
        match (&self.arn, &other.arn) {
            (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
            _ => false,
        }
    }
}

/// A custom object in the control plane mirroring one remote resource.
///
/// Kinds implement this directly or reuse [`crate::runtime::Object`].
pub trait Resource: Clone + fmt::Debug + Send + Sync + 'static {
    fn meta(&self) -> &ObjectMeta;

    fn meta_mut(&mut self) -> &mut ObjectMeta;

    /// Provider identity recorded in status, if the resource was created.
    fn resource_metadata(&self) -> Option<&ResourceMetadata>;

    fn set_resource_metadata(&mut self, metadata: ResourceMetadata);

    fn conditions(&self) -> &[Condition];

    fn conditions_mut(&mut self) -> &mut Vec<Condition>;

    /// True once the control plane has set the deletion timestamp.
    fn is_being_deleted(&self) -> bool {
        self.meta().deletion_timestamp.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_display() {
        let key = ResourceKey::new(
            GroupKind::new("s3.services.example", "Bucket"),
            Identifiers::new("123456789012", "us-west-2", "logs"),
        );
        assert_eq!(
            key.to_string(),
            "Bucket.s3.services.example:123456789012/us-west-2/logs"
        );
    }

    #[test]
    fn test_same_arn_ignores_case() {
        let a = ResourceMetadata {
            arn: Some("arn:aws:s3:::Logs".into()),
            owner_account_id: "1".into(),
            region: "r".into(),
        };
        let b = ResourceMetadata {
            arn: Some("ARN:AWS:S3:::logs".into()),
            ..a.clone()
        };
        assert!(a.same_arn(&b));
        assert!(!a.same_arn(&ResourceMetadata::default()));
    }
}
