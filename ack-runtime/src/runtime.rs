//! Control-plane object model.
//!
//! The watch/client layer hands the engine untyped [`RuntimeObject`]s. Each
//! resource kind converts them into its typed [`Resource`] through its
//! descriptor; [`Object`] is a generic typed form most kinds can reuse.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::condition::Condition;
use crate::error::DescriptorError;
use crate::types::{Resource, ResourceMetadata};

/// API group and kind of a resource type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupKind {
    pub group: String,
    pub kind: String,
}

impl GroupKind {
    pub fn new(group: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            kind: kind.into(),
        }
    }

    /// Derive the group from an `apiVersion` of the form `group/version`.
    /// Core objects (`v1`) have an empty group.
    pub fn from_api_version(api_version: &str, kind: &str) -> Self {
        let group = match api_version.split_once('/') {
            Some((group, _version)) => group,
            None => "",
        };
        Self::new(group, kind)
    }
}

impl fmt::Display for GroupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{}.{}", self.kind, self.group)
        }
    }
}

/// Control-plane metadata common to every object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ObjectMeta {
    pub name: String,
    pub namespace: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub uid: String,
    /// Bumped by the control plane whenever the spec changes.
    pub generation: i64,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub resource_version: String,
    /// Deletion marker.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub finalizers: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl ObjectMeta {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.finalizers.iter().any(|f| f == finalizer)
    }

    /// Returns `true` if the finalizer was not present before.
    pub fn add_finalizer(&mut self, finalizer: &str) -> bool {
        if self.has_finalizer(finalizer) {
            return false;
        }
        self.finalizers.push(finalizer.to_string());
        true
    }

    /// Returns `true` if the finalizer was present before.
    pub fn remove_finalizer(&mut self, finalizer: &str) -> bool {
        let before = self.finalizers.len();
        self.finalizers.retain(|f| f != finalizer);
        self.finalizers.len() != before
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }

    /// `namespace/name`, or just `name` for cluster-scoped objects.
    pub fn object_ref(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}/{}", self.namespace, self.name)
        }
    }
}

/// Untyped object as delivered and persisted by the control-plane client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeObject {
    pub api_version: String,
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: Value,
    #[serde(default)]
    pub status: Value,
}

impl RuntimeObject {
    pub fn group_kind(&self) -> GroupKind {
        GroupKind::from_api_version(&self.api_version, &self.kind)
    }

    pub fn object_ref(&self) -> String {
        self.metadata.object_ref()
    }
}

/// Declarative status shared by all kinds using [`Object`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Status<T> {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack_resource_metadata: Option<ResourceMetadata>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(flatten)]
    pub observed: T,
}

impl<T: Default> Default for Status<T> {
    fn default() -> Self {
        Self {
            ack_resource_metadata: None,
            conditions: Vec::new(),
            observed: T::default(),
        }
    }
}

/// Generic typed resource: metadata, user-declared spec, observed status.
#[derive(Debug, Clone, PartialEq)]
pub struct Object<S, T> {
    pub meta: ObjectMeta,
    pub spec: S,
    pub status: Status<T>,
}

impl<S, T> Object<S, T>
where
    S: Serialize + DeserializeOwned,
    T: Serialize + DeserializeOwned + Default,
{
    pub fn new(meta: ObjectMeta, spec: S) -> Self {
        Self {
            meta,
            spec,
            status: Status::default(),
        }
    }

    /// Decode a runtime object. A missing or null status decodes as empty.
    pub fn from_runtime(obj: &RuntimeObject) -> Result<Self, DescriptorError> {
        if obj.spec.is_null() {
            return Err(DescriptorError::malformed(format!(
                "{} {} has no spec",
                obj.kind,
                obj.object_ref()
            )));
        }
        let spec = serde_json::from_value(obj.spec.clone())?;
        let status = if obj.status.is_null() {
            Status::default()
        } else {
            serde_json::from_value(obj.status.clone())?
        };
        Ok(Self {
            meta: obj.metadata.clone(),
            spec,
            status,
        })
    }

    pub fn to_runtime(&self, api_version: &str, kind: &str) -> Result<RuntimeObject, DescriptorError> {
        Ok(RuntimeObject {
            api_version: api_version.to_string(),
            kind: kind.to_string(),
            metadata: self.meta.clone(),
            spec: serde_json::to_value(&self.spec)?,
            status: serde_json::to_value(&self.status)?,
        })
    }
}

impl<S, T> Resource for Object<S, T>
where
    S: Clone + fmt::Debug + Send + Sync + 'static,
    T: Clone + fmt::Debug + Send + Sync + 'static,
{
    fn meta(&self) -> &ObjectMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.meta
    }

    fn resource_metadata(&self) -> Option<&ResourceMetadata> {
        self.status.ack_resource_metadata.as_ref()
    }

    fn set_resource_metadata(&mut self, metadata: ResourceMetadata) {
        self.status.ack_resource_metadata = Some(metadata);
    }

    fn conditions(&self) -> &[Condition] {
        &self.status.conditions
    }

    fn conditions_mut(&mut self) -> &mut Vec<Condition> {
        &mut self.status.conditions
    }
}
