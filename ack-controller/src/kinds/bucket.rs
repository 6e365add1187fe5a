//! Object storage buckets.

use std::collections::BTreeMap;

use ack_runtime::compare::{delta_of, to_value};
use ack_runtime::{
    Delta, DescriptorError, Equality, Field, GroupKind, Identifiers, Object, ResourceDescriptor,
    RuntimeObject,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{is_managed_by, managed_by, project_status, Scope, MANAGED_BY_TAG};

pub const API_VERSION: &str = "s3.services.example/v1alpha1";
pub const KIND: &str = "Bucket";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub versioning: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kms_key_arn: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cors_origins: Vec<String>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketObserved {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

pub type Bucket = Object<BucketSpec, BucketObserved>;

pub struct BucketDescriptor {
    controller_id: String,
    scope: Scope,
    fields: Vec<Field<Bucket>>,
}

impl BucketDescriptor {
    pub fn new(controller_id: &str, scope: Scope) -> Self {
        Self {
            controller_id: controller_id.to_string(),
            scope,
            fields: vec![
                Field::new("Spec.Versioning", |b: &Bucket| b.spec.versioning.map(Value::from))
                    .with(Equality::AbsentIsEmpty),
                Field::new("Spec.KMSKeyARN", |b: &Bucket| {
                    b.spec.kms_key_arn.clone().map(Value::from)
                })
                .with(Equality::CaseInsensitive),
                Field::new("Spec.CORSOrigins", |b: &Bucket| to_value(&b.spec.cors_origins))
                    .with(Equality::Unordered),
                Field::new("Spec.Tags", |b: &Bucket| to_value(&b.spec.tags))
                    .with(Equality::AbsentIsEmpty),
            ],
        }
    }
}

impl ResourceDescriptor for BucketDescriptor {
    type Resource = Bucket;

    fn group_kind(&self) -> GroupKind {
        GroupKind::from_api_version(API_VERSION, KIND)
    }

    fn identifiers(&self, resource: &Bucket) -> Identifiers {
        self.scope.identifiers(&resource.meta, &resource.spec.name)
    }

    fn delta(&self, a: &Bucket, b: &Bucket) -> Delta {
        delta_of(&self.fields, a, b)
    }

    fn is_managed(&self, resource: &Bucket) -> bool {
        is_managed_by(&resource.spec.tags, &self.controller_id)
    }

    fn owner(&self, resource: &Bucket) -> Option<String> {
        managed_by(&resource.spec.tags)
    }

    fn mark_managed(&self, resource: &mut Bucket) {
        resource
            .spec
            .tags
            .insert(MANAGED_BY_TAG.to_string(), self.controller_id.clone());
    }

    fn mark_unmanaged(&self, resource: &mut Bucket) {
        resource.spec.tags.remove(MANAGED_BY_TAG);
    }

    fn update_cr_status(
        &self,
        resource: &mut Bucket,
        observed: &Bucket,
    ) -> Result<bool, DescriptorError> {
        Ok(project_status(
            resource,
            observed,
            |b| &mut b.status.observed,
            &observed.status.observed,
        ))
    }

    fn empty_runtime_object(&self) -> RuntimeObject {
        RuntimeObject {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            ..Default::default()
        }
    }

    fn resource_from_runtime_object(&self, object: &RuntimeObject) -> Result<Bucket, DescriptorError> {
        let bucket = Bucket::from_runtime(object)?;
        if bucket.spec.name.is_empty() {
            return Err(DescriptorError::malformed(format!(
                "{} has no bucket name",
                object.object_ref()
            )));
        }
        Ok(bucket)
    }

    fn runtime_meta_object(&self, resource: &Bucket) -> Result<RuntimeObject, DescriptorError> {
        let empty = self.empty_runtime_object();
        resource.to_runtime(&empty.api_version, &empty.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ack_runtime::ObjectMeta;

    fn scope() -> Scope {
        Scope {
            account_id: "000000000000".into(),
            region: "us-east-1".into(),
        }
    }

    fn bucket(origins: &[&str]) -> Bucket {
        Bucket::new(
            ObjectMeta::new("default", "assets"),
            BucketSpec {
                name: "assets".into(),
                cors_origins: origins.iter().map(|s| s.to_string()).collect(),
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_cors_origins_compare_unordered() {
        let descriptor = BucketDescriptor::new("ctl", scope());
        let a = bucket(&["https://a.example", "https://b.example"]);
        let b = bucket(&["https://b.example", "https://a.example"]);
        assert!(descriptor.delta(&a, &b).is_empty());

        let c = bucket(&["https://a.example"]);
        assert_eq!(descriptor.delta(&a, &c).paths(), vec!["Spec.CORSOrigins"]);
    }

    #[test]
    fn test_identifiers_use_annotations() {
        let descriptor = BucketDescriptor::new("ctl", scope());
        let mut b = bucket(&[]);
        assert_eq!(
            descriptor.identifiers(&b),
            Identifiers::new("000000000000", "us-east-1", "assets")
        );

        b.meta
            .annotations
            .insert(crate::kinds::REGION_ANNOTATION.into(), "eu-west-1".into());
        assert_eq!(descriptor.identifiers(&b).region, "eu-west-1");
    }

    #[test]
    fn test_missing_name_is_rejected() {
        let descriptor = BucketDescriptor::new("ctl", scope());
        let mut b = bucket(&[]);
        b.spec.name.clear();
        let object = descriptor.runtime_meta_object(&b).unwrap();
        assert!(descriptor.resource_from_runtime_object(&object).is_err());
    }
}
