//! Message queues.

use std::collections::BTreeMap;

use ack_runtime::compare::{delta_of, to_value};
use ack_runtime::{
    Delta, DescriptorError, Equality, Field, GroupKind, Identifiers, Object, ResourceDescriptor,
    RuntimeObject,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{is_managed_by, managed_by, project_status, Scope, MANAGED_BY_TAG};

pub const API_VERSION: &str = "sqs.services.example/v1alpha1";
pub const KIND: &str = "Queue";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility_timeout_secs: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_retention_secs: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dead_letter_target_arn: Option<String>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueObserved {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

pub type Queue = Object<QueueSpec, QueueObserved>;

pub struct QueueDescriptor {
    controller_id: String,
    scope: Scope,
    fields: Vec<Field<Queue>>,
}

impl QueueDescriptor {
    pub fn new(controller_id: &str, scope: Scope) -> Self {
        Self {
            controller_id: controller_id.to_string(),
            scope,
            fields: vec![
                Field::new("Spec.VisibilityTimeout", |q: &Queue| {
                    q.spec.visibility_timeout_secs.map(Value::from)
                }),
                Field::new("Spec.MessageRetentionPeriod", |q: &Queue| {
                    q.spec.message_retention_secs.map(Value::from)
                }),
                Field::new("Spec.RedrivePolicy.DeadLetterTargetARN", |q: &Queue| {
                    q.spec.dead_letter_target_arn.clone().map(Value::from)
                })
                .with(Equality::CaseInsensitive),
                Field::new("Spec.Tags", |q: &Queue| to_value(&q.spec.tags))
                    .with(Equality::AbsentIsEmpty),
            ],
        }
    }
}

impl ResourceDescriptor for QueueDescriptor {
    type Resource = Queue;

    fn group_kind(&self) -> GroupKind {
        GroupKind::from_api_version(API_VERSION, KIND)
    }

    fn identifiers(&self, resource: &Queue) -> Identifiers {
        self.scope.identifiers(&resource.meta, &resource.spec.name)
    }

    fn delta(&self, a: &Queue, b: &Queue) -> Delta {
        delta_of(&self.fields, a, b)
    }

    fn is_managed(&self, resource: &Queue) -> bool {
        is_managed_by(&resource.spec.tags, &self.controller_id)
    }

    fn owner(&self, resource: &Queue) -> Option<String> {
        managed_by(&resource.spec.tags)
    }

    fn mark_managed(&self, resource: &mut Queue) {
        resource
            .spec
            .tags
            .insert(MANAGED_BY_TAG.to_string(), self.controller_id.clone());
    }

    fn mark_unmanaged(&self, resource: &mut Queue) {
        resource.spec.tags.remove(MANAGED_BY_TAG);
    }

    fn update_cr_status(&self, resource: &mut Queue, observed: &Queue) -> Result<bool, DescriptorError> {
        Ok(project_status(
            resource,
            observed,
            |q| &mut q.status.observed,
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

    fn resource_from_runtime_object(&self, object: &RuntimeObject) -> Result<Queue, DescriptorError> {
        let queue = Queue::from_runtime(object)?;
        if queue.spec.name.is_empty() {
            return Err(DescriptorError::malformed(format!(
                "{} has no queue name",
                object.object_ref()
            )));
        }
        if let Some(timeout) = queue.spec.visibility_timeout_secs {
            if !(0..=43_200).contains(&timeout) {
                return Err(DescriptorError::malformed(format!(
                    "visibility timeout {}s out of range",
                    timeout
                )));
            }
        }
        Ok(queue)
    }

    fn runtime_meta_object(&self, resource: &Queue) -> Result<RuntimeObject, DescriptorError> {
        resource.to_runtime(API_VERSION, KIND)
    }
}
