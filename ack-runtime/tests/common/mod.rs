//! Test helpers for ack-runtime integration tests.
//!
//! Provides a small `Bucket` kind, its descriptor, and a harness wiring the
//! reconciler to the in-memory provider and object store.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use ack_runtime::compare::{delta_of, to_value};
use ack_runtime::{
    BackoffConfig, ControllerConfig, Delta, DescriptorError, Equality, Field, GroupKind,
    Identifiers, InMemoryManager, MemoryObjectStore, Object, ObjectMeta, ReconcileEvent,
    ReconcileResult, Reconciler, Resource, ResourceDescriptor, ResourceKey, RuntimeObject,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

pub const API_VERSION: &str = "s3.services.example/v1alpha1";
pub const KIND: &str = "Bucket";
pub const GROUP: &str = "s3.services.example";
pub const MANAGED_BY_TAG: &str = "ack.runtime/managed-by";
pub const CONTROLLER_ID: &str = "test-controller";
pub const ACCOUNT: &str = "123456789012";
pub const REGION: &str = "us-west-2";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketSpec {
    pub name: String,
    pub account_id: String,
    pub region: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kms_key_arn: Option<String>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketObserved {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

pub type Bucket = Object<BucketSpec, BucketObserved>;

pub struct BucketDescriptor {
    controller_id: String,
    fields: Vec<Field<Bucket>>,
}

impl BucketDescriptor {
    pub fn new(controller_id: &str) -> Self {
        Self {
            controller_id: controller_id.to_string(),
            fields: vec![
                Field::new("Spec.Size", |b: &Bucket| b.spec.size.map(Value::from)),
                Field::new("Spec.Description", |b: &Bucket| {
                    b.spec.description.clone().map(Value::from)
                })
                .with(Equality::AbsentIsEmpty),
                Field::new("Spec.KMSKeyARN", |b: &Bucket| {
                    b.spec.kms_key_arn.clone().map(Value::from)
                })
                .with(Equality::CaseInsensitive),
                Field::new("Spec.Tags", |b: &Bucket| to_value(&b.spec.tags))
                    .with(Equality::AbsentIsEmpty),
            ],
        }
    }
}

impl ResourceDescriptor for BucketDescriptor {
    type Resource = Bucket;

    fn group_kind(&self) -> GroupKind {
        GroupKind::new(GROUP, KIND)
    }

    fn identifiers(&self, resource: &Bucket) -> Identifiers {
        Identifiers::new(
            &resource.spec.account_id,
            &resource.spec.region,
            &resource.spec.name,
        )
    }

    fn delta(&self, a: &Bucket, b: &Bucket) -> Delta {
        delta_of(&self.fields, a, b)
    }

    fn is_managed(&self, resource: &Bucket) -> bool {
        resource.spec.tags.get(MANAGED_BY_TAG) == Some(&self.controller_id)
    }

    fn owner(&self, resource: &Bucket) -> Option<String> {
        resource.spec.tags.get(MANAGED_BY_TAG).cloned()
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
        let mut changed = false;
        if let Some(metadata) = observed.resource_metadata() {
            if resource.resource_metadata() != Some(metadata) {
                resource.set_resource_metadata(metadata.clone());
                changed = true;
            }
        }
        if resource.status.observed != observed.status.observed {
            resource.status.observed = observed.status.observed.clone();
            changed = true;
        }
        Ok(changed)
    }

    fn empty_runtime_object(&self) -> RuntimeObject {
        RuntimeObject {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            ..Default::default()
        }
    }

    fn resource_from_runtime_object(&self, object: &RuntimeObject) -> Result<Bucket, DescriptorError> {
        if object.group_kind() != self.group_kind() {
            return Err(DescriptorError::malformed(format!(
                "expected {}, got {}",
                self.group_kind(),
                object.group_kind()
            )));
        }
        Bucket::from_runtime(object)
    }

    fn runtime_meta_object(&self, resource: &Bucket) -> Result<RuntimeObject, DescriptorError> {
        resource.to_runtime(API_VERSION, KIND)
    }
}

/// A desired bucket in the `default` namespace.
pub fn bucket(name: &str, size: i64) -> Bucket {
    let mut meta = ObjectMeta::new("default", name);
    meta.generation = 1;
    meta.uid = format!("uid-{}", name);
    Bucket::new(
        meta,
        BucketSpec {
            name: name.to_string(),
            account_id: ACCOUNT.to_string(),
            region: REGION.to_string(),
            size: Some(size),
            ..Default::default()
        },
    )
}

/// A remote bucket created outside the controller (no ownership tag).
pub fn foreign_bucket(name: &str, size: i64) -> Bucket {
    let mut remote = bucket(name, size);
    remote.spec.tags.insert("team".into(), "storage".into());
    remote
}

pub fn ids(name: &str) -> Identifiers {
    Identifiers::new(ACCOUNT, REGION, name)
}

pub fn key(name: &str) -> ResourceKey {
    ResourceKey::new(GroupKind::new(GROUP, KIND), ids(name))
}

pub fn mark_deleted(resource: &mut Bucket) {
    resource.meta.deletion_timestamp = Some(Utc::now());
}

/// Fast, deterministic settings for tests.
pub fn config() -> ControllerConfig {
    ControllerConfig {
        controller_id: CONTROLLER_ID.to_string(),
        workers: 2,
        backoff: BackoffConfig {
            initial_delay_ms: 10,
            max_delay_ms: 200,
            multiplier: 2.0,
            jitter: 0.0,
        },
        ..Default::default()
    }
}

pub struct Harness {
    pub descriptor: Arc<BucketDescriptor>,
    pub manager: Arc<InMemoryManager<BucketDescriptor>>,
    pub store: Arc<MemoryObjectStore>,
}

impl Harness {
    pub fn new() -> Self {
        let descriptor = Arc::new(BucketDescriptor::new(CONTROLLER_ID));
        let manager = InMemoryManager::new(Arc::clone(&descriptor)).with_on_write(|b: &mut Bucket| {
            b.status
                .observed
                .created_at
                .get_or_insert_with(|| "2024-01-01T00:00:00Z".to_string());
        });
        Self {
            descriptor,
            manager: Arc::new(manager),
            store: Arc::new(MemoryObjectStore::new()),
        }
    }

    pub fn reconciler(&self, config: ControllerConfig) -> Reconciler<BucketDescriptor> {
        Reconciler::new(
            Arc::clone(&self.descriptor),
            self.manager.clone(),
            self.store.clone(),
            config,
        )
    }

    pub fn runtime_object(&self, resource: &Bucket) -> RuntimeObject {
        self.descriptor
            .runtime_meta_object(resource)
            .expect("encode bucket")
    }
}

/// Wait for the next event with `result` for `key`.
pub async fn wait_for(
    rx: &mut broadcast::Receiver<ReconcileEvent>,
    key: &ResourceKey,
    result: ReconcileResult,
) -> ReconcileEvent {
    let deadline = Duration::from_secs(30);
    tokio::time::timeout(deadline, async {
        loop {
            match rx.recv().await {
                Ok(event) if event.key == *key && event.result == result => return event,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {:?} on {}", result, key))
}
