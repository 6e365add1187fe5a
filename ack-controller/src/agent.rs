//! Controller host: wires every kind to its provider binding and the object
//! store, and feeds declared objects through the registry.
//!
//! Providers are simulated in memory, so a manifest can be reconciled end to
//! end without cloud credentials.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use ack_runtime::{
    Controller, ControllerConfig, GroupKind, InMemoryManager, MemoryObjectStore, ReconcileEvent,
    ReconcileResult, Reconciler, Registry, ResourceDescriptor, ResourceState, RuntimeObject,
    WatchEvent,
};
use anyhow::{bail, Context, Result};
use chrono::Utc;
use serde::Deserialize;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use crate::kinds::bucket::{Bucket, BucketDescriptor};
use crate::kinds::queue::{Queue, QueueDescriptor};
use crate::kinds::Scope;

/// Declared objects plus remote resources that already exist.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// Remote resources present before the controller starts.
    #[serde(default)]
    pub existing: Vec<RuntimeObject>,
    /// Control-plane objects, applied in order.
    pub objects: Vec<RuntimeObject>,
}

impl Manifest {
    pub fn from_file(path: &str) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest {}", path))?;
        serde_json::from_str(&raw).with_context(|| format!("Failed to parse manifest {}", path))
    }
}

struct Kind<D: ResourceDescriptor> {
    controller: Arc<Controller<D>>,
    manager: Arc<InMemoryManager<D>>,
}

impl<D: ResourceDescriptor> Kind<D> {
    fn new(
        descriptor: D,
        store: &Arc<MemoryObjectStore>,
        config: &ControllerConfig,
        on_write: impl Fn(&mut D::Resource) + Send + Sync + 'static,
    ) -> Self {
        let descriptor = Arc::new(descriptor);
        let manager = Arc::new(InMemoryManager::new(Arc::clone(&descriptor)).with_on_write(on_write));
        let reconciler = Reconciler::new(descriptor, manager.clone(), store.clone(), config.clone());
        Self {
            controller: Arc::new(Controller::new(reconciler)),
            manager,
        }
    }

    fn group_kind(&self) -> GroupKind {
        self.controller.descriptor().group_kind()
    }

    fn seed(&self, object: &RuntimeObject) -> Result<()> {
        let resource = self
            .controller
            .descriptor()
            .resource_from_runtime_object(object)
            .with_context(|| format!("Invalid existing resource {}", object.object_ref()))?;
        self.manager.insert(resource);
        Ok(())
    }

    async fn state_of(&self, object: &RuntimeObject) -> Option<ResourceState> {
        let resource = self
            .controller
            .descriptor()
            .resource_from_runtime_object(object)
            .ok()?;
        self.controller
            .state(&self.controller.key_of(&resource))
            .await
    }
}

pub struct ControllerHost {
    registry: Registry,
    store: Arc<MemoryObjectStore>,
    buckets: Kind<BucketDescriptor>,
    queues: Kind<QueueDescriptor>,
}

impl ControllerHost {
    pub fn new(config: &ControllerConfig, scope: Scope) -> Self {
        let store = Arc::new(MemoryObjectStore::new());

        let buckets = Kind::new(
            BucketDescriptor::new(&config.controller_id, scope.clone()),
            &store,
            config,
            |bucket: &mut Bucket| {
                let location = format!("https://{}.s3.example", bucket.spec.name);
                bucket.status.observed.location = Some(location);
                bucket
                    .status
                    .observed
                    .created_at
                    .get_or_insert_with(|| Utc::now().to_rfc3339());
            },
        );
        let queues = Kind::new(
            QueueDescriptor::new(&config.controller_id, scope),
            &store,
            config,
            |queue: &mut Queue| {
                let url = format!("https://sqs.example/{}", queue.spec.name);
                queue.status.observed.queue_url = Some(url);
                queue
                    .status
                    .observed
                    .created_at
                    .get_or_insert_with(|| Utc::now().to_rfc3339());
            },
        );

        let registry = Registry::builder()
            .register(buckets.controller.clone())
            .register(queues.controller.clone())
            .build();

        Self {
            registry,
            store,
            buckets,
            queues,
        }
    }

    /// Insert pre-existing remote resources into the simulated providers.
    pub fn seed(&self, existing: &[RuntimeObject]) -> Result<()> {
        for object in existing {
            let gk = object.group_kind();
            if gk == self.buckets.group_kind() {
                self.buckets.seed(object)?;
            } else if gk == self.queues.group_kind() {
                self.queues.seed(object)?;
            } else {
                bail!("No provider for {} ({})", gk, object.object_ref());
            }
            debug!("Seeded existing {} {}", gk, object.object_ref());
        }
        Ok(())
    }

    fn events(&self) -> impl tokio_stream::Stream<Item = ReconcileEvent> + Unpin {
        let buckets = BroadcastStream::new(self.buckets.controller.subscribe());
        let queues = BroadcastStream::new(self.queues.controller.subscribe());
        buckets.merge(queues).filter_map(|event| event.ok())
    }

    /// Apply every object, then keep reconciling until `stop` resolves.
    pub async fn run(&self, objects: Vec<RuntimeObject>, stop: impl std::future::Future<Output = ()>) {
        let mut events = self.events();
        self.registry.start().await;
        for object in objects {
            self.registry.dispatch(WatchEvent::Applied(object)).await;
        }

        tokio::pin!(stop);
        loop {
            tokio::select! {
                _ = &mut stop => break,
                Some(event) = events.next() => log_event(&event),
            }
        }
        self.registry.shutdown().await;
    }

    /// Apply every object and return once each has settled.
    pub async fn run_once(&self, objects: Vec<RuntimeObject>, timeout: Duration) -> Result<Vec<Settled>> {
        let mut events = self.events();
        self.registry.start().await;

        let mut pending = HashSet::new();
        for object in &objects {
            if self.registry.dispatch(WatchEvent::Applied(object.clone())).await {
                pending.insert((object.group_kind(), object.object_ref()));
            }
        }
        info!("Waiting for {} objects to settle", pending.len());

        let wait = async {
            while !pending.is_empty() {
                let Some(event) = events.next().await else {
                    break;
                };
                log_event(&event);
                if event.result != ReconcileResult::Requeued {
                    pending.remove(&(event.key.group_kind.clone(), event.object_ref.clone()));
                }
            }
        };
        let timed_out = tokio::time::timeout(timeout, wait).await.is_err();
        self.registry.shutdown().await;
        if timed_out {
            warn!("Timed out after {:?} with {} objects unsettled", timeout, pending.len());
        }

        let mut settled = Vec::new();
        for object in &objects {
            settled.push(self.settled(object).await);
        }
        Ok(settled)
    }

    async fn settled(&self, object: &RuntimeObject) -> Settled {
        let gk = object.group_kind();
        let state = if gk == self.buckets.group_kind() {
            self.buckets.state_of(object).await
        } else if gk == self.queues.group_kind() {
            self.queues.state_of(object).await
        } else {
            None
        };
        Settled {
            group_kind: gk,
            object_ref: object.object_ref(),
            state,
            persisted: self
                .store
                .get(&object.api_version, &object.kind, &object.object_ref()),
        }
    }
}

/// Final view of one declared object.
#[derive(Debug)]
pub struct Settled {
    pub group_kind: GroupKind,
    pub object_ref: String,
    pub state: Option<ResourceState>,
    pub persisted: Option<RuntimeObject>,
}

fn log_event(event: &ReconcileEvent) {
    match &event.message {
        Some(message) => info!("{} {}: {:?} ({})", event.key.group_kind, event.object_ref, event.result, message),
        None => info!("{} {}: {:?}", event.key.group_kind, event.object_ref, event.result),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ack_runtime::AdoptionPolicy;
    use std::io::Write;

    const DEMO: &str = include_str!("../manifests/demo.json");

    fn scope() -> Scope {
        Scope {
            account_id: "000000000000".into(),
            region: "us-east-1".into(),
        }
    }

    fn config() -> ControllerConfig {
        ControllerConfig {
            controller_id: "ack-controller-test".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_manifest_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(DEMO.as_bytes()).unwrap();

        let manifest = Manifest::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(manifest.existing.len(), 1);
        assert_eq!(manifest.objects.len(), 4);
    }

    #[test]
    fn test_seed_rejects_unknown_kind() {
        let host = ControllerHost::new(&config(), scope());
        let object = RuntimeObject {
            api_version: "dynamodb.services.example/v1alpha1".into(),
            kind: "Table".into(),
            ..Default::default()
        };
        assert!(host.seed(&[object]).is_err());
    }

    #[tokio::test]
    async fn test_run_once_settles_demo_manifest() {
        let manifest: Manifest = serde_json::from_str(DEMO).unwrap();
        let host = ControllerHost::new(&config(), scope());
        host.seed(&manifest.existing).unwrap();

        let settled = host
            .run_once(manifest.objects, Duration::from_secs(10))
            .await
            .unwrap();
        let states: Vec<_> = settled
            .iter()
            .map(|s| (s.object_ref.as_str(), s.state))
            .collect();
        assert_eq!(
            states,
            vec![
                ("default/assets", Some(ResourceState::Converged)),
                ("default/legacy-logs", Some(ResourceState::Conflict)),
                ("default/archive", Some(ResourceState::Converged)),
                ("default/orders", Some(ResourceState::Converged)),
            ]
        );

        let orders = settled[3].persisted.as_ref().unwrap();
        assert_eq!(orders.status["queueUrl"], "https://sqs.example/orders");
        let archive = settled[2].persisted.as_ref().unwrap();
        assert!(archive.status["ackResourceMetadata"]["arn"]
            .as_str()
            .unwrap()
            .starts_with("arn:aws:s3:eu-west-1:"));
    }

    #[tokio::test]
    async fn test_run_once_adopts_existing_when_allowed() {
        let manifest: Manifest = serde_json::from_str(DEMO).unwrap();
        let mut config = config();
        config.adoption = AdoptionPolicy::Adopt;
        let host = ControllerHost::new(&config, scope());
        host.seed(&manifest.existing).unwrap();

        let settled = host
            .run_once(manifest.objects, Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(settled[1].state, Some(ResourceState::Converged));
        assert_eq!(host.buckets.manager.calls(ack_runtime::Op::Create), 2);
    }
}
