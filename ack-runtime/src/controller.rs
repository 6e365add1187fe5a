//! Per-kind controller: work queue, desired-state cache, per-key backoff and
//! lifecycle state, and a bounded pool of workers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::audit::{AuditRecorder, ReconcileEvent};
use crate::backoff::Backoff;
use crate::descriptor::ResourceDescriptor;
use crate::error::{DescriptorError, ReconcileError};
use crate::queue::WorkQueue;
use crate::reconciler::{Outcome, Reconciler};
use crate::runtime::RuntimeObject;
use crate::types::{Resource, ResourceKey};

/// Lifecycle state of a resource as seen by its controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceState {
    /// Known, not yet reconciled.
    Initializing,
    Syncing,
    Converged,
    Deleting,
    Finalized,
    /// Terminal failure; waits for a spec change.
    Failed,
    /// Remote resource belongs to someone else.
    Conflict,
}

struct Entry<R> {
    resource: R,
    /// Bumped on every apply; a reconciled copy is only written back if no
    /// newer desired state arrived meanwhile.
    revision: u64,
    state: ResourceState,
    backoff: Backoff,
    failed_generation: Option<i64>,
}

struct Shared<D: ResourceDescriptor> {
    reconciler: Reconciler<D>,
    queue: WorkQueue<ResourceKey>,
    entries: Mutex<HashMap<ResourceKey, Entry<D::Resource>>>,
    audit: AuditRecorder,
}

pub struct Controller<D: ResourceDescriptor> {
    shared: Arc<Shared<D>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl<D: ResourceDescriptor> Controller<D> {
    pub fn new(reconciler: Reconciler<D>) -> Self {
        let component = format!("{}", reconciler.descriptor().group_kind());
        Self {
            shared: Arc::new(Shared {
                reconciler,
                queue: WorkQueue::new(),
                entries: Mutex::new(HashMap::new()),
                audit: AuditRecorder::new(&component),
            }),
            workers: Mutex::new(Vec::new()),
        }
    }

    pub fn descriptor(&self) -> &Arc<D> {
        self.shared.reconciler.descriptor()
    }

    /// Receive a result event for every completed attempt.
    pub fn subscribe(&self) -> broadcast::Receiver<ReconcileEvent> {
        self.shared.audit.subscribe()
    }

    pub fn key_of(&self, resource: &D::Resource) -> ResourceKey {
        let descriptor = self.descriptor();
        ResourceKey::new(descriptor.group_kind(), descriptor.identifiers(resource))
    }

    /// Decode a control-plane object and enqueue it.
    pub async fn apply(&self, object: &RuntimeObject) -> Result<ResourceKey, DescriptorError> {
        let resource = self.descriptor().resource_from_runtime_object(object)?;
        Ok(self.apply_resource(resource).await)
    }

    /// Record `resource` as the latest desired state and enqueue its key.
    pub async fn apply_resource(&self, resource: D::Resource) -> ResourceKey {
        let key = self.key_of(&resource);
        let generation = resource.meta().generation;
        let deleting = resource.is_being_deleted();
        let config = self.shared.reconciler.config();

        let mut entries = self.shared.entries.lock().await;
        match entries.get_mut(&key) {
            Some(entry) => {
                let spec_changed = entry.resource.meta().generation != generation;
                entry.resource = resource;
                entry.revision += 1;
                if spec_changed {
                    entry.failed_generation = None;
                    entry.backoff.reset();
                }
                if entry.failed_generation == Some(generation) && !deleting {
                    debug!("Skipping {}: failed at generation {}", key, generation);
                    return key;
                }
            }
            None => {
                entries.insert(
                    key.clone(),
                    Entry {
                        resource,
                        revision: 0,
                        state: ResourceState::Initializing,
                        backoff: Backoff::new(config.backoff.clone()),
                        failed_generation: None,
                    },
                );
            }
        }
        drop(entries);

        self.shared.queue.add(key.clone()).await;
        key
    }

    /// Drop all state for an object removed from the control plane.
    pub async fn forget(&self, object: &RuntimeObject) -> Result<(), DescriptorError> {
        let resource = self.descriptor().resource_from_runtime_object(object)?;
        let key = self.key_of(&resource);
        if self.shared.entries.lock().await.remove(&key).is_some() {
            debug!("Forgot {}", key);
        }
        Ok(())
    }

    pub async fn state(&self, key: &ResourceKey) -> Option<ResourceState> {
        self.shared.entries.lock().await.get(key).map(|e| e.state)
    }

    /// Latest desired state including persisted status and finalizers.
    pub async fn resource(&self, key: &ResourceKey) -> Option<D::Resource> {
        self.shared
            .entries
            .lock()
            .await
            .get(key)
            .map(|e| e.resource.clone())
    }

    /// Spawn the worker pool. Calling twice adds no workers.
    pub async fn start(&self) {
        let mut workers = self.workers.lock().await;
        if !workers.is_empty() {
            return;
        }
        let count = self.shared.reconciler.config().workers;
        for id in 0..count {
            let shared = Arc::clone(&self.shared);
            workers.push(tokio::spawn(async move { shared.worker(id).await }));
        }
        info!(
            "Started {} workers for {}",
            count,
            self.descriptor().group_kind()
        );
    }

    /// Stop the queue and wait for in-flight attempts to finish.
    pub async fn shutdown(&self) {
        self.shared.queue.shut_down().await;
        let workers: Vec<_> = self.workers.lock().await.drain(..).collect();
        for handle in workers {
            if let Err(e) = handle.await {
                warn!("Worker task failed: {}", e);
            }
        }
        debug!("Controller for {} stopped", self.descriptor().group_kind());
    }
}

enum Next {
    Done,
    After(Duration),
}

impl<D: ResourceDescriptor> Shared<D> {
    async fn worker(&self, id: usize) {
        debug!("Worker {} started", id);
        while let Some(key) = self.queue.get().await {
            self.process(&key).await;
            self.queue.done(&key).await;
        }
        debug!("Worker {} stopped", id);
    }

    async fn process(&self, key: &ResourceKey) {
        let (mut resource, revision, attempts) = {
            let mut entries = self.entries.lock().await;
            let Some(entry) = entries.get_mut(key) else {
                return;
            };

            let now = Instant::now();
            if !entry.backoff.ready(now) {
                let wait = entry.backoff.remaining(now);
                drop(entries);
                self.queue.add_after(key.clone(), wait).await;
                return;
            }

            let deleting = entry.resource.is_being_deleted();
            if !deleting && entry.failed_generation == Some(entry.resource.meta().generation) {
                return;
            }
            entry.state = if deleting {
                ResourceState::Deleting
            } else {
                ResourceState::Syncing
            };
            (entry.resource.clone(), entry.revision, entry.backoff.attempts())
        };

        let object_ref = resource.meta().object_ref();
        let generation = resource.meta().generation;
        let config = self.reconciler.config();

        let result = self.reconciler.reconcile(&mut resource).await;

        // Escalate before taking the lock; recording the failure is async.
        let escalated = match &result {
            Err(err) if config.max_attempts > 0 && attempts + 1 >= config.max_attempts => {
                let message = format!("giving up after {} attempts: {}", attempts + 1, err);
                self.reconciler.fail(&mut resource, &message).await;
                Some(message)
            }
            _ => None,
        };

        let mut entries = self.entries.lock().await;
        let Some(entry) = entries.get_mut(key) else {
            return;
        };
        let deleting = resource.is_being_deleted();

        let next = match (result, escalated) {
            (_, Some(message)) => {
                entry.state = ResourceState::Failed;
                entry.failed_generation = Some(generation);
                entry.backoff.reset();
                self.audit.failed(key, &object_ref, &message);
                Next::Done
            }
            (Ok(Outcome::Converged), None) => {
                entry.state = ResourceState::Converged;
                entry.backoff.reset();
                self.audit.converged(key, &object_ref);
                Next::After(config.resync_period())
            }
            (Ok(Outcome::Finalized), None) => {
                entry.state = ResourceState::Finalized;
                entry.backoff.reset();
                self.audit.deleted(key, &object_ref);
                Next::Done
            }
            (Ok(Outcome::Conflict(message)), None) => {
                entry.state = ResourceState::Conflict;
                entry.backoff.reset();
                self.audit.conflict(key, &object_ref, &message);
                Next::After(config.conflict_recheck())
            }
            (Ok(Outcome::Failed(message)), None) => {
                entry.state = ResourceState::Failed;
                entry.failed_generation = Some(generation);
                entry.backoff.reset();
                self.audit.failed(key, &object_ref, &message);
                Next::Done
            }
            (Err(err), None) => {
                let delay = entry.backoff.next_delay();
                entry.state = if deleting {
                    ResourceState::Deleting
                } else {
                    ResourceState::Syncing
                };
                self.audit.requeued(key, &object_ref, delay, &retry_reason(&err));
                Next::After(delay)
            }
        };

        if entry.revision == revision {
            entry.resource = resource;
        }
        drop(entries);

        if let Next::After(delay) = next {
            self.queue.add_after(key.clone(), delay).await;
        }
    }
}

fn retry_reason(err: &ReconcileError) -> String {
    match err {
        ReconcileError::NotConverged { pending, .. } => format!("not converged: {}", pending),
        other => other.to_string(),
    }
}
