//! In-memory collaborators.
//!
//! [`InMemoryManager`] simulates a provider API for one resource kind and
//! [`MemoryObjectStore`] records control-plane writes. Both support fault
//! injection and call accounting; they back the test suite and the
//! controller's simulation mode.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::compare::Delta;
use crate::descriptor::ResourceDescriptor;
use crate::runtime::RuntimeObject;
use crate::store::{ManagerError, ObjectWriter, ResourceManager, Result};
use crate::types::{Identifiers, Resource, ResourceMetadata};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Fetch,
    Create,
    Update,
    Delete,
}

type WriteHook<R> = Box<dyn Fn(&mut R) + Send + Sync>;

struct Lagged<R> {
    remaining: u32,
    snapshot: Option<R>,
}

struct ProviderState<R> {
    resources: HashMap<Identifiers, R>,
    lagged: HashMap<Identifiers, Lagged<R>>,
    faults: VecDeque<(Op, ManagerError)>,
    calls: HashMap<Op, usize>,
    in_flight: HashMap<Identifiers, usize>,
    max_in_flight: usize,
    read_lag: u32,
    mutation_latency: Duration,
}

/// Simulated provider API for resources described by `D`.
pub struct InMemoryManager<D: ResourceDescriptor> {
    descriptor: Arc<D>,
    state: Mutex<ProviderState<D::Resource>>,
    on_write: Option<WriteHook<D::Resource>>,
}

impl<D: ResourceDescriptor> InMemoryManager<D> {
    pub fn new(descriptor: Arc<D>) -> Self {
        Self {
            descriptor,
            state: Mutex::new(ProviderState {
                resources: HashMap::new(),
                lagged: HashMap::new(),
                faults: VecDeque::new(),
                calls: HashMap::new(),
                in_flight: HashMap::new(),
                max_in_flight: 0,
                read_lag: 0,
                mutation_latency: Duration::ZERO,
            }),
            on_write: None,
        }
    }

    /// Populate server-side fields (timestamps, defaults) on every write.
    pub fn with_on_write(mut self, hook: impl Fn(&mut D::Resource) + Send + Sync + 'static) -> Self {
        self.on_write = Some(Box::new(hook));
        self
    }

    fn lock(&self) -> MutexGuard<'_, ProviderState<D::Resource>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seed a remote resource created outside this controller.
    pub fn insert(&self, resource: D::Resource) {
        let ids = self.descriptor.identifiers(&resource);
        self.lock().resources.insert(ids, resource);
    }

    pub fn get(&self, identifiers: &Identifiers) -> Option<D::Resource> {
        self.lock().resources.get(identifiers).cloned()
    }

    /// Delete out of band.
    pub fn remove(&self, identifiers: &Identifiers) -> Option<D::Resource> {
        self.lock().resources.remove(identifiers)
    }

    /// Change a remote resource out of band (drift).
    pub fn modify(&self, identifiers: &Identifiers, f: impl FnOnce(&mut D::Resource)) {
        if let Some(resource) = self.lock().resources.get_mut(identifiers) {
            f(resource);
        }
    }

    /// Fail the next call of `op` with `err`.
    pub fn fail_next(&self, op: Op, err: ManagerError) {
        self.lock().faults.push_back((op, err));
    }

    /// After each mutation, the next `reads` fetches return the previous state.
    pub fn set_read_lag(&self, reads: u32) {
        self.lock().read_lag = reads;
    }

    /// Hold mutations open for `latency` to expose overlapping calls.
    pub fn set_mutation_latency(&self, latency: Duration) {
        self.lock().mutation_latency = latency;
    }

    pub fn calls(&self, op: Op) -> usize {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    pub fn mutations(&self) -> usize {
        self.calls(Op::Create) + self.calls(Op::Update) + self.calls(Op::Delete)
    }

    /// Highest number of simultaneous mutations observed for a single key.
    pub fn max_concurrent_mutations(&self) -> usize {
        self.lock().max_in_flight
    }

    fn begin(&self, op: Op, ids: &Identifiers) -> Result<()> {
        let mut state = self.lock();
        *state.calls.entry(op).or_default() += 1;
        if let Some(pos) = state.faults.iter().position(|(o, _)| *o == op) {
            if let Some((_, err)) = state.faults.remove(pos) {
                debug!("Injected {:?} failure for {}: {}", op, ids, err);
                return Err(err);
            }
        }
        if op != Op::Fetch {
            let count = state.in_flight.entry(ids.clone()).or_default();
            *count += 1;
            let count = *count;
            state.max_in_flight = state.max_in_flight.max(count);
        }
        Ok(())
    }

    async fn hold(&self) {
        let latency = self.lock().mutation_latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    /// Finish a mutation, storing `after` (or removing on `None`).
    fn commit(&self, ids: &Identifiers, after: Option<D::Resource>) {
        let mut state = self.lock();
        if let Some(count) = state.in_flight.get_mut(ids) {
            *count = count.saturating_sub(1);
        }
        let before = match &after {
            Some(resource) => state.resources.insert(ids.clone(), resource.clone()),
            None => state.resources.remove(ids),
        };
        if state.read_lag > 0 {
            let remaining = state.read_lag;
            state.lagged.insert(
                ids.clone(),
                Lagged {
                    remaining,
                    snapshot: before,
                },
            );
        }
    }

    fn abort(&self, ids: &Identifiers) {
        if let Some(count) = self.lock().in_flight.get_mut(ids) {
            *count = count.saturating_sub(1);
        }
    }

    fn arn(&self, ids: &Identifiers) -> String {
        let gk = self.descriptor.group_kind();
        let service = gk.group.split('.').next().unwrap_or_default();
        format!(
            "arn:aws:{}:{}:{}:{}/{}",
            service,
            ids.region,
            ids.account_id,
            gk.kind.to_ascii_lowercase(),
            ids.name
        )
    }

    fn written(&self, mut resource: D::Resource) -> D::Resource {
        resource.conditions_mut().clear();
        if let Some(hook) = &self.on_write {
            hook(&mut resource);
        }
        resource
    }
}

#[async_trait]
impl<D: ResourceDescriptor> ResourceManager<D::Resource> for InMemoryManager<D> {
    async fn fetch(&self, identifiers: &Identifiers) -> Result<Option<D::Resource>> {
        self.begin(Op::Fetch, identifiers)?;
        let mut state = self.lock();
        if let Some(lagged) = state.lagged.get_mut(identifiers) {
            lagged.remaining -= 1;
            let snapshot = lagged.snapshot.clone();
            if lagged.remaining == 0 {
                state.lagged.remove(identifiers);
            }
            return Ok(snapshot);
        }
        Ok(state.resources.get(identifiers).cloned())
    }

    async fn create(&self, desired: &D::Resource) -> Result<D::Resource> {
        let ids = self.descriptor.identifiers(desired);
        self.begin(Op::Create, &ids)?;
        self.hold().await;

        if self.lock().resources.contains_key(&ids) {
            self.abort(&ids);
            return Err(ManagerError::Conflict(format!("{} already exists", ids)));
        }

        let mut created = desired.clone();
        created.set_resource_metadata(ResourceMetadata {
            arn: Some(self.arn(&ids)),
            owner_account_id: ids.account_id.clone(),
            region: ids.region.clone(),
        });
        let created = self.written(created);
        self.commit(&ids, Some(created.clone()));
        Ok(created)
    }

    async fn update(
        &self,
        desired: &D::Resource,
        _observed: &D::Resource,
        delta: &Delta,
    ) -> Result<D::Resource> {
        let ids = self.descriptor.identifiers(desired);
        self.begin(Op::Update, &ids)?;
        self.hold().await;

        let existing = self.lock().resources.get(&ids).cloned();
        let Some(existing) = existing else {
            self.abort(&ids);
            return Err(ManagerError::NotFound(ids.to_string()));
        };
        debug!("Updating {} ({})", ids, delta);

        let mut updated = desired.clone();
        if let Some(metadata) = existing.resource_metadata() {
            updated.set_resource_metadata(metadata.clone());
        }
        let updated = self.written(updated);
        self.commit(&ids, Some(updated.clone()));
        Ok(updated)
    }

    async fn delete(&self, identifiers: &Identifiers) -> Result<()> {
        self.begin(Op::Delete, identifiers)?;
        self.hold().await;

        if !self.lock().resources.contains_key(identifiers) {
            self.abort(identifiers);
            return Err(ManagerError::NotFound(identifiers.to_string()));
        }
        self.commit(identifiers, None);
        Ok(())
    }
}

#[derive(Default)]
struct ObjectState {
    objects: HashMap<String, RuntimeObject>,
    status_writes: usize,
    metadata_writes: usize,
    faults: VecDeque<ManagerError>,
}

/// Records objects persisted by the reconciler.
#[derive(Default)]
pub struct MemoryObjectStore {
    state: Mutex<ObjectState>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ObjectState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn key(object: &RuntimeObject) -> String {
        format!("{}/{}", object.group_kind(), object.object_ref())
    }

    /// Latest persisted form of the object with `kind` and `object_ref`.
    pub fn get(&self, api_version: &str, kind: &str, object_ref: &str) -> Option<RuntimeObject> {
        let lookup = RuntimeObject {
            api_version: api_version.to_string(),
            kind: kind.to_string(),
            ..Default::default()
        };
        let key = format!("{}/{}", lookup.group_kind(), object_ref);
        self.lock().objects.get(&key).cloned()
    }

    pub fn status_writes(&self) -> usize {
        self.lock().status_writes
    }

    pub fn metadata_writes(&self) -> usize {
        self.lock().metadata_writes
    }

    /// Fail the next write with `err`.
    pub fn fail_next(&self, err: ManagerError) {
        self.lock().faults.push_back(err);
    }

    fn write(&self, object: &RuntimeObject, status: bool) -> Result<()> {
        let mut state = self.lock();
        if let Some(err) = state.faults.pop_front() {
            return Err(err);
        }
        if status {
            state.status_writes += 1;
        } else {
            state.metadata_writes += 1;
        }
        let key = Self::key(object);
        let entry = state
            .objects
            .entry(key)
            .or_insert_with(|| object.clone());
        if status {
            entry.status = object.status.clone();
        } else {
            entry.metadata = object.metadata.clone();
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectWriter for MemoryObjectStore {
    async fn persist_status(&self, object: &RuntimeObject) -> Result<()> {
        self.write(object, true)
    }

    async fn persist_metadata(&self, object: &RuntimeObject) -> Result<()> {
        self.write(object, false)
    }
}
