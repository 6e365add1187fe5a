//! Kind registry.
//!
//! Built once at startup and immutable afterwards; routes change
//! notifications to the controller of the object's kind.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, info, warn};

use crate::controller::Controller;
use crate::descriptor::ResourceDescriptor;
use crate::error::DescriptorError;
use crate::runtime::{GroupKind, RuntimeObject};
use crate::store::WatchEvent;

/// Kind-erased view of a [`Controller`].
#[async_trait]
pub trait KindController: Send + Sync {
    fn group_kind(&self) -> GroupKind;

    async fn apply(&self, object: &RuntimeObject) -> Result<(), DescriptorError>;

    async fn forget(&self, object: &RuntimeObject) -> Result<(), DescriptorError>;

    async fn start(&self);

    async fn shutdown(&self);
}

#[async_trait]
impl<D: ResourceDescriptor> KindController for Controller<D> {
    fn group_kind(&self) -> GroupKind {
        self.descriptor().group_kind()
    }

    async fn apply(&self, object: &RuntimeObject) -> Result<(), DescriptorError> {
        Controller::apply(self, object).await.map(|_| ())
    }

    async fn forget(&self, object: &RuntimeObject) -> Result<(), DescriptorError> {
        Controller::forget(self, object).await
    }

    async fn start(&self) {
        Controller::start(self).await
    }

    async fn shutdown(&self) {
        Controller::shutdown(self).await
    }
}

#[derive(Default)]
pub struct RegistryBuilder {
    controllers: HashMap<GroupKind, Arc<dyn KindController>>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a controller. A later registration for the same kind
    /// replaces the earlier one.
    pub fn register(mut self, controller: Arc<dyn KindController>) -> Self {
        let gk = controller.group_kind();
        if self.controllers.insert(gk.clone(), controller).is_some() {
            warn!("Replacing controller for {}", gk);
        }
        self
    }

    pub fn build(self) -> Registry {
        Registry {
            controllers: self.controllers,
        }
    }
}

pub struct Registry {
    controllers: HashMap<GroupKind, Arc<dyn KindController>>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    pub fn get(&self, gk: &GroupKind) -> Option<&Arc<dyn KindController>> {
        self.controllers.get(gk)
    }

    pub fn kinds(&self) -> Vec<GroupKind> {
        let mut kinds: Vec<_> = self.controllers.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    /// Route one notification. Returns `false` if no controller handles the
    /// object's kind or the object could not be decoded.
    pub async fn dispatch(&self, event: WatchEvent) -> bool {
        let object = event.object();
        let gk = object.group_kind();
        let Some(controller) = self.controllers.get(&gk) else {
            debug!("No controller for {}, ignoring {}", gk, object.object_ref());
            return false;
        };

        let result = match &event {
            WatchEvent::Applied(object) => controller.apply(object).await,
            WatchEvent::Deleted(object) => controller.forget(object).await,
        };
        match result {
            Ok(()) => true,
            Err(e) => {
                warn!("Rejected {} {}: {}", gk, object.object_ref(), e);
                false
            }
        }
    }

    pub async fn start(&self) {
        for controller in self.controllers.values() {
            controller.start().await;
        }
    }

    /// Start all workers and pump `events` until the stream ends.
    pub async fn run<S>(&self, events: S)
    where
        S: Stream<Item = WatchEvent> + Send,
    {
        self.start().await;
        info!("Registry running for {} kinds", self.controllers.len());

        tokio::pin!(events);
        while let Some(event) = events.next().await {
            self.dispatch(event).await;
        }
        debug!("Notification stream ended");
    }

    pub async fn shutdown(&self) {
        for controller in self.controllers.values() {
            controller.shutdown().await;
        }
    }
}
