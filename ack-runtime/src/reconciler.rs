//! Single-attempt reconciliation of one resource.
//!
//! Every decision is re-derived from the freshly fetched remote state, so an
//! attempt can be repeated after a crash or a duplicate notification without
//! side effects beyond what convergence requires.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::compare::Delta;
use crate::condition::{clear_condition, set_condition, ConditionStatus, ConditionType};
use crate::config::{ControllerConfig, DeletionPolicy, MissingPolicy};
use crate::descriptor::ResourceDescriptor;
use crate::error::ReconcileError;
use crate::ownership::{Ownership, OwnershipTracker};
use crate::store::{ObjectWriter, ResourceManager};
use crate::types::{Identifiers, Resource};

/// Result of a completed attempt. Retryable failures are returned as
/// `Err(ReconcileError)` instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Desired and observed state agree.
    Converged,
    /// Remote teardown confirmed and finalizer removed.
    Finalized,
    /// Remote resource is not ours; nothing was mutated.
    Conflict(String),
    /// Terminal failure recorded on the resource; no automatic retry.
    Failed(String),
}

pub struct Reconciler<D: ResourceDescriptor> {
    descriptor: Arc<D>,
    manager: Arc<dyn ResourceManager<D::Resource>>,
    writer: Arc<dyn ObjectWriter>,
    config: ControllerConfig,
}

impl<D: ResourceDescriptor> Reconciler<D> {
    pub fn new(
        descriptor: Arc<D>,
        manager: Arc<dyn ResourceManager<D::Resource>>,
        writer: Arc<dyn ObjectWriter>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            descriptor,
            manager,
            writer,
            config,
        }
    }

    pub fn descriptor(&self) -> &Arc<D> {
        &self.descriptor
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Drive `resource` one step towards convergence.
    ///
    /// `resource` is updated in place with the status, conditions and
    /// finalizers that were persisted.
    pub async fn reconcile(&self, resource: &mut D::Resource) -> Result<Outcome, ReconcileError> {
        let result = if resource.is_being_deleted() {
            self.cleanup(resource).await
        } else {
            self.sync(resource).await
        };

        match result {
            Ok(outcome) => Ok(outcome),
            Err(err) if err.is_retryable() => {
                self.record_recoverable(resource, &err).await;
                Err(err)
            }
            Err(err) => {
                let message = err.to_string();
                self.fail(resource, &message).await;
                Ok(Outcome::Failed(message))
            }
        }
    }

    /// Record a terminal failure on `resource`.
    pub async fn fail(&self, resource: &mut D::Resource, message: &str) {
        error!(
            "{} {} failed: {}",
            self.descriptor.group_kind(),
            resource.meta().object_ref(),
            message
        );
        let conditions = resource.conditions_mut();
        let mut changed = set_condition(
            conditions,
            ConditionType::Terminal,
            ConditionStatus::True,
            Some("TerminalError"),
            Some(message),
        );
        changed |= set_condition(
            conditions,
            ConditionType::ResourceSynced,
            ConditionStatus::False,
            None,
            Some(message),
        );
        changed |= set_condition(conditions, ConditionType::Ready, ConditionStatus::False, None, None);
        changed |= clear_condition(conditions, ConditionType::Recoverable);
        if changed {
            self.persist_best_effort(resource).await;
        }
    }

    async fn sync(&self, desired: &mut D::Resource) -> Result<Outcome, ReconcileError> {
        let gk = self.descriptor.group_kind();
        let ids = self.descriptor.identifiers(desired);
        debug!("Reconciling {} {} ({})", gk, desired.meta().object_ref(), ids);

        self.check_identifiers(desired, &ids)?;

        let tracker = OwnershipTracker::new(self.descriptor.as_ref(), self.config.adoption);
        let mut status_changed = false;
        let mut latest = self.fetch(&ids).await?;

        match &latest {
            Some(observed) => match tracker.check(desired, observed) {
                Ownership::Managed => {}
                Ownership::Recovered => {
                    info!("Restoring ownership tag on {} {}", gk, ids);
                }
                Ownership::Adopt => {
                    info!("Adopting existing {} {}", gk, ids);
                    status_changed |= set_condition(
                        desired.conditions_mut(),
                        ConditionType::Adopted,
                        ConditionStatus::True,
                        Some("Adopted"),
                        Some("pre-existing resource adopted"),
                    );
                }
                Ownership::Conflict(message) => {
                    return self.conflict(desired, message.clone()).await;
                }
            },
            None => {
                let recorded = desired.resource_metadata().is_some_and(|m| m.arn.is_some());
                if recorded {
                    match self.config.remote_missing {
                        MissingPolicy::Recreate => {
                            warn!("{} {} disappeared remotely, recreating", gk, ids);
                        }
                        MissingPolicy::Fail => {
                            return Err(ReconcileError::terminal(format!(
                                "{} {} no longer exists remotely",
                                gk, ids
                            )));
                        }
                    }
                }
            }
        }

        let conditions = desired.conditions_mut();
        status_changed |= clear_condition(conditions, ConditionType::OwnershipConflict);
        status_changed |= clear_condition(conditions, ConditionType::Terminal);

        tracker.claim(desired);
        self.ensure_finalizer(desired).await?;

        let max_passes = self.config.max_sync_passes;
        // True when the state returned by our last mutation already matched
        // desired; a diverging re-read then means the remote is lagging.
        let mut settled = false;
        let mut pending = "remote resource not yet visible".to_string();

        for pass in 0..=max_passes {
            if pass > 0 {
                latest = self.fetch(&ids).await?;
            }

            let observed = match latest.take() {
                Some(observed) => observed,
                None if settled || pass == max_passes => continue,
                None => {
                    info!("Creating {} {}", gk, ids);
                    let mut created = self
                        .manager
                        .create(desired)
                        .await
                        .map_err(|e| ReconcileError::from_manager("create", e))?;
                    self.descriptor.mark_managed(&mut created);
                    settled = self.descriptor.delta(desired, &created).is_empty();
                    status_changed |= self.descriptor.update_cr_status(desired, &created)?;
                    self.persist_if(desired, &mut status_changed).await?;
                    continue;
                }
            };

            let delta = self.descriptor.delta(desired, &observed);
            if delta.is_empty() {
                status_changed |= self.descriptor.update_cr_status(desired, &observed)?;
                status_changed |= self.mark_synced(desired, true, None);
                self.persist_if(desired, &mut status_changed).await?;
                debug!("{} {} converged", gk, ids);
                return Ok(Outcome::Converged);
            }

            pending = delta.to_string();
            if settled || pass == max_passes {
                debug!("{} {} not yet reflecting update: {}", gk, ids, pending);
                continue;
            }

            match self.update(desired, &observed, &delta, &ids).await? {
                Some(updated) => {
                    settled = self.descriptor.delta(desired, &updated).is_empty();
                    status_changed |= self.descriptor.update_cr_status(desired, &updated)?;
                    self.persist_if(desired, &mut status_changed).await?;
                }
                None => settled = false,
            }
        }

        let message = format!("pending: {}", pending);
        status_changed |= self.mark_synced(desired, false, Some(&message));
        self.persist_if(desired, &mut status_changed).await?;
        Err(ReconcileError::NotConverged {
            passes: max_passes,
            pending,
        })
    }

    /// Returns `None` if the remote resource vanished and should be recreated.
    async fn update(
        &self,
        desired: &D::Resource,
        observed: &D::Resource,
        delta: &Delta,
        ids: &Identifiers,
    ) -> Result<Option<D::Resource>, ReconcileError> {
        info!("Updating {} {}: {}", self.descriptor.group_kind(), ids, delta);
        match self.manager.update(desired, observed, delta).await {
            Ok(updated) => Ok(Some(updated)),
            Err(e) if e.is_not_found() => match self.config.remote_missing {
                MissingPolicy::Recreate => {
                    warn!("{} vanished during update, recreating", ids);
                    Ok(None)
                }
                MissingPolicy::Fail => Err(ReconcileError::terminal(format!(
                    "{} vanished during update: {}",
                    ids, e
                ))),
            },
            Err(e) => Err(ReconcileError::from_manager("update", e)),
        }
    }

    async fn cleanup(&self, desired: &mut D::Resource) -> Result<Outcome, ReconcileError> {
        let gk = self.descriptor.group_kind();
        let ids = self.descriptor.identifiers(desired);
        info!("Finalizing {} {} ({})", gk, desired.meta().object_ref(), ids);

        match self.fetch(&ids).await? {
            None => debug!("{} {} already gone remotely", gk, ids),
            Some(observed) => {
                let tracker = OwnershipTracker::new(self.descriptor.as_ref(), self.config.adoption);
                let ours = matches!(
                    tracker.check(desired, &observed),
                    Ownership::Managed | Ownership::Recovered
                );

                if !ours {
                    info!("Leaving unmanaged {} {} in place", gk, ids);
                } else {
                    match self.config.deletion_policy.for_object(desired.meta()) {
                        DeletionPolicy::Retain => self.release(&tracker, &observed, &ids).await?,
                        DeletionPolicy::Delete => self.teardown(&ids).await?,
                    }
                }
            }
        }

        let finalizer = self.descriptor.finalizer_name();
        if desired.meta_mut().remove_finalizer(&finalizer) {
            let object = self.descriptor.runtime_meta_object(desired)?;
            if let Err(e) = self.writer.persist_metadata(&object).await {
                desired.meta_mut().add_finalizer(&finalizer);
                return Err(ReconcileError::from_manager("remove finalizer", e));
            }
        }
        Ok(Outcome::Finalized)
    }

    async fn teardown(&self, ids: &Identifiers) -> Result<(), ReconcileError> {
        info!("Deleting {} {}", self.descriptor.group_kind(), ids);
        match self.manager.delete(ids).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => debug!("{} already deleted", ids),
            Err(e) => return Err(ReconcileError::from_manager("delete", e)),
        }

        if self.fetch(ids).await?.is_some() {
            return Err(ReconcileError::NotConverged {
                passes: 1,
                pending: "deletion in progress".to_string(),
            });
        }
        Ok(())
    }

    /// Remove our ownership tag and keep the remote resource.
    async fn release(
        &self,
        tracker: &OwnershipTracker<'_, D>,
        observed: &D::Resource,
        ids: &Identifiers,
    ) -> Result<(), ReconcileError> {
        info!("Retaining {} {}, removing ownership tag", self.descriptor.group_kind(), ids);
        let mut released = observed.clone();
        tracker.release(&mut released);
        let delta = self.descriptor.delta(&released, observed);
        if delta.is_empty() {
            return Ok(());
        }
        match self.manager.update(&released, observed, &delta).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(ReconcileError::from_manager("release", e)),
        }
    }

    async fn conflict(
        &self,
        desired: &mut D::Resource,
        message: String,
    ) -> Result<Outcome, ReconcileError> {
        warn!("{}", message);
        let conditions = desired.conditions_mut();
        let mut changed = set_condition(
            conditions,
            ConditionType::OwnershipConflict,
            ConditionStatus::True,
            Some("NotManaged"),
            Some(&message),
        );
        changed |= set_condition(
            conditions,
            ConditionType::ResourceSynced,
            ConditionStatus::False,
            None,
            Some(&message),
        );
        changed |= set_condition(conditions, ConditionType::Ready, ConditionStatus::False, None, None);
        self.persist_if(desired, &mut changed).await?;
        Ok(Outcome::Conflict(message))
    }

    fn check_identifiers(&self, desired: &D::Resource, ids: &Identifiers) -> Result<(), ReconcileError> {
        if let Some(recorded) = desired.resource_metadata() {
            if recorded.owner_account_id != ids.account_id || recorded.region != ids.region {
                return Err(ReconcileError::terminal(format!(
                    "identifiers are immutable: resource was created in {}/{}, now declares {}/{}",
                    recorded.owner_account_id, recorded.region, ids.account_id, ids.region
                )));
            }
        }
        Ok(())
    }

    async fn fetch(&self, ids: &Identifiers) -> Result<Option<D::Resource>, ReconcileError> {
        self.manager
            .fetch(ids)
            .await
            .map_err(|e| ReconcileError::from_manager("fetch", e))
    }

    async fn ensure_finalizer(&self, resource: &mut D::Resource) -> Result<(), ReconcileError> {
        let finalizer = self.descriptor.finalizer_name();
        if resource.meta_mut().add_finalizer(&finalizer) {
            let object = self.descriptor.runtime_meta_object(resource)?;
            if let Err(e) = self.writer.persist_metadata(&object).await {
                resource.meta_mut().remove_finalizer(&finalizer);
                return Err(ReconcileError::from_manager("add finalizer", e));
            }
        }
        Ok(())
    }

    fn mark_synced(&self, resource: &mut D::Resource, synced: bool, message: Option<&str>) -> bool {
        let conditions = resource.conditions_mut();
        let status = if synced {
            ConditionStatus::True
        } else {
            ConditionStatus::False
        };
        let mut changed = set_condition(conditions, ConditionType::ResourceSynced, status, None, message);
        changed |= set_condition(conditions, ConditionType::Ready, status, None, None);
        if synced {
            changed |= clear_condition(conditions, ConditionType::Recoverable);
        }
        changed
    }

    async fn persist_if(
        &self,
        resource: &D::Resource,
        changed: &mut bool,
    ) -> Result<(), ReconcileError> {
        if !*changed {
            return Ok(());
        }
        let object = self.descriptor.runtime_meta_object(resource)?;
        self.writer
            .persist_status(&object)
            .await
            .map_err(|e| ReconcileError::from_manager("persist status", e))?;
        *changed = false;
        Ok(())
    }

    async fn record_recoverable(&self, resource: &mut D::Resource, err: &ReconcileError) {
        let message = err.to_string();
        let changed = set_condition(
            resource.conditions_mut(),
            ConditionType::Recoverable,
            ConditionStatus::True,
            Some("RecoverableError"),
            Some(&message),
        );
        if changed {
            self.persist_best_effort(resource).await;
        }
    }

    async fn persist_best_effort(&self, resource: &D::Resource) {
        let object = match self.descriptor.runtime_meta_object(resource) {
            Ok(object) => object,
            Err(e) => {
                error!("Failed to encode {}: {}", resource.meta().object_ref(), e);
                return;
            }
        };
        if let Err(e) = self.writer.persist_status(&object).await {
            warn!("Failed to persist status of {}: {}", object.object_ref(), e);
        }
    }
}
