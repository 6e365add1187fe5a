//! Reconciliation result events.
//!
//! Every result is logged locally via tracing under the `audit` target and
//! broadcast to subscribers. Sending never blocks; slow subscribers lag.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::types::ResourceKey;

const EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileResult {
    Converged,
    Failed,
    Deleted,
    Conflict,
    Requeued,
}

#[derive(Debug, Clone)]
pub struct ReconcileEvent {
    pub key: ResourceKey,
    /// `namespace/name` of the control-plane object.
    pub object_ref: String,
    pub result: ReconcileResult,
    pub message: Option<String>,
    pub at: DateTime<Utc>,
}

/// Audit recorder shared by all workers of a controller.
pub struct AuditRecorder {
    component: String,
    tx: broadcast::Sender<ReconcileEvent>,
}

impl AuditRecorder {
    pub fn new(component: &str) -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            component: component.to_string(),
            tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ReconcileEvent> {
        self.tx.subscribe()
    }

    pub fn converged(&self, key: &ResourceKey, object_ref: &str) {
        tracing::info!(target: "audit", component = %self.component, key = %key, "Resource {} converged", object_ref);
        self.emit(key, object_ref, ReconcileResult::Converged, None);
    }

    pub fn deleted(&self, key: &ResourceKey, object_ref: &str) {
        tracing::info!(target: "audit", component = %self.component, key = %key, "Resource {} finalized", object_ref);
        self.emit(key, object_ref, ReconcileResult::Deleted, None);
    }

    pub fn failed(&self, key: &ResourceKey, object_ref: &str, message: &str) {
        tracing::error!(target: "audit", component = %self.component, key = %key, "Resource {} failed: {}", object_ref, message);
        self.emit(key, object_ref, ReconcileResult::Failed, Some(message.to_string()));
    }

    pub fn conflict(&self, key: &ResourceKey, object_ref: &str, message: &str) {
        tracing::warn!(target: "audit", component = %self.component, key = %key, "Resource {} in ownership conflict: {}", object_ref, message);
        self.emit(key, object_ref, ReconcileResult::Conflict, Some(message.to_string()));
    }

    pub fn requeued(&self, key: &ResourceKey, object_ref: &str, after: Duration, reason: &str) {
        tracing::warn!(
            target: "audit",
            component = %self.component,
            key = %key,
            delay_ms = after.as_millis() as u64,
            "Resource {} requeued: {}",
            object_ref,
            reason
        );
        self.emit(key, object_ref, ReconcileResult::Requeued, Some(reason.to_string()));
    }

    fn emit(
        &self,
        key: &ResourceKey,
        object_ref: &str,
        result: ReconcileResult,
        message: Option<String>,
    ) {
        // No receivers is not an error.
        let _ = self.tx.send(ReconcileEvent {
            key: key.clone(),
            object_ref: object_ref.to_string(),
            result,
            message,
            at: Utc::now(),
        });
    }
}
