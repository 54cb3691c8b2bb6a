//! Pending user actions: undoable deletes and optimistic scale inputs

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::sync::engine::DeploymentSyncEngine;
use crate::sync::state::DeploymentRow;

pub(crate) enum DeletePhase {
    /// Waiting for the undo window to pass
    Scheduled(JoinHandle<()>),
    /// The remote delete has been issued; no longer cancellable
    InFlight,
}

pub(crate) struct PendingDeletion {
    pub(crate) ticket: u64,
    pub(crate) fire_at: DateTime<Utc>,
    pub(crate) phase: DeletePhase,
}

/// Owns every deletion timer and scale input of the session
pub struct PendingActionRegistry {
    pub(crate) engine: Arc<DeploymentSyncEngine>,
    pub(crate) deletions: Mutex<HashMap<Uuid, PendingDeletion>>,
    pub(crate) scale_inputs: Mutex<HashMap<Uuid, u32>>,
    next_ticket: AtomicU64,
}

/// Undo handle returned when a delete is scheduled
#[derive(Debug, Clone)]
pub struct DeleteHandle {
    id: Uuid,
    ticket: Option<u64>,
    registry: Weak<PendingActionRegistry>,
}

impl DeleteHandle {
    pub(crate) fn new(id: Uuid, ticket: Option<u64>, registry: Weak<PendingActionRegistry>) -> Self {
        Self {
            id,
            ticket,
            registry,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Undo the delete. Returns false once the timer has fired, or when this
    /// handle's schedule was replaced by a newer one.
    pub fn cancel(&self) -> bool {
        let Some(ticket) = self.ticket else {
            return false;
        };
        match self.registry.upgrade() {
            Some(registry) => registry.cancel_scheduled(self.id, Some(ticket)),
            None => false,
        }
    }
}

impl PendingActionRegistry {
    pub fn new(engine: Arc<DeploymentSyncEngine>) -> Arc<Self> {
        Arc::new(Self {
            engine,
            deletions: Mutex::new(HashMap::new()),
            scale_inputs: Mutex::new(HashMap::new()),
            next_ticket: AtomicU64::new(1),
        })
    }

    pub(crate) fn deletions(&self) -> MutexGuard<'_, HashMap<Uuid, PendingDeletion>> {
        self.deletions.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn scale_inputs(&self) -> MutexGuard<'_, HashMap<Uuid, u32>> {
        self.scale_inputs.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn issue_ticket(&self) -> u64 {
        self.next_ticket.fetch_add(1, Ordering::Relaxed)
    }

    pub fn engine(&self) -> &Arc<DeploymentSyncEngine> {
        &self.engine
    }

    /// Whether a deletion is scheduled or in flight for `id`
    pub fn is_pending(&self, id: Uuid) -> bool {
        self.deletions().contains_key(&id)
    }

    pub fn pending_ids(&self) -> HashSet<Uuid> {
        self.deletions().keys().copied().collect()
    }

    /// Pending deletions with the moment each one fires
    pub fn pending_deletions(&self) -> Vec<(Uuid, DateTime<Utc>)> {
        let mut pending: Vec<_> = self
            .deletions()
            .iter()
            .map(|(id, deletion)| (*id, deletion.fire_at))
            .collect();
        pending.sort_by_key(|(_, fire_at)| *fire_at);
        pending
    }

    /// Deployment rows with pending deletions shown as DELETING
    pub fn rows(&self) -> Vec<DeploymentRow> {
        self.engine.rows(&self.pending_ids())
    }
}
