//! Deployment sync engine

use std::collections::HashSet;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use futures::future::join_all;
use tracing::{debug, info, warn};
use uuid::Uuid;

use openapi_client::models::{Deployment, DeploymentCreate, DeploymentDetails, StatusEvent};

use crate::app::options::SyncOptions;
use crate::authn::session_mngr::SessionManagerExt;
use crate::errors::SyncError;
use crate::http::api::ProvisioningApi;
use crate::notify::{Notification, Notifier};
use crate::sync::state::{DeploymentRow, StatusSnapshot, SyncState};

/// Keeps the canonical deployment list and per-deployment status snapshots in
/// step with the backend.
pub struct DeploymentSyncEngine {
    pub(crate) api: Arc<dyn ProvisioningApi>,
    pub(crate) session: Arc<dyn SessionManagerExt>,
    notifier: Arc<dyn Notifier>,
    pub(crate) options: SyncOptions,
    state: RwLock<SyncState>,
}

impl DeploymentSyncEngine {
    /// Create a new sync engine
    pub fn new(
        api: Arc<dyn ProvisioningApi>,
        session: Arc<dyn SessionManagerExt>,
        notifier: Arc<dyn Notifier>,
        options: SyncOptions,
    ) -> Self {
        Self {
            api,
            session,
            notifier,
            options,
            state: RwLock::new(SyncState::default()),
        }
    }

    fn read_state(&self) -> RwLockReadGuard<'_, SyncState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, SyncState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    /// List every deployment of the tenant and refresh each one's status.
    ///
    /// Returns `None` without touching any state when logged out.
    pub async fn refresh_all(&self) -> Result<Option<Vec<Deployment>>, SyncError> {
        let Some(session) = self.session.ensure_valid().await else {
            debug!("Not logged in, skipping deployment refresh");
            return Ok(None);
        };

        let requested_at = self.read_state().generation();
        let listed = self.api.list_deployments(&session.access_token).await?;
        debug!("Listed {} deployments", listed.len());

        let gone = self.write_state().apply_listing(listed.clone(), requested_at);
        for id in gone {
            info!("Deployment {} is no longer listed", id);
        }

        let results = join_all(listed.iter().map(|d| self.fetch_status(d.id))).await;
        for (deployment, result) in listed.iter().zip(results) {
            match result {
                Ok(_) | Err(SyncError::AuthExpired) => {}
                Err(e) if e.is_transport() => {
                    debug!("Status refresh for {} failed, retrying next cycle: {}", deployment.id, e)
                }
                Err(e) => warn!("Status refresh for {} failed: {}", deployment.id, e),
            }
        }

        Ok(Some(listed))
    }

    /// Pull the live status of one deployment and record it
    pub async fn fetch_status(&self, id: Uuid) -> Result<StatusSnapshot, SyncError> {
        let session = self.session.ensure_valid().await.ok_or(SyncError::AuthExpired)?;
        let out = self.api.get_status(&session.access_token, id).await?;
        let snapshot = StatusSnapshot::from(out);
        self.observe(id, snapshot.clone());
        Ok(snapshot)
    }

    /// Report, pod states and recent cluster events of one deployment
    pub async fn fetch_details(&self, id: Uuid) -> Result<DeploymentDetails, SyncError> {
        let session = self.session.ensure_valid().await.ok_or(SyncError::AuthExpired)?;
        self.api.get_details(&session.access_token, id).await
    }

    /// Create a deployment, add it to the known set and arm its READY notification
    pub async fn create_deployment(
        &self,
        mut request: DeploymentCreate,
    ) -> Result<Deployment, SyncError> {
        request.display_name = request.display_name.trim().to_string();
        if request.display_name.is_empty() {
            return Err(SyncError::ValidationError(
                "Display name must not be empty".to_string(),
            ));
        }
        if request.replicas == Some(0) {
            return Err(SyncError::ValidationError(
                "Replicas must be at least 1".to_string(),
            ));
        }
        if !request.server_type.accepts_index_html() {
            request.index_html = None;
        }
        if request.index_html.as_deref().is_some_and(|html| html.trim().is_empty()) {
            request.index_html = None;
        }

        let session = self.session.ensure_valid().await.ok_or(SyncError::AuthExpired)?;
        let created = self
            .api
            .create_deployment(&session.access_token, &request)
            .await?;
        info!(
            "Created deployment {} ({}) in namespace {}",
            created.display_name, created.id, created.namespace
        );

        {
            let mut state = self.write_state();
            state.watched.insert(created.id);
            state.upsert(created.clone());
        }
        self.observe(created.id, StatusSnapshot::from(&created));

        self.notifier.notify(Notification::Created {
            id: created.id,
            name: created.display_name.clone(),
        });
        Ok(created)
    }

    /// Record a pulled observation
    pub(crate) fn observe(&self, id: Uuid, snapshot: StatusSnapshot) {
        let notification = {
            let mut state = self.write_state();
            record(&mut state, id, snapshot)
        };
        self.emit(notification);
    }

    /// Merge a pushed event over the current snapshot and record it
    pub(crate) fn apply_event(&self, id: Uuid, event: &StatusEvent) -> StatusSnapshot {
        if event.id.is_some_and(|event_id| event_id != id) {
            warn!("Status event for {:?} arrived on the channel of {}", event.id, id);
        }
        let (snapshot, notification) = {
            let mut state = self.write_state();
            let merged = StatusSnapshot::merged(state.snapshots.get(&id), event);
            let notification = record(&mut state, id, merged.clone());
            (merged, notification)
        };
        self.emit(notification);
        snapshot
    }

    pub(crate) fn watch(&self, id: Uuid) {
        self.write_state().watched.insert(id);
    }

    /// Replace a deployment record with the server's latest copy
    pub(crate) fn upsert(&self, deployment: Deployment) {
        self.write_state().upsert(deployment);
    }

    pub(crate) fn notify(&self, notification: Notification) {
        self.notifier.notify(notification);
    }

    fn emit(&self, notification: Option<Notification>) {
        if let Some(notification) = notification {
            info!("{}", notification);
            self.notifier.notify(notification);
        }
    }

    /// Drop an id from the known set and all derived state
    pub fn forget(&self, id: Uuid) {
        self.write_state().forget(id);
    }

    /// Known deployments, newest first
    pub fn deployments(&self) -> Vec<Deployment> {
        self.read_state().deployments.clone()
    }

    pub fn deployment(&self, id: Uuid) -> Option<Deployment> {
        self.read_state().deployment(id).cloned()
    }

    pub fn snapshot(&self, id: Uuid) -> Option<StatusSnapshot> {
        self.read_state().snapshots.get(&id).cloned()
    }

    pub fn is_notified(&self, id: Uuid) -> bool {
        self.read_state().notified.contains(&id)
    }

    /// Replica count last reported by the server
    pub fn server_replicas(&self, id: Uuid) -> Option<u32> {
        self.read_state().server_replicas(id)
    }

    /// Rows for display; ids in `deleting` show as DELETING
    pub fn rows(&self, deleting: &HashSet<Uuid>) -> Vec<DeploymentRow> {
        self.read_state().rows(deleting)
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }
}

fn record(state: &mut SyncState, id: Uuid, snapshot: StatusSnapshot) -> Option<Notification> {
    let first_ready = state.observe(id, snapshot);
    if !first_ready || !state.watched.contains(&id) {
        return None;
    }
    let deployment = state.deployment(id);
    Some(Notification::Ready {
        id,
        name: deployment.map(|d| d.display_name.clone()),
        url: deployment.and_then(|d| d.url()),
    })
}
