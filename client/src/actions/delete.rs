//! Soft delete with an undo window

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::actions::registry::{DeleteHandle, DeletePhase, PendingActionRegistry, PendingDeletion};
use crate::errors::SyncError;
use crate::notify::Notification;

impl PendingActionRegistry {
    /// Schedule a remote delete of `id` after `delay`. An earlier schedule for
    /// the same id is replaced. While the delete itself is in flight nothing
    /// new is scheduled and the returned handle cannot cancel.
    pub fn schedule_delete(self: &Arc<Self>, id: Uuid, delay: Duration) -> DeleteHandle {
        let ticket = self.issue_ticket();
        {
            let mut deletions = self.deletions();
            match deletions.get(&id).map(|pending| &pending.phase) {
                Some(DeletePhase::InFlight) => {
                    debug!("Delete of {} already in flight", id);
                    return DeleteHandle::new(id, None, Arc::downgrade(self));
                }
                Some(DeletePhase::Scheduled(timer)) => {
                    debug!("Rescheduling delete of {}", id);
                    timer.abort();
                }
                None => {}
            }

            let registry = Arc::downgrade(self);
            let timer = tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Some(registry) = registry.upgrade() {
                    registry.fire_delete(id, ticket).await;
                }
            });
            let fire_at = chrono::Utc::now()
                + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
            deletions.insert(
                id,
                PendingDeletion {
                    ticket,
                    fire_at,
                    phase: DeletePhase::Scheduled(timer),
                },
            );
        }

        info!("Deleting {} in {}s", id, delay.as_secs());
        self.engine.notify(Notification::DeleteScheduled { id, delay });
        DeleteHandle::new(id, Some(ticket), Arc::downgrade(self))
    }

    /// Schedule a delete with the configured undo window
    pub fn schedule_delete_default(self: &Arc<Self>, id: Uuid) -> DeleteHandle {
        let delay = self.engine.options().delete_delay;
        self.schedule_delete(id, delay)
    }

    /// Undo a scheduled delete of `id`
    pub fn cancel_delete(&self, id: Uuid) -> bool {
        self.cancel_scheduled(id, None)
    }

    /// Undo every scheduled delete; returns how many were cancelled
    pub fn cancel_all(&self) -> usize {
        let ids: Vec<Uuid> = self.pending_ids().into_iter().collect();
        ids.into_iter()
            .filter(|id| self.cancel_scheduled(*id, None))
            .count()
    }

    pub(crate) fn cancel_scheduled(&self, id: Uuid, ticket: Option<u64>) -> bool {
        let removed = {
            let mut deletions = self.deletions();
            let cancellable = deletions.get(&id).is_some_and(|pending| {
                matches!(pending.phase, DeletePhase::Scheduled(_))
                    && ticket.map_or(true, |t| t == pending.ticket)
            });
            if cancellable {
                deletions.remove(&id)
            } else {
                None
            }
        };

        match removed {
            Some(PendingDeletion {
                phase: DeletePhase::Scheduled(timer),
                ..
            }) => {
                timer.abort();
                info!("Delete of {} cancelled", id);
                self.engine.notify(Notification::DeleteCancelled { id });
                true
            }
            _ => false,
        }
    }

    /// Timer callback: claim the pending record and issue the delete
    async fn fire_delete(&self, id: Uuid, ticket: u64) {
        {
            let mut deletions = self.deletions();
            match deletions.get_mut(&id) {
                Some(pending)
                    if pending.ticket == ticket
                        && matches!(pending.phase, DeletePhase::Scheduled(_)) =>
                {
                    pending.phase = DeletePhase::InFlight;
                }
                _ => return,
            }
        }

        let result = self.execute_delete(id).await;

        match result {
            Ok(true) => {
                self.engine.forget(id);
                self.deletions().remove(&id);
                info!("Deployment {} deleted", id);
                self.engine.notify(Notification::Deleted { id });
                if let Err(e) = self.engine.refresh_all().await {
                    warn!("Refresh after deleting {} failed: {}", id, e);
                }
            }
            Ok(false) => {
                self.deletions().remove(&id);
                debug!("Delete of {} dropped: not logged in", id);
            }
            Err(e) => {
                self.deletions().remove(&id);
                warn!("Failed to delete {}: {}", id, e);
                self.engine.notify(Notification::DeleteFailed {
                    id,
                    message: e.user_message(),
                });
            }
        }
    }

    /// Returns `Ok(false)` when there is no session to delete with
    async fn execute_delete(&self, id: Uuid) -> Result<bool, SyncError> {
        let Some(session) = self.engine.session.ensure_valid().await else {
            return Ok(false);
        };
        self.engine
            .api
            .delete_deployment(&session.access_token, id)
            .await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::options::SyncOptions;
    use crate::sync::engine::DeploymentSyncEngine;
    use crate::testing::{fake_deployment, logged_in, FakeApi, RecordingNotifier};
    use openapi_client::models::DeploymentStatus;

    async fn setup() -> (Arc<FakeApi>, Arc<RecordingNotifier>, Arc<PendingActionRegistry>, Uuid) {
        let api = Arc::new(FakeApi::new());
        let d = fake_deployment("Customer Web", DeploymentStatus::Ready);
        api.add_deployment(d.clone());
        let notifier = Arc::new(RecordingNotifier::default());
        let engine = Arc::new(DeploymentSyncEngine::new(
            api.clone(),
            logged_in(api.clone()),
            notifier.clone(),
            SyncOptions::default(),
        ));
        engine.refresh_all().await.unwrap();
        (api, notifier, PendingActionRegistry::new(engine), d.id)
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_delay_never_calls_delete() {
        let (api, notifier, registry, id) = setup().await;

        let handle = registry.schedule_delete(id, Duration::from_secs(3));
        assert!(registry.is_pending(id));
        assert_eq!(registry.rows()[0].status, DeploymentStatus::Deleting);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(handle.cancel());
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(api.delete_calls(), 0);
        assert!(!registry.is_pending(id));
        assert_eq!(registry.rows()[0].status, DeploymentStatus::Ready);
        assert_eq!(
            notifier.all().last(),
            Some(&Notification::DeleteCancelled { id })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_elapsed_delay_deletes_once() {
        let (api, notifier, registry, id) = setup().await;

        let handle = registry.schedule_delete(id, Duration::from_secs(3));
        tokio::time::sleep(Duration::from_secs(4)).await;

        assert_eq!(api.delete_calls(), 1);
        assert!(!registry.is_pending(id));
        assert!(registry.engine().deployments().is_empty());
        assert!(!handle.cancel());
        assert!(notifier.all().contains(&Notification::Deleted { id }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reschedule_replaces_timer() {
        let (api, _, registry, id) = setup().await;

        let first = registry.schedule_delete(id, Duration::from_secs(3));
        tokio::time::sleep(Duration::from_secs(2)).await;
        let _second = registry.schedule_delete(id, Duration::from_secs(3));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(api.delete_calls(), 0);
        // the replaced handle no longer controls the schedule
        assert!(!first.cancel());
        assert!(registry.is_pending(id));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(api.delete_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_delete_restores_prior_state() {
        let (api, notifier, registry, id) = setup().await;
        api.fail_delete("Namespace is terminating");

        registry.schedule_delete(id, Duration::from_secs(3));
        tokio::time::sleep(Duration::from_secs(4)).await;

        assert_eq!(api.delete_calls(), 1);
        assert!(!registry.is_pending(id));
        let rows = registry.rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, DeploymentStatus::Ready);
        assert!(notifier.all().contains(&Notification::DeleteFailed {
            id,
            message: "Namespace is terminating".to_string()
        }));

        // never retried
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(api.delete_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_delete_cannot_be_cancelled() {
        let (api, _, registry, id) = setup().await;
        api.set_action_delay(Duration::from_secs(2));

        let handle = registry.schedule_delete(id, Duration::from_secs(3));
        tokio::time::sleep(Duration::from_secs(4)).await;

        assert!(registry.is_pending(id));
        assert_eq!(registry.rows()[0].status, DeploymentStatus::Deleting);
        assert!(!handle.cancel());
        assert!(!registry.schedule_delete(id, Duration::from_secs(3)).cancel());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(api.delete_calls(), 1);
        assert!(!registry.is_pending(id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all() {
        let (api, _, registry, id) = setup().await;
        let other = fake_deployment("Docs", DeploymentStatus::Ready);
        api.add_deployment(other.clone());

        registry.schedule_delete(id, Duration::from_secs(3));
        registry.schedule_delete(other.id, Duration::from_secs(5));
        assert_eq!(registry.pending_deletions().len(), 2);
        assert_eq!(registry.pending_deletions()[0].0, id);

        assert_eq!(registry.cancel_all(), 2);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(api.delete_calls(), 0);
    }
}
