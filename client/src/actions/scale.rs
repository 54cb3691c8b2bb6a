//! Optimistic scale with revert on failure

use tracing::{info, warn};
use uuid::Uuid;

use openapi_client::models::Deployment;

use crate::actions::registry::PendingActionRegistry;
use crate::errors::SyncError;
use crate::notify::Notification;

impl PendingActionRegistry {
    /// Record what the user typed into the scale control
    pub fn set_scale_input(&self, id: Uuid, replicas: u32) {
        self.scale_inputs().insert(id, replicas);
    }

    /// Value the scale control shows: the pending input, else the last
    /// server-reported replica count, else 1
    pub fn scale_input(&self, id: Uuid) -> u32 {
        if let Some(replicas) = self.scale_inputs().get(&id) {
            return *replicas;
        }
        self.engine.server_replicas(id).unwrap_or(1)
    }

    /// Ask the server to run `replicas` copies. On success the status is
    /// re-fetched and the control follows the server's count from then on;
    /// on failure the input reverts to the server's count.
    pub async fn apply_scale(&self, id: Uuid, replicas: u32) -> bool {
        if replicas < 1 {
            self.revert_scale(id, "Replicas must be at least 1".to_string());
            return false;
        }
        self.set_scale_input(id, replicas);

        match self.execute_scale(id, replicas).await {
            Ok(Some(deployment)) => {
                info!("Scaled {} to {} replicas", id, replicas);
                self.engine.upsert(deployment);
                self.engine.notify(Notification::Scaled { id, replicas });
                if let Err(e) = self.engine.fetch_status(id).await {
                    warn!("Status refresh after scaling {} failed: {}", id, e);
                }
                self.settle_scale_input(id, replicas);
                true
            }
            Ok(None) => {
                self.scale_inputs().remove(&id);
                false
            }
            Err(e) => {
                warn!("Failed to scale {}: {}", id, e);
                self.revert_scale(id, e.user_message());
                false
            }
        }
    }

    /// Drop the input once applied, unless the user typed something newer
    fn settle_scale_input(&self, id: Uuid, applied: u32) {
        let mut inputs = self.scale_inputs();
        if inputs.get(&id) == Some(&applied) {
            inputs.remove(&id);
        }
    }

    fn revert_scale(&self, id: Uuid, message: String) {
        self.scale_inputs().remove(&id);
        self.engine.notify(Notification::ScaleFailed { id, message });
    }

    /// Returns `Ok(None)` when there is no session to scale with
    async fn execute_scale(&self, id: Uuid, replicas: u32) -> Result<Option<Deployment>, SyncError> {
        let Some(session) = self.engine.session.ensure_valid().await else {
            return Ok(None);
        };
        let deployment = self
            .engine
            .api
            .scale(&session.access_token, id, replicas)
            .await?;
        Ok(Some(deployment))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::app::options::SyncOptions;
    use crate::sync::engine::DeploymentSyncEngine;
    use crate::testing::{fake_deployment, logged_in, status_out, FakeApi, RecordingNotifier};
    use openapi_client::models::DeploymentStatus;

    async fn setup(
        replicas: u32,
    ) -> (Arc<FakeApi>, Arc<RecordingNotifier>, Arc<PendingActionRegistry>, Uuid) {
        let api = Arc::new(FakeApi::new());
        let mut d = fake_deployment("Customer Web", DeploymentStatus::Ready);
        d.replicas = Some(replicas);
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

    #[tokio::test]
    async fn test_scale_success_refetches_status() {
        let (api, notifier, registry, id) = setup(1).await;

        assert!(registry.apply_scale(id, 3).await);
        assert_eq!(api.scale_calls(), vec![(id, 3)]);
        assert_eq!(api.status_calls(id), 2);
        assert_eq!(registry.scale_input(id), 3);
        assert_eq!(registry.engine().server_replicas(id), Some(3));
        assert!(notifier.all().contains(&Notification::Scaled { id, replicas: 3 }));
    }

    #[tokio::test]
    async fn test_input_follows_server_after_successful_scale() {
        let (api, _, registry, id) = setup(1).await;

        assert!(registry.apply_scale(id, 3).await);
        assert_eq!(registry.scale_input(id), 3);

        // replicas changed elsewhere
        api.script_status(id, vec![Ok(status_out(id, DeploymentStatus::Ready, 5, 5, 1))]);
        registry.engine().refresh_all().await.unwrap();

        assert_eq!(registry.engine().server_replicas(id), Some(5));
        assert_eq!(registry.scale_input(id), 5);
    }

    #[tokio::test]
    async fn test_failed_scale_reverts_input() {
        let (api, notifier, registry, id) = setup(2).await;
        api.fail_scale("Replica quota exceeded");

        registry.set_scale_input(id, 5);
        assert_eq!(registry.scale_input(id), 5);
        assert!(!registry.apply_scale(id, 5).await);

        assert_eq!(registry.scale_input(id), 2);
        assert!(notifier.all().contains(&Notification::ScaleFailed {
            id,
            message: "Replica quota exceeded".to_string()
        }));
    }

    #[tokio::test]
    async fn test_zero_replicas_is_rejected_locally() {
        let (api, _, registry, id) = setup(2).await;

        assert!(!registry.apply_scale(id, 0).await);
        assert!(api.scale_calls().is_empty());
        assert_eq!(registry.scale_input(id), 2);
    }

    #[tokio::test]
    async fn test_input_defaults_to_one_without_server_count() {
        let (_, _, registry, _) = setup(2).await;
        assert_eq!(registry.scale_input(Uuid::new_v4()), 1);
    }
}
