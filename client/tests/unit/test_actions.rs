//! Soft delete and optimistic scale tests

use std::sync::Arc;
use std::time::Duration;

use openapi_client::models::DeploymentStatus;
use tenant_sync::app::options::AppOptions;
use tenant_sync::app::state::AppState;
use tenant_sync::authn::session_mngr::SessionManagerExt;
use tenant_sync::authn::store::SessionStore;
use tenant_sync::notify::Notification;
use tenant_sync::testing::{fake_deployment, status_out, token_pair, FakeApi, RecordingNotifier};
use tokio_test::assert_ok;
use uuid::Uuid;

async fn setup() -> (Arc<FakeApi>, Arc<RecordingNotifier>, AppState, Uuid) {
    let api = Arc::new(FakeApi::new());
    let mut d = fake_deployment("Customer Web", DeploymentStatus::Ready);
    d.replicas = Some(2);
    api.add_deployment(d.clone());
    let notifier = Arc::new(RecordingNotifier::default());
    let state = AppState::with_api(
        api.clone(),
        SessionStore::in_memory(None),
        &AppOptions::default(),
        notifier.clone(),
    );
    assert_ok!(state.session_mngr.establish(token_pair(3600)).await);
    assert_ok!(state.engine.refresh_all().await);
    (api, notifier, state, d.id)
}

#[tokio::test(start_paused = true)]
async fn test_undo_within_window_makes_no_remote_call() {
    let (api, notifier, state, id) = setup().await;

    let handle = state.actions.schedule_delete_default(id);
    assert_eq!(state.actions.rows()[0].status, DeploymentStatus::Deleting);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(handle.cancel());
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(api.delete_calls(), 0);
    assert_eq!(state.actions.rows()[0].status, DeploymentStatus::Ready);
    assert_eq!(
        notifier.all(),
        vec![
            Notification::DeleteScheduled {
                id,
                delay: Duration::from_secs(3)
            },
            Notification::DeleteCancelled { id },
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_elapsed_window_deletes_and_resyncs() {
    let (api, _, state, id) = setup().await;
    let lists_before = api.list_calls();

    state.actions.schedule_delete_default(id);
    tokio::time::sleep(Duration::from_millis(2_900)).await;
    assert_eq!(api.delete_calls(), 0);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(api.delete_calls(), 1);
    assert!(!api.has_deployment(id));
    assert!(state.engine.deployments().is_empty());
    assert!(state.actions.rows().is_empty());
    assert_eq!(api.list_calls(), lists_before + 1);
}

#[tokio::test(start_paused = true)]
async fn test_expired_session_at_fire_time_drops_delete() {
    let (api, notifier, state, id) = setup().await;

    state.actions.schedule_delete_default(id);
    state.session_mngr.invalidate().await;
    tokio::time::sleep(Duration::from_secs(4)).await;

    assert_eq!(api.delete_calls(), 0);
    assert!(!state.actions.is_pending(id));
    assert!(!notifier
        .all()
        .iter()
        .any(|n| matches!(n, Notification::DeleteFailed { .. })));
}

#[tokio::test]
async fn test_failed_scale_reverts_to_server_count() {
    let (api, notifier, state, id) = setup().await;
    api.fail_scale("Replica quota exceeded");

    state.actions.set_scale_input(id, 5);
    assert!(!state.actions.apply_scale(id, 5).await);

    assert_eq!(state.actions.scale_input(id), 2);
    assert_eq!(api.scale_calls(), vec![(id, 5)]);
    assert!(notifier.all().iter().any(|n| n.is_failure()));
}

#[tokio::test]
async fn test_scale_success_reconciles_counts() {
    let (api, _, state, id) = setup().await;
    api.script_status(id, vec![Ok(status_out(id, DeploymentStatus::Ready, 3, 3, 1))]);

    assert!(state.actions.apply_scale(id, 3).await);

    let row = state.actions.rows().remove(0);
    assert_eq!(row.replicas, 3);
    assert_eq!(row.ready_replicas, 3);
    assert_eq!(state.actions.scale_input(id), 3);
}
