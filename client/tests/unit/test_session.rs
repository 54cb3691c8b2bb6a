//! Session gate tests across services

use std::sync::Arc;
use std::time::Duration;

use openapi_client::models::DeploymentStatus;
use tenant_sync::app::options::AppOptions;
use tenant_sync::app::state::AppState;
use tenant_sync::authn::session::Session;
use tenant_sync::authn::session_mngr::SessionManagerExt;
use tenant_sync::authn::store::SessionStore;
use tenant_sync::errors::SyncError;
use tenant_sync::filesys::file::File;
use tenant_sync::testing::{fake_deployment, token_pair, FakeApi, RecordingNotifier};
use tokio_test::assert_ok;

fn state_with(api: Arc<FakeApi>, session: Option<Session>) -> AppState {
    AppState::with_api(
        api,
        SessionStore::in_memory(session),
        &AppOptions::default(),
        Arc::new(RecordingNotifier::default()),
    )
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_services_share_one_refresh() {
    let api = Arc::new(FakeApi::new());
    api.add_deployment(fake_deployment("Customer Web", DeploymentStatus::Ready));
    api.add_deployment(fake_deployment("Docs", DeploymentStatus::Creating));
    api.set_refresh_pair(token_pair(900));
    api.set_refresh_delay(Duration::from_millis(300));
    let stale = Session::from_token_pair(token_pair(10)).unwrap();
    let state = state_with(api.clone(), Some(stale));

    let (listed, me, theme) = tokio::join!(
        state.engine.refresh_all(),
        state.accounts.me(),
        state.accounts.theme()
    );

    assert_eq!(assert_ok!(listed).unwrap().len(), 2);
    assert_eq!(assert_ok!(me).email, "owner@example.com");
    assert_eq!(assert_ok!(theme), None);
    assert_eq!(api.refresh_calls(), 1);
}

#[tokio::test]
async fn test_logged_out_calls_have_no_side_effects() {
    let api = Arc::new(FakeApi::new());
    api.add_deployment(fake_deployment("Customer Web", DeploymentStatus::Ready));
    let state = state_with(api.clone(), None);

    assert!(state.engine.refresh_all().await.unwrap().is_none());
    assert!(matches!(
        state.engine.fetch_status(uuid::Uuid::new_v4()).await,
        Err(SyncError::AuthExpired)
    ));
    assert_eq!(api.list_calls(), 0);
    assert_eq!(api.refresh_calls(), 0);
}

#[tokio::test]
async fn test_rejected_refresh_logs_out_and_removes_file() {
    let api = Arc::new(FakeApi::new());
    api.fail_refresh("Invalid refresh token");
    let path = std::env::temp_dir().join(format!("session-{}.json", uuid::Uuid::new_v4()));
    let file = File::new(&path);
    file.write_json(&Session::from_token_pair(token_pair(-60)).unwrap())
        .await
        .unwrap();

    let store = SessionStore::load(File::new(&path)).await;
    assert!(store.get().await.is_some());
    let state = AppState::with_api(
        api.clone(),
        store,
        &AppOptions::default(),
        Arc::new(RecordingNotifier::default()),
    );

    assert!(state.session_mngr.ensure_valid().await.is_none());
    assert!(!file.exists().await);
    assert!(state.engine.refresh_all().await.unwrap().is_none());
}
