//! Long-running sync loop: background workers until a shutdown signal

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::app::options::AppOptions;
use crate::app::state::AppState;
use crate::errors::SyncError;
use crate::workers::{keepalive, refresher};

/// Run the background workers against `app_state` until `shutdown_signal`
/// resolves
pub async fn run(
    options: AppOptions,
    app_state: Arc<AppState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), SyncError> {
    info!("Starting tenant sync...");

    // Create shutdown channel
    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let mut shutdown_manager =
        ShutdownManager::new(shutdown_tx.clone(), options.max_shutdown_delay);
    shutdown_manager.with_app_state(app_state.clone())?;

    if let Err(e) = init(&options, app_state, &shutdown_tx, &mut shutdown_manager) {
        error!("Failed to start workers: {}", e);
        shutdown_manager.shutdown().await?;
        return Err(e);
    }

    shutdown_signal.await;
    info!("Shutdown signal received, shutting down...");

    drop(shutdown_tx);
    shutdown_manager.shutdown().await
}

// =============================== INITIALIZATION ================================== //

fn init(
    options: &AppOptions,
    app_state: Arc<AppState>,
    shutdown_tx: &broadcast::Sender<()>,
    shutdown_manager: &mut ShutdownManager,
) -> Result<(), SyncError> {
    if options.enable_keepalive {
        init_keepalive_worker(
            options.keepalive.clone(),
            app_state.clone(),
            shutdown_manager,
            shutdown_tx.subscribe(),
        )?;
    }

    if options.enable_refresher {
        init_refresher_worker(
            options.refresher.clone(),
            app_state,
            shutdown_manager,
            shutdown_tx.subscribe(),
        )?;
    }

    Ok(())
}

fn init_keepalive_worker(
    options: keepalive::Options,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), SyncError> {
    info!("Initializing keepalive worker...");

    let session_mngr = app_state.session_mngr.clone();
    let handle = tokio::spawn(async move {
        keepalive::run(
            &options,
            session_mngr.as_ref(),
            tokio::time::sleep,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    shutdown_manager.with_keepalive_worker_handle(handle)
}

fn init_refresher_worker(
    options: refresher::Options,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), SyncError> {
    info!("Initializing refresher worker...");

    let engine = app_state.engine.clone();
    let handle = tokio::spawn(async move {
        refresher::run(
            &options,
            engine.as_ref(),
            tokio::time::sleep,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    shutdown_manager.with_refresher_worker_handle(handle)
}

// ================================= SHUTDOWN ===================================== //

struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    max_shutdown_delay: Duration,
    app_state: Option<Arc<AppState>>,
    keepalive_worker_handle: Option<JoinHandle<()>>,
    refresher_worker_handle: Option<JoinHandle<()>>,
}

impl ShutdownManager {
    pub fn new(shutdown_tx: broadcast::Sender<()>, max_shutdown_delay: Duration) -> Self {
        Self {
            shutdown_tx,
            max_shutdown_delay,
            app_state: None,
            keepalive_worker_handle: None,
            refresher_worker_handle: None,
        }
    }

    pub fn with_app_state(&mut self, state: Arc<AppState>) -> Result<(), SyncError> {
        if self.app_state.is_some() {
            return Err(SyncError::ShutdownError("app_state already set".to_string()));
        }
        self.app_state = Some(state);
        Ok(())
    }

    pub fn with_keepalive_worker_handle(&mut self, handle: JoinHandle<()>) -> Result<(), SyncError> {
        if self.keepalive_worker_handle.is_some() {
            return Err(SyncError::ShutdownError("keepalive_handle already set".to_string()));
        }
        self.keepalive_worker_handle = Some(handle);
        Ok(())
    }

    pub fn with_refresher_worker_handle(&mut self, handle: JoinHandle<()>) -> Result<(), SyncError> {
        if self.refresher_worker_handle.is_some() {
            return Err(SyncError::ShutdownError("refresher_handle already set".to_string()));
        }
        self.refresher_worker_handle = Some(handle);
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), SyncError> {
        info!("Shutting down tenant sync...");

        // pending deletes never outlive shutdown, even when a worker hangs
        if let Some(app_state) = self.app_state.take() {
            app_state.shutdown().await?;
        }

        let _ = self.shutdown_tx.send(());

        match tokio::time::timeout(self.max_shutdown_delay, self.shutdown_impl()).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::ShutdownError(format!(
                "workers did not stop within {:?}",
                self.max_shutdown_delay
            ))),
        }
    }

    async fn shutdown_impl(&mut self) -> Result<(), SyncError> {
        // 1. Refresher worker
        if let Some(handle) = self.refresher_worker_handle.take() {
            handle.await.map_err(|e| SyncError::ShutdownError(e.to_string()))?;
        }

        // 2. Keepalive worker
        if let Some(handle) = self.keepalive_worker_handle.take() {
            handle.await.map_err(|e| SyncError::ShutdownError(e.to_string()))?;
        }

        info!("Shutdown complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authn::session_mngr::SessionManagerExt;
    use crate::authn::store::SessionStore;
    use crate::testing::{fake_deployment, FakeApi, RecordingNotifier};
    use openapi_client::models::DeploymentStatus;

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_workers_and_cancels_pending_deletes() {
        let api = Arc::new(FakeApi::new());
        let d = fake_deployment("Customer Web", DeploymentStatus::Ready);
        api.add_deployment(d.clone());
        let options = AppOptions::default();
        let state = Arc::new(AppState::with_api(
            api.clone(),
            SessionStore::in_memory(None),
            &options,
            Arc::new(RecordingNotifier::default()),
        ));
        state.session_mngr.establish(crate::testing::token_pair(3600)).await.unwrap();
        state.actions.schedule_delete(d.id, Duration::from_secs(60));

        run(options, state.clone(), tokio::time::sleep(Duration::from_secs(11)))
            .await
            .unwrap();

        assert!(api.list_calls() >= 3);
        assert!(!state.actions.is_pending(d.id));
        assert_eq!(api.delete_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_worker_still_cancels_pending_deletes() {
        let api = Arc::new(FakeApi::new());
        let d = fake_deployment("Customer Web", DeploymentStatus::Ready);
        api.add_deployment(d.clone());
        api.set_list_delay(Duration::from_secs(60));
        let options = AppOptions::default();
        let state = Arc::new(AppState::with_api(
            api.clone(),
            SessionStore::in_memory(None),
            &options,
            Arc::new(RecordingNotifier::default()),
        ));
        state.session_mngr.establish(crate::testing::token_pair(3600)).await.unwrap();
        state.actions.schedule_delete(d.id, Duration::from_secs(20));

        let result = run(options, state.clone(), tokio::time::sleep(Duration::from_secs(1))).await;

        assert!(matches!(result, Err(SyncError::ShutdownError(_))));
        assert!(!state.actions.is_pending(d.id));
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(api.delete_calls(), 0);
    }
}
