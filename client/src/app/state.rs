//! Application state management

use std::sync::Arc;

use tracing::info;

use crate::actions::registry::PendingActionRegistry;
use crate::app::options::AppOptions;
use crate::authn::account::AccountService;
use crate::authn::session_mngr::SessionManager;
use crate::authn::store::SessionStore;
use crate::errors::SyncError;
use crate::http::api::ProvisioningApi;
use crate::http::client::HttpClient;
use crate::notify::Notifier;
use crate::sync::engine::DeploymentSyncEngine;

/// Main application state
pub struct AppState {
    /// Backend API
    pub api: Arc<dyn ProvisioningApi>,

    /// Session manager for authentication
    pub session_mngr: Arc<SessionManager>,

    /// Account operations
    pub accounts: Arc<AccountService>,

    /// Deployment sync engine
    pub engine: Arc<DeploymentSyncEngine>,

    /// Pending deletes and scale inputs
    pub actions: Arc<PendingActionRegistry>,
}

impl AppState {
    /// Initialize application state against the HTTP backend, restoring the
    /// persisted session if there is one
    pub async fn init(options: &AppOptions, notifier: Arc<dyn Notifier>) -> Result<Self, SyncError> {
        info!("Initializing application state...");

        options.layout.setup().await?;
        let http_client = HttpClient::new(&options.api_base_url, options.http_timeout)?;
        let store = SessionStore::load(options.layout.session_file()).await;

        Ok(Self::with_api(Arc::new(http_client), store, options, notifier))
    }

    /// Wire the services around any backend implementation
    pub fn with_api(
        api: Arc<dyn ProvisioningApi>,
        store: SessionStore,
        options: &AppOptions,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let session_mngr = Arc::new(SessionManager::new(store, api.clone()));
        let accounts = Arc::new(AccountService::new(api.clone(), session_mngr.clone()));
        let engine = Arc::new(DeploymentSyncEngine::new(
            api.clone(),
            session_mngr.clone(),
            notifier,
            options.sync.clone(),
        ));
        let actions = PendingActionRegistry::new(engine.clone());

        Self {
            api,
            session_mngr,
            accounts,
            engine,
            actions,
        }
    }

    /// Shutdown application state
    pub async fn shutdown(&self) -> Result<(), SyncError> {
        info!("Shutting down application state...");
        let cancelled = self.actions.cancel_all();
        if cancelled > 0 {
            info!("Cancelled {} pending deletes", cancelled);
        }
        Ok(())
    }
}
