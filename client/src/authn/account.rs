//! Account operations: login, register, logout, close account, preferences

use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use tracing::{info, warn};

use openapi_client::models::{LoginRequest, MeResponse, OkResponse, RegisterRequest, Theme};

use crate::authn::session::Session;
use crate::authn::session_mngr::SessionManagerExt;
use crate::errors::SyncError;
use crate::http::api::ProvisioningApi;

/// Account service
pub struct AccountService {
    api: Arc<dyn ProvisioningApi>,
    session: Arc<dyn SessionManagerExt>,
}

impl AccountService {
    pub fn new(api: Arc<dyn ProvisioningApi>, session: Arc<dyn SessionManagerExt>) -> Self {
        Self { api, session }
    }

    /// Log in and install the issued session
    pub async fn login(&self, email: &str, password: &SecretString) -> Result<Session, SyncError> {
        let request = LoginRequest {
            email: email.to_string(),
            password: password.expose_secret().to_string(),
        };
        let pair = self.api.login(&request).await?;
        info!("Logged in as {}", email);
        self.session.establish(pair).await
    }

    /// Create an account and install its first session
    pub async fn register(
        &self,
        email: &str,
        password: &SecretString,
    ) -> Result<Session, SyncError> {
        if password.expose_secret().is_empty() {
            return Err(SyncError::ValidationError("Password must not be empty".to_string()));
        }
        let request = RegisterRequest {
            email: email.to_string(),
            password: password.expose_secret().to_string(),
        };
        let pair = self.api.register(&request).await?;
        info!("Registered {}", email);
        self.session.establish(pair).await
    }

    /// Forget the session locally
    pub async fn logout(&self) {
        self.session.invalidate().await;
    }

    /// The signed-in user
    pub async fn me(&self) -> Result<MeResponse, SyncError> {
        let session = self.session.ensure_valid().await.ok_or(SyncError::AuthExpired)?;
        self.api.me(&session.access_token).await
    }

    /// Delete the account and all of its deployments, then drop the session.
    /// The session is kept when the server refuses.
    pub async fn close_account(&self) -> Result<OkResponse, SyncError> {
        let session = self.session.ensure_valid().await.ok_or(SyncError::AuthExpired)?;
        let response = self.api.delete_account(&session.access_token).await?;
        for warning in &response.warnings {
            warn!("Account closed with cleanup warning: {}", warning);
        }
        self.session.invalidate().await;
        info!("Account closed");
        Ok(response)
    }

    /// Stored theme preference
    pub async fn theme(&self) -> Result<Option<Theme>, SyncError> {
        let session = self.session.ensure_valid().await.ok_or(SyncError::AuthExpired)?;
        let settings = self.api.get_settings(&session.access_token).await?;
        Ok(settings.theme)
    }

    /// Persist a theme preference
    pub async fn set_theme(&self, theme: Theme) -> Result<(), SyncError> {
        let session = self.session.ensure_valid().await.ok_or(SyncError::AuthExpired)?;
        self.api.update_settings(&session.access_token, theme).await
    }
}
