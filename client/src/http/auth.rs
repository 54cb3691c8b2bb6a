//! Account and session API client

use openapi_client::models::{
    LoginRequest, MeResponse, OkResponse, RefreshRequest, RegisterRequest, Theme, ThemeUpdate,
    TokenPair, UserSettings,
};

use crate::errors::SyncError;
use crate::http::client::HttpClient;

impl HttpClient {
    /// Create an account and receive its first token pair
    pub async fn register(&self, request: &RegisterRequest) -> Result<TokenPair, SyncError> {
        self.post_public("/auth/register", request).await
    }

    /// Exchange credentials for a token pair
    pub async fn login(&self, request: &LoginRequest) -> Result<TokenPair, SyncError> {
        self.post_public("/auth/login", request).await
    }

    /// Exchange a refresh token for a new token pair
    pub async fn refresh_tokens(&self, refresh_token: &str) -> Result<TokenPair, SyncError> {
        let body = RefreshRequest {
            refresh_token: refresh_token.to_string(),
        };
        self.post_public("/auth/refresh", &body).await
    }

    /// Get the current user
    pub async fn me(&self, token: &str) -> Result<MeResponse, SyncError> {
        self.get("/auth/me", token).await
    }

    /// Remove the account and every deployment it owns
    pub async fn delete_account(&self, token: &str) -> Result<OkResponse, SyncError> {
        self.delete("/auth/account", token).await
    }

    /// Read user settings
    pub async fn get_settings(&self, token: &str) -> Result<UserSettings, SyncError> {
        self.get("/auth/me/settings", token).await
    }

    /// Persist the theme preference
    pub async fn update_settings(&self, token: &str, theme: Theme) -> Result<(), SyncError> {
        let _: OkResponse = self
            .post("/auth/me/settings", token, &ThemeUpdate { theme })
            .await?;
        Ok(())
    }
}
