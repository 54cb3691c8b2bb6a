//! The provisioning API contract consumed by the sync layer

use async_trait::async_trait;
use uuid::Uuid;

use openapi_client::models::{
    ClusterHealth, Deployment, DeploymentCreate, DeploymentDetails, DeploymentStatusOut,
    LoginRequest, MeResponse, OkResponse, RegisterRequest, Theme, TokenPair, UserSettings,
};

use crate::errors::SyncError;
use crate::http::client::HttpClient;
use crate::http::events::StatusStream;

/// Remote operations of the provisioning backend.
///
/// Implemented by [`HttpClient`]; tests substitute an in-memory fake.
#[async_trait]
pub trait ProvisioningApi: Send + Sync {
    async fn register(&self, request: &RegisterRequest) -> Result<TokenPair, SyncError>;

    async fn login(&self, request: &LoginRequest) -> Result<TokenPair, SyncError>;

    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, SyncError>;

    async fn me(&self, token: &str) -> Result<MeResponse, SyncError>;

    async fn list_deployments(&self, token: &str) -> Result<Vec<Deployment>, SyncError>;

    async fn create_deployment(
        &self,
        token: &str,
        request: &DeploymentCreate,
    ) -> Result<Deployment, SyncError>;

    async fn get_deployment(&self, token: &str, id: Uuid) -> Result<Deployment, SyncError>;

    async fn get_status(&self, token: &str, id: Uuid) -> Result<DeploymentStatusOut, SyncError>;

    async fn get_details(&self, token: &str, id: Uuid) -> Result<DeploymentDetails, SyncError>;

    async fn open_status_channel(&self, token: &str, id: Uuid) -> Result<StatusStream, SyncError>;

    async fn scale(&self, token: &str, id: Uuid, replicas: u32) -> Result<Deployment, SyncError>;

    async fn delete_deployment(&self, token: &str, id: Uuid) -> Result<(), SyncError>;

    async fn delete_account(&self, token: &str) -> Result<OkResponse, SyncError>;

    async fn get_settings(&self, token: &str) -> Result<UserSettings, SyncError>;

    async fn update_settings(&self, token: &str, theme: Theme) -> Result<(), SyncError>;

    async fn cluster_health(&self) -> Result<ClusterHealth, SyncError>;
}

#[async_trait]
impl ProvisioningApi for HttpClient {
    async fn register(&self, request: &RegisterRequest) -> Result<TokenPair, SyncError> {
        HttpClient::register(self, request).await
    }

    async fn login(&self, request: &LoginRequest) -> Result<TokenPair, SyncError> {
        HttpClient::login(self, request).await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, SyncError> {
        self.refresh_tokens(refresh_token).await
    }

    async fn me(&self, token: &str) -> Result<MeResponse, SyncError> {
        HttpClient::me(self, token).await
    }

    async fn list_deployments(&self, token: &str) -> Result<Vec<Deployment>, SyncError> {
        HttpClient::list_deployments(self, token).await
    }

    async fn create_deployment(
        &self,
        token: &str,
        request: &DeploymentCreate,
    ) -> Result<Deployment, SyncError> {
        HttpClient::create_deployment(self, token, request).await
    }

    async fn get_deployment(&self, token: &str, id: Uuid) -> Result<Deployment, SyncError> {
        HttpClient::get_deployment(self, token, id).await
    }

    async fn get_status(&self, token: &str, id: Uuid) -> Result<DeploymentStatusOut, SyncError> {
        self.get_deployment_status(token, id).await
    }

    async fn get_details(&self, token: &str, id: Uuid) -> Result<DeploymentDetails, SyncError> {
        self.get_deployment_details(token, id).await
    }

    async fn open_status_channel(&self, token: &str, id: Uuid) -> Result<StatusStream, SyncError> {
        HttpClient::open_status_channel(self, token, id).await
    }

    async fn scale(&self, token: &str, id: Uuid, replicas: u32) -> Result<Deployment, SyncError> {
        self.scale_deployment(token, id, replicas).await
    }

    async fn delete_deployment(&self, token: &str, id: Uuid) -> Result<(), SyncError> {
        HttpClient::delete_deployment(self, token, id).await
    }

    async fn delete_account(&self, token: &str) -> Result<OkResponse, SyncError> {
        HttpClient::delete_account(self, token).await
    }

    async fn get_settings(&self, token: &str) -> Result<UserSettings, SyncError> {
        HttpClient::get_settings(self, token).await
    }

    async fn update_settings(&self, token: &str, theme: Theme) -> Result<(), SyncError> {
        HttpClient::update_settings(self, token, theme).await
    }

    async fn cluster_health(&self) -> Result<ClusterHealth, SyncError> {
        HttpClient::cluster_health(self).await
    }
}
