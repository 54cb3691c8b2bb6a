//! Deployment API client

use uuid::Uuid;

use openapi_client::models::{
    ClusterHealth, Deployment, DeploymentCreate, DeploymentDetails, DeploymentStatusOut, OkResponse,
    ScaleRequest,
};

use crate::errors::SyncError;
use crate::http::client::HttpClient;

impl HttpClient {
    /// List the caller's deployments, newest first
    pub async fn list_deployments(&self, token: &str) -> Result<Vec<Deployment>, SyncError> {
        self.get("/deployments", token).await
    }

    /// Create a deployment
    pub async fn create_deployment(
        &self,
        token: &str,
        request: &DeploymentCreate,
    ) -> Result<Deployment, SyncError> {
        self.post("/deployments", token, request).await
    }

    /// Get a single deployment with live counts
    pub async fn get_deployment(&self, token: &str, id: Uuid) -> Result<Deployment, SyncError> {
        let path = format!("/deployments/{}", id);
        self.get(&path, token).await
    }

    /// Get the live status of a deployment
    pub async fn get_deployment_status(
        &self,
        token: &str,
        id: Uuid,
    ) -> Result<DeploymentStatusOut, SyncError> {
        let path = format!("/deployments/{}/status", id);
        self.get(&path, token).await
    }

    /// Report, pod states and recent cluster events of a deployment
    pub async fn get_deployment_details(
        &self,
        token: &str,
        id: Uuid,
    ) -> Result<DeploymentDetails, SyncError> {
        let path = format!("/deployments/{}/details", id);
        self.get(&path, token).await
    }

    /// Change the replica count
    pub async fn scale_deployment(
        &self,
        token: &str,
        id: Uuid,
        replicas: u32,
    ) -> Result<Deployment, SyncError> {
        let path = format!("/deployments/{}/scale", id);
        self.patch(&path, token, &ScaleRequest { replicas }).await
    }

    /// Delete a deployment and its backing resources
    pub async fn delete_deployment(&self, token: &str, id: Uuid) -> Result<(), SyncError> {
        let path = format!("/deployments/{}", id);
        let _: OkResponse = self.delete(&path, token).await?;
        Ok(())
    }

    /// Cluster and ingress readiness; needs no session
    pub async fn cluster_health(&self) -> Result<ClusterHealth, SyncError> {
        self.get_public("/health/cluster").await
    }
}
