//! HTTP client implementation

use std::time::Duration;

use reqwest::{header, Client, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, error};

use openapi_client::models::ErrorResponse;

use crate::errors::SyncError;

/// HTTP client for backend communication
pub struct HttpClient {
    client: Client,
    stream_client: Client,
    base_url: String,
}

impl HttpClient {
    /// Create a new HTTP client
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, SyncError> {
        let client = Client::builder().timeout(timeout).build()?;

        // Live channels stay open for minutes, so only the connect phase is bounded
        let stream_client = Client::builder().connect_timeout(timeout).build()?;

        Ok(Self {
            client,
            stream_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub(crate) fn stream_client(&self) -> &Client {
        &self.stream_client
    }

    /// Make an authenticated GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str, token: &str) -> Result<T, SyncError> {
        let url = self.url(path);
        debug!("GET {}", url);

        let request = self.client.get(&url).bearer_auth(token);
        self.send_json("GET", request).await
    }

    /// Make an unauthenticated GET request
    pub async fn get_public<T: DeserializeOwned>(&self, path: &str) -> Result<T, SyncError> {
        let url = self.url(path);
        debug!("GET {} (public)", url);

        self.send_json("GET", self.client.get(&url)).await
    }

    /// Make an authenticated POST request
    pub async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        token: &str,
        body: &B,
    ) -> Result<T, SyncError> {
        let url = self.url(path);
        debug!("POST {}", url);

        let request = self.client.post(&url).bearer_auth(token).json(body);
        self.send_json("POST", request).await
    }

    /// Make an unauthenticated POST request
    pub async fn post_public<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, SyncError> {
        let url = self.url(path);
        debug!("POST {} (public)", url);

        let request = self
            .client
            .post(&url)
            .header(header::CONTENT_TYPE, "application/json")
            .json(body);
        self.send_json("POST", request).await
    }

    /// Make an authenticated PATCH request
    pub async fn patch<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        token: &str,
        body: &B,
    ) -> Result<T, SyncError> {
        let url = self.url(path);
        debug!("PATCH {}", url);

        let request = self.client.patch(&url).bearer_auth(token).json(body);
        self.send_json("PATCH", request).await
    }

    /// Make an authenticated DELETE request
    pub async fn delete<T: DeserializeOwned>(&self, path: &str, token: &str) -> Result<T, SyncError> {
        let url = self.url(path);
        debug!("DELETE {}", url);

        let request = self.client.delete(&url).bearer_auth(token);
        self.send_json("DELETE", request).await
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        method: &str,
        request: RequestBuilder,
    ) -> Result<T, SyncError> {
        let response = request.send().await?;
        let response = check_status(method, response).await?;
        let body = response.json().await?;
        Ok(body)
    }
}

/// Turn a non-success response into a `RemoteRejection` carrying the server's message
pub(crate) async fn check_status(method: &str, response: Response) -> Result<Response, SyncError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    error!("HTTP {} failed: {} - {}", method, status, body);

    Err(SyncError::RemoteRejection {
        status,
        message: rejection_message(status, &body),
    })
}

/// Prefer the `detail` field, then the raw body, then the status line
pub(crate) fn rejection_message(status: http::StatusCode, body: &str) -> String {
    if let Ok(err) = serde_json::from_str::<ErrorResponse>(body) {
        return err.message();
    }
    if body.trim().is_empty() {
        status.to_string()
    } else {
        body.trim().to_string()
    }
}
