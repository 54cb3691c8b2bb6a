//! Application configuration options

use std::time::Duration;

use crate::storage::layout::StorageLayout;
use crate::workers::{keepalive, refresher};

/// Timing of the deployment sync engine and the pending action registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOptions {
    /// Period of the background list refresh
    pub refresh_interval: Duration,

    /// Period of status polls when the live channel is unavailable
    pub poll_interval: Duration,

    /// How long `track_until_ready` waits before giving up
    pub readiness_deadline: Duration,

    /// Undo window of a soft delete
    pub delete_delay: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(5),
            poll_interval: Duration::from_secs(2),
            readiness_deadline: Duration::from_secs(180),
            delete_delay: Duration::from_secs(3),
        }
    }
}

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Backend API base URL
    pub api_base_url: String,

    /// Timeout of a single request/response exchange
    pub http_timeout: Duration,

    /// Storage layout paths
    pub layout: StorageLayout,

    /// Sync timing
    pub sync: SyncOptions,

    /// Run the background deployment refresher
    pub enable_refresher: bool,

    /// Run the session keepalive worker
    pub enable_keepalive: bool,

    /// Refresher worker options
    pub refresher: refresher::Options,

    /// Keepalive worker options
    pub keepalive: keepalive::Options,

    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8000".to_string(),
            http_timeout: Duration::from_secs(30),
            layout: StorageLayout::default(),
            sync: SyncOptions::default(),
            enable_refresher: true,
            enable_keepalive: true,
            refresher: refresher::Options::default(),
            keepalive: keepalive::Options::default(),
            max_shutdown_delay: Duration::from_secs(10),
        }
    }
}
