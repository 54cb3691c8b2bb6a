//! Settings file management

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::app::options::{AppOptions, SyncOptions};
use crate::errors::SyncError;
use crate::filesys::file::File;
use crate::logs::LogLevel;
use crate::storage::layout::StorageLayout;
use crate::workers::{keepalive, refresher};

/// Client settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: LogLevel,

    /// Emit JSON log lines
    #[serde(default)]
    pub json_logs: bool,

    /// Also write logs under the logs directory
    #[serde(default)]
    pub log_to_file: bool,

    /// Backend configuration
    #[serde(default)]
    pub backend: BackendSettings,

    /// Undo window of a soft delete in seconds
    #[serde(default = "default_delete_delay")]
    pub delete_delay_secs: u64,

    /// Status poll interval in seconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Readiness deadline in seconds
    #[serde(default = "default_readiness_deadline")]
    pub readiness_deadline_secs: u64,

    /// Deployment list refresh interval in seconds
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,

    /// Session keepalive interval in seconds
    #[serde(default = "default_keepalive")]
    pub keepalive_secs: u64,
}

fn default_log_level() -> LogLevel {
    LogLevel::Warn
}

fn default_delete_delay() -> u64 {
    3
}

fn default_poll_interval() -> u64 {
    2
}

fn default_readiness_deadline() -> u64 {
    180
}

fn default_refresh_interval() -> u64 {
    5
}

fn default_keepalive() -> u64 {
    15
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: false,
            log_to_file: false,
            backend: BackendSettings::default(),
            delete_delay_secs: default_delete_delay(),
            poll_interval_secs: default_poll_interval(),
            readiness_deadline_secs: default_readiness_deadline(),
            refresh_interval_secs: default_refresh_interval(),
            keepalive_secs: default_keepalive(),
        }
    }
}

/// Backend API settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendSettings {
    /// Base URL for the backend API
    #[serde(default = "default_backend_url")]
    pub base_url: String,

    /// Request timeout in seconds
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,
}

fn default_backend_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_http_timeout() -> u64 {
    30
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            base_url: default_backend_url(),
            http_timeout_secs: default_http_timeout(),
        }
    }
}

impl Settings {
    /// Read the settings file; a missing file yields the defaults
    pub async fn load(file: &File) -> Result<Self, SyncError> {
        if !file.exists().await {
            info!("No settings file at {}, using defaults", file.path().display());
            return Ok(Self::default());
        }
        file.read_json::<Settings>().await
    }

    /// Sync timing derived from these settings
    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            refresh_interval: Duration::from_secs(self.refresh_interval_secs),
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            readiness_deadline: Duration::from_secs(self.readiness_deadline_secs),
            delete_delay: Duration::from_secs(self.delete_delay_secs),
        }
    }

    /// Application options derived from these settings
    pub fn app_options(&self, layout: StorageLayout) -> AppOptions {
        let sync = self.sync_options();
        AppOptions {
            api_base_url: self.backend.base_url.trim_end_matches('/').to_string(),
            http_timeout: Duration::from_secs(self.backend.http_timeout_secs),
            layout,
            refresher: refresher::Options {
                interval: sync.refresh_interval,
            },
            keepalive: keepalive::Options {
                interval: Duration::from_secs(self.keepalive_secs),
            },
            sync,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_uses_defaults() {
        let settings: Settings =
            serde_json::from_str(r#"{"backend":{"base_url":"https://api.example.com/"},"delete_delay_secs":5}"#)
                .unwrap();
        assert_eq!(settings.delete_delay_secs, 5);
        assert_eq!(settings.poll_interval_secs, 2);
        assert_eq!(settings.backend.http_timeout_secs, 30);

        let options = settings.app_options(StorageLayout::new("/tmp/tenant-sync"));
        assert_eq!(options.api_base_url, "https://api.example.com");
        assert_eq!(options.sync.delete_delay, Duration::from_secs(5));
        assert_eq!(options.sync.readiness_deadline, Duration::from_secs(180));
        assert_eq!(options.refresher.interval, Duration::from_secs(5));
        assert_eq!(options.keepalive.interval, Duration::from_secs(15));
    }

    #[tokio::test]
    async fn test_missing_file_is_default() {
        let file = File::new(std::env::temp_dir().join(format!("{}.json", uuid::Uuid::new_v4())));
        assert_eq!(Settings::load(&file).await.unwrap(), Settings::default());
    }
}
