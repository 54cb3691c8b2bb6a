//! Storage layout configuration

use std::path::PathBuf;

use crate::errors::SyncError;
use crate::filesys::file::File;

/// On-disk layout of the client's state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLayout {
    /// Base directory for all storage
    pub base_dir: PathBuf,
}

impl StorageLayout {
    /// Create a new storage layout
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Persisted session (access + refresh token)
    pub fn session_file(&self) -> File {
        File::new(self.base_dir.join("session.json"))
    }

    /// Get the settings file path
    pub fn settings_file(&self) -> File {
        File::new(self.base_dir.join("settings.json"))
    }

    /// Get the logs directory
    pub fn logs_dir(&self) -> PathBuf {
        self.base_dir.join("logs")
    }

    /// Create the directories of the layout
    pub async fn setup(&self) -> Result<(), SyncError> {
        tokio::fs::create_dir_all(&self.base_dir).await?;
        tokio::fs::create_dir_all(self.logs_dir()).await?;
        Ok(())
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        let base_dir = std::env::var_os("TENANT_SYNC_HOME")
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var_os("HOME")
                    .or_else(|| std::env::var_os("USERPROFILE"))
                    .map(|home| PathBuf::from(home).join(".tenant-sync"))
            })
            .unwrap_or_else(|| PathBuf::from(".tenant-sync"));

        Self::new(base_dir)
    }
}
