//! Error types for the tenant sync client

use thiserror::Error;

/// Main error type for the tenant sync client
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Channel error: {0}")]
    ChannelError(String),

    /// No valid or refreshable session; the caller is logged out
    #[error("Session expired")]
    AuthExpired,

    /// Non-success response; `message` is shown to the user verbatim
    #[error("{message}")]
    RemoteRejection {
        status: http::StatusCode,
        message: String,
    },

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Token error: {0}")]
    TokenError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SyncError {
    /// Network level failures that are retried on the next cycle or degrade
    /// to a fallback strategy instead of being surfaced.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            SyncError::Transport(_) | SyncError::ChannelError(_) | SyncError::IoError(_)
        )
    }

    /// Message shown to the user for a failed action
    pub fn user_message(&self) -> String {
        match self {
            SyncError::RemoteRejection { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

impl From<anyhow::Error> for SyncError {
    fn from(err: anyhow::Error) -> Self {
        SyncError::Internal(err.to_string())
    }
}
