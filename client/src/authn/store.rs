//! Session storage

use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::authn::session::Session;
use crate::filesys::file::File;

/// Holds the current session. Absence means logged out.
///
/// When backed by a file the session is mirrored to disk so it survives a
/// restart; persistence failures are logged and the in-memory value still wins.
pub struct SessionStore {
    cached: RwLock<Option<Session>>,
    file: Option<File>,
}

impl SessionStore {
    /// Create an in-memory store
    pub fn in_memory(session: Option<Session>) -> Self {
        Self {
            cached: RwLock::new(session),
            file: None,
        }
    }

    /// Create a store mirrored to `file`, loading whatever it holds.
    /// An unreadable file is treated as logged out.
    pub async fn load(file: File) -> Self {
        let session = if file.exists().await {
            match file.read_json::<Session>().await {
                Ok(session) => Some(session),
                Err(e) => {
                    warn!("Ignoring unreadable session file {:?}: {}", file.path(), e);
                    None
                }
            }
        } else {
            None
        };

        Self {
            cached: RwLock::new(session),
            file: Some(file),
        }
    }

    /// Get the current session
    pub async fn get(&self) -> Option<Session> {
        self.cached.read().await.clone()
    }

    pub(crate) async fn set(&self, session: Session) {
        if let Some(file) = &self.file {
            let persisted = match file.write_json(&session).await {
                Ok(()) => file.set_permissions_600().await,
                Err(e) => Err(e),
            };
            if let Err(e) = persisted {
                warn!("Failed to persist session: {}", e);
            }
        }
        *self.cached.write().await = Some(session);
    }

    pub(crate) async fn clear(&self) {
        debug!("Clearing session");
        *self.cached.write().await = None;
        if let Some(file) = &self.file {
            if let Err(e) = file.delete().await {
                warn!("Failed to remove session file: {}", e);
            }
        }
    }
}
