//! Session manager: gates every authenticated call

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use openapi_client::models::TokenPair;

use crate::authn::session::Session;
use crate::authn::store::SessionStore;
use crate::errors::SyncError;
use crate::http::api::ProvisioningApi;
use crate::utils::now_millis;

/// Safety buffer subtracted from the access token expiry
pub const SKEW_MARGIN: Duration = Duration::from_millis(30_000);

/// Session manager trait for testability
#[async_trait]
pub trait SessionManagerExt: Send + Sync {
    /// A session whose access token will outlive the call it authorizes, or
    /// `None` when logged out. Never fails: refresh problems clear the session.
    async fn ensure_valid(&self) -> Option<Session>;

    /// Install a session from a freshly issued token pair
    async fn establish(&self, pair: TokenPair) -> Result<Session, SyncError>;

    /// Drop the session (logout, account closure)
    async fn invalidate(&self);

    /// The stored session without any validity check
    async fn current(&self) -> Option<Session>;
}

/// Session manager implementation.
///
/// Refresh exchanges are single-flight: callers that find the token stale
/// queue on `refresh_gate`, and whoever arrives after an exchange completed
/// (observed through `generation`) takes that exchange's result instead of
/// starting another.
pub struct SessionManager {
    store: SessionStore,
    api: Arc<dyn ProvisioningApi>,
    skew_margin: Duration,
    refresh_gate: Mutex<()>,
    generation: AtomicU64,
}

impl SessionManager {
    /// Create a new session manager owning `store`
    pub fn new(store: SessionStore, api: Arc<dyn ProvisioningApi>) -> Self {
        Self {
            store,
            api,
            skew_margin: SKEW_MARGIN,
            refresh_gate: Mutex::new(()),
            generation: AtomicU64::new(0),
        }
    }

    /// Seconds until the access token expires, for display
    pub async fn seconds_remaining(&self) -> Option<i64> {
        self.store
            .get()
            .await
            .map(|session| session.seconds_remaining(now_millis()))
    }

    async fn refresh_exchange(&self, refresh_token: &str) -> Result<Session, SyncError> {
        let pair = self.api.refresh(refresh_token).await?;
        Session::from_token_pair(pair)
    }

    fn bump_generation(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }
}

#[async_trait]
impl SessionManagerExt for SessionManager {
    async fn ensure_valid(&self) -> Option<Session> {
        // Read before the session so a refresh finishing in between is noticed
        let observed = self.generation.load(Ordering::Acquire);

        let session = self.store.get().await?;
        if session.is_fresh(now_millis(), self.skew_margin) {
            return Some(session);
        }

        let _gate = self.refresh_gate.lock().await;
        if self.generation.load(Ordering::Acquire) != observed {
            debug!("Joining the result of a concurrent session refresh");
            return self.store.get().await;
        }

        let outcome = match self.store.get().await {
            None => None,
            Some(current) => match current.refresh_token.as_deref() {
                None => {
                    info!("Session expired and cannot be refreshed");
                    self.store.clear().await;
                    None
                }
                Some(refresh_token) => {
                    info!("Refreshing session...");
                    match self.refresh_exchange(refresh_token).await {
                        Ok(refreshed) => {
                            info!(
                                "Session refreshed successfully, expires at: {}",
                                refreshed.expires_at()
                            );
                            self.store.set(refreshed.clone()).await;
                            Some(refreshed)
                        }
                        Err(e) => {
                            warn!("Session refresh failed, logging out: {}", e);
                            self.store.clear().await;
                            None
                        }
                    }
                }
            },
        };

        self.bump_generation();
        outcome
    }

    async fn establish(&self, pair: TokenPair) -> Result<Session, SyncError> {
        let session = Session::from_token_pair(pair)?;

        let _gate = self.refresh_gate.lock().await;
        self.store.set(session.clone()).await;
        self.bump_generation();

        info!("Session established, expires at: {}", session.expires_at());
        Ok(session)
    }

    async fn invalidate(&self) {
        let _gate = self.refresh_gate.lock().await;
        self.store.clear().await;
        self.bump_generation();
        info!("Session cleared");
    }

    async fn current(&self) -> Option<Session> {
        self.store.get().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{access_token, token_pair, FakeApi};

    fn session_expiring_in(secs: i64) -> Session {
        let exp = chrono::Utc::now().timestamp() + secs;
        Session {
            access_token: access_token(exp),
            refresh_token: Some("refresh-0".to_string()),
            expires_at_millis: exp * 1000,
        }
    }

    fn manager(api: Arc<FakeApi>, session: Option<Session>) -> SessionManager {
        SessionManager::new(SessionStore::in_memory(session), api)
    }

    #[tokio::test]
    async fn test_no_session_is_logged_out() {
        let api = Arc::new(FakeApi::new());
        let mngr = manager(api.clone(), None);

        assert!(mngr.ensure_valid().await.is_none());
        assert_eq!(api.refresh_calls(), 0);
    }

    #[tokio::test]
    async fn test_fresh_session_is_returned_unchanged() {
        let api = Arc::new(FakeApi::new());
        let session = session_expiring_in(600);
        let mngr = manager(api.clone(), Some(session.clone()));

        assert_eq!(mngr.ensure_valid().await, Some(session));
        assert_eq!(api.refresh_calls(), 0);
    }

    #[tokio::test]
    async fn test_session_inside_skew_margin_is_refreshed() {
        let api = Arc::new(FakeApi::new());
        api.set_refresh_pair(token_pair(900));
        let mngr = manager(api.clone(), Some(session_expiring_in(20)));

        let refreshed = mngr.ensure_valid().await.unwrap();
        assert_eq!(api.refresh_calls(), 1);
        assert!(refreshed.is_fresh(now_millis(), SKEW_MARGIN));
        assert_eq!(mngr.current().await, Some(refreshed));
    }

    #[tokio::test]
    async fn test_missing_refresh_token_clears_session() {
        let api = Arc::new(FakeApi::new());
        let mut session = session_expiring_in(-5);
        session.refresh_token = None;
        let mngr = manager(api.clone(), Some(session));

        assert!(mngr.ensure_valid().await.is_none());
        assert!(mngr.current().await.is_none());
        assert_eq!(api.refresh_calls(), 0);
    }

    #[tokio::test]
    async fn test_refresh_failure_clears_whole_session() {
        let api = Arc::new(FakeApi::new());
        api.fail_refresh("Invalid refresh token");
        let mngr = manager(api.clone(), Some(session_expiring_in(-5)));

        assert!(mngr.ensure_valid().await.is_none());
        assert!(mngr.current().await.is_none());
        assert_eq!(api.refresh_calls(), 1);
    }

    #[tokio::test]
    async fn test_malformed_refreshed_token_clears_session() {
        let api = Arc::new(FakeApi::new());
        api.set_refresh_pair(TokenPair {
            access_token: "garbage".to_string(),
            refresh_token: "r".to_string(),
            token_type: "bearer".to_string(),
        });
        let mngr = manager(api.clone(), Some(session_expiring_in(-5)));

        assert!(mngr.ensure_valid().await.is_none());
        assert!(mngr.current().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_one_refresh() {
        let api = Arc::new(FakeApi::new());
        api.set_refresh_pair(token_pair(900));
        api.set_refresh_delay(Duration::from_millis(250));
        let mngr = manager(api.clone(), Some(session_expiring_in(10)));

        let (a, b, c, d) = tokio::join!(
            mngr.ensure_valid(),
            mngr.ensure_valid(),
            mngr.ensure_valid(),
            mngr.ensure_valid()
        );

        assert_eq!(api.refresh_calls(), 1);
        let a = a.unwrap();
        assert_eq!(Some(a.clone()), b);
        assert_eq!(Some(a.clone()), c);
        assert_eq!(Some(a), d);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_a_failed_refresh() {
        let api = Arc::new(FakeApi::new());
        api.fail_refresh("Invalid refresh token");
        api.set_refresh_delay(Duration::from_millis(250));
        let mngr = manager(api.clone(), Some(session_expiring_in(10)));

        let (a, b, c) = tokio::join!(mngr.ensure_valid(), mngr.ensure_valid(), mngr.ensure_valid());

        assert_eq!(api.refresh_calls(), 1);
        assert!(a.is_none() && b.is_none() && c.is_none());
    }

    #[tokio::test]
    async fn test_establish_and_invalidate() {
        let api = Arc::new(FakeApi::new());
        let mngr = manager(api.clone(), None);

        let session = mngr.establish(token_pair(600)).await.unwrap();
        assert_eq!(mngr.ensure_valid().await, Some(session));
        assert!(mngr.seconds_remaining().await.unwrap() > 500);

        mngr.invalidate().await;
        assert!(mngr.ensure_valid().await.is_none());
        assert!(mngr.seconds_remaining().await.is_none());
    }
}
