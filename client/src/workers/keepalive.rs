//! Session keepalive worker

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tracing::{debug, info};

use crate::authn::session_mngr::SessionManagerExt;
use crate::utils::now_millis;

/// Keepalive worker options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    /// Check interval
    pub interval: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15),
        }
    }
}

/// Run the keepalive worker.
///
/// Validates the session on every tick so a token entering the skew margin is
/// refreshed before a user action needs it.
pub async fn run<T, S, F>(
    options: &Options,
    session_mngr: &T,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    T: SessionManagerExt + ?Sized,
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Keepalive worker starting...");

    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Keepalive worker shutting down...");
                return;
            }
            _ = sleep_fn(options.interval) => {}
        }

        match session_mngr.ensure_valid().await {
            Some(session) => debug!(
                "Session valid, expires in {}s",
                session.seconds_remaining(now_millis())
            ),
            None => debug!("No session"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::authn::session::Session;
    use crate::authn::session_mngr::SessionManager;
    use crate::authn::store::SessionStore;
    use crate::testing::{token_pair, FakeApi};

    #[tokio::test(start_paused = true)]
    async fn test_refreshes_token_inside_skew_margin() {
        let api = Arc::new(FakeApi::new());
        api.set_refresh_pair(token_pair(900));
        let expiring = Session::from_token_pair(token_pair(20)).unwrap();
        let mngr = SessionManager::new(SessionStore::in_memory(Some(expiring.clone())), api.clone());

        run(
            &Options::default(),
            &mngr,
            tokio::time::sleep,
            Box::pin(tokio::time::sleep(Duration::from_secs(20))),
        )
        .await;

        assert_eq!(api.refresh_calls(), 1);
        assert_ne!(mngr.current().await, Some(expiring));
    }
}
