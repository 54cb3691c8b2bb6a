//! Periodic deployment list refresh

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::sync::engine::DeploymentSyncEngine;

/// Refresher worker options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    /// Refresh interval
    pub interval: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
        }
    }
}

/// Run the refresher worker. Refreshes once right away, then every interval
/// whether or not anything is being tracked.
pub async fn run<S, F>(
    options: &Options,
    engine: &DeploymentSyncEngine,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Refresher worker starting...");

    loop {
        match engine.refresh_all().await {
            Ok(Some(deployments)) => debug!("Refreshed {} deployments", deployments.len()),
            Ok(None) => debug!("Not logged in, nothing to refresh"),
            Err(e) if e.is_transport() => {
                debug!("Deployment refresh failed, retrying next cycle: {}", e)
            }
            Err(e) => warn!("Deployment refresh failed: {}", e),
        }

        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Refresher worker shutting down...");
                return;
            }
            _ = sleep_fn(options.interval) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::app::options::SyncOptions;
    use crate::testing::{fake_deployment, logged_in, FakeApi, RecordingNotifier};
    use openapi_client::models::DeploymentStatus;

    #[tokio::test(start_paused = true)]
    async fn test_refreshes_on_interval_until_shutdown() {
        let api = Arc::new(FakeApi::new());
        api.add_deployment(fake_deployment("Customer Web", DeploymentStatus::Ready));
        let engine = DeploymentSyncEngine::new(
            api.clone(),
            logged_in(api.clone()),
            Arc::new(RecordingNotifier::default()),
            SyncOptions::default(),
        );

        run(
            &Options::default(),
            &engine,
            tokio::time::sleep,
            Box::pin(tokio::time::sleep(Duration::from_millis(12_500))),
        )
        .await;

        // t = 0, 5 and 10 seconds
        assert_eq!(api.list_calls(), 3);
        assert_eq!(engine.deployments().len(), 1);
    }
}
