//! Readiness tracking: push channel first, polling as fallback, one deadline

use futures::StreamExt;
use tokio::time::{sleep, timeout_at, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use openapi_client::models::DeploymentStatus;

use crate::errors::SyncError;
use crate::http::events::{ChannelEvent, StatusStream};
use crate::sync::engine::DeploymentSyncEngine;
use crate::sync::state::StatusSnapshot;

/// How a tracking attempt resolved
#[derive(Debug, Clone, PartialEq)]
pub enum TrackOutcome {
    /// The deployment reached READY
    Ready(StatusSnapshot),
    /// The deployment reached ERROR
    Failed(StatusSnapshot),
    /// The server closed the channel with an explicit end signal
    StreamEnded,
    /// The deadline elapsed first; the deployment may still converge
    Inconclusive,
    /// No valid session
    LoggedOut,
}

impl TrackOutcome {
    fn terminal(snapshot: StatusSnapshot) -> Self {
        if snapshot.status == DeploymentStatus::Ready {
            TrackOutcome::Ready(snapshot)
        } else {
            TrackOutcome::Failed(snapshot)
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, TrackOutcome::Ready(_))
    }
}

impl DeploymentSyncEngine {
    /// Follow a deployment until it settles, the server ends the channel, or
    /// the readiness deadline passes. Each observation is recorded and handed
    /// to `on_update`.
    ///
    /// The channel and poll loop live inside the tracking future, so they are
    /// released whichever way it resolves.
    pub async fn track_until_ready<F>(&self, id: Uuid, mut on_update: F) -> TrackOutcome
    where
        F: FnMut(&StatusSnapshot) + Send,
    {
        self.watch(id);
        let deadline = Instant::now() + self.options.readiness_deadline;

        let outcome = match timeout_at(deadline, self.reconcile(id, &mut on_update)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(
                    "Deployment {} not settled after {}s",
                    id,
                    self.options.readiness_deadline.as_secs()
                );
                TrackOutcome::Inconclusive
            }
        };
        debug!("Tracking of {} resolved: {:?}", id, outcome);

        if outcome != TrackOutcome::LoggedOut {
            if let Err(e) = self.refresh_all().await {
                warn!("Refresh after tracking {} failed: {}", id, e);
            }
        }
        outcome
    }

    async fn reconcile<F>(&self, id: Uuid, on_update: &mut F) -> TrackOutcome
    where
        F: FnMut(&StatusSnapshot) + Send,
    {
        let Some(session) = self.session.ensure_valid().await else {
            return TrackOutcome::LoggedOut;
        };

        match self.api.open_status_channel(&session.access_token, id).await {
            Ok(channel) => {
                if let Some(outcome) = self.follow_channel(id, channel, on_update).await {
                    return outcome;
                }
                info!("Status channel for {} dropped, polling instead", id);
            }
            Err(e) => info!("Status channel for {} unavailable, polling instead: {}", id, e),
        }

        self.poll_until_terminal(id, on_update).await
    }

    /// Consume channel events. `None` means the channel broke before anything
    /// conclusive arrived.
    async fn follow_channel<F>(
        &self,
        id: Uuid,
        mut channel: StatusStream,
        on_update: &mut F,
    ) -> Option<TrackOutcome>
    where
        F: FnMut(&StatusSnapshot) + Send,
    {
        while let Some(item) = channel.next().await {
            match item {
                Ok(ChannelEvent::Status(event)) => {
                    let snapshot = self.apply_event(id, &event);
                    on_update(&snapshot);
                    if snapshot.status.is_terminal() {
                        return Some(TrackOutcome::terminal(snapshot));
                    }
                }
                Ok(ChannelEvent::End) => return Some(TrackOutcome::StreamEnded),
                Err(e) => {
                    warn!("Status channel for {} failed: {}", id, e);
                    return None;
                }
            }
        }
        debug!("Status channel for {} closed without an end signal", id);
        None
    }

    async fn poll_until_terminal<F>(&self, id: Uuid, on_update: &mut F) -> TrackOutcome
    where
        F: FnMut(&StatusSnapshot) + Send,
    {
        loop {
            match self.fetch_status(id).await {
                Ok(snapshot) => {
                    on_update(&snapshot);
                    if snapshot.status.is_terminal() {
                        return TrackOutcome::terminal(snapshot);
                    }
                }
                Err(SyncError::AuthExpired) => return TrackOutcome::LoggedOut,
                Err(e) if e.is_transport() => debug!("Polling status of {} failed: {}", id, e),
                Err(e) => warn!("Polling status of {} failed: {}", id, e),
            }
            sleep(self.options.poll_interval).await;
        }
    }
}
