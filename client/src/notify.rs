//! User-facing notifications
//!
//! The sync layer never renders anything itself; it hands [`Notification`]s to
//! a [`Notifier`] and the front end decides how to show them.

use std::fmt;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Something the user should be told about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// A deployment was accepted by the backend
    Created { id: Uuid, name: String },
    /// A tracked deployment reached READY (fires once per id)
    Ready {
        id: Uuid,
        name: Option<String>,
        url: Option<String>,
    },
    /// A soft delete was scheduled and can still be undone
    DeleteScheduled { id: Uuid, delay: Duration },
    /// A pending soft delete was undone
    DeleteCancelled { id: Uuid },
    Deleted { id: Uuid },
    DeleteFailed { id: Uuid, message: String },
    Scaled { id: Uuid, replicas: u32 },
    ScaleFailed { id: Uuid, message: String },
}

impl Notification {
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Notification::DeleteFailed { .. } | Notification::ScaleFailed { .. }
        )
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notification::Created { name, .. } => write!(f, "Deployment '{}' created", name),
            Notification::Ready { name, url, .. } => {
                write!(f, "Deployment ready")?;
                if let Some(name) = name {
                    write!(f, ": {}", name)?;
                }
                if let Some(url) = url {
                    write!(f, " ({})", url)?;
                }
                Ok(())
            }
            Notification::DeleteScheduled { delay, .. } => {
                write!(f, "Deleting in {}s…", delay.as_secs())
            }
            Notification::DeleteCancelled { .. } => write!(f, "Delete cancelled"),
            Notification::Deleted { .. } => write!(f, "Deployment deleted"),
            Notification::DeleteFailed { message, .. } => {
                write!(f, "Error deleting deployment: {}", message)
            }
            Notification::Scaled { replicas, .. } => write!(f, "Scaled to {} replicas", replicas),
            Notification::ScaleFailed { message, .. } => write!(f, "Scale failed: {}", message),
        }
    }
}

/// Sink for notifications
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Writes notifications to the log
#[derive(Debug, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notification: Notification) {
        if notification.is_failure() {
            warn!("{}", notification);
        } else {
            info!("{}", notification);
        }
    }
}

/// Forwards notifications to a channel, for front ends that render them
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<Notification>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, notification: Notification) {
        // A closed receiver means nobody is rendering anymore
        let _ = self.tx.send(notification);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ready_message_includes_url() {
        let n = Notification::Ready {
            id: Uuid::nil(),
            name: Some("Customer Web".to_string()),
            url: Some("https://acme-x1y2z.example.com".to_string()),
        };
        assert_eq!(
            n.to_string(),
            "Deployment ready: Customer Web (https://acme-x1y2z.example.com)"
        );
    }

    #[tokio::test]
    async fn test_channel_notifier_forwards() {
        let (notifier, mut rx) = ChannelNotifier::new();
        notifier.notify(Notification::Deleted { id: Uuid::nil() });
        assert_eq!(rx.recv().await, Some(Notification::Deleted { id: Uuid::nil() }));

        drop(rx);
        // must not panic once the receiver is gone
        notifier.notify(Notification::Deleted { id: Uuid::nil() });
    }
}
