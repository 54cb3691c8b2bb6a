//! Canonical client-side view of the tenant's deployments

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use openapi_client::models::{
    Deployment, DeploymentReport, DeploymentStatus, DeploymentStatusOut, ServerType, StatusEvent,
};

/// Latest known status of one deployment. Most recent observation wins.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusSnapshot {
    pub status: DeploymentStatus,
    pub replicas: Option<u32>,
    pub ready_replicas: Option<u32>,
    pub available_replicas: Option<u32>,
    pub updated_replicas: Option<u32>,
    pub endpoints: Option<u32>,
    pub last_error: Option<String>,
    /// Pod log lines carried by the observation, `pod:container | line`
    pub logs: Vec<String>,
    pub observed_at: DateTime<Utc>,
}

impl StatusSnapshot {
    /// Snapshot carrying only a status
    pub fn bare(status: DeploymentStatus) -> Self {
        Self {
            status,
            replicas: None,
            ready_replicas: None,
            available_replicas: None,
            updated_replicas: None,
            endpoints: None,
            last_error: None,
            logs: Vec::new(),
            observed_at: Utc::now(),
        }
    }

    /// Merge a push event over the previous snapshot; report fields the event
    /// leaves out keep their previous value.
    pub fn merged(previous: Option<&StatusSnapshot>, event: &StatusEvent) -> Self {
        let mut next = previous
            .cloned()
            .unwrap_or_else(|| StatusSnapshot::bare(event.status));
        next.status = event.status;
        next.apply_report(&event.report);
        next.logs = event.log_lines();
        next.observed_at = event.ts.unwrap_or_else(Utc::now);
        next
    }

    fn apply_report(&mut self, report: &DeploymentReport) {
        self.replicas = report.replicas.or(self.replicas);
        self.ready_replicas = report.ready_replicas.or(self.ready_replicas);
        self.available_replicas = report.available_replicas.or(self.available_replicas);
        self.updated_replicas = report.updated_replicas.or(self.updated_replicas);
        self.endpoints = report.endpoints.or(self.endpoints);
    }
}

impl From<DeploymentStatusOut> for StatusSnapshot {
    fn from(out: DeploymentStatusOut) -> Self {
        Self {
            status: out.status,
            replicas: out.replicas,
            ready_replicas: out.ready_replicas,
            available_replicas: out.available_replicas,
            updated_replicas: out.updated_replicas,
            endpoints: out.endpoints,
            last_error: out.last_error,
            logs: Vec::new(),
            observed_at: Utc::now(),
        }
    }
}

impl From<&Deployment> for StatusSnapshot {
    fn from(d: &Deployment) -> Self {
        Self {
            status: d.status,
            replicas: d.replicas,
            ready_replicas: d.ready_replicas,
            available_replicas: d.available_replicas,
            updated_replicas: d.updated_replicas,
            endpoints: d.endpoints,
            last_error: d.last_error.clone(),
            logs: Vec::new(),
            observed_at: Utc::now(),
        }
    }
}

/// Status shown to the user: a pending soft delete overrides whatever the
/// server last reported.
pub fn display_status(
    server: Option<DeploymentStatus>,
    pending_delete: bool,
) -> DeploymentStatus {
    if pending_delete {
        return DeploymentStatus::Deleting;
    }
    server.unwrap_or(DeploymentStatus::Unknown)
}

/// Follows the pod log tails of one deployment. Every event repeats the
/// recent tail, so only lines missing from the previous batch are new.
#[derive(Debug, Default)]
pub struct LogTail {
    previous: HashSet<String>,
}

impl LogTail {
    /// Lines of `batch` not seen in the previous batch, in order
    pub fn fresh(&mut self, batch: &[String]) -> Vec<String> {
        if batch.is_empty() {
            return Vec::new();
        }
        let fresh = batch
            .iter()
            .filter(|line| !self.previous.contains(*line))
            .cloned()
            .collect();
        self.previous = batch.iter().cloned().collect();
        fresh
    }
}

/// One rendered line of the deployment list
#[derive(Debug, Clone, PartialEq)]
pub struct DeploymentRow {
    pub id: Uuid,
    pub display_name: String,
    pub server_type: ServerType,
    pub status: DeploymentStatus,
    pub ready_replicas: u32,
    pub replicas: u32,
    pub endpoints: u32,
    pub url: Option<String>,
    pub last_error: Option<String>,
}

/// Known deployments, snapshots and notification bookkeeping
#[derive(Debug, Default)]
pub struct SyncState {
    /// Known set, in server order (newest first)
    pub deployments: Vec<Deployment>,
    pub snapshots: HashMap<Uuid, StatusSnapshot>,
    /// Ids whose READY notification already fired
    pub notified: HashSet<Uuid>,
    /// Ids being tracked since creation; only these notify
    pub watched: HashSet<Uuid>,
    /// Bumped on every write to the known set
    generation: u64,
    /// Generation of the last write of each known record
    stamps: HashMap<Uuid, u64>,
    /// Generation at which each id was forgotten
    forgotten: HashMap<Uuid, u64>,
}

impl SyncState {
    pub fn deployment(&self, id: Uuid) -> Option<&Deployment> {
        self.deployments.iter().find(|d| d.id == id)
    }

    /// Current write generation; pass it to [`SyncState::apply_listing`]
    /// for a listing requested now
    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn stamp(&mut self, id: Uuid) {
        self.generation += 1;
        self.stamps.insert(id, self.generation);
    }

    fn written_since(&self, id: Uuid, generation: u64) -> bool {
        self.stamps.get(&id).is_some_and(|stamp| *stamp > generation)
    }

    fn forgotten_since(&self, id: Uuid, generation: u64) -> bool {
        self.forgotten.get(&id).is_some_and(|at| *at > generation)
    }

    /// Insert or replace a deployment record, keeping newest first. Forgotten
    /// ids are not brought back.
    pub fn upsert(&mut self, deployment: Deployment) {
        if self.forgotten.contains_key(&deployment.id) {
            return;
        }
        self.stamp(deployment.id);
        match self.deployments.iter_mut().find(|d| d.id == deployment.id) {
            Some(existing) => *existing = deployment,
            None => self.deployments.insert(0, deployment),
        }
    }

    /// Fold in a full listing that was requested at generation
    /// `requested_at`. Ids missing from it are forgotten only when their
    /// record predates the request; records written after the request went
    /// out win over the listed copy. Returns the forgotten ids.
    pub fn apply_listing(&mut self, listed: Vec<Deployment>, requested_at: u64) -> Vec<Uuid> {
        let listed_ids: HashSet<Uuid> = listed.iter().map(|d| d.id).collect();
        let gone: Vec<Uuid> = self
            .deployments
            .iter()
            .map(|d| d.id)
            .filter(|id| !listed_ids.contains(id) && !self.written_since(*id, requested_at))
            .collect();
        for id in &gone {
            self.forget(*id);
        }

        let mut merged: Vec<Deployment> = self
            .deployments
            .iter()
            .filter(|d| !listed_ids.contains(&d.id))
            .cloned()
            .collect();
        for deployment in listed {
            if self.forgotten_since(deployment.id, requested_at) {
                continue;
            }
            if self.written_since(deployment.id, requested_at) {
                if let Some(current) = self.deployment(deployment.id) {
                    merged.push(current.clone());
                    continue;
                }
            }
            self.stamp(deployment.id);
            merged.push(deployment);
        }
        self.deployments = merged;
        gone
    }

    /// Drop every trace of an id
    pub fn forget(&mut self, id: Uuid) {
        self.deployments.retain(|d| d.id != id);
        self.snapshots.remove(&id);
        self.notified.remove(&id);
        self.watched.remove(&id);
        self.stamps.remove(&id);
        self.generation += 1;
        self.forgotten.insert(id, self.generation);
    }

    /// Known or watched
    pub fn is_tracked(&self, id: Uuid) -> bool {
        self.stamps.contains_key(&id) || self.watched.contains(&id)
    }

    /// Record an observation. Returns true when this is the first READY seen
    /// for the id; that id is then marked notified. Observations of ids that
    /// are neither known nor watched are dropped.
    pub fn observe(&mut self, id: Uuid, snapshot: StatusSnapshot) -> bool {
        if !self.is_tracked(id) {
            return false;
        }
        let first_ready = snapshot.status == DeploymentStatus::Ready && self.notified.insert(id);
        self.snapshots.insert(id, snapshot);
        first_ready
    }

    /// Replica count last reported by the server
    pub fn server_replicas(&self, id: Uuid) -> Option<u32> {
        self.snapshots
            .get(&id)
            .and_then(|s| s.replicas)
            .or_else(|| self.deployment(id).and_then(|d| d.replicas))
    }

    pub fn rows(&self, deleting: &HashSet<Uuid>) -> Vec<DeploymentRow> {
        self.deployments
            .iter()
            .map(|d| {
                let snapshot = self.snapshots.get(&d.id);
                let server_status = snapshot.map(|s| s.status).or(Some(d.status));
                DeploymentRow {
                    id: d.id,
                    display_name: d.display_name.clone(),
                    server_type: d.server_type.unwrap_or_default(),
                    status: display_status(server_status, deleting.contains(&d.id)),
                    ready_replicas: snapshot
                        .and_then(|s| s.ready_replicas)
                        .or(d.ready_replicas)
                        .unwrap_or(0),
                    replicas: snapshot.and_then(|s| s.replicas).or(d.replicas).unwrap_or(0),
                    endpoints: snapshot.and_then(|s| s.endpoints).or(d.endpoints).unwrap_or(0),
                    url: d.url(),
                    last_error: snapshot
                        .and_then(|s| s.last_error.clone())
                        .or_else(|| d.last_error.clone()),
                }
            })
            .collect()
    }
}
