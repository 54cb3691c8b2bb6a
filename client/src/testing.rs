//! In-memory doubles for the provisioning backend and the notification sink.
//!
//! Used by unit tests and the integration suite; nothing here talks to the
//! network.

use std::collections::{HashMap, VecDeque};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, Stream, StreamExt};
use http::StatusCode;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::json;
use uuid::Uuid;

use openapi_client::models::{
    ClusterHealth, Deployment, DeploymentCreate, DeploymentDetails, DeploymentReport,
    DeploymentStatus, DeploymentStatusOut, LoginRequest, MeResponse, OkResponse, RegisterRequest, ServerType,
    StatusEvent, Theme, TokenPair, UserSettings,
};

use crate::authn::session::Session;
use crate::authn::session_mngr::SessionManager;
use crate::authn::store::SessionStore;
use crate::errors::SyncError;
use crate::http::api::ProvisioningApi;
use crate::http::events::{ChannelEvent, StatusStream};
use crate::notify::{Notification, Notifier};

/// Mint an HS256 access token expiring at `exp` (Unix seconds)
pub fn access_token(exp: i64) -> String {
    let claims = json!({"sub": "owner@example.com", "exp": exp, "type": "access"});
    encode(&Header::default(), &claims, &EncodingKey::from_secret(b"test"))
        .expect("encoding test token")
}

/// A token pair whose access token expires `secs` from now
pub fn token_pair(secs: i64) -> TokenPair {
    let exp = chrono::Utc::now().timestamp() + secs;
    TokenPair {
        access_token: access_token(exp),
        refresh_token: format!("refresh-{}", exp),
        token_type: "bearer".to_string(),
    }
}

/// Session manager holding a session valid for an hour
pub fn logged_in(api: Arc<FakeApi>) -> Arc<SessionManager> {
    let session = Session::from_token_pair(token_pair(3600)).expect("valid test session");
    Arc::new(SessionManager::new(SessionStore::in_memory(Some(session)), api))
}

/// Session manager without a session
pub fn logged_out(api: Arc<FakeApi>) -> Arc<SessionManager> {
    Arc::new(SessionManager::new(SessionStore::in_memory(None), api))
}

pub fn fake_deployment(name: &str, status: DeploymentStatus) -> Deployment {
    let id = Uuid::new_v4();
    let slug = name.to_lowercase().replace(' ', "-");
    let unique_id = id.simple().to_string()[..6].to_string();
    Deployment {
        id,
        display_name: name.to_string(),
        slug: slug.clone(),
        namespace: "tenant-acme".to_string(),
        unique_id: unique_id.clone(),
        ingress_host: format!("{}-{}.apps.example.com", slug, unique_id),
        status,
        last_error: None,
        server_type: Some(ServerType::Nginx),
        replicas: Some(1),
        ready_replicas: None,
        available_replicas: None,
        updated_replicas: None,
        endpoints: None,
    }
}

pub fn status_out(
    id: Uuid,
    status: DeploymentStatus,
    ready: u32,
    replicas: u32,
    endpoints: u32,
) -> DeploymentStatusOut {
    DeploymentStatusOut {
        id,
        status,
        last_error: (status == DeploymentStatus::Error).then(|| "ImagePullBackOff".to_string()),
        replicas: Some(replicas),
        ready_replicas: Some(ready),
        available_replicas: Some(ready),
        updated_replicas: Some(replicas),
        endpoints: Some(endpoints),
        pods: None,
    }
}

pub fn status_event(status: DeploymentStatus, ready: u32) -> StatusEvent {
    StatusEvent {
        id: None,
        status,
        report: DeploymentReport {
            ready_replicas: Some(ready),
            ..Default::default()
        },
        logs: Default::default(),
        ts: None,
    }
}

/// Attach a container log tail to an event
pub fn with_log(mut event: StatusEvent, pod: &str, container: &str, text: &str) -> StatusEvent {
    event
        .logs
        .entry(pod.to_string())
        .or_default()
        .insert(container.to_string(), text.to_string());
    event
}

/// What the channel does after its scripted events
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelTail {
    /// Stay open without sending anything
    Hang,
    /// Close without an end signal
    Close,
    /// Send the end signal
    End,
    /// Fail with a transport error
    Break(String),
}

/// Scripted behaviour of the live status channel for one deployment
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelScript {
    /// Opening the channel fails
    Unavailable(String),
    Events {
        events: Vec<StatusEvent>,
        pace: Duration,
        tail: ChannelTail,
    },
}

impl ChannelScript {
    pub fn hang_after(events: Vec<StatusEvent>) -> Self {
        Self::with_tail(events, ChannelTail::Hang)
    }

    pub fn end_after(events: Vec<StatusEvent>) -> Self {
        Self::with_tail(events, ChannelTail::End)
    }

    pub fn close_after(events: Vec<StatusEvent>) -> Self {
        Self::with_tail(events, ChannelTail::Close)
    }

    pub fn break_after(events: Vec<StatusEvent>, reason: &str) -> Self {
        Self::with_tail(events, ChannelTail::Break(reason.to_string()))
    }

    fn with_tail(events: Vec<StatusEvent>, tail: ChannelTail) -> Self {
        ChannelScript::Events {
            events,
            pace: Duration::ZERO,
            tail,
        }
    }

    /// Space events `pace` apart, the way the server emits them
    pub fn paced(self, pace: Duration) -> Self {
        match self {
            ChannelScript::Events { events, tail, .. } => ChannelScript::Events { events, pace, tail },
            other => other,
        }
    }
}

/// Channel stream that keeps the open-channel count honest
struct TrackedChannel {
    inner: StatusStream,
    open: Arc<AtomicUsize>,
}

impl Stream for TrackedChannel {
    type Item = Result<ChannelEvent, SyncError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl Drop for TrackedChannel {
    fn drop(&mut self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct FakeState {
    deployments: Vec<Deployment>,
    status_scripts: HashMap<Uuid, VecDeque<Result<DeploymentStatusOut, String>>>,
    channel_scripts: HashMap<Uuid, ChannelScript>,
    details: HashMap<Uuid, DeploymentDetails>,
    settings: UserSettings,
    login_pair: Option<TokenPair>,
    refresh_pair: Option<TokenPair>,
    refresh_failure: Option<String>,
    create_rejection: Option<String>,
    delete_failure: Option<String>,
    scale_failure: Option<String>,
    create_requests: Vec<DeploymentCreate>,
    status_calls: HashMap<Uuid, usize>,
    delete_calls: Vec<Uuid>,
    scale_calls: Vec<(Uuid, u32)>,
    refresh_calls: usize,
    list_calls: usize,
    channel_opens: usize,
    account_deletions: usize,
}

/// In-memory provisioning backend with call counters and scripted replies
#[derive(Default)]
pub struct FakeApi {
    state: Mutex<FakeState>,
    open_channels: Arc<AtomicUsize>,
    refresh_delay: Mutex<Duration>,
    action_delay: Mutex<Duration>,
    list_delay: Mutex<Duration>,
}

fn rejection(status: StatusCode, message: &str) -> SyncError {
    SyncError::RemoteRejection {
        status,
        message: message.to_string(),
    }
}

impl FakeApi {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn delay(&self, delay: &Mutex<Duration>) {
        let delay = *delay.lock().unwrap_or_else(|e| e.into_inner());
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    pub fn add_deployment(&self, deployment: Deployment) {
        self.state().deployments.insert(0, deployment);
    }

    /// Stop listing a deployment, as if deleted elsewhere
    pub fn remove_deployment(&self, id: Uuid) {
        self.state().deployments.retain(|d| d.id != id);
    }

    pub fn has_deployment(&self, id: Uuid) -> bool {
        self.state().deployments.iter().any(|d| d.id == id)
    }

    /// Replies for successive status polls; the last one repeats. `Err`
    /// entries answer with a 503 carrying the message.
    pub fn script_status(&self, id: Uuid, replies: Vec<Result<DeploymentStatusOut, String>>) {
        self.state().status_scripts.insert(id, replies.into());
    }

    pub fn script_channel(&self, id: Uuid, script: ChannelScript) {
        self.state().channel_scripts.insert(id, script);
    }

    pub fn set_details(&self, id: Uuid, details: DeploymentDetails) {
        self.state().details.insert(id, details);
    }

    pub fn set_login_pair(&self, pair: TokenPair) {
        self.state().login_pair = Some(pair);
    }

    pub fn set_refresh_pair(&self, pair: TokenPair) {
        let mut state = self.state();
        state.refresh_pair = Some(pair);
        state.refresh_failure = None;
    }

    pub fn fail_refresh(&self, message: &str) {
        self.state().refresh_failure = Some(message.to_string());
    }

    pub fn set_refresh_delay(&self, delay: Duration) {
        *self.refresh_delay.lock().unwrap_or_else(|e| e.into_inner()) = delay;
    }

    /// Latency of delete and scale calls
    pub fn set_action_delay(&self, delay: Duration) {
        *self.action_delay.lock().unwrap_or_else(|e| e.into_inner()) = delay;
    }

    /// Latency of list calls. The reply is the list as it stood when the
    /// request arrived.
    pub fn set_list_delay(&self, delay: Duration) {
        *self.list_delay.lock().unwrap_or_else(|e| e.into_inner()) = delay;
    }

    pub fn reject_create(&self, message: &str) {
        self.state().create_rejection = Some(message.to_string());
    }

    pub fn fail_delete(&self, message: &str) {
        self.state().delete_failure = Some(message.to_string());
    }

    pub fn fail_scale(&self, message: &str) {
        self.state().scale_failure = Some(message.to_string());
    }

    pub fn refresh_calls(&self) -> usize {
        self.state().refresh_calls
    }

    pub fn list_calls(&self) -> usize {
        self.state().list_calls
    }

    pub fn status_calls(&self, id: Uuid) -> usize {
        self.state().status_calls.get(&id).copied().unwrap_or(0)
    }

    pub fn create_calls(&self) -> usize {
        self.state().create_requests.len()
    }

    pub fn last_create_request(&self) -> Option<DeploymentCreate> {
        self.state().create_requests.last().cloned()
    }

    pub fn delete_calls(&self) -> usize {
        self.state().delete_calls.len()
    }

    pub fn scale_calls(&self) -> Vec<(Uuid, u32)> {
        self.state().scale_calls.clone()
    }

    pub fn channel_opens(&self) -> usize {
        self.state().channel_opens
    }

    /// Channels handed out and not yet dropped
    pub fn open_channels(&self) -> usize {
        self.open_channels.load(Ordering::SeqCst)
    }

    pub fn account_deletions(&self) -> usize {
        self.state().account_deletions
    }

    fn open_channel(&self, script: ChannelScript) -> Result<StatusStream, SyncError> {
        let (events, pace, tail) = match script {
            ChannelScript::Unavailable(message) => {
                return Err(SyncError::ChannelError(message));
            }
            ChannelScript::Events { events, pace, tail } => (events, pace, tail),
        };

        let events = stream::iter(events).then(move |event| async move {
            if !pace.is_zero() {
                tokio::time::sleep(pace).await;
            }
            Ok::<_, SyncError>(ChannelEvent::Status(event))
        });
        let tail: StatusStream = match tail {
            ChannelTail::Hang => stream::pending().boxed(),
            ChannelTail::Close => stream::empty().boxed(),
            ChannelTail::End => stream::iter(vec![Ok(ChannelEvent::End)]).boxed(),
            ChannelTail::Break(reason) => {
                stream::iter(vec![Err(SyncError::ChannelError(reason))]).boxed()
            }
        };

        self.open_channels.fetch_add(1, Ordering::SeqCst);
        Ok(TrackedChannel {
            inner: events.chain(tail).boxed(),
            open: self.open_channels.clone(),
        }
        .boxed())
    }
}

#[async_trait]
impl ProvisioningApi for FakeApi {
    async fn register(&self, _request: &RegisterRequest) -> Result<TokenPair, SyncError> {
        Ok(self.state().login_pair.clone().unwrap_or_else(|| token_pair(900)))
    }

    async fn login(&self, _request: &LoginRequest) -> Result<TokenPair, SyncError> {
        self.state()
            .login_pair
            .clone()
            .ok_or_else(|| rejection(StatusCode::UNAUTHORIZED, "Invalid credentials"))
    }

    async fn refresh(&self, _refresh_token: &str) -> Result<TokenPair, SyncError> {
        self.state().refresh_calls += 1;
        self.delay(&self.refresh_delay).await;

        let state = self.state();
        if let Some(message) = &state.refresh_failure {
            return Err(rejection(StatusCode::UNAUTHORIZED, message));
        }
        state
            .refresh_pair
            .clone()
            .ok_or_else(|| rejection(StatusCode::UNAUTHORIZED, "Invalid refresh token"))
    }

    async fn me(&self, _token: &str) -> Result<MeResponse, SyncError> {
        Ok(MeResponse {
            id: 1,
            email: "owner@example.com".to_string(),
            user_slug: "acme".to_string(),
        })
    }

    async fn list_deployments(&self, _token: &str) -> Result<Vec<Deployment>, SyncError> {
        let listed = {
            let mut state = self.state();
            state.list_calls += 1;
            state.deployments.clone()
        };
        self.delay(&self.list_delay).await;
        Ok(listed)
    }

    async fn create_deployment(
        &self,
        _token: &str,
        request: &DeploymentCreate,
    ) -> Result<Deployment, SyncError> {
        let mut state = self.state();
        if let Some(message) = &state.create_rejection {
            return Err(rejection(StatusCode::BAD_REQUEST, message));
        }
        state.create_requests.push(request.clone());

        let mut deployment = fake_deployment(&request.display_name, DeploymentStatus::Creating);
        deployment.server_type = Some(request.server_type);
        deployment.replicas = Some(request.replicas.unwrap_or(1));
        state.deployments.insert(0, deployment.clone());
        Ok(deployment)
    }

    async fn get_deployment(&self, _token: &str, id: Uuid) -> Result<Deployment, SyncError> {
        self.state()
            .deployments
            .iter()
            .find(|d| d.id == id)
            .cloned()
            .ok_or_else(|| rejection(StatusCode::NOT_FOUND, "Deployment not found"))
    }

    async fn get_status(&self, _token: &str, id: Uuid) -> Result<DeploymentStatusOut, SyncError> {
        let mut state = self.state();
        *state.status_calls.entry(id).or_default() += 1;

        if let Some(script) = state.status_scripts.get_mut(&id) {
            let reply = if script.len() > 1 {
                script.pop_front()
            } else {
                script.front().cloned()
            };
            if let Some(reply) = reply {
                return reply.map_err(|message| rejection(StatusCode::SERVICE_UNAVAILABLE, &message));
            }
        }

        let deployment = state
            .deployments
            .iter()
            .find(|d| d.id == id)
            .ok_or_else(|| rejection(StatusCode::NOT_FOUND, "Deployment not found"))?;
        Ok(DeploymentStatusOut {
            id,
            status: deployment.status,
            last_error: deployment.last_error.clone(),
            replicas: deployment.replicas,
            ready_replicas: deployment.ready_replicas,
            available_replicas: deployment.available_replicas,
            updated_replicas: deployment.updated_replicas,
            endpoints: deployment.endpoints,
            pods: None,
        })
    }

    async fn get_details(&self, _token: &str, id: Uuid) -> Result<DeploymentDetails, SyncError> {
        let state = self.state();
        if let Some(details) = state.details.get(&id) {
            return Ok(details.clone());
        }
        let deployment = state
            .deployments
            .iter()
            .find(|d| d.id == id)
            .ok_or_else(|| rejection(StatusCode::NOT_FOUND, "Not found"))?;
        Ok(DeploymentDetails {
            report: DeploymentReport {
                replicas: deployment.replicas,
                ready_replicas: deployment.ready_replicas,
                available_replicas: deployment.available_replicas,
                updated_replicas: deployment.updated_replicas,
                endpoints: deployment.endpoints,
                pods: Vec::new(),
            },
            ..Default::default()
        })
    }

    async fn open_status_channel(&self, _token: &str, id: Uuid) -> Result<StatusStream, SyncError> {
        let script = {
            let mut state = self.state();
            state.channel_opens += 1;
            state
                .channel_scripts
                .get(&id)
                .cloned()
                .unwrap_or_else(|| ChannelScript::Unavailable("404 Not Found".to_string()))
        };
        self.open_channel(script)
    }

    async fn scale(&self, _token: &str, id: Uuid, replicas: u32) -> Result<Deployment, SyncError> {
        self.state().scale_calls.push((id, replicas));
        self.delay(&self.action_delay).await;

        let mut state = self.state();
        if let Some(message) = state.scale_failure.clone() {
            return Err(rejection(StatusCode::BAD_REQUEST, &message));
        }
        let deployment = state
            .deployments
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or_else(|| rejection(StatusCode::NOT_FOUND, "Deployment not found"))?;
        deployment.replicas = Some(replicas);
        Ok(deployment.clone())
    }

    async fn delete_deployment(&self, _token: &str, id: Uuid) -> Result<(), SyncError> {
        self.state().delete_calls.push(id);
        self.delay(&self.action_delay).await;

        let mut state = self.state();
        if let Some(message) = state.delete_failure.clone() {
            return Err(rejection(StatusCode::INTERNAL_SERVER_ERROR, &message));
        }
        state.deployments.retain(|d| d.id != id);
        Ok(())
    }

    async fn delete_account(&self, _token: &str) -> Result<OkResponse, SyncError> {
        let mut state = self.state();
        state.account_deletions += 1;
        state.deployments.clear();
        Ok(OkResponse {
            ok: true,
            warnings: Vec::new(),
        })
    }

    async fn get_settings(&self, _token: &str) -> Result<UserSettings, SyncError> {
        Ok(self.state().settings.clone())
    }

    async fn update_settings(&self, _token: &str, theme: Theme) -> Result<(), SyncError> {
        self.state().settings.theme = Some(theme);
        Ok(())
    }

    async fn cluster_health(&self) -> Result<ClusterHealth, SyncError> {
        Ok(ClusterHealth {
            k8s: true,
            ingress: true,
            error: None,
        })
    }
}

/// Notifier that remembers everything it was given
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    seen: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn all(&self) -> Vec<Notification> {
        self.seen.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// READY notifications delivered for `id`
    pub fn ready_count(&self, id: Uuid) -> usize {
        self.all()
            .iter()
            .filter(|n| matches!(n, Notification::Ready { id: ready, .. } if *ready == id))
            .count()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: Notification) {
        self.seen
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(notification);
    }
}
