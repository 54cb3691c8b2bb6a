//! Readiness tracking tests

use std::sync::Arc;
use std::time::Duration;

use openapi_client::models::{DeploymentCreate, DeploymentStatus, ServerType};
use tenant_sync::app::options::SyncOptions;
use tenant_sync::notify::Notification;
use tenant_sync::sync::engine::DeploymentSyncEngine;
use tenant_sync::sync::state::LogTail;
use tenant_sync::sync::tracker::TrackOutcome;
use tenant_sync::testing::{
    fake_deployment, logged_in, status_event, status_out, with_log, ChannelScript, FakeApi,
    RecordingNotifier,
};
use tokio::time::Instant;

fn setup() -> (Arc<FakeApi>, Arc<RecordingNotifier>, DeploymentSyncEngine) {
    let api = Arc::new(FakeApi::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let engine = DeploymentSyncEngine::new(
        api.clone(),
        logged_in(api.clone()),
        notifier.clone(),
        SyncOptions::default(),
    );
    (api, notifier, engine)
}

#[tokio::test(start_paused = true)]
async fn test_created_deployment_notifies_ready_once() {
    let (api, notifier, engine) = setup();

    let created = engine
        .create_deployment(DeploymentCreate {
            display_name: "Customer Web".to_string(),
            server_type: ServerType::Nginx,
            index_html: Some("<h1>Welcome</h1>".to_string()),
            replicas: Some(2),
        })
        .await
        .unwrap();
    assert_eq!(
        engine.snapshot(created.id).unwrap().status,
        DeploymentStatus::Creating
    );

    api.script_channel(
        created.id,
        ChannelScript::hang_after(vec![
            status_event(DeploymentStatus::Creating, 0),
            status_event(DeploymentStatus::Creating, 1),
            status_event(DeploymentStatus::Ready, 2),
        ])
        .paced(Duration::from_secs(2)),
    );
    api.script_status(
        created.id,
        vec![Ok(status_out(created.id, DeploymentStatus::Ready, 2, 2, 1))],
    );

    let mut updates = 0;
    let outcome = engine.track_until_ready(created.id, |_| updates += 1).await;
    assert!(outcome.is_ready());
    assert_eq!(updates, 3);
    assert_eq!(notifier.ready_count(created.id), 1);
    assert!(engine.is_notified(created.id));

    // a later READY, pushed or polled, stays quiet
    engine.refresh_all().await.unwrap();
    api.script_channel(
        created.id,
        ChannelScript::hang_after(vec![status_event(DeploymentStatus::Ready, 2)]),
    );
    assert!(engine.track_until_ready(created.id, |_| {}).await.is_ready());
    assert_eq!(notifier.ready_count(created.id), 1);

    let ready = notifier
        .all()
        .into_iter()
        .find(|n| matches!(n, Notification::Ready { .. }))
        .unwrap();
    assert_eq!(
        ready,
        Notification::Ready {
            id: created.id,
            name: Some("Customer Web".to_string()),
            url: created.url(),
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_unavailable_channel_polls_until_error() {
    let (api, notifier, engine) = setup();
    let d = fake_deployment("Customer Web", DeploymentStatus::Creating);
    api.add_deployment(d.clone());
    api.script_channel(d.id, ChannelScript::Unavailable("502 Bad Gateway".to_string()));
    api.script_status(
        d.id,
        vec![
            Ok(status_out(d.id, DeploymentStatus::Creating, 0, 1, 0)),
            Ok(status_out(d.id, DeploymentStatus::Creating, 0, 1, 0)),
            Ok(status_out(d.id, DeploymentStatus::Error, 0, 1, 0)),
        ],
    );

    let started = Instant::now();
    let mut seen = Vec::new();
    let outcome = engine.track_until_ready(d.id, |s| seen.push(s.status)).await;

    match outcome {
        TrackOutcome::Failed(snapshot) => {
            assert_eq!(snapshot.last_error.as_deref(), Some("ImagePullBackOff"))
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(
        seen,
        vec![
            DeploymentStatus::Creating,
            DeploymentStatus::Creating,
            DeploymentStatus::Error
        ]
    );
    assert_eq!(started.elapsed(), Duration::from_secs(4));
    assert_eq!(notifier.ready_count(d.id), 0);
    assert!(!engine.is_notified(d.id));

    // three polls plus the status fetch of the closing refresh, then nothing
    assert_eq!(api.status_calls(d.id), 4);
    assert_eq!(api.list_calls(), 1);
    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(api.status_calls(d.id), 4);
    assert_eq!(api.channel_opens(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_refresh_in_flight_during_create_keeps_ready_notification() {
    let (api, notifier, engine) = setup();
    api.add_deployment(fake_deployment("Docs", DeploymentStatus::Ready));
    api.set_list_delay(Duration::from_secs(2));

    let create_and_track = async {
        // the listing below was requested before this create
        tokio::time::sleep(Duration::from_millis(500)).await;
        let created = engine
            .create_deployment(DeploymentCreate {
                display_name: "Customer Web".to_string(),
                server_type: ServerType::Nginx,
                index_html: None,
                replicas: Some(2),
            })
            .await
            .unwrap();
        api.script_channel(
            created.id,
            ChannelScript::hang_after(vec![
                status_event(DeploymentStatus::Creating, 0),
                status_event(DeploymentStatus::Ready, 2),
            ])
            .paced(Duration::from_secs(2)),
        );
        let outcome = engine.track_until_ready(created.id, |_| {}).await;
        (created, outcome)
    };

    let (refreshed, (created, outcome)) = tokio::join!(engine.refresh_all(), create_and_track);

    // the stale listing did not include the new deployment
    assert_eq!(refreshed.unwrap().unwrap().len(), 1);
    assert!(outcome.is_ready());
    assert_eq!(notifier.ready_count(created.id), 1);
    assert!(engine.deployment(created.id).is_some());
    assert_eq!(engine.deployments().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_channel_logs_reach_the_update_callback() {
    let (api, _, engine) = setup();
    let d = fake_deployment("Customer Web", DeploymentStatus::Creating);
    api.add_deployment(d.clone());
    api.script_channel(
        d.id,
        ChannelScript::end_after(vec![
            with_log(
                status_event(DeploymentStatus::Creating, 0),
                "customer-web-5f7c",
                "nginx",
                "10:00:00 pulling image\n",
            ),
            with_log(
                status_event(DeploymentStatus::Creating, 0),
                "customer-web-5f7c",
                "nginx",
                "10:00:00 pulling image\n10:00:04 started\n",
            ),
        ]),
    );

    let mut tail = LogTail::default();
    let mut printed = Vec::new();
    let outcome = engine
        .track_until_ready(d.id, |s| printed.extend(tail.fresh(&s.logs)))
        .await;

    assert_eq!(outcome, TrackOutcome::StreamEnded);
    assert_eq!(
        printed,
        vec![
            "customer-web-5f7c:nginx | 10:00:00 pulling image".to_string(),
            "customer-web-5f7c:nginx | 10:00:04 started".to_string(),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_deadline_resolves_inconclusive_and_releases_channel() {
    let (api, notifier, engine) = setup();
    let d = fake_deployment("Customer Web", DeploymentStatus::Creating);
    api.add_deployment(d.clone());
    api.script_channel(
        d.id,
        ChannelScript::hang_after(vec![status_event(DeploymentStatus::Creating, 0)]),
    );

    let started = Instant::now();
    let outcome = engine.track_until_ready(d.id, |_| {}).await;

    assert_eq!(outcome, TrackOutcome::Inconclusive);
    assert_eq!(started.elapsed(), Duration::from_secs(180));
    assert_eq!(api.channel_opens(), 1);
    assert_eq!(api.open_channels(), 0);
    assert!(notifier.all().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_deadline_also_bounds_polling() {
    let (api, _, engine) = setup();
    let d = fake_deployment("Customer Web", DeploymentStatus::Creating);
    api.add_deployment(d.clone());

    let outcome = engine.track_until_ready(d.id, |_| {}).await;

    assert_eq!(outcome, TrackOutcome::Inconclusive);
    // one poll at start and then every 2s until the deadline
    assert!(api.status_calls(d.id) >= 90);
    assert_eq!(api.channel_opens(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_channel_closed_without_end_falls_back_to_polling() {
    let (api, _, engine) = setup();
    let d = fake_deployment("Customer Web", DeploymentStatus::Creating);
    api.add_deployment(d.clone());
    api.script_channel(
        d.id,
        ChannelScript::close_after(vec![status_event(DeploymentStatus::Creating, 0)]),
    );
    api.script_status(d.id, vec![Ok(status_out(d.id, DeploymentStatus::Ready, 1, 1, 1))]);

    assert!(engine.track_until_ready(d.id, |_| {}).await.is_ready());
    assert_eq!(api.open_channels(), 0);
}
