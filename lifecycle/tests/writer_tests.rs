//! Unit-of-work tests for `LifecycleWriter` over the in-memory store.

#![allow(clippy::unwrap_used)] // Tests can unwrap
#![allow(clippy::expect_used)] // Tests can expect
#![allow(clippy::panic)]

use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use video_catalog_core::builder::EventBuilder;
use video_catalog_core::environment::Clock;
use video_catalog_core::event::{EventKind, EventPayload, JsonEncoder};
use video_catalog_core::metrics::WriteOperation;
use video_catalog_core::store::headers;
use video_catalog_core::video::{StageStatus, VideoStatus, Visibility};
use video_catalog_core::{EventVersion, LifecycleError, UserId, VideoId};
use video_catalog_lifecycle::{
    AdditionalEvents, CreateVideoInput, DeleteVideoInput, LifecycleWriter, RequestContext,
    UpdateOptions, UpdateVideoInput, WriterConfig,
};
use video_catalog_testing::{
    FailingEncoder, FixedClock, InMemoryVideoStore, ManualClock, RecordingMetrics, fixtures,
    init_tracing, properties, test_clock,
};

type Writer = LifecycleWriter<InMemoryVideoStore, InMemoryVideoStore, FixedClock>;

fn writer(store: &InMemoryVideoStore) -> Writer {
    LifecycleWriter::new(store.clone(), store.clone(), test_clock())
}

fn create_input() -> CreateVideoInput {
    CreateVideoInput {
        video_id: None,
        upload_user_id: UserId::new(),
        title: "  Intro to Rust ".to_string(),
        description: None,
        raw_file_reference: "uploads/raw/intro.mp4".to_string(),
        context: RequestContext::default(),
    }
}

fn retitle(video_id: VideoId, title: &str) -> UpdateVideoInput {
    UpdateVideoInput {
        title: Some(title.to_string()),
        ..UpdateVideoInput::new(video_id)
    }
}

#[tokio::test]
async fn create_registers_pending_video_and_one_event() {
    init_tracing();
    let store = InMemoryVideoStore::new();
    let writer = writer(&store);

    let revision = writer.create_video(create_input()).await.unwrap();

    let video = store.video(revision.video_id).await.unwrap();
    assert_eq!(video.title, "Intro to Rust");
    assert_eq!(video.status, VideoStatus::PendingUpload);
    assert_eq!(video.media_status, StageStatus::Pending);
    assert_eq!(video.analysis_status, StageStatus::Pending);
    assert_eq!(video.version, EventVersion::from_instant(test_clock().now()));
    assert_eq!(revision.version, video.version);

    let envelopes = store.envelopes().await;
    assert_eq!(envelopes.len(), 1);
    assert_eq!(envelopes[0].event_type, EventKind::Created);
    assert_eq!(envelopes[0].event_id, revision.event_id);
    assert_eq!(envelopes[0].aggregate_type, "video");
    assert_eq!(envelopes[0].aggregate_id, revision.video_id.to_string());
    assert_eq!(envelopes[0].version(), revision.version);
    assert_eq!(envelopes[0].occurred_at().unwrap(), test_clock().now());
}

#[tokio::test]
async fn create_validates_input() {
    let store = InMemoryVideoStore::new();
    let writer = writer(&store);

    let blank_title = CreateVideoInput {
        title: "   ".into(),
        ..create_input()
    };
    let nil_user = CreateVideoInput {
        upload_user_id: UserId::from_uuid(uuid::Uuid::nil()),
        ..create_input()
    };
    let nil_id = CreateVideoInput {
        video_id: Some(VideoId::from_uuid(uuid::Uuid::nil())),
        ..create_input()
    };

    for input in [blank_title, nil_user, nil_id] {
        let err = writer.create_video(input).await.unwrap_err();
        assert!(matches!(err, LifecycleError::BadRequest(_)), "{err:?}");
    }
    assert!(store.outbox().await.is_empty());
    assert_eq!(store.commits(), 0);
}

#[tokio::test]
async fn create_with_existing_id_conflicts() {
    let store = InMemoryVideoStore::new();
    let writer = writer(&store);
    let id = VideoId::new();

    let input = CreateVideoInput {
        video_id: Some(id),
        ..create_input()
    };
    writer.create_video(input.clone()).await.unwrap();
    let err = writer.create_video(input).await.unwrap_err();

    assert!(matches!(err, LifecycleError::Conflict(_)));
    assert_eq!(store.outbox().await.len(), 1);
}

#[tokio::test]
async fn outbox_headers_carry_schema_content_type_and_context() {
    let store = InMemoryVideoStore::new();
    let writer = writer(&store)
        .with_encoder(Arc::new(JsonEncoder))
        .with_config(WriterConfig {
            schema_version: "7".into(),
            ..WriterConfig::default()
        });

    let input = CreateVideoInput {
        context: RequestContext {
            idempotency_key: Some("idem-1".into()),
            trace_id: Some("trace-abc".into()),
        },
        ..create_input()
    };
    writer.create_video(input).await.unwrap();

    let message = &store.outbox().await[0];
    assert_eq!(message.event_type, "video.created");
    assert_eq!(message.headers[headers::SCHEMA_VERSION], "7");
    assert_eq!(message.headers[headers::CONTENT_TYPE], "application/json");
    assert_eq!(message.headers[headers::IDEMPOTENCY_KEY], "idem-1");
    assert_eq!(message.headers[headers::TRACE_ID], "trace-abc");
    assert_eq!(message.available_at, test_clock().now());

    // JSON payloads still decode through the dual-format path.
    assert_eq!(store.envelopes().await[0].event_type, EventKind::Created);
}

#[tokio::test]
async fn missing_context_leaves_optional_headers_out() {
    let store = InMemoryVideoStore::new();
    writer(&store).create_video(create_input()).await.unwrap();

    let message = &store.outbox().await[0];
    assert!(!message.headers.contains_key(headers::IDEMPOTENCY_KEY));
    assert!(!message.headers.contains_key(headers::TRACE_ID));
    assert_eq!(message.headers[headers::CONTENT_TYPE], "application/x-bincode");
}

#[tokio::test]
async fn versions_strictly_increase_under_a_frozen_clock() {
    let store = InMemoryVideoStore::new();
    let writer = writer(&store);
    let created = writer.create_video(create_input()).await.unwrap();

    let first = writer
        .update_video(retitle(created.video_id, "One"), UpdateOptions::new())
        .await
        .unwrap();
    let second = writer
        .update_video(retitle(created.video_id, "Two"), UpdateOptions::new())
        .await
        .unwrap();

    assert_eq!(first.version, created.version.next());
    assert_eq!(second.version, first.version.next());
    assert!(second.occurred_at > first.occurred_at);

    let versions: Vec<_> = store
        .envelopes()
        .await
        .iter()
        .map(|envelope| envelope.version())
        .collect();
    assert!(versions.windows(2).all(|pair| pair[0] < pair[1]));
}

#[tokio::test]
async fn versions_survive_clock_regression() {
    let clock = ManualClock::new(test_clock().now());
    let store = InMemoryVideoStore::new();
    let writer = LifecycleWriter::new(store.clone(), store.clone(), clock.clone());
    let created = writer.create_video(create_input()).await.unwrap();

    clock.advance(chrono::Duration::seconds(-3600));
    let revision = writer
        .update_video(retitle(created.video_id, "Back in time"), UpdateOptions::new())
        .await
        .unwrap();

    assert!(revision.version > created.version);
    assert_eq!(revision.occurred_at, revision.version.instant().unwrap());
}

#[tokio::test]
async fn expected_version_mismatch_changes_nothing() {
    let store = InMemoryVideoStore::new();
    let writer = writer(&store);
    let created = writer.create_video(create_input()).await.unwrap();
    let before = store.video(created.video_id).await.unwrap();

    let input = UpdateVideoInput {
        expected_version: Some(EventVersion::new(1)),
        ..retitle(created.video_id, "Stale")
    };
    let err = writer.update_video(input, UpdateOptions::new()).await.unwrap_err();

    assert!(matches!(err, LifecycleError::Conflict(_)));
    assert_eq!(store.video(created.video_id).await.unwrap(), before);
    assert_eq!(store.outbox().await.len(), 1);
}

#[tokio::test]
async fn stale_previous_snapshot_conflicts_on_write() {
    let store = InMemoryVideoStore::new();
    let writer = writer(&store);
    let created = writer.create_video(create_input()).await.unwrap();
    let stale = store.video(created.video_id).await.unwrap();

    writer
        .update_video(retitle(created.video_id, "Winner"), UpdateOptions::new())
        .await
        .unwrap();
    let err = writer
        .update_video(
            retitle(created.video_id, "Loser"),
            UpdateOptions::new().with_previous(stale),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, LifecycleError::Conflict(_)));
    assert_eq!(store.video(created.video_id).await.unwrap().title, "Winner");
    assert_eq!(store.outbox().await.len(), 2);
}

#[tokio::test]
async fn update_rejects_empty_patch_and_unknown_video() {
    let store = InMemoryVideoStore::new();
    let writer = writer(&store);
    let created = writer.create_video(create_input()).await.unwrap();

    let err = writer
        .update_video(UpdateVideoInput::new(created.video_id), UpdateOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::BadRequest(_)));

    let err = writer
        .update_video(retitle(VideoId::new(), "Ghost"), UpdateOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::NotFound(_)));
}

#[tokio::test]
async fn additional_events_follow_the_primary_update() {
    let store = InMemoryVideoStore::new();
    let writer = writer(&store);
    let created = writer.create_video(create_input()).await.unwrap();

    let mut ready = fixtures::ready_video(test_clock().now());
    ready.id = created.video_id;
    let input = UpdateVideoInput {
        status: Some(VideoStatus::Ready),
        media_status: Some(StageStatus::Ready),
        analysis_status: Some(StageStatus::Ready),
        media: Some(ready.media.clone()),
        ..UpdateVideoInput::new(created.video_id)
    };
    let options = UpdateOptions::new().with_additional_events(|previous, updated| {
        let mut events = AdditionalEvents::none();
        events.offer(
            EventKind::MediaReady,
            EventBuilder::media_ready(previous, updated),
        );
        events
    });
    let revision = writer.update_video(input, options).await.unwrap();

    let envelopes = store.envelopes().await;
    let kinds: Vec<_> = envelopes.iter().map(|e| e.event_type).collect();
    assert_eq!(
        kinds,
        vec![EventKind::Created, EventKind::Updated, EventKind::MediaReady]
    );
    assert_eq!(envelopes[2].version(), envelopes[1].version().next());
    assert_eq!(revision.version, envelopes[2].version());
    assert_eq!(revision.event_id, envelopes[2].event_id);
    assert_eq!(
        store.video(created.video_id).await.unwrap().version,
        revision.version
    );

    match &envelopes[1].payload {
        EventPayload::Updated(changes) => {
            assert!(changes.changed_fields.contains(&"media_status".to_string()));
            assert_eq!(changes.status, Some(VideoStatus::Ready));
        }
        other => panic!("expected updated payload, got {other:?}"),
    }
}

#[tokio::test]
async fn encode_failure_rolls_back_row_and_earlier_messages() {
    let store = InMemoryVideoStore::new();
    let created = writer(&store).create_video(create_input()).await.unwrap();
    let before = store.video(created.video_id).await.unwrap();

    // The primary event encodes; the additional one does not.
    let failing = writer(&store).with_encoder(Arc::new(FailingEncoder::after(1)));
    let options = UpdateOptions::new().with_additional_events(|previous, updated| {
        let mut events = AdditionalEvents::none();
        events.push(EventBuilder::deleted(updated, Some(previous.title.clone())));
        events
    });
    let err = failing
        .update_video(retitle(created.video_id, "Never lands"), options)
        .await
        .unwrap_err();

    assert!(matches!(err, LifecycleError::Internal(_)));
    assert_eq!(store.video(created.video_id).await.unwrap(), before);
    assert_eq!(store.event_types().await, vec!["video.created"]);
}

#[tokio::test]
async fn enqueue_failure_rolls_back_create() {
    let store = InMemoryVideoStore::new();
    let writer = writer(&store);
    store.fail_enqueue(true);

    let input = CreateVideoInput {
        video_id: Some(VideoId::new()),
        ..create_input()
    };
    let id = input.video_id.unwrap();
    let err = writer.create_video(input).await.unwrap_err();

    assert!(matches!(err, LifecycleError::Internal(_)));
    assert!(store.video(id).await.is_none());
    assert!(store.outbox().await.is_empty());
    assert_eq!(store.commits(), 0);
}

#[tokio::test]
async fn slow_commit_times_out_without_writing() {
    let store = InMemoryVideoStore::new();
    let writer = writer(&store).with_config(
        WriterConfig::default().with_write_timeout(Duration::from_millis(20)),
    );
    store.set_commit_delay(Duration::from_millis(500));

    let input = CreateVideoInput {
        video_id: Some(VideoId::new()),
        ..create_input()
    };
    let id = input.video_id.unwrap();
    let err = writer.create_video(input).await.unwrap_err();

    assert!(matches!(err, LifecycleError::GatewayTimeout(_)));
    assert!(store.video(id).await.is_none());
    assert!(store.outbox().await.is_empty());
}

#[tokio::test]
async fn publishing_defaults_publish_time_and_audience() {
    let store = InMemoryVideoStore::new();
    let writer = writer(&store);
    let video = fixtures::ready_video(test_clock().now() - chrono::Duration::hours(1));
    let id = video.id;
    store.seed(video).await;

    let input = UpdateVideoInput {
        status: Some(VideoStatus::Published),
        ..UpdateVideoInput::new(id)
    };
    writer.update_video(input, UpdateOptions::new()).await.unwrap();

    let published = store.video(id).await.unwrap();
    assert_eq!(published.publish_at, Some(test_clock().now()));
    assert_eq!(published.visibility_status, Some(Visibility::Public));
}

#[tokio::test]
async fn delete_removes_row_and_announces_it() {
    let store = InMemoryVideoStore::new();
    let writer = writer(&store);
    let created = writer.create_video(create_input()).await.unwrap();

    let revision = writer
        .delete_video(DeleteVideoInput {
            video_id: created.video_id,
            reason: Some("duplicate upload".into()),
            ..DeleteVideoInput::default()
        })
        .await
        .unwrap();

    assert!(store.video(created.video_id).await.is_none());
    assert!(revision.version > created.version);
    let envelopes = store.envelopes().await;
    match &envelopes[1].payload {
        EventPayload::Deleted(deleted) => {
            assert_eq!(deleted.video_id, created.video_id);
            assert_eq!(deleted.reason.as_deref(), Some("duplicate upload"));
            assert_eq!(deleted.version, revision.version);
        }
        other => panic!("expected deleted payload, got {other:?}"),
    }

    let err = writer
        .delete_video(DeleteVideoInput {
            video_id: created.video_id,
            ..DeleteVideoInput::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::NotFound(_)));
}

#[tokio::test]
async fn delete_checks_expected_version() {
    let store = InMemoryVideoStore::new();
    let writer = writer(&store);
    let created = writer.create_video(create_input()).await.unwrap();

    let err = writer
        .delete_video(DeleteVideoInput {
            video_id: created.video_id,
            expected_version: Some(created.version.next()),
            ..DeleteVideoInput::default()
        })
        .await
        .unwrap_err();

    assert!(matches!(err, LifecycleError::Conflict(_)));
    assert!(store.video(created.video_id).await.is_some());
}

#[tokio::test]
async fn metrics_count_outcomes_and_events() {
    let store = InMemoryVideoStore::new();
    let metrics = RecordingMetrics::new();
    let writer = writer(&store).with_metrics(Arc::new(metrics.clone()));

    let created = writer.create_video(create_input()).await.unwrap();
    writer
        .update_video(
            UpdateVideoInput {
                expected_version: Some(EventVersion::new(1)),
                ..retitle(created.video_id, "Stale")
            },
            UpdateOptions::new(),
        )
        .await
        .unwrap_err();
    let suppressing = UpdateOptions::new().with_additional_events(|_, _| {
        let mut events = AdditionalEvents::none();
        events.offer(EventKind::MediaReady, None);
        events
    });
    writer
        .update_video(retitle(created.video_id, "Fresh"), suppressing)
        .await
        .unwrap();

    assert_eq!(metrics.writes(WriteOperation::Create, "ok"), 1);
    assert_eq!(metrics.writes(WriteOperation::Update, "conflict"), 1);
    assert_eq!(metrics.writes(WriteOperation::Update, "ok"), 1);
    assert_eq!(metrics.enqueued(EventKind::Created), 1);
    assert_eq!(metrics.enqueued(EventKind::Updated), 1);
    assert_eq!(metrics.suppressed(EventKind::MediaReady), 1);
}

proptest! {
    #[test]
    fn prop_versions_increase_whatever_the_clock_does(
        jitters in proptest::collection::vec(properties::clock_jitter_micros(), 1..12),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        runtime.block_on(async {
            let clock = ManualClock::new(test_clock().now());
            let store = InMemoryVideoStore::new();
            let writer = LifecycleWriter::new(store.clone(), store.clone(), clock.clone());
            let created = writer.create_video(create_input()).await.unwrap();

            let mut last = created.version;
            for (i, jitter) in jitters.into_iter().enumerate() {
                clock.advance(chrono::Duration::microseconds(jitter));
                let revision = writer
                    .update_video(
                        retitle(created.video_id, &format!("take {i}")),
                        UpdateOptions::new(),
                    )
                    .await
                    .unwrap();
                prop_assert!(revision.version > last);
                last = revision.version;
            }
            Ok::<(), TestCaseError>(())
        })?;
    }
}
