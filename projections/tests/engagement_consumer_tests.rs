//! Engagement consumer: per-field timestamp gates over the in-memory store.

#![allow(clippy::unwrap_used)] // Tests can unwrap
#![allow(clippy::expect_used)] // Tests can expect
#![allow(clippy::panic)]

use chrono::{DateTime, Duration, Utc};
use proptest::prelude::*;
use std::sync::Arc;
use uuid::Uuid;
use video_catalog_core::environment::Clock;
use video_catalog_core::projection::{ApplyOutcome, ConsumerError, InboxMetadata, SkipReason};
use video_catalog_core::{UserId, VideoId};
use video_catalog_projections::{
    EngagementAction, EngagementConsumer, EngagementEvent, EngagementKind, EngagementMessage,
    InboxProcessor,
};
use video_catalog_testing::{
    FixedClock, InMemoryEngagementStore, RecordingMetrics, init_tracing, test_clock,
};

type Inbox = InboxProcessor<EngagementConsumer<InMemoryEngagementStore, FixedClock>>;

fn inbox(store: &InMemoryEngagementStore, metrics: &RecordingMetrics) -> Inbox {
    InboxProcessor::new(EngagementConsumer::new(store.clone(), test_clock()))
        .with_metrics(Arc::new(metrics.clone()))
}

fn at(seconds: i64) -> DateTime<Utc> {
    test_clock().now() - Duration::hours(1) + Duration::seconds(seconds)
}

struct Pair {
    user_id: UserId,
    video_id: VideoId,
}

impl Pair {
    fn new() -> Self {
        Self {
            user_id: UserId::new(),
            video_id: VideoId::new(),
        }
    }

    fn event(&self, kind: EngagementKind, action: EngagementAction, seconds: i64) -> Vec<u8> {
        bincode::serialize(&self.message(kind, action, seconds)).unwrap()
    }

    fn message(
        &self,
        kind: EngagementKind,
        action: EngagementAction,
        seconds: i64,
    ) -> EngagementMessage {
        EngagementMessage::from_event(&EngagementEvent {
            event_id: Uuid::new_v4(),
            user_id: self.user_id,
            video_id: self.video_id,
            kind,
            action,
            occurred_at: at(seconds),
        })
    }
}

async fn deliver(inbox: &Inbox, bytes: &[u8]) -> ApplyOutcome {
    inbox.process(bytes, &InboxMetadata::default()).await.unwrap()
}

#[tokio::test]
async fn like_redelivery_is_a_no_op() {
    init_tracing();
    let store = InMemoryEngagementStore::new();
    let metrics = RecordingMetrics::new();
    let inbox = inbox(&store, &metrics);
    let pair = Pair::new();
    let like = pair.event(EngagementKind::Like, EngagementAction::Added, 10);

    assert_eq!(deliver(&inbox, &like).await, ApplyOutcome::Applied);
    assert_eq!(
        deliver(&inbox, &like).await,
        ApplyOutcome::Skipped(SkipReason::Stale)
    );

    let state = store.state(pair.user_id, pair.video_id).await.unwrap();
    assert!(state.has_liked);
    assert_eq!(state.liked_occurred_at, Some(at(10)));
    assert!(!state.has_bookmarked);
    assert_eq!(state.bookmarked_occurred_at, None);
    assert_eq!(state.updated_at, test_clock().now());

    assert_eq!(metrics.consumed("engagement", "applied"), 1);
    assert_eq!(metrics.consumed("engagement", "skipped_stale"), 1);
}

#[tokio::test]
async fn each_flag_is_fenced_by_its_own_timestamp() {
    let store = InMemoryEngagementStore::new();
    let inbox = inbox(&store, &RecordingMetrics::new());
    let pair = Pair::new();

    // like at t=20, then a late unlike from t=5: the unlike is stale
    deliver(&inbox, &pair.event(EngagementKind::Like, EngagementAction::Added, 20)).await;
    assert_eq!(
        deliver(&inbox, &pair.event(EngagementKind::Like, EngagementAction::Removed, 5)).await,
        ApplyOutcome::Skipped(SkipReason::Stale)
    );

    // a bookmark older than the like still lands: different field
    assert_eq!(
        deliver(&inbox, &pair.event(EngagementKind::Bookmark, EngagementAction::Added, 1)).await,
        ApplyOutcome::Applied
    );

    // and a newer unbookmark clears only the bookmark
    assert_eq!(
        deliver(
            &inbox,
            &pair.event(EngagementKind::Bookmark, EngagementAction::Removed, 30)
        )
        .await,
        ApplyOutcome::Applied
    );

    let state = store.state(pair.user_id, pair.video_id).await.unwrap();
    assert!(state.has_liked);
    assert_eq!(state.liked_occurred_at, Some(at(20)));
    assert!(!state.has_bookmarked);
    assert_eq!(state.bookmarked_occurred_at, Some(at(30)));
}

#[tokio::test]
async fn same_instant_is_treated_as_already_seen() {
    let store = InMemoryEngagementStore::new();
    let inbox = inbox(&store, &RecordingMetrics::new());
    let pair = Pair::new();

    deliver(&inbox, &pair.event(EngagementKind::Like, EngagementAction::Added, 7)).await;
    assert_eq!(
        deliver(&inbox, &pair.event(EngagementKind::Like, EngagementAction::Removed, 7)).await,
        ApplyOutcome::Skipped(SkipReason::Stale)
    );
    assert!(store.state(pair.user_id, pair.video_id).await.unwrap().has_liked);
}

#[tokio::test]
async fn textual_messages_are_accepted_in_any_case() {
    let store = InMemoryEngagementStore::new();
    let inbox = inbox(&store, &RecordingMetrics::new());
    let pair = Pair::new();

    let mut message = pair.message(EngagementKind::Bookmark, EngagementAction::Added, 3);
    message.kind = "BOOKMARK".into();
    message.action = "Added".into();

    assert_eq!(
        deliver(&inbox, &serde_json::to_vec(&message).unwrap()).await,
        ApplyOutcome::Applied
    );
    assert!(store.state(pair.user_id, pair.video_id).await.unwrap().has_bookmarked);
}

#[tokio::test]
async fn malformed_messages_are_rejected_without_writing() {
    let store = InMemoryEngagementStore::new();
    let metrics = RecordingMetrics::new();
    let inbox = inbox(&store, &metrics);
    let pair = Pair::new();
    let good = pair.message(EngagementKind::Like, EngagementAction::Added, 1);

    let unknown_kind = EngagementMessage {
        kind: "share".into(),
        ..good.clone()
    };
    let nil_user = EngagementMessage {
        user_id: Uuid::nil().to_string(),
        ..good.clone()
    };

    for message in [unknown_kind, nil_user] {
        let err = inbox
            .process(&serde_json::to_vec(&message).unwrap(), &InboxMetadata::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ConsumerError::Invalid(_)));
        assert!(!err.is_retryable());
    }

    let err = inbox
        .process(b"like it", &InboxMetadata::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ConsumerError::Decode(_)));

    assert!(store.state(pair.user_id, pair.video_id).await.is_none());
    assert_eq!(metrics.consumed("engagement", "invalid"), 2);
    assert_eq!(metrics.consumed("engagement", "decode_error"), 1);
}

fn engagement_history() -> impl Strategy<Value = Vec<(bool, bool, i64)>> {
    prop::collection::vec((any::<bool>(), any::<bool>()), 1..16).prop_flat_map(|flags| {
        let timed: Vec<(bool, bool, i64)> = flags
            .into_iter()
            .zip(0_i64..)
            .map(|((is_like, added), seconds)| (is_like, added, seconds))
            .collect();
        Just(timed).prop_shuffle()
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_any_delivery_order_converges(history in engagement_history()) {
        tokio_test::block_on(async {
            let store = InMemoryEngagementStore::new();
            let inbox = inbox(&store, &RecordingMetrics::new());
            let pair = Pair::new();

            for &(is_like, added, seconds) in &history {
                let kind = if is_like {
                    EngagementKind::Like
                } else {
                    EngagementKind::Bookmark
                };
                let action = if added {
                    EngagementAction::Added
                } else {
                    EngagementAction::Removed
                };
                let bytes = pair.event(kind, action, seconds);
                inbox.process(&bytes, &InboxMetadata::default()).await.unwrap();
                // redelivery of the same message never applies
                let again = inbox.process(&bytes, &InboxMetadata::default()).await.unwrap();
                prop_assert_eq!(again, ApplyOutcome::Skipped(SkipReason::Stale));
            }

            let latest = |like: bool| {
                history
                    .iter()
                    .filter(|(is_like, _, _)| *is_like == like)
                    .max_by_key(|(_, _, seconds)| *seconds)
                    .map(|&(_, added, seconds)| (added, at(seconds)))
            };

            let state = store.state(pair.user_id, pair.video_id).await.unwrap();
            prop_assert_eq!(state.has_liked, latest(true).is_some_and(|(added, _)| added));
            prop_assert_eq!(state.liked_occurred_at, latest(true).map(|(_, when)| when));
            prop_assert_eq!(state.has_bookmarked, latest(false).is_some_and(|(added, _)| added));
            prop_assert_eq!(state.bookmarked_occurred_at, latest(false).map(|(_, when)| when));
            Ok::<(), TestCaseError>(())
        })?;
    }
}
