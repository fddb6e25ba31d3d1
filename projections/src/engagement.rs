//! Engagement projection consumer.
//!
//! Likes and bookmarks are independent facts about a `(user, video)` pair and may
//! arrive out of order relative to each other, so each flag carries its own
//! `occurred_at` fence. An event touches only the flag it names, and only if it is
//! strictly newer than that flag's fence; the other flag is left as it was.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;
use video_catalog_core::environment::{Clock, SystemClock};
use video_catalog_core::event::decode_dual_format;
use video_catalog_core::projection::{
    ApplyOutcome, ConsumerError, EngagementStore, InboxHandler, InboxMetadata, SkipReason,
    VideoUserState,
};
use video_catalog_core::{UserId, VideoId};

/// Which flag an engagement event targets.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum EngagementKind {
    /// The like flag
    Like,
    /// The bookmark flag
    Bookmark,
}

impl EngagementKind {
    /// Wire form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Like => "like",
            Self::Bookmark => "bookmark",
        }
    }
}

impl fmt::Display for EngagementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngagementKind {
    type Err = ConsumerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "like" => Ok(Self::Like),
            "bookmark" => Ok(Self::Bookmark),
            other => Err(ConsumerError::Invalid(format!(
                "unknown engagement kind: {other}"
            ))),
        }
    }
}

/// Whether the flag is being set or cleared.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum EngagementAction {
    /// Set the flag
    Added,
    /// Clear the flag
    Removed,
}

impl EngagementAction {
    /// Wire form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Removed => "removed",
        }
    }
}

impl fmt::Display for EngagementAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngagementAction {
    type Err = ConsumerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "added" => Ok(Self::Added),
            "removed" => Ok(Self::Removed),
            other => Err(ConsumerError::Invalid(format!(
                "unknown engagement action: {other}"
            ))),
        }
    }
}

/// Wire shape of an engagement event.
///
/// Identifiers and enums travel as text so that producers on other stacks can emit
/// them; [`EngagementMessage::resolve`] turns them into an [`EngagementEvent`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngagementMessage {
    /// Unique event identifier
    pub event_id: Uuid,
    /// Engaging user
    pub user_id: String,
    /// Video engaged with
    pub video_id: String,
    /// `like` or `bookmark`
    pub kind: String,
    /// `added` or `removed`
    pub action: String,
    /// RFC 3339 timestamp
    pub occurred_at: String,
}

impl EngagementMessage {
    /// Wire form of `event`.
    #[must_use]
    pub fn from_event(event: &EngagementEvent) -> Self {
        Self {
            event_id: event.event_id,
            user_id: event.user_id.to_string(),
            video_id: event.video_id.to_string(),
            kind: event.kind.as_str().to_string(),
            action: event.action.as_str().to_string(),
            occurred_at: event.occurred_at.to_rfc3339_opts(SecondsFormat::Nanos, true),
        }
    }

    /// Validate and type the message.
    ///
    /// # Errors
    ///
    /// Returns [`ConsumerError::Invalid`] for a malformed id, kind, action or
    /// timestamp.
    pub fn resolve(&self) -> Result<EngagementEvent, ConsumerError> {
        let user_id = parse_id::<UserId>("user_id", &self.user_id)?;
        let video_id = parse_id::<VideoId>("video_id", &self.video_id)?;
        let occurred_at = DateTime::parse_from_rfc3339(&self.occurred_at)
            .map_err(|e| {
                ConsumerError::Invalid(format!("occurred_at {:?}: {e}", self.occurred_at))
            })?
            .with_timezone(&Utc);

        Ok(EngagementEvent {
            event_id: self.event_id,
            user_id,
            video_id,
            kind: self.kind.parse()?,
            action: self.action.parse()?,
            occurred_at,
        })
    }
}

fn parse_id<T>(field: &str, raw: &str) -> Result<T, ConsumerError>
where
    T: FromStr + IsNil,
{
    let id = raw
        .trim()
        .parse::<T>()
        .map_err(|_| ConsumerError::Invalid(format!("{field} {raw:?} is not a UUID")))?;
    if id.is_nil_id() {
        return Err(ConsumerError::Invalid(format!("{field} must not be nil")));
    }
    Ok(id)
}

trait IsNil {
    fn is_nil_id(&self) -> bool;
}

impl IsNil for UserId {
    fn is_nil_id(&self) -> bool {
        self.is_nil()
    }
}

impl IsNil for VideoId {
    fn is_nil_id(&self) -> bool {
        self.is_nil()
    }
}

/// A resolved engagement event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngagementEvent {
    /// Unique event identifier
    pub event_id: Uuid,
    /// Engaging user
    pub user_id: UserId,
    /// Video engaged with
    pub video_id: VideoId,
    /// Targeted flag
    pub kind: EngagementKind,
    /// Set or clear
    pub action: EngagementAction,
    /// When the user acted
    pub occurred_at: DateTime<Utc>,
}

/// Apply `event` to the flag it targets if it is strictly newer than that flag's
/// fence. Returns whether anything changed.
#[must_use]
pub fn merge(state: &mut VideoUserState, event: &EngagementEvent) -> bool {
    let (flag, fence) = match event.kind {
        EngagementKind::Like => (&mut state.has_liked, &mut state.liked_occurred_at),
        EngagementKind::Bookmark => (&mut state.has_bookmarked, &mut state.bookmarked_occurred_at),
    };
    if fence.is_some_and(|stored| event.occurred_at <= stored) {
        return false;
    }
    *flag = event.action == EngagementAction::Added;
    *fence = Some(event.occurred_at);
    true
}

/// Engagement projection consumer.
#[derive(Debug, Clone)]
pub struct EngagementConsumer<S, C = SystemClock> {
    store: S,
    clock: C,
}

impl<S, C> EngagementConsumer<S, C>
where
    S: EngagementStore,
    C: Clock,
{
    /// Consume engagement events into `store`.
    pub const fn new(store: S, clock: C) -> Self {
        Self { store, clock }
    }
}

impl<S, C> InboxHandler for EngagementConsumer<S, C>
where
    S: EngagementStore,
    C: Clock,
{
    type Event = EngagementEvent;
    type Store = S;

    fn name(&self) -> &str {
        "engagement"
    }

    fn store(&self) -> &S {
        &self.store
    }

    fn decode(&self, bytes: &[u8]) -> Result<EngagementEvent, ConsumerError> {
        decode_dual_format::<EngagementMessage>(bytes)?.resolve()
    }

    async fn handle(
        &self,
        tx: &mut S::Tx,
        event: &EngagementEvent,
        _metadata: &InboxMetadata,
    ) -> Result<ApplyOutcome, ConsumerError> {
        let now = self.clock.now();
        let mut state = self
            .store
            .load(tx, event.user_id, event.video_id)
            .await?
            .unwrap_or_else(|| VideoUserState::empty(event.user_id, event.video_id, now));

        if !merge(&mut state, event) {
            tracing::debug!(
                user_id = %event.user_id,
                video_id = %event.video_id,
                kind = %event.kind,
                occurred_at = %event.occurred_at,
                "Skipping stale engagement event"
            );
            return Ok(ApplyOutcome::Skipped(SkipReason::Stale));
        }

        state.updated_at = now;
        self.store.upsert(tx, &state).await?;
        tracing::info!(
            user_id = %event.user_id,
            video_id = %event.video_id,
            kind = %event.kind,
            action = %event.action,
            "Applied engagement event"
        );
        Ok(ApplyOutcome::Applied)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap()
    }

    fn event(kind: EngagementKind, action: EngagementAction, at: DateTime<Utc>) -> EngagementEvent {
        EngagementEvent {
            event_id: Uuid::new_v4(),
            user_id: UserId::new(),
            video_id: VideoId::new(),
            kind,
            action,
            occurred_at: at,
        }
    }

    #[test]
    fn per_field_fences_are_independent() {
        let mut state = VideoUserState::empty(UserId::new(), VideoId::new(), t0());

        assert!(merge(&mut state, &event(EngagementKind::Like, EngagementAction::Added, t0())));
        assert!(!merge(
            &mut state,
            &event(EngagementKind::Like, EngagementAction::Removed, t0() - Duration::seconds(1))
        ));
        assert!(state.has_liked);

        assert!(merge(
            &mut state,
            &event(EngagementKind::Bookmark, EngagementAction::Added, t0() + Duration::seconds(2))
        ));
        assert!(state.has_bookmarked);
        assert!(state.has_liked);
        assert_eq!(state.liked_occurred_at, Some(t0()));
    }

    #[test]
    fn equal_timestamp_is_stale() {
        let mut state = VideoUserState::empty(UserId::new(), VideoId::new(), t0());
        assert!(merge(&mut state, &event(EngagementKind::Bookmark, EngagementAction::Added, t0())));
        assert!(!merge(
            &mut state,
            &event(EngagementKind::Bookmark, EngagementAction::Removed, t0())
        ));
        assert!(state.has_bookmarked);
    }

    #[test]
    fn message_resolution_rejects_bad_fields() {
        let good = EngagementMessage::from_event(&event(
            EngagementKind::Like,
            EngagementAction::Removed,
            t0(),
        ));
        let resolved = good.resolve().unwrap();
        assert_eq!(resolved.kind, EngagementKind::Like);
        assert_eq!(resolved.action, EngagementAction::Removed);
        assert_eq!(resolved.occurred_at, t0());

        for broken in [
            EngagementMessage { kind: "share".into(), ..good.clone() },
            EngagementMessage { action: "toggled".into(), ..good.clone() },
            EngagementMessage { user_id: "nope".into(), ..good.clone() },
            EngagementMessage { video_id: Uuid::nil().to_string(), ..good.clone() },
            EngagementMessage { occurred_at: "yesterday".into(), ..good.clone() },
        ] {
            assert!(matches!(broken.resolve(), Err(ConsumerError::Invalid(_))));
        }
    }

    #[test]
    fn kinds_and_actions_parse_case_insensitively() {
        assert_eq!(" LIKE ".parse::<EngagementKind>().unwrap(), EngagementKind::Like);
        assert_eq!("Removed".parse::<EngagementAction>().unwrap(), EngagementAction::Removed);
    }
}
