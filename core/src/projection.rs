//! Read-side contracts for the projection consumers.
//!
//! # Overview
//!
//! Projections are the query side: denormalized views rebuilt by merging delivered
//! events. Delivery is at-least-once and may reorder messages, so every consumer is a
//! gate in front of a merge:
//!
//! - the **catalog** projection keeps one `version` per row and applies an event only
//!   if its version is strictly greater (whole-row gate)
//! - the **engagement** projection keeps one `occurred_at` per field and applies an
//!   event to that field only if it is strictly newer (per-field gate)
//!
//! A message that fails its gate is a successful no-op ([`ApplyOutcome::Skipped`]),
//! not an error.
//!
//! ```text
//! raw bytes ──▶ decode ──▶ handle(tx, event) ──▶ commit
//!                 │               │
//!          ConsumerError    Applied | Skipped(Stale | Unsupported)
//! ```

use crate::event::EventError;
use crate::ids::{EventVersion, UserId, VideoId};
use crate::store::{StoreError, TransactionScope};
use crate::video::Visibility;
use crate::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;

/// Errors surfaced to the delivery mechanism.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConsumerError {
    /// The bytes are not a readable message.
    #[error("Decode error: {0}")]
    Decode(String),

    /// The message parsed but names an unknown kind/action or a malformed id.
    #[error("Invalid message: {0}")]
    Invalid(String),

    /// Projection storage failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Handling exceeded its deadline.
    #[error("Timeout: {0}")]
    Timeout(String),
}

impl ConsumerError {
    /// Whether redelivering the same bytes could succeed.
    ///
    /// Decode and validation failures are permanent; storage failures and timeouts
    /// are transient.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::Timeout(_))
    }

    /// Metrics label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Decode(_) => "decode_error",
            Self::Invalid(_) => "invalid",
            Self::Storage(_) => "storage_error",
            Self::Timeout(_) => "timeout",
        }
    }
}

impl From<EventError> for ConsumerError {
    fn from(err: EventError) -> Self {
        match err {
            EventError::KindMismatch { .. } | EventError::UnknownEventType(_) => {
                Self::Invalid(err.to_string())
            }
            EventError::Serialization(_) | EventError::Deserialization(_) => {
                Self::Decode(err.to_string())
            }
        }
    }
}

impl From<StoreError> for ConsumerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Timeout(msg) => Self::Timeout(msg),
            other => Self::Storage(other.to_string()),
        }
    }
}

/// Delivery metadata accompanying each inbound message.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InboxMetadata {
    /// Transport message identifier
    pub message_id: Option<String>,
    /// 1-based delivery attempt
    pub attempt: u32,
    /// Transport headers
    pub headers: BTreeMap<String, String>,
}

/// Why a message was not applied.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum SkipReason {
    /// Version or timestamp gate rejected it (already applied or superseded).
    Stale,
    /// The consumer does not handle this kind of message.
    Unsupported,
}

/// Successful result of handling a message.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ApplyOutcome {
    /// The projection changed.
    Applied,
    /// The message was a no-op.
    Skipped(SkipReason),
}

impl ApplyOutcome {
    /// Metrics label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::Skipped(SkipReason::Stale) => "skipped_stale",
            Self::Skipped(SkipReason::Unsupported) => "skipped_unsupported",
        }
    }

    /// Whether the projection changed.
    #[must_use]
    pub const fn is_applied(self) -> bool {
        matches!(self, Self::Applied)
    }
}

/// A consumer of one message stream.
///
/// Mirrors the inbox contract: `decode(bytes) -> event`, then
/// `handle(tx, event, metadata)` inside a store transaction opened by the caller.
pub trait InboxHandler: Send + Sync {
    /// Decoded message type.
    type Event: Send + Sync;

    /// Projection storage.
    type Store: TransactionScope;

    /// Consumer name (metrics label, log field).
    fn name(&self) -> &str;

    /// Projection storage used by [`InboxHandler::handle`].
    fn store(&self) -> &Self::Store;

    /// Decode raw message bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ConsumerError::Decode`] or [`ConsumerError::Invalid`].
    fn decode(&self, bytes: &[u8]) -> Result<Self::Event, ConsumerError>;

    /// Merge one event into the projection.
    ///
    /// # Errors
    ///
    /// Returns [`ConsumerError`] on invalid content or storage failure. Gate
    /// rejections are `Ok(ApplyOutcome::Skipped(_))`.
    fn handle(
        &self,
        tx: &mut <Self::Store as TransactionScope>::Tx,
        event: &Self::Event,
        metadata: &InboxMetadata,
    ) -> impl Future<Output = Result<ApplyOutcome, ConsumerError>> + Send;
}

/// Status written to the catalog projection for deleted videos.
pub const DELETED_STATUS: &str = "deleted";

/// Denormalized catalog row for profile pages.
///
/// `version` is this projection's own lineage: the effective version of the last
/// event merged into the row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileVideoProjection {
    /// Video identity
    pub video_id: VideoId,
    /// Title
    pub title: Option<String>,
    /// Description
    pub description: Option<String>,
    /// Duration in microseconds
    pub duration_micros: Option<i64>,
    /// Thumbnail URL
    pub thumbnail_url: Option<String>,
    /// HLS master playlist URL
    pub hls_master_playlist: Option<String>,
    /// Overall status, or [`DELETED_STATUS`]
    pub status: Option<String>,
    /// Audience
    pub visibility: Option<Visibility>,
    /// When the video went live
    pub published_at: Option<DateTime<Utc>>,
    /// Version of the last merged event
    pub version: EventVersion,
    /// Time of the last merge
    pub updated_at: DateTime<Utc>,
}

impl ProfileVideoProjection {
    /// Empty row for a video not seen before.
    #[must_use]
    pub const fn empty(video_id: VideoId, now: DateTime<Utc>) -> Self {
        Self {
            video_id,
            title: None,
            description: None,
            duration_micros: None,
            thumbnail_url: None,
            hls_master_playlist: None,
            status: None,
            visibility: None,
            published_at: None,
            version: EventVersion::INITIAL,
            updated_at: now,
        }
    }
}

/// Engagement state of one user for one video.
///
/// Each flag carries its own `occurred_at` fence.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoUserState {
    /// Engaging user
    pub user_id: UserId,
    /// Video engaged with
    pub video_id: VideoId,
    /// Liked
    pub has_liked: bool,
    /// When the like flag last changed
    pub liked_occurred_at: Option<DateTime<Utc>>,
    /// Bookmarked
    pub has_bookmarked: bool,
    /// When the bookmark flag last changed
    pub bookmarked_occurred_at: Option<DateTime<Utc>>,
    /// Time of the last merge
    pub updated_at: DateTime<Utc>,
}

impl VideoUserState {
    /// State with neither flag set.
    #[must_use]
    pub const fn empty(user_id: UserId, video_id: VideoId, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            video_id,
            has_liked: false,
            liked_occurred_at: None,
            has_bookmarked: false,
            bookmarked_occurred_at: None,
            updated_at: now,
        }
    }
}

/// Storage of the catalog projection.
pub trait CatalogProjectionStore: TransactionScope {
    /// Read a row outside any unit of work.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    fn get(
        &self,
        video_id: VideoId,
    ) -> impl Future<Output = Result<Option<ProfileVideoProjection>, StoreError>> + Send;

    /// Read (and lock) a row inside a unit of work.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    fn load(
        &self,
        tx: &mut Self::Tx,
        video_id: VideoId,
    ) -> impl Future<Output = Result<Option<ProfileVideoProjection>, StoreError>> + Send;

    /// Insert a row, or replace one with a lower version.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::VersionConflict`] if the stored row is at least as new,
    /// or another [`StoreError`] on storage failure.
    fn upsert(
        &self,
        tx: &mut Self::Tx,
        row: &ProfileVideoProjection,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// Storage of the engagement projection.
pub trait EngagementStore: TransactionScope {
    /// Read a state outside any unit of work.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    fn get(
        &self,
        user_id: UserId,
        video_id: VideoId,
    ) -> impl Future<Output = Result<Option<VideoUserState>, StoreError>> + Send;

    /// Read (and lock) a state inside a unit of work.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    fn load(
        &self,
        tx: &mut Self::Tx,
        user_id: UserId,
        video_id: VideoId,
    ) -> impl Future<Output = Result<Option<VideoUserState>, StoreError>> + Send;

    /// Insert or merge a state. A stored flag with a newer `occurred_at` is kept.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    fn upsert(
        &self,
        tx: &mut Self::Tx,
        state: &VideoUserState,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(!ConsumerError::Decode("x".into()).is_retryable());
        assert!(!ConsumerError::Invalid("x".into()).is_retryable());
        assert!(ConsumerError::Storage("x".into()).is_retryable());
        assert!(ConsumerError::Timeout("x".into()).is_retryable());
    }

    #[test]
    fn event_errors_map_to_permanent_failures() {
        let err = ConsumerError::from(EventError::UnknownEventType("video.exploded".into()));
        assert!(matches!(err, ConsumerError::Invalid(_)));

        let err = ConsumerError::from(EventError::Deserialization("eof".into()));
        assert!(matches!(err, ConsumerError::Decode(_)));
    }

    #[test]
    fn store_timeouts_stay_timeouts() {
        let err = ConsumerError::from(StoreError::Timeout("pool".into()));
        assert!(matches!(err, ConsumerError::Timeout(_)));
        let err = ConsumerError::from(StoreError::Database("down".into()));
        assert!(err.is_retryable());
    }

    #[test]
    fn outcome_labels() {
        assert_eq!(ApplyOutcome::Applied.as_str(), "applied");
        assert_eq!(
            ApplyOutcome::Skipped(SkipReason::Stale).as_str(),
            "skipped_stale"
        );
        assert!(!ApplyOutcome::Skipped(SkipReason::Unsupported).is_applied());
    }
}
