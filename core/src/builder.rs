//! Domain event builder.
//!
//! Turns a `(previous, updated)` pair of aggregate snapshots into event payloads and
//! stamps them into [`DomainEvent`]s with monotonically increasing versions.
//!
//! # Suppression
//!
//! Stage-completion payloads (`media_ready`, `ai_enriched`) are not rebuilt when the
//! stage was already `ready` and none of the stage's observable fields changed. A
//! retried call that re-applies identical data therefore announces nothing new.
//!
//! # Versioning
//!
//! Events of one write get consecutive versions starting at
//! `max(micros(now), previous.version + 1)`; each event's `occurred_at` is the instant
//! its version denotes.

use crate::event::{
    AiEnriched, DomainEvent, EventPayload, MediaReady, ProcessingFailed, VideoChanges,
    VideoDeleted, VideoSnapshot, VisibilityChanged,
};
use crate::ids::EventVersion;
use crate::video::{Stage, StageStatus, Video};
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Hands out consecutive versions for the events of one unit of work.
#[derive(Debug, Clone, Copy)]
pub struct VersionSequence {
    next: EventVersion,
}

impl VersionSequence {
    /// Sequence whose first version is the next one after `previous` at `now`.
    #[must_use]
    pub fn after(previous: EventVersion, now: DateTime<Utc>) -> Self {
        Self {
            next: EventVersion::next_after(previous, now),
        }
    }

    /// Version that the next call to [`VersionSequence::allocate`] returns.
    #[must_use]
    pub const fn peek(&self) -> EventVersion {
        self.next
    }

    /// Take the next version.
    pub const fn allocate(&mut self) -> EventVersion {
        let version = self.next;
        self.next = version.next();
        version
    }
}

/// Builds events for one aggregate type.
#[derive(Debug, Clone)]
pub struct EventBuilder {
    aggregate_type: String,
}

impl EventBuilder {
    /// Create a builder for the given aggregate type name.
    #[must_use]
    pub fn new(aggregate_type: impl Into<String>) -> Self {
        Self {
            aggregate_type: aggregate_type.into(),
        }
    }

    /// Aggregate type name stamped on every event.
    #[must_use]
    pub fn aggregate_type(&self) -> &str {
        &self.aggregate_type
    }

    /// Payload for a newly registered video.
    #[must_use]
    pub fn created(video: &Video) -> EventPayload {
        EventPayload::Created(VideoSnapshot {
            video_id: video.id,
            upload_user_id: video.upload_user_id,
            title: video.title.clone(),
            description: video.description.clone(),
            status: video.status,
            media_status: video.media_status,
            analysis_status: video.analysis_status,
            visibility: video.visibility_status,
            publish_at: video.publish_at,
            version: video.version,
            created_at: video.created_at,
        })
    }

    /// Field-level diff payload for an update.
    #[must_use]
    pub fn updated(previous: &Video, updated: &Video) -> EventPayload {
        EventPayload::Updated(diff(previous, updated))
    }

    /// Payload for a removed video.
    #[must_use]
    pub fn deleted(video: &Video, reason: Option<String>) -> EventPayload {
        EventPayload::Deleted(VideoDeleted {
            video_id: video.id,
            version: video.version,
            reason,
        })
    }

    /// `media_ready` payload, unless the media stage is not ready or nothing
    /// observable changed since it last became ready.
    #[must_use]
    pub fn media_ready(previous: &Video, updated: &Video) -> Option<EventPayload> {
        if updated.media_status != StageStatus::Ready {
            return None;
        }
        if previous.media_status == StageStatus::Ready && previous.media == updated.media {
            return None;
        }
        Some(EventPayload::MediaReady(MediaReady {
            video_id: updated.id,
            version: updated.version,
            status: updated.status,
            job_id: updated.media_token.job_id.clone(),
            emitted_at: updated.media_token.emitted_at,
            media: updated.media.clone(),
        }))
    }

    /// `ai_enriched` payload, unless the analysis stage is not ready or nothing
    /// observable changed since it last became ready.
    #[must_use]
    pub fn ai_enriched(previous: &Video, updated: &Video) -> Option<EventPayload> {
        if updated.analysis_status != StageStatus::Ready {
            return None;
        }
        if previous.analysis_status == StageStatus::Ready && previous.ai == updated.ai {
            return None;
        }
        Some(EventPayload::AiEnriched(AiEnriched {
            video_id: updated.id,
            version: updated.version,
            status: updated.status,
            job_id: updated.analysis_token.job_id.clone(),
            emitted_at: updated.analysis_token.emitted_at,
            ai: updated.ai.clone(),
        }))
    }

    /// `processing_failed` payload when `stage` has just failed (or failed again
    /// with a different message).
    #[must_use]
    pub fn processing_failed(
        stage: Stage,
        previous: &Video,
        updated: &Video,
    ) -> Option<EventPayload> {
        if updated.stage_status(stage) != StageStatus::Failed {
            return None;
        }
        if previous.stage_status(stage) == StageStatus::Failed
            && previous.error_message == updated.error_message
        {
            return None;
        }
        Some(EventPayload::ProcessingFailed(ProcessingFailed {
            video_id: updated.id,
            version: updated.version,
            status: updated.status,
            stage,
            job_id: updated.stage_token(stage).job_id.clone(),
            error_message: updated.error_message.clone(),
        }))
    }

    /// `visibility_changed` payload, only if the overall status changed.
    #[must_use]
    pub fn visibility_changed(previous: &Video, updated: &Video) -> Option<EventPayload> {
        if previous.status == updated.status {
            return None;
        }
        Some(EventPayload::VisibilityChanged(VisibilityChanged {
            video_id: updated.id,
            version: updated.version,
            status: updated.status,
            previous_status: previous.status,
            visibility: updated.visibility_status,
            publish_at: updated.publish_at,
        }))
    }

    /// Stamp payloads into events, taking one version per payload from `versions`.
    ///
    /// Payloads whose version cannot be represented as an instant fall back to
    /// `fallback_time` for `occurred_at`.
    pub fn stamp(
        &self,
        video: &Video,
        payloads: Vec<EventPayload>,
        versions: &mut VersionSequence,
        fallback_time: DateTime<Utc>,
    ) -> Vec<DomainEvent> {
        payloads
            .into_iter()
            .map(|mut payload| {
                let version = versions.allocate();
                payload.set_version(version);
                DomainEvent {
                    event_id: Uuid::new_v4(),
                    aggregate_id: video.id,
                    aggregate_type: self.aggregate_type.clone(),
                    version,
                    occurred_at: version.instant().unwrap_or(fallback_time),
                    payload,
                }
            })
            .collect()
    }
}

/// Field-level diff between two snapshots.
#[must_use]
pub fn diff(previous: &Video, updated: &Video) -> VideoChanges {
    let mut changes = VideoChanges {
        video_id: Some(updated.id),
        version: updated.version,
        ..VideoChanges::default()
    };

    macro_rules! track {
        ($name:literal, $prev:expr, $next:expr) => {
            if $prev != $next {
                changes.changed_fields.push($name.to_string());
                true
            } else {
                false
            }
        };
    }

    if track!("title", previous.title, updated.title) {
        changes.title = Some(updated.title.clone());
    }
    if track!("description", previous.description, updated.description) {
        changes.description.clone_from(&updated.description);
    }
    if track!("status", previous.status, updated.status) {
        changes.status = Some(updated.status);
    }
    if track!("media_status", previous.media_status, updated.media_status) {
        changes.media_status = Some(updated.media_status);
    }
    if track!("analysis_status", previous.analysis_status, updated.analysis_status) {
        changes.analysis_status = Some(updated.analysis_status);
    }
    if track!("visibility_status", previous.visibility_status, updated.visibility_status) {
        changes.visibility = updated.visibility_status;
    }
    if track!("publish_at", previous.publish_at, updated.publish_at) {
        changes.publish_at = updated.publish_at;
    }
    if track!("duration", previous.media.duration_micros, updated.media.duration_micros) {
        changes.duration_micros = updated.media.duration_micros;
    }
    track!(
        "encoded_resolution",
        previous.media.encoded_resolution,
        updated.media.encoded_resolution
    );
    track!(
        "encoded_bitrate",
        previous.media.encoded_bitrate,
        updated.media.encoded_bitrate
    );
    if track!(
        "thumbnail_url",
        previous.media.thumbnail_url,
        updated.media.thumbnail_url
    ) {
        changes.thumbnail_url.clone_from(&updated.media.thumbnail_url);
    }
    if track!(
        "hls_master_playlist",
        previous.media.hls_master_playlist,
        updated.media.hls_master_playlist
    ) {
        changes
            .hls_master_playlist
            .clone_from(&updated.media.hls_master_playlist);
    }
    track!("difficulty", previous.ai.difficulty, updated.ai.difficulty);
    track!("summary", previous.ai.summary, updated.ai.summary);
    track!("tags", previous.ai.tags, updated.ai.tags);
    track!(
        "raw_subtitle_url",
        previous.ai.raw_subtitle_url,
        updated.ai.raw_subtitle_url
    );
    if track!("error_message", previous.error_message, updated.error_message) {
        changes.error_message.clone_from(&updated.error_message);
    }
    track!("media_job", previous.media_token, updated.media_token);
    track!("analysis_job", previous.analysis_token, updated.analysis_token);

    changes
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::event::EventKind;
    use crate::ids::{UserId, VideoId};
    use crate::video::{AiAttributes, FencingToken, MediaAttributes, VideoStatus};
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    fn video() -> Video {
        Video {
            id: VideoId::new(),
            upload_user_id: UserId::new(),
            title: "Intro to Rust".into(),
            description: None,
            raw_file_reference: "raw/1".into(),
            status: VideoStatus::Processing,
            media_status: StageStatus::Processing,
            analysis_status: StageStatus::Pending,
            media_token: FencingToken::new("m1", t0()),
            analysis_token: FencingToken::default(),
            media: MediaAttributes::default(),
            ai: AiAttributes::default(),
            visibility_status: None,
            publish_at: None,
            error_message: None,
            version: EventVersion::from_instant(t0()),
            created_at: t0(),
            updated_at: t0(),
        }
    }

    fn with_media_ready(mut v: Video) -> Video {
        v.media_status = StageStatus::Ready;
        v.media.duration_micros = Some(1_000_000);
        v.media.thumbnail_url = Some("https://cdn/t.jpg".into());
        v
    }

    #[test]
    fn media_ready_emitted_on_first_completion() {
        let previous = video();
        let updated = with_media_ready(previous.clone());
        let payload = EventBuilder::media_ready(&previous, &updated).unwrap();
        assert_eq!(payload.kind(), EventKind::MediaReady);
    }

    #[test]
    fn media_ready_suppressed_when_nothing_changed() {
        let previous = with_media_ready(video());
        let updated = previous.clone();
        assert!(EventBuilder::media_ready(&previous, &updated).is_none());
    }

    #[test]
    fn media_ready_reemitted_when_payload_changes() {
        let previous = with_media_ready(video());
        let mut updated = previous.clone();
        updated.media.thumbnail_url = Some("https://cdn/t2.jpg".into());
        assert!(EventBuilder::media_ready(&previous, &updated).is_some());
    }

    #[test]
    fn ai_enriched_suppressed_when_nothing_changed() {
        let mut previous = video();
        previous.analysis_status = StageStatus::Ready;
        previous.ai.tags = vec!["rust".into()];
        assert!(EventBuilder::ai_enriched(&previous, &previous.clone()).is_none());
    }

    #[test]
    fn processing_failed_only_on_new_failure() {
        let previous = video();
        let mut failed = previous.clone();
        failed.media_status = StageStatus::Failed;
        failed.error_message = Some("codec".into());

        assert!(EventBuilder::processing_failed(Stage::Media, &previous, &failed).is_some());
        assert!(EventBuilder::processing_failed(Stage::Media, &failed, &failed.clone()).is_none());
        assert!(EventBuilder::processing_failed(Stage::Analysis, &previous, &failed).is_none());
    }

    #[test]
    fn visibility_changed_requires_status_change() {
        let previous = video();
        assert!(EventBuilder::visibility_changed(&previous, &previous.clone()).is_none());

        let mut published = previous.clone();
        published.status = VideoStatus::Published;
        let payload = EventBuilder::visibility_changed(&previous, &published).unwrap();
        assert_eq!(payload.kind(), EventKind::VisibilityChanged);
    }

    #[test]
    fn diff_lists_changed_fields_only() {
        let previous = video();
        let mut updated = previous.clone();
        updated.title = "Advanced Rust".into();
        updated.media.encoded_bitrate = Some(3000);

        let changes = diff(&previous, &updated);
        assert_eq!(changes.changed_fields, vec!["title", "encoded_bitrate"]);
        assert_eq!(changes.title.as_deref(), Some("Advanced Rust"));
        assert!(changes.status.is_none());
    }

    #[test]
    fn stamp_assigns_consecutive_versions() {
        let previous = video();
        let updated = with_media_ready(previous.clone());
        let builder = EventBuilder::new("video");

        let mut versions = VersionSequence::after(previous.version, t0());
        let payloads = vec![
            EventBuilder::updated(&previous, &updated),
            EventBuilder::media_ready(&previous, &updated).unwrap(),
        ];
        let events = builder.stamp(&updated, payloads, &mut versions, t0());

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].version, previous.version.next());
        assert_eq!(events[1].version, events[0].version.next());
        assert_eq!(events[1].payload.version(), events[1].version);
        assert_eq!(events[1].occurred_at, t0() + Duration::microseconds(2));
        assert_eq!(versions.peek(), events[1].version.next());
    }
}
