//! Catalog projection consumer.
//!
//! Merges lifecycle events into [`ProfileVideoProjection`] rows behind a whole-row
//! version gate:
//!
//! ```text
//! decode ─▶ resolve video id ─▶ effective version = max(envelope, payload)
//!        ─▶ load row (absent ⇒ empty) ─▶ effective <= row.version ? skip
//!        ─▶ coalesce merge ─▶ upsert(version = effective)
//! ```
//!
//! A `deleted` event overwrites the status with [`DELETED_STATUS`] and keeps the row.

use serde::Deserialize;
use video_catalog_core::environment::{Clock, SystemClock};
use video_catalog_core::event::{EventEnvelope, EventPayload, decode_envelope};
use video_catalog_core::projection::{
    ApplyOutcome, CatalogProjectionStore, ConsumerError, DELETED_STATUS, InboxHandler,
    InboxMetadata, ProfileVideoProjection, SkipReason,
};
use video_catalog_core::store::StoreError;
use video_catalog_core::video::VideoStatus;
use video_catalog_core::{EventKind, EventVersion, VideoId};

/// A message delivered to the catalog consumer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CatalogMessage {
    /// A lifecycle event this consumer understands.
    Lifecycle(Box<EventEnvelope>),
    /// A readable message of a kind this consumer does not handle.
    Unsupported {
        /// Event type as sent
        event_type: String,
        /// Aggregate type as sent
        aggregate_type: String,
    },
}

/// Just enough of a textual envelope to name what it is.
#[derive(Deserialize)]
struct EnvelopeHeader {
    event_type: String,
    #[serde(default)]
    aggregate_type: String,
}

/// Catalog projection consumer.
#[derive(Debug, Clone)]
pub struct CatalogConsumer<S, C = SystemClock> {
    store: S,
    clock: C,
    aggregate_type: String,
}

impl<S, C> CatalogConsumer<S, C>
where
    S: CatalogProjectionStore,
    C: Clock,
{
    /// Consume `video` aggregate events into `store`.
    pub fn new(store: S, clock: C) -> Self {
        Self {
            store,
            clock,
            aggregate_type: "video".to_string(),
        }
    }

    /// Consume events of another aggregate type name.
    #[must_use]
    pub fn with_aggregate_type(mut self, aggregate_type: impl Into<String>) -> Self {
        self.aggregate_type = aggregate_type.into();
        self
    }

    async fn apply(
        &self,
        tx: &mut S::Tx,
        envelope: &EventEnvelope,
    ) -> Result<ApplyOutcome, ConsumerError> {
        let video_id = resolve_video_id(envelope)?;
        let effective = effective_version(envelope);

        let current = self.store.load(tx, video_id).await?;
        if let Some(row) = &current {
            if effective <= row.version {
                tracing::debug!(
                    %video_id,
                    event_type = %envelope.event_type,
                    version = %effective,
                    current = %row.version,
                    "Skipping stale catalog event"
                );
                return Ok(ApplyOutcome::Skipped(SkipReason::Stale));
            }
        }

        let now = self.clock.now();
        let mut row = current.unwrap_or_else(|| ProfileVideoProjection::empty(video_id, now));
        merge(&mut row, &envelope.payload);
        row.version = effective;
        row.updated_at = now;
        match self.store.upsert(tx, &row).await {
            Ok(()) => {}
            Err(StoreError::VersionConflict { actual, .. }) => {
                tracing::debug!(
                    %video_id,
                    event_type = %envelope.event_type,
                    version = %effective,
                    current = %actual,
                    "Catalog event lost to a newer version"
                );
                return Ok(ApplyOutcome::Skipped(SkipReason::Stale));
            }
            Err(err) => return Err(err.into()),
        }

        tracing::info!(
            %video_id,
            event_type = %envelope.event_type,
            version = %effective,
            "Applied catalog event"
        );
        Ok(ApplyOutcome::Applied)
    }
}

impl<S, C> InboxHandler for CatalogConsumer<S, C>
where
    S: CatalogProjectionStore,
    C: Clock,
{
    type Event = CatalogMessage;
    type Store = S;

    fn name(&self) -> &str {
        "catalog"
    }

    fn store(&self) -> &S {
        &self.store
    }

    fn decode(&self, bytes: &[u8]) -> Result<CatalogMessage, ConsumerError> {
        match decode_envelope(bytes) {
            Ok(envelope) if envelope.aggregate_type != self.aggregate_type => {
                Ok(CatalogMessage::Unsupported {
                    event_type: envelope.event_type.to_string(),
                    aggregate_type: envelope.aggregate_type,
                })
            }
            Ok(envelope) => Ok(CatalogMessage::Lifecycle(Box::new(envelope))),
            Err(err) => match serde_json::from_slice::<EnvelopeHeader>(bytes) {
                Ok(header) if header.event_type.parse::<EventKind>().is_err() => {
                    Ok(CatalogMessage::Unsupported {
                        event_type: header.event_type,
                        aggregate_type: header.aggregate_type,
                    })
                }
                _ => Err(err.into()),
            },
        }
    }

    async fn handle(
        &self,
        tx: &mut S::Tx,
        event: &CatalogMessage,
        metadata: &InboxMetadata,
    ) -> Result<ApplyOutcome, ConsumerError> {
        match event {
            CatalogMessage::Lifecycle(envelope) => self.apply(tx, envelope).await,
            CatalogMessage::Unsupported {
                event_type,
                aggregate_type,
            } => {
                tracing::warn!(
                    event_type = %event_type,
                    aggregate_type = %aggregate_type,
                    message_id = ?metadata.message_id,
                    "Skipping unsupported catalog message"
                );
                Ok(ApplyOutcome::Skipped(SkipReason::Unsupported))
            }
        }
    }
}

/// Aggregate id from the envelope, cross-checked against the payload.
fn resolve_video_id(envelope: &EventEnvelope) -> Result<VideoId, ConsumerError> {
    let from_envelope = envelope.aggregate_id.parse::<VideoId>().ok();
    match (from_envelope, envelope.payload.video_id()) {
        (Some(a), Some(b)) if a != b => Err(ConsumerError::Invalid(format!(
            "aggregate_id {a} disagrees with payload video_id {b}"
        ))),
        (Some(id), _) | (None, Some(id)) => Ok(id),
        (None, None) => Err(ConsumerError::Invalid(format!(
            "unusable aggregate_id {:?}",
            envelope.aggregate_id
        ))),
    }
}

/// The greater of the envelope and payload versions.
fn effective_version(envelope: &EventEnvelope) -> EventVersion {
    envelope.version().max(envelope.payload.version())
}

/// Coalesce `payload` into `row`: present values overwrite, absent ones keep the row's.
fn merge(row: &mut ProfileVideoProjection, payload: &EventPayload) {
    fn set<T: Clone>(slot: &mut Option<T>, value: Option<&T>) {
        if let Some(value) = value {
            *slot = Some(value.clone());
        }
    }

    match payload {
        EventPayload::Created(snapshot) => {
            row.title = Some(snapshot.title.clone());
            set(&mut row.description, snapshot.description.as_ref());
            row.status = Some(snapshot.status.to_string());
            set(&mut row.visibility, snapshot.visibility.as_ref());
            if snapshot.status == VideoStatus::Published {
                set(&mut row.published_at, snapshot.publish_at.as_ref());
            }
        }
        EventPayload::Updated(changes) => {
            set(&mut row.title, changes.title.as_ref());
            set(&mut row.description, changes.description.as_ref());
            set(&mut row.duration_micros, changes.duration_micros.as_ref());
            set(&mut row.thumbnail_url, changes.thumbnail_url.as_ref());
            set(&mut row.hls_master_playlist, changes.hls_master_playlist.as_ref());
            set(&mut row.visibility, changes.visibility.as_ref());
            set(&mut row.published_at, changes.publish_at.as_ref());
            if let Some(status) = changes.status {
                row.status = Some(status.to_string());
            }
        }
        EventPayload::Deleted(_) => {
            row.status = Some(DELETED_STATUS.to_string());
        }
        EventPayload::MediaReady(ready) => {
            set(&mut row.duration_micros, ready.media.duration_micros.as_ref());
            set(&mut row.thumbnail_url, ready.media.thumbnail_url.as_ref());
            set(&mut row.hls_master_playlist, ready.media.hls_master_playlist.as_ref());
            row.status = Some(ready.status.to_string());
        }
        EventPayload::AiEnriched(enriched) => {
            row.status = Some(enriched.status.to_string());
        }
        EventPayload::ProcessingFailed(failed) => {
            row.status = Some(failed.status.to_string());
        }
        EventPayload::VisibilityChanged(changed) => {
            row.status = Some(changed.status.to_string());
            set(&mut row.visibility, changed.visibility.as_ref());
            set(&mut row.published_at, changed.publish_at.as_ref());
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;
    use video_catalog_core::event::{VideoChanges, VideoDeleted};
    use video_catalog_core::video::Visibility;

    fn row() -> ProfileVideoProjection {
        let at = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let mut row = ProfileVideoProjection::empty(VideoId::new(), at);
        row.title = Some("Old".into());
        row.description = Some("Kept".into());
        row.status = Some("processing".into());
        row
    }

    fn envelope(aggregate_id: String, version: i64, payload: EventPayload) -> EventEnvelope {
        EventEnvelope {
            event_id: Uuid::new_v4(),
            event_type: payload.kind(),
            aggregate_id,
            aggregate_type: "video".into(),
            version,
            occurred_at: "2025-01-01T00:00:00.000000000Z".into(),
            payload,
        }
    }

    #[test]
    fn updates_coalesce_into_the_row() {
        let mut row = row();
        merge(
            &mut row,
            &EventPayload::Updated(VideoChanges {
                title: Some("New".into()),
                status: Some(VideoStatus::Ready),
                visibility: Some(Visibility::Unlisted),
                ..VideoChanges::default()
            }),
        );

        assert_eq!(row.title.as_deref(), Some("New"));
        assert_eq!(row.description.as_deref(), Some("Kept"));
        assert_eq!(row.status.as_deref(), Some("ready"));
        assert_eq!(row.visibility, Some(Visibility::Unlisted));
    }

    #[test]
    fn delete_marks_status_only() {
        let mut row = row();
        let video_id = row.video_id;
        merge(
            &mut row,
            &EventPayload::Deleted(VideoDeleted {
                video_id,
                version: EventVersion::new(9),
                reason: None,
            }),
        );
        assert_eq!(row.status.as_deref(), Some(DELETED_STATUS));
        assert_eq!(row.title.as_deref(), Some("Old"));
    }

    #[test]
    fn effective_version_takes_the_larger() {
        let id = VideoId::new();
        let payload = EventPayload::Deleted(VideoDeleted {
            video_id: id,
            version: EventVersion::new(20),
            reason: None,
        });
        assert_eq!(
            effective_version(&envelope(id.to_string(), 10, payload.clone())),
            EventVersion::new(20)
        );
        assert_eq!(
            effective_version(&envelope(id.to_string(), 30, payload)),
            EventVersion::new(30)
        );
    }

    #[test]
    fn video_id_falls_back_to_payload_and_rejects_disagreement() {
        let id = VideoId::new();
        let payload = EventPayload::Deleted(VideoDeleted {
            video_id: id,
            version: EventVersion::new(1),
            reason: None,
        });

        let garbled = envelope("not-a-uuid".into(), 1, payload.clone());
        assert_eq!(resolve_video_id(&garbled).unwrap(), id);

        let other = envelope(VideoId::new().to_string(), 1, payload);
        assert!(matches!(
            resolve_video_id(&other),
            Err(ConsumerError::Invalid(_))
        ));

        let anonymous = envelope(String::new(), 1, EventPayload::Updated(VideoChanges::default()));
        assert!(matches!(
            resolve_video_id(&anonymous),
            Err(ConsumerError::Invalid(_))
        ));
    }
}
