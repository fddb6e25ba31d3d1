//! Domain events and their wire representation.
//!
//! A [`DomainEvent`] is an immutable, versioned fact about a video. Its payload is the
//! closed sum type [`EventPayload`]: one variant per [`EventKind`], matched
//! exhaustively wherever events are encoded or projected, so adding a kind forces
//! every consumer to decide how to handle it.
//!
//! # Wire Format
//!
//! Events cross service boundaries as an [`EventEnvelope`]:
//!
//! ```text
//! event_id | event_type | aggregate_id | aggregate_type | version (i64)
//!          | occurred_at (RFC 3339, nanoseconds) | payload (variant matching event_type)
//! ```
//!
//! The preferred encoding is `bincode` ([`BincodeEncoder`]); `serde_json`
//! ([`JsonEncoder`]) is the textual form. Decoders accept both
//! ([`decode_envelope`], [`decode_dual_format`]).

use crate::ids::{EventVersion, UserId, VideoId};
use crate::video::{AiAttributes, MediaAttributes, Stage, StageStatus, VideoStatus, Visibility};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Error types for event encoding and decoding.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    /// Failed to serialize an event to bytes.
    #[error("Failed to serialize event: {0}")]
    Serialization(String),

    /// Failed to deserialize an event from bytes.
    #[error("Failed to deserialize event: {0}")]
    Deserialization(String),

    /// The envelope's `event_type` does not match its payload variant.
    #[error("Event type {declared} does not match payload {actual}")]
    KindMismatch {
        /// Kind named by the envelope
        declared: EventKind,
        /// Kind of the payload variant
        actual: EventKind,
    },

    /// Unknown event type string.
    #[error("Unknown event type: {0}")]
    UnknownEventType(String),
}

/// Kind of a domain event.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// Video registered
    #[serde(rename = "video.created")]
    Created,
    /// Fields changed
    #[serde(rename = "video.updated")]
    Updated,
    /// Video removed
    #[serde(rename = "video.deleted")]
    Deleted,
    /// Media stage completed
    #[serde(rename = "video.media_ready")]
    MediaReady,
    /// Analysis stage completed
    #[serde(rename = "video.ai_enriched")]
    AiEnriched,
    /// A stage failed
    #[serde(rename = "video.processing_failed")]
    ProcessingFailed,
    /// Overall status changed through a visibility action
    #[serde(rename = "video.visibility_changed")]
    VisibilityChanged,
}

impl EventKind {
    /// All kinds.
    pub const ALL: &'static [Self] = &[
        Self::Created,
        Self::Updated,
        Self::Deleted,
        Self::MediaReady,
        Self::AiEnriched,
        Self::ProcessingFailed,
        Self::VisibilityChanged,
    ];

    /// Stable event type identifier.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "video.created",
            Self::Updated => "video.updated",
            Self::Deleted => "video.deleted",
            Self::MediaReady => "video.media_ready",
            Self::AiEnriched => "video.ai_enriched",
            Self::ProcessingFailed => "video.processing_failed",
            Self::VisibilityChanged => "video.visibility_changed",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| EventError::UnknownEventType(s.to_string()))
    }
}

/// Full snapshot carried by `video.created`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoSnapshot {
    /// Video identity
    pub video_id: VideoId,
    /// Uploader
    pub upload_user_id: UserId,
    /// Title
    pub title: String,
    /// Description
    pub description: Option<String>,
    /// Overall status
    pub status: VideoStatus,
    /// Media stage status
    pub media_status: StageStatus,
    /// Analysis stage status
    pub analysis_status: StageStatus,
    /// Audience
    pub visibility: Option<Visibility>,
    /// Publish time
    pub publish_at: Option<DateTime<Utc>>,
    /// Aggregate version at this event
    pub version: EventVersion,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// Field-level diff carried by `video.updated`.
///
/// Only fields that changed are `Some`; `changed_fields` names every changed field,
/// including ones without a dedicated slot here.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoChanges {
    /// Video identity
    pub video_id: Option<VideoId>,
    /// Aggregate version at this event
    pub version: EventVersion,
    /// Names of the changed fields
    pub changed_fields: Vec<String>,
    /// New title
    pub title: Option<String>,
    /// New description
    pub description: Option<String>,
    /// New overall status
    pub status: Option<VideoStatus>,
    /// New media stage status
    pub media_status: Option<StageStatus>,
    /// New analysis stage status
    pub analysis_status: Option<StageStatus>,
    /// New audience
    pub visibility: Option<Visibility>,
    /// New publish time
    pub publish_at: Option<DateTime<Utc>>,
    /// New duration
    pub duration_micros: Option<i64>,
    /// New thumbnail
    pub thumbnail_url: Option<String>,
    /// New playlist
    pub hls_master_playlist: Option<String>,
    /// New error message
    pub error_message: Option<String>,
}

impl VideoChanges {
    /// Whether nothing changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changed_fields.is_empty()
    }
}

/// Payload of `video.deleted`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoDeleted {
    /// Video identity
    pub video_id: VideoId,
    /// Aggregate version at this event
    pub version: EventVersion,
    /// Why it was deleted
    pub reason: Option<String>,
}

/// Payload of `video.media_ready`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaReady {
    /// Video identity
    pub video_id: VideoId,
    /// Aggregate version at this event
    pub version: EventVersion,
    /// Overall status after the write
    pub status: VideoStatus,
    /// Job that completed the stage
    pub job_id: Option<String>,
    /// When the job emitted its completion
    pub emitted_at: Option<DateTime<Utc>>,
    /// Stage output
    pub media: MediaAttributes,
}

/// Payload of `video.ai_enriched`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AiEnriched {
    /// Video identity
    pub video_id: VideoId,
    /// Aggregate version at this event
    pub version: EventVersion,
    /// Overall status after the write
    pub status: VideoStatus,
    /// Job that completed the stage
    pub job_id: Option<String>,
    /// When the job emitted its completion
    pub emitted_at: Option<DateTime<Utc>>,
    /// Stage output
    pub ai: AiAttributes,
}

/// Payload of `video.processing_failed`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingFailed {
    /// Video identity
    pub video_id: VideoId,
    /// Aggregate version at this event
    pub version: EventVersion,
    /// Overall status after the write
    pub status: VideoStatus,
    /// Stage that failed
    pub stage: Stage,
    /// Job that reported the failure
    pub job_id: Option<String>,
    /// Failure description
    pub error_message: Option<String>,
}

/// Payload of `video.visibility_changed`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisibilityChanged {
    /// Video identity
    pub video_id: VideoId,
    /// Aggregate version at this event
    pub version: EventVersion,
    /// Overall status after the write
    pub status: VideoStatus,
    /// Overall status before the write
    pub previous_status: VideoStatus,
    /// Audience after the write
    pub visibility: Option<Visibility>,
    /// Publish time after the write
    pub publish_at: Option<DateTime<Utc>>,
}

/// Closed set of event payloads.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventPayload {
    /// `video.created`
    Created(VideoSnapshot),
    /// `video.updated`
    Updated(VideoChanges),
    /// `video.deleted`
    Deleted(VideoDeleted),
    /// `video.media_ready`
    MediaReady(MediaReady),
    /// `video.ai_enriched`
    AiEnriched(AiEnriched),
    /// `video.processing_failed`
    ProcessingFailed(ProcessingFailed),
    /// `video.visibility_changed`
    VisibilityChanged(VisibilityChanged),
}

impl EventPayload {
    /// Kind of this payload.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Created(_) => EventKind::Created,
            Self::Updated(_) => EventKind::Updated,
            Self::Deleted(_) => EventKind::Deleted,
            Self::MediaReady(_) => EventKind::MediaReady,
            Self::AiEnriched(_) => EventKind::AiEnriched,
            Self::ProcessingFailed(_) => EventKind::ProcessingFailed,
            Self::VisibilityChanged(_) => EventKind::VisibilityChanged,
        }
    }

    /// Aggregate version recorded inside the payload.
    #[must_use]
    pub const fn version(&self) -> EventVersion {
        match self {
            Self::Created(p) => p.version,
            Self::Updated(p) => p.version,
            Self::Deleted(p) => p.version,
            Self::MediaReady(p) => p.version,
            Self::AiEnriched(p) => p.version,
            Self::ProcessingFailed(p) => p.version,
            Self::VisibilityChanged(p) => p.version,
        }
    }

    /// Stamp the aggregate version into the payload.
    pub fn set_version(&mut self, version: EventVersion) {
        match self {
            Self::Created(p) => p.version = version,
            Self::Updated(p) => p.version = version,
            Self::Deleted(p) => p.version = version,
            Self::MediaReady(p) => p.version = version,
            Self::AiEnriched(p) => p.version = version,
            Self::ProcessingFailed(p) => p.version = version,
            Self::VisibilityChanged(p) => p.version = version,
        }
    }

    /// Video the payload is about, when it names one.
    #[must_use]
    pub const fn video_id(&self) -> Option<VideoId> {
        match self {
            Self::Created(p) => Some(p.video_id),
            Self::Updated(p) => p.video_id,
            Self::Deleted(p) => Some(p.video_id),
            Self::MediaReady(p) => Some(p.video_id),
            Self::AiEnriched(p) => Some(p.video_id),
            Self::ProcessingFailed(p) => Some(p.video_id),
            Self::VisibilityChanged(p) => Some(p.video_id),
        }
    }
}

/// An immutable, versioned domain event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DomainEvent {
    /// Unique event identifier
    pub event_id: Uuid,
    /// Aggregate the event belongs to
    pub aggregate_id: VideoId,
    /// Aggregate type name (e.g. `"video"`)
    pub aggregate_type: String,
    /// Clock-derived, monotonic version
    pub version: EventVersion,
    /// When the event occurred
    pub occurred_at: DateTime<Utc>,
    /// What happened
    pub payload: EventPayload,
}

impl DomainEvent {
    /// Kind of this event.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    /// Wire form of this event.
    #[must_use]
    pub fn to_envelope(&self) -> EventEnvelope {
        EventEnvelope {
            event_id: self.event_id,
            event_type: self.kind(),
            aggregate_id: self.aggregate_id.to_string(),
            aggregate_type: self.aggregate_type.clone(),
            version: self.version.value(),
            occurred_at: self.occurred_at.to_rfc3339_opts(SecondsFormat::Nanos, true),
            payload: self.payload.clone(),
        }
    }
}

/// Cross-service wire shape of an event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique event identifier
    pub event_id: Uuid,
    /// Kind; must match the payload variant
    pub event_type: EventKind,
    /// Aggregate identifier as text
    pub aggregate_id: String,
    /// Aggregate type name
    pub aggregate_type: String,
    /// Event version
    pub version: i64,
    /// RFC 3339 timestamp with nanosecond precision
    pub occurred_at: String,
    /// Payload variant
    pub payload: EventPayload,
}

impl EventEnvelope {
    /// Check that `event_type` matches the payload variant.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::KindMismatch`] on disagreement.
    pub fn validate(&self) -> Result<(), EventError> {
        let actual = self.payload.kind();
        if actual == self.event_type {
            Ok(())
        } else {
            Err(EventError::KindMismatch {
                declared: self.event_type,
                actual,
            })
        }
    }

    /// Parse `occurred_at`.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Deserialization`] if the timestamp is not RFC 3339.
    pub fn occurred_at(&self) -> Result<DateTime<Utc>, EventError> {
        DateTime::parse_from_rfc3339(&self.occurred_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| {
                EventError::Deserialization(format!("occurred_at {}: {e}", self.occurred_at))
            })
    }

    /// Envelope version.
    #[must_use]
    pub const fn version(&self) -> EventVersion {
        EventVersion::new(self.version)
    }
}

/// Encodes envelopes into outbox payload bytes.
///
/// Injected into the lifecycle writer so the encoding step is replaceable (and can be
/// made to fail in tests).
pub trait EventEncoder: Send + Sync {
    /// Encode an envelope.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Serialization`] if the envelope cannot be encoded.
    fn encode(&self, envelope: &EventEnvelope) -> Result<Vec<u8>, EventError>;

    /// MIME-like content type of the produced bytes, written to message headers.
    fn content_type(&self) -> &'static str;
}

/// Binary encoder (`bincode`), the preferred wire form.
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeEncoder;

impl EventEncoder for BincodeEncoder {
    fn encode(&self, envelope: &EventEnvelope) -> Result<Vec<u8>, EventError> {
        bincode::serialize(envelope).map_err(|e| EventError::Serialization(e.to_string()))
    }

    fn content_type(&self) -> &'static str {
        "application/x-bincode"
    }
}

/// Textual encoder (`serde_json`).
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonEncoder;

impl EventEncoder for JsonEncoder {
    fn encode(&self, envelope: &EventEnvelope) -> Result<Vec<u8>, EventError> {
        serde_json::to_vec(envelope).map_err(|e| EventError::Serialization(e.to_string()))
    }

    fn content_type(&self) -> &'static str {
        "application/json"
    }
}

/// Decode a value that may arrive in either wire form: `bincode` first, then JSON.
///
/// # Errors
///
/// Returns [`EventError::Deserialization`] naming both failures if neither form parses.
pub fn decode_dual_format<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, EventError> {
    match bincode::deserialize::<T>(bytes) {
        Ok(value) => Ok(value),
        Err(binary_err) => serde_json::from_slice::<T>(bytes).map_err(|text_err| {
            EventError::Deserialization(format!("binary: {binary_err}; text: {text_err}"))
        }),
    }
}

/// Decode and validate an event envelope.
///
/// # Errors
///
/// Returns [`EventError::Deserialization`] for unreadable bytes and
/// [`EventError::KindMismatch`] if the payload does not match `event_type`.
pub fn decode_envelope(bytes: &[u8]) -> Result<EventEnvelope, EventError> {
    let envelope: EventEnvelope = decode_dual_format(bytes)?;
    envelope.validate()?;
    Ok(envelope)
}
