//! The lifecycle writer.
//!
//! Every mutation of a video goes through [`LifecycleWriter`], which runs one unit of
//! work per call:
//!
//! ```text
//! begin ─▶ load/receive snapshot ─▶ expected_version check ─▶ apply patch
//!       ─▶ build events (primary + additional) ─▶ conditional write
//!       ─▶ encode + enqueue each event ─▶ commit
//! ```
//!
//! Any failure before `commit` drops the transaction handle, which rolls back both the
//! row change and every message enqueued so far. The whole unit runs under
//! [`WriterConfig::write_timeout`]; on expiry it is abandoned the same way and the
//! caller sees [`LifecycleError::GatewayTimeout`].

use crate::config::WriterConfig;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use uuid::Uuid;
use video_catalog_core::builder::{EventBuilder, VersionSequence};
use video_catalog_core::environment::{Clock, SystemClock};
use video_catalog_core::event::{
    BincodeEncoder, DomainEvent, EventEncoder, EventKind, EventPayload,
};
use video_catalog_core::metrics::{MetricsRecorder, NoopMetrics, WriteOperation};
use video_catalog_core::store::{OutboxMessage, OutboxStore, VideoStore, headers};
use video_catalog_core::video::{
    AiAttributes, FencingToken, MediaAttributes, StageStatus, Video, VideoStatus, Visibility,
};
use video_catalog_core::{EventVersion, LifecycleError, UserId, VideoId};

/// Caller context copied into outbox headers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestContext {
    /// Caller-supplied idempotency key
    pub idempotency_key: Option<String>,
    /// Trace identifier of the inbound request
    pub trace_id: Option<String>,
}

/// Input of [`LifecycleWriter::create_video`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreateVideoInput {
    /// Identity to use; generated when `None`
    pub video_id: Option<VideoId>,
    /// Uploader
    pub upload_user_id: UserId,
    /// Title
    pub title: String,
    /// Description
    pub description: Option<String>,
    /// Storage reference of the raw upload
    pub raw_file_reference: String,
    /// Caller context
    pub context: RequestContext,
}

/// Field patch applied by [`LifecycleWriter::update_video`].
///
/// `None` leaves a field unchanged.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UpdateVideoInput {
    /// Video to update
    pub video_id: VideoId,
    /// Optimistic check against the current version
    pub expected_version: Option<EventVersion>,
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
    /// New media fencing token
    pub media_token: Option<FencingToken>,
    /// New analysis fencing token
    pub analysis_token: Option<FencingToken>,
    /// New media output
    pub media: Option<MediaAttributes>,
    /// New analysis output
    pub ai: Option<AiAttributes>,
    /// New audience
    pub visibility: Option<Visibility>,
    /// New publish time
    pub publish_at: Option<DateTime<Utc>>,
    /// New error message
    pub error_message: Option<String>,
    /// Clear the stored error message
    pub clear_error: bool,
    /// Caller context
    pub context: RequestContext,
}

impl UpdateVideoInput {
    /// Empty patch for `video_id`.
    #[must_use]
    pub fn new(video_id: VideoId) -> Self {
        Self {
            video_id,
            ..Self::default()
        }
    }

    /// Whether the patch changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.status.is_none()
            && self.media_status.is_none()
            && self.analysis_status.is_none()
            && self.media_token.is_none()
            && self.analysis_token.is_none()
            && self.media.is_none()
            && self.ai.is_none()
            && self.visibility.is_none()
            && self.publish_at.is_none()
            && self.error_message.is_none()
            && !self.clear_error
    }

    fn apply(&self, video: &mut Video) {
        if let Some(title) = &self.title {
            video.title.clone_from(title);
        }
        if let Some(description) = &self.description {
            video.description = Some(description.clone());
        }
        if let Some(status) = self.status {
            video.status = status;
        }
        if let Some(status) = self.media_status {
            video.media_status = status;
        }
        if let Some(status) = self.analysis_status {
            video.analysis_status = status;
        }
        if let Some(token) = &self.media_token {
            video.media_token = token.clone();
        }
        if let Some(token) = &self.analysis_token {
            video.analysis_token = token.clone();
        }
        if let Some(media) = &self.media {
            video.media = media.clone();
        }
        if let Some(ai) = &self.ai {
            video.ai = ai.clone();
        }
        if let Some(visibility) = self.visibility {
            video.visibility_status = Some(visibility);
        }
        if let Some(publish_at) = self.publish_at {
            video.publish_at = Some(publish_at);
        }
        if self.clear_error {
            video.error_message = None;
        }
        if let Some(message) = &self.error_message {
            video.error_message = Some(message.clone());
        }
    }
}

/// Input of [`LifecycleWriter::delete_video`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeleteVideoInput {
    /// Video to delete
    pub video_id: VideoId,
    /// Optimistic check against the current version
    pub expected_version: Option<EventVersion>,
    /// Why it is deleted
    pub reason: Option<String>,
    /// Caller context
    pub context: RequestContext,
}

/// Events a stage service adds to an update, decided from `(previous, updated)`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AdditionalEvents {
    emitted: Vec<EventPayload>,
    suppressed: Vec<EventKind>,
}

impl AdditionalEvents {
    /// No additional events.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Add an event unconditionally.
    pub fn push(&mut self, payload: EventPayload) {
        self.emitted.push(payload);
    }

    /// Add a stage-completion event the builder may have suppressed.
    ///
    /// `None` is recorded as a suppression of `kind`.
    pub fn offer(&mut self, kind: EventKind, payload: Option<EventPayload>) {
        match payload {
            Some(payload) => self.emitted.push(payload),
            None => self.suppressed.push(kind),
        }
    }

    /// Add an event when there is one.
    pub fn push_some(&mut self, payload: Option<EventPayload>) {
        self.emitted.extend(payload);
    }

    /// Payloads to emit.
    #[must_use]
    pub fn emitted(&self) -> &[EventPayload] {
        &self.emitted
    }

    /// Kinds that were suppressed.
    #[must_use]
    pub fn suppressed(&self) -> &[EventKind] {
        &self.suppressed
    }
}

/// Builds additional events from `(previous, updated)`.
pub type AdditionalEventBuilder<'a> =
    Box<dyn Fn(&Video, &Video) -> AdditionalEvents + Send + Sync + 'a>;

/// Optional behaviour of [`LifecycleWriter::update_video`].
///
/// # Example
///
/// ```
/// use video_catalog_core::builder::EventBuilder;
/// use video_catalog_core::event::EventKind;
/// use video_catalog_lifecycle::writer::{AdditionalEvents, UpdateOptions};
///
/// let options = UpdateOptions::new().with_additional_events(|previous, updated| {
///     let mut events = AdditionalEvents::none();
///     events.offer(
///         EventKind::MediaReady,
///         EventBuilder::media_ready(previous, updated),
///     );
///     events
/// });
/// # let _ = options;
/// ```
#[derive(Default)]
pub struct UpdateOptions<'a> {
    previous: Option<Video>,
    additional: Option<AdditionalEventBuilder<'a>>,
}

impl<'a> UpdateOptions<'a> {
    /// No previous snapshot, no additional events.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a snapshot the caller already loaded instead of reading it again.
    ///
    /// The write is still conditional on the stored version matching the snapshot.
    #[must_use]
    pub fn with_previous(mut self, previous: Video) -> Self {
        self.previous = Some(previous);
        self
    }

    /// Emit additional events decided from `(previous, updated)`.
    #[must_use]
    pub fn with_additional_events<F>(mut self, builder: F) -> Self
    where
        F: Fn(&Video, &Video) -> AdditionalEvents + Send + Sync + 'a,
    {
        self.additional = Some(Box::new(builder));
        self
    }
}

impl std::fmt::Debug for UpdateOptions<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateOptions")
            .field("previous", &self.previous.as_ref().map(|v| v.id))
            .field("additional", &self.additional.is_some())
            .finish()
    }
}

/// Outcome of a successful write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Revision {
    /// Video written
    pub video_id: VideoId,
    /// Overall status after the write
    pub status: VideoStatus,
    /// Media stage status after the write
    pub media_status: StageStatus,
    /// Analysis stage status after the write
    pub analysis_status: StageStatus,
    /// Aggregate version after the write
    pub version: EventVersion,
    /// Last event written
    pub event_id: Uuid,
    /// When the last event occurred
    pub occurred_at: DateTime<Utc>,
}

impl Revision {
    fn new(video: &Video, last: &DomainEvent) -> Self {
        Self {
            video_id: video.id,
            status: video.status,
            media_status: video.media_status,
            analysis_status: video.analysis_status,
            version: video.version,
            event_id: last.event_id,
            occurred_at: last.occurred_at,
        }
    }
}

struct Committed {
    video: Video,
    events: Vec<DomainEvent>,
    suppressed: Vec<EventKind>,
}

/// Transactional-outbox writer for video aggregates.
///
/// `S` stores the aggregate, `O` enqueues messages inside `S`'s transaction.
pub struct LifecycleWriter<S, O, C = SystemClock> {
    store: S,
    outbox: O,
    clock: C,
    encoder: Arc<dyn EventEncoder>,
    metrics: Arc<dyn MetricsRecorder>,
    builder: EventBuilder,
    config: WriterConfig,
}

impl<S, O, C> LifecycleWriter<S, O, C>
where
    S: VideoStore,
    O: OutboxStore<S::Tx>,
    C: Clock,
{
    /// Create a writer with the binary encoder, no metrics and default configuration.
    pub fn new(store: S, outbox: O, clock: C) -> Self {
        let config = WriterConfig::default();
        Self {
            store,
            outbox,
            clock,
            encoder: Arc::new(BincodeEncoder),
            metrics: Arc::new(NoopMetrics),
            builder: EventBuilder::new(config.aggregate_type.clone()),
            config,
        }
    }

    /// Replace the event encoder.
    #[must_use]
    pub fn with_encoder(mut self, encoder: Arc<dyn EventEncoder>) -> Self {
        self.encoder = encoder;
        self
    }

    /// Replace the metrics recorder.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsRecorder>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Replace the configuration.
    #[must_use]
    pub fn with_config(mut self, config: WriterConfig) -> Self {
        self.builder = EventBuilder::new(config.aggregate_type.clone());
        self.config = config;
        self
    }

    /// Aggregate storage.
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Clock used for versions and timestamps.
    pub const fn clock(&self) -> &C {
        &self.clock
    }

    /// Configuration in use.
    pub const fn config(&self) -> &WriterConfig {
        &self.config
    }

    /// Register a new video and enqueue its `created` event.
    ///
    /// # Errors
    ///
    /// - [`LifecycleError::BadRequest`] on a nil uploader or blank title/raw reference
    /// - [`LifecycleError::Conflict`] if the id already exists
    /// - [`LifecycleError::GatewayTimeout`] if the unit of work exceeds its deadline
    /// - [`LifecycleError::Internal`] on storage or encoding failure
    #[tracing::instrument(skip_all, fields(upload_user_id = %input.upload_user_id))]
    pub async fn create_video(&self, input: CreateVideoInput) -> Result<Revision, LifecycleError> {
        let result = self.run(self.create_unit(input)).await;
        self.finish(WriteOperation::Create, result)
    }

    /// Apply a patch and enqueue the primary `updated` event plus any additional
    /// events, atomically.
    ///
    /// Setting the status to `published` without a publish time or visibility
    /// defaults `publish_at` to now and visibility to public, unless the snapshot
    /// already has them.
    ///
    /// # Errors
    ///
    /// - [`LifecycleError::BadRequest`] on a nil id or an empty patch
    /// - [`LifecycleError::NotFound`] if the video does not exist
    /// - [`LifecycleError::Conflict`] if `expected_version` or the stored version
    ///   disagrees with the snapshot
    /// - [`LifecycleError::GatewayTimeout`] if the unit of work exceeds its deadline
    /// - [`LifecycleError::Internal`] on storage or encoding failure
    #[tracing::instrument(skip_all, fields(video_id = %input.video_id))]
    pub async fn update_video(
        &self,
        input: UpdateVideoInput,
        options: UpdateOptions<'_>,
    ) -> Result<Revision, LifecycleError> {
        let result = self.run(self.update_unit(input, options)).await;
        self.finish(WriteOperation::Update, result)
    }

    /// Remove a video and enqueue its `deleted` event.
    ///
    /// # Errors
    ///
    /// Same as [`LifecycleWriter::update_video`], minus the empty-patch case.
    #[tracing::instrument(skip_all, fields(video_id = %input.video_id))]
    pub async fn delete_video(&self, input: DeleteVideoInput) -> Result<Revision, LifecycleError> {
        let result = self.run(self.delete_unit(input)).await;
        self.finish(WriteOperation::Delete, result)
    }

    async fn run<F>(&self, unit: F) -> Result<Committed, LifecycleError>
    where
        F: Future<Output = Result<Committed, LifecycleError>>,
    {
        tokio::time::timeout(self.config.write_timeout, unit)
            .await
            .map_err(|_| {
                LifecycleError::GatewayTimeout(format!(
                    "write exceeded {} ms",
                    self.config.write_timeout.as_millis()
                ))
            })?
    }

    fn finish(
        &self,
        operation: WriteOperation,
        result: Result<Committed, LifecycleError>,
    ) -> Result<Revision, LifecycleError> {
        match result {
            Ok(committed) => {
                self.metrics.write_completed(operation, None);
                for event in &committed.events {
                    self.metrics.event_enqueued(event.kind());
                }
                for kind in &committed.suppressed {
                    tracing::debug!(event_type = %kind, "Suppressed unchanged stage event");
                    self.metrics.event_suppressed(*kind);
                }
                let last = committed
                    .events
                    .last()
                    .ok_or_else(|| LifecycleError::Internal("write produced no event".into()))?;
                tracing::info!(
                    video_id = %committed.video.id,
                    status = %committed.video.status,
                    version = %committed.video.version,
                    events = committed.events.len(),
                    operation = operation.as_str(),
                    "Committed video write"
                );
                Ok(Revision::new(&committed.video, last))
            }
            Err(err) => {
                self.metrics.write_completed(operation, Some(err.kind()));
                match &err {
                    LifecycleError::Conflict(msg) => {
                        tracing::warn!(
                            operation = operation.as_str(),
                            reason = %msg,
                            "Write rejected"
                        );
                    }
                    LifecycleError::Internal(msg) | LifecycleError::GatewayTimeout(msg) => {
                        tracing::error!(
                            operation = operation.as_str(),
                            error = %msg,
                            "Write failed"
                        );
                    }
                    LifecycleError::NotFound(_) | LifecycleError::BadRequest(_) => {
                        tracing::debug!(
                            operation = operation.as_str(),
                            error = %err,
                            "Write refused"
                        );
                    }
                }
                Err(err)
            }
        }
    }

    async fn create_unit(&self, input: CreateVideoInput) -> Result<Committed, LifecycleError> {
        if input.upload_user_id.is_nil() {
            return Err(LifecycleError::bad_request("upload_user_id is required"));
        }
        if input.title.trim().is_empty() {
            return Err(LifecycleError::bad_request("title is required"));
        }
        if input.raw_file_reference.trim().is_empty() {
            return Err(LifecycleError::bad_request("raw_file_reference is required"));
        }
        let video_id = match input.video_id {
            Some(id) if id.is_nil() => {
                return Err(LifecycleError::bad_request("video_id must not be nil"));
            }
            Some(id) => id,
            None => VideoId::new(),
        };

        let now = self.clock.now();
        let version = EventVersion::from_instant(now);
        let video = Video {
            id: video_id,
            upload_user_id: input.upload_user_id,
            title: input.title.trim().to_string(),
            description: input.description,
            raw_file_reference: input.raw_file_reference,
            status: VideoStatus::PendingUpload,
            media_status: StageStatus::Pending,
            analysis_status: StageStatus::Pending,
            media_token: FencingToken::default(),
            analysis_token: FencingToken::default(),
            media: MediaAttributes::default(),
            ai: AiAttributes::default(),
            visibility_status: None,
            publish_at: None,
            error_message: None,
            version,
            created_at: now,
            updated_at: now,
        };

        let event = DomainEvent {
            event_id: Uuid::new_v4(),
            aggregate_id: video.id,
            aggregate_type: self.builder.aggregate_type().to_string(),
            version,
            occurred_at: now,
            payload: EventBuilder::created(&video),
        };

        let mut tx = self.store.begin().await?;
        self.store.insert(&mut tx, &video).await?;
        self.enqueue_all(&mut tx, std::slice::from_ref(&event), &input.context, now)
            .await?;
        self.store.commit(tx).await?;

        Ok(Committed {
            video,
            events: vec![event],
            suppressed: Vec::new(),
        })
    }

    async fn update_unit(
        &self,
        input: UpdateVideoInput,
        options: UpdateOptions<'_>,
    ) -> Result<Committed, LifecycleError> {
        if input.video_id.is_nil() {
            return Err(LifecycleError::bad_request("video_id is required"));
        }
        if input.is_empty() {
            return Err(LifecycleError::bad_request("update has no fields"));
        }
        if matches!(&input.title, Some(title) if title.trim().is_empty()) {
            return Err(LifecycleError::bad_request("title must not be blank"));
        }

        let mut tx = self.store.begin().await?;
        let previous = match options.previous {
            Some(previous) => previous,
            None => self
                .store
                .load(&mut tx, input.video_id)
                .await?
                .ok_or_else(|| LifecycleError::NotFound(format!("video {}", input.video_id)))?,
        };
        if previous.id != input.video_id {
            return Err(LifecycleError::bad_request(
                "previous snapshot belongs to a different video",
            ));
        }
        if let Some(expected) = input.expected_version {
            if expected != previous.version {
                return Err(LifecycleError::conflict(format!(
                    "version mismatch: expected {expected}, found {}",
                    previous.version
                )));
            }
        }

        let now = self.clock.now();
        let mut updated = previous.clone();
        input.apply(&mut updated);
        if updated.status == VideoStatus::Published && previous.status != VideoStatus::Published
        {
            if updated.publish_at.is_none() {
                updated.publish_at = Some(now);
            }
            if updated.visibility_status.is_none() {
                updated.visibility_status = Some(Visibility::Public);
            }
        }

        let mut versions = VersionSequence::after(previous.version, now);
        updated.version = versions.peek();
        updated.updated_at = now;

        let additional = options
            .additional
            .map(|build| build(&previous, &updated))
            .unwrap_or_default();
        let mut payloads = Vec::with_capacity(1 + additional.emitted.len());
        payloads.push(EventBuilder::updated(&previous, &updated));
        payloads.extend(additional.emitted);

        let events = self.builder.stamp(&updated, payloads, &mut versions, now);
        if let Some(last) = events.last() {
            updated.version = last.version;
        }

        self.store
            .update(&mut tx, &updated, previous.version)
            .await?;
        self.enqueue_all(&mut tx, &events, &input.context, now).await?;
        self.store.commit(tx).await?;

        Ok(Committed {
            video: updated,
            events,
            suppressed: additional.suppressed,
        })
    }

    async fn delete_unit(&self, input: DeleteVideoInput) -> Result<Committed, LifecycleError> {
        if input.video_id.is_nil() {
            return Err(LifecycleError::bad_request("video_id is required"));
        }

        let mut tx = self.store.begin().await?;
        let mut video = self
            .store
            .load(&mut tx, input.video_id)
            .await?
            .ok_or_else(|| LifecycleError::NotFound(format!("video {}", input.video_id)))?;
        if let Some(expected) = input.expected_version {
            if expected != video.version {
                return Err(LifecycleError::conflict(format!(
                    "version mismatch: expected {expected}, found {}",
                    video.version
                )));
            }
        }

        let now = self.clock.now();
        let previous_version = video.version;
        let mut versions = VersionSequence::after(previous_version, now);
        let payload = EventBuilder::deleted(&video, input.reason);
        let events = self.builder.stamp(&video, vec![payload], &mut versions, now);
        if let Some(last) = events.last() {
            video.version = last.version;
        }
        video.updated_at = now;

        self.store
            .delete(&mut tx, video.id, previous_version)
            .await?;
        self.enqueue_all(&mut tx, &events, &input.context, now).await?;
        self.store.commit(tx).await?;

        Ok(Committed {
            video,
            events,
            suppressed: Vec::new(),
        })
    }

    async fn enqueue_all(
        &self,
        tx: &mut S::Tx,
        events: &[DomainEvent],
        context: &RequestContext,
        now: DateTime<Utc>,
    ) -> Result<(), LifecycleError> {
        for event in events {
            let message = self.outbox_message(event, context, now)?;
            self.outbox.enqueue(tx, message).await?;
            tracing::debug!(
                video_id = %event.aggregate_id,
                event_type = %event.kind(),
                version = %event.version,
                "Enqueued event"
            );
        }
        Ok(())
    }

    fn outbox_message(
        &self,
        event: &DomainEvent,
        context: &RequestContext,
        now: DateTime<Utc>,
    ) -> Result<OutboxMessage, LifecycleError> {
        let payload = self.encoder.encode(&event.to_envelope()).map_err(|e| {
            LifecycleError::Internal(format!("encoding {} failed: {e}", event.kind()))
        })?;

        let mut message_headers = BTreeMap::new();
        message_headers.insert(
            headers::SCHEMA_VERSION.to_string(),
            self.config.schema_version.clone(),
        );
        message_headers.insert(
            headers::CONTENT_TYPE.to_string(),
            self.encoder.content_type().to_string(),
        );
        if let Some(key) = &context.idempotency_key {
            message_headers.insert(headers::IDEMPOTENCY_KEY.to_string(), key.clone());
        }
        if let Some(trace_id) = &context.trace_id {
            message_headers.insert(headers::TRACE_ID.to_string(), trace_id.clone());
        }

        Ok(OutboxMessage {
            event_id: event.event_id,
            aggregate_type: event.aggregate_type.clone(),
            aggregate_id: event.aggregate_id.to_string(),
            event_type: event.kind().as_str().to_string(),
            payload,
            headers: message_headers,
            available_at: now,
        })
    }
}
