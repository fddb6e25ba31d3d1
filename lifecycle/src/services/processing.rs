//! Processing-status service: stage progress reported by media and analysis jobs.
//!
//! A report names a stage, the status it moved to and, optionally, the job's fencing
//! token. The report is fenced against the stored token, the overall status is
//! re-derived, and the stage's completion or failure event is attached to the update.

use super::{load_current, next_token};
use crate::writer::{
    AdditionalEvents, LifecycleWriter, RequestContext, Revision, UpdateOptions, UpdateVideoInput,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use video_catalog_core::builder::EventBuilder;
use video_catalog_core::environment::{Clock, SystemClock};
use video_catalog_core::event::EventKind;
use video_catalog_core::policy::{StageTransition, derive_overall_status, validate_stage_transition};
use video_catalog_core::store::{OutboxStore, VideoStore};
use video_catalog_core::video::{Stage, StageStatus, Video, VideoStatus};
use video_catalog_core::{EventVersion, LifecycleError, VideoId};

/// A stage progress report.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessingStatusInput {
    /// Video being processed
    pub video_id: VideoId,
    /// Stage reporting
    pub stage: Stage,
    /// Status the stage moved to
    pub status: StageStatus,
    /// Stage status the job believes is stored
    pub expected_status: Option<StageStatus>,
    /// Optimistic check against the aggregate version
    pub expected_version: Option<EventVersion>,
    /// Reporting job
    pub job_id: Option<String>,
    /// When the job emitted the report
    pub emitted_at: Option<DateTime<Utc>>,
    /// Failure description, for `failed`
    pub error_message: Option<String>,
    /// Caller context
    pub context: RequestContext,
}

impl ProcessingStatusInput {
    /// Report for `stage` moving to `status`, without fencing data.
    #[must_use]
    pub fn new(video_id: VideoId, stage: Stage, status: StageStatus) -> Self {
        Self {
            video_id,
            stage,
            status,
            expected_status: None,
            expected_version: None,
            job_id: None,
            emitted_at: None,
            error_message: None,
            context: RequestContext::default(),
        }
    }

    /// Attach the job's fencing token.
    #[must_use]
    pub fn with_job(mut self, job_id: impl Into<String>, emitted_at: DateTime<Utc>) -> Self {
        self.job_id = Some(job_id.into());
        self.emitted_at = Some(emitted_at);
        self
    }
}

/// Applies stage progress reports.
pub struct ProcessingService<S, O, C = SystemClock> {
    writer: Arc<LifecycleWriter<S, O, C>>,
}

impl<S, O, C> ProcessingService<S, O, C>
where
    S: VideoStore,
    O: OutboxStore<S::Tx>,
    C: Clock,
{
    /// Create the service.
    pub const fn new(writer: Arc<LifecycleWriter<S, O, C>>) -> Self {
        Self { writer }
    }

    /// Apply a progress report.
    ///
    /// # Errors
    ///
    /// - [`LifecycleError::BadRequest`] for a failure report without a message
    /// - [`LifecycleError::NotFound`] if the video does not exist
    /// - [`LifecycleError::Conflict`] if the report is stale, fenced, or its
    ///   `expected_status` disagrees
    /// - anything [`LifecycleWriter::update_video`] returns
    #[tracing::instrument(
        skip_all,
        fields(
            video_id = %input.video_id,
            stage = %input.stage,
            status = %input.status,
            job_id = ?input.job_id
        )
    )]
    pub async fn update_status(
        &self,
        input: ProcessingStatusInput,
    ) -> Result<Revision, LifecycleError> {
        if input.status == StageStatus::Failed
            && input
                .error_message
                .as_deref()
                .is_none_or(|m| m.trim().is_empty())
        {
            return Err(LifecycleError::bad_request(
                "error_message is required when a stage fails",
            ));
        }

        let current = load_current(&self.writer, input.video_id).await?;
        validate_stage_transition(
            &current,
            &StageTransition {
                stage: input.stage,
                expected_status: input.expected_status,
                job_id: input.job_id.clone(),
                emitted_at: input.emitted_at,
            },
        )?;

        let patch = stage_patch(&current, &input);
        let stage = input.stage;
        let options = UpdateOptions::new()
            .with_previous(current)
            .with_additional_events(move |previous, updated| {
                stage_events(stage, previous, updated)
            });

        self.writer.update_video(patch, options).await
    }
}

/// Update input for a stage moving to `input.status`.
fn stage_patch(current: &Video, input: &ProcessingStatusInput) -> UpdateVideoInput {
    let (media, analysis) = match input.stage {
        Stage::Media => (input.status, current.analysis_status),
        Stage::Analysis => (current.media_status, input.status),
    };
    let status = derive_overall_status(current.status, media, analysis, input.status);
    let token = next_token(current, input.stage, input.job_id.as_ref(), input.emitted_at);

    let mut patch = UpdateVideoInput {
        expected_version: input.expected_version,
        status: Some(status),
        context: input.context.clone(),
        ..UpdateVideoInput::new(input.video_id)
    };
    match input.stage {
        Stage::Media => {
            patch.media_status = Some(input.status);
            patch.media_token = token;
        }
        Stage::Analysis => {
            patch.analysis_status = Some(input.status);
            patch.analysis_token = token;
        }
    }
    if input.status == StageStatus::Failed {
        patch.error_message.clone_from(&input.error_message);
    } else if status != VideoStatus::Failed && current.error_message.is_some() {
        patch.clear_error = true;
    }
    patch
}

/// Completion or failure event of `stage`, if the update produced one.
pub(crate) fn stage_events(stage: Stage, previous: &Video, updated: &Video) -> AdditionalEvents {
    let mut events = AdditionalEvents::none();
    match updated.stage_status(stage) {
        StageStatus::Ready => match stage {
            Stage::Media => events.offer(
                EventKind::MediaReady,
                EventBuilder::media_ready(previous, updated),
            ),
            Stage::Analysis => events.offer(
                EventKind::AiEnriched,
                EventBuilder::ai_enriched(previous, updated),
            ),
        },
        StageStatus::Failed => {
            events.push_some(EventBuilder::processing_failed(stage, previous, updated));
        }
        StageStatus::Pending | StageStatus::Processing => {}
    }
    events
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use video_catalog_core::ids::UserId;
    use video_catalog_core::video::{AiAttributes, FencingToken, MediaAttributes};

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    fn current() -> Video {
        Video {
            id: VideoId::new(),
            upload_user_id: UserId::new(),
            title: "t".into(),
            description: None,
            raw_file_reference: "raw".into(),
            status: VideoStatus::Processing,
            media_status: StageStatus::Processing,
            analysis_status: StageStatus::Ready,
            media_token: FencingToken::default(),
            analysis_token: FencingToken::default(),
            media: MediaAttributes::default(),
            ai: AiAttributes::default(),
            visibility_status: None,
            publish_at: None,
            error_message: None,
            version: EventVersion::from_instant(at()),
            created_at: at(),
            updated_at: at(),
        }
    }

    #[test]
    fn media_ready_with_analysis_ready_derives_ready() {
        let current = current();
        let input = ProcessingStatusInput::new(current.id, Stage::Media, StageStatus::Ready)
            .with_job("m1", at());
        let patch = stage_patch(&current, &input);

        assert_eq!(patch.status, Some(VideoStatus::Ready));
        assert_eq!(patch.media_status, Some(StageStatus::Ready));
        assert_eq!(patch.media_token, Some(FencingToken::new("m1", at())));
        assert!(patch.analysis_status.is_none());
    }

    #[test]
    fn failure_carries_message_and_recovery_clears_it() {
        let mut current = current();
        let mut input = ProcessingStatusInput::new(current.id, Stage::Media, StageStatus::Failed);
        input.error_message = Some("codec".into());
        let patch = stage_patch(&current, &input);
        assert_eq!(patch.status, Some(VideoStatus::Failed));
        assert_eq!(patch.error_message.as_deref(), Some("codec"));

        current.status = VideoStatus::Failed;
        current.media_status = StageStatus::Failed;
        current.error_message = Some("codec".into());
        let input = ProcessingStatusInput::new(current.id, Stage::Media, StageStatus::Processing);
        let patch = stage_patch(&current, &input);
        assert_eq!(patch.status, Some(VideoStatus::Processing));
        assert!(patch.clear_error);
    }

    #[test]
    fn stage_events_pick_the_stage_kind() {
        let previous = current();
        let mut updated = previous.clone();
        updated.media_status = StageStatus::Ready;
        let events = stage_events(Stage::Media, &previous, &updated);
        assert_eq!(events.emitted()[0].kind(), EventKind::MediaReady);

        let events = stage_events(Stage::Media, &updated, &updated.clone());
        assert!(events.emitted().is_empty());
        assert_eq!(events.suppressed(), &[EventKind::MediaReady]);
    }
}
