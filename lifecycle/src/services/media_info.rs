//! Media-info service: transcode output of a completed media job.

use super::{StageCompletion, complete_stage};
use crate::writer::{LifecycleWriter, RequestContext, Revision};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use video_catalog_core::environment::{Clock, SystemClock};
use video_catalog_core::store::{OutboxStore, VideoStore};
use video_catalog_core::video::{MediaAttributes, Stage};
use video_catalog_core::{LifecycleError, VideoId};

/// Output of a media job.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MediaInfoInput {
    /// Video processed
    pub video_id: VideoId,
    /// Reporting job
    pub job_id: Option<String>,
    /// When the job emitted its result
    pub emitted_at: Option<DateTime<Utc>>,
    /// Transcode output
    pub media: MediaAttributes,
    /// Caller context
    pub context: RequestContext,
}

/// Records media output and marks the media stage `ready`.
pub struct MediaInfoService<S, O, C = SystemClock> {
    writer: Arc<LifecycleWriter<S, O, C>>,
}

impl<S, O, C> MediaInfoService<S, O, C>
where
    S: VideoStore,
    O: OutboxStore<S::Tx>,
    C: Clock,
{
    /// Create the service.
    pub const fn new(writer: Arc<LifecycleWriter<S, O, C>>) -> Self {
        Self { writer }
    }

    /// Store media output; emits `media_ready` unless the stage was already ready
    /// with identical output.
    ///
    /// # Errors
    ///
    /// - [`LifecycleError::BadRequest`] if the output is empty or malformed
    /// - [`LifecycleError::NotFound`] if the video does not exist
    /// - [`LifecycleError::Conflict`] if the job's token is stale or fenced
    /// - anything [`LifecycleWriter::update_video`] returns
    #[tracing::instrument(skip_all, fields(video_id = %input.video_id, job_id = ?input.job_id))]
    pub async fn update_media_info(
        &self,
        input: MediaInfoInput,
    ) -> Result<Revision, LifecycleError> {
        validate_media(&input.media)?;

        let completion = StageCompletion {
            video_id: input.video_id,
            stage: Stage::Media,
            job_id: input.job_id,
            emitted_at: input.emitted_at,
            context: input.context,
        };
        let media = input.media;
        complete_stage(&self.writer, completion, |patch| patch.media = Some(media)).await
    }
}

fn validate_media(media: &MediaAttributes) -> Result<(), LifecycleError> {
    if *media == MediaAttributes::default() {
        return Err(LifecycleError::bad_request("media info has no fields"));
    }
    if media.duration_micros.is_some_and(|d| d < 0) {
        return Err(LifecycleError::bad_request("duration must not be negative"));
    }
    if media.encoded_bitrate.is_some_and(|b| b <= 0) {
        return Err(LifecycleError::bad_request("encoded_bitrate must be positive"));
    }
    Ok(())
}
