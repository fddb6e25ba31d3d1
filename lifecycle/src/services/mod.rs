//! Stage application services.
//!
//! Thin adapters over [`LifecycleWriter`]: each loads the current snapshot, applies
//! the stage/status policy, turns its stage-specific input into an
//! [`UpdateVideoInput`](crate::writer::UpdateVideoInput) and hands the writer a
//! closure deciding which stage events accompany the update.

use crate::writer::{LifecycleWriter, RequestContext, Revision, UpdateOptions, UpdateVideoInput};
use chrono::{DateTime, Utc};
use processing::stage_events;
use video_catalog_core::environment::Clock;
use video_catalog_core::policy::{StageTransition, derive_overall_status, validate_stage_transition};
use video_catalog_core::store::{OutboxStore, VideoStore};
use video_catalog_core::video::{FencingToken, Stage, StageStatus, Video};
use video_catalog_core::{LifecycleError, VideoId};

pub mod ai_attributes;
pub mod media_info;
pub mod processing;
pub mod register_upload;
pub mod visibility;

pub use ai_attributes::{AiAttributesInput, AiAttributesService};
pub use media_info::{MediaInfoInput, MediaInfoService};
pub use processing::{ProcessingService, ProcessingStatusInput};
pub use register_upload::{RegisterUploadInput, RegisterUploadService};
pub use visibility::{VisibilityAction, VisibilityInput, VisibilityService};

/// Current snapshot, or `NotFound`.
async fn load_current<S, O, C>(
    writer: &LifecycleWriter<S, O, C>,
    video_id: VideoId,
) -> Result<Video, LifecycleError>
where
    S: VideoStore,
    O: OutboxStore<S::Tx>,
    C: Clock,
{
    if video_id.is_nil() {
        return Err(LifecycleError::bad_request("video_id is required"));
    }
    writer
        .store()
        .get(video_id)
        .await?
        .ok_or_else(|| LifecycleError::NotFound(format!("video {video_id}")))
}

/// A job reporting the output of its stage.
struct StageCompletion {
    video_id: VideoId,
    stage: Stage,
    job_id: Option<String>,
    emitted_at: Option<DateTime<Utc>>,
    context: RequestContext,
}

/// Mark `completion.stage` ready, with `attach` adding the stage output to the patch.
///
/// The completion event is offered through [`stage_events`], so an identical
/// output reported again for a ready stage is not announced twice.
async fn complete_stage<S, O, C>(
    writer: &LifecycleWriter<S, O, C>,
    completion: StageCompletion,
    attach: impl FnOnce(&mut UpdateVideoInput),
) -> Result<Revision, LifecycleError>
where
    S: VideoStore,
    O: OutboxStore<S::Tx>,
    C: Clock,
{
    let StageCompletion {
        video_id,
        stage,
        job_id,
        emitted_at,
        context,
    } = completion;

    let current = load_current(writer, video_id).await?;
    validate_stage_transition(
        &current,
        &StageTransition {
            stage,
            expected_status: None,
            job_id: job_id.clone(),
            emitted_at,
        },
    )?;

    let token = next_token(&current, stage, job_id.as_ref(), emitted_at);
    let mut patch = UpdateVideoInput {
        context,
        ..UpdateVideoInput::new(video_id)
    };
    let (media, analysis) = match stage {
        Stage::Media => {
            patch.media_status = Some(StageStatus::Ready);
            patch.media_token = token;
            (StageStatus::Ready, current.analysis_status)
        }
        Stage::Analysis => {
            patch.analysis_status = Some(StageStatus::Ready);
            patch.analysis_token = token;
            (current.media_status, StageStatus::Ready)
        }
    };
    patch.status = Some(derive_overall_status(
        current.status,
        media,
        analysis,
        StageStatus::Ready,
    ));
    attach(&mut patch);

    let options = UpdateOptions::new()
        .with_previous(current)
        .with_additional_events(move |previous, updated| stage_events(stage, previous, updated));
    writer.update_video(patch, options).await
}

/// Token to store after accepting a signal; absent parts keep the stored values.
fn next_token(
    current: &Video,
    stage: Stage,
    job_id: Option<&String>,
    emitted_at: Option<DateTime<Utc>>,
) -> Option<FencingToken> {
    if job_id.is_none() && emitted_at.is_none() {
        return None;
    }
    let stored = current.stage_token(stage);
    Some(FencingToken {
        job_id: job_id.cloned().or_else(|| stored.job_id.clone()),
        emitted_at: emitted_at.or(stored.emitted_at),
    })
}
