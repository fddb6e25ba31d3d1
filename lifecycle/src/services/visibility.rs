//! Visibility service: explicit publish / unpublish / reject / archive actions.
//!
//! These are the only writes that move a video into or out of `published`. Every
//! action must change something; a no-op is a [`LifecycleError::Conflict`].

use super::load_current;
use crate::writer::{
    AdditionalEvents, LifecycleWriter, RequestContext, Revision, UpdateOptions, UpdateVideoInput,
};
use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use video_catalog_core::builder::EventBuilder;
use video_catalog_core::environment::{Clock, SystemClock};
use video_catalog_core::store::{OutboxStore, VideoStore};
use video_catalog_core::video::{Video, VideoStatus, Visibility};
use video_catalog_core::{EventVersion, LifecycleError, VideoId};

/// Visibility action.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum VisibilityAction {
    /// Make the video live
    Publish,
    /// Take a live video back to `ready`, private
    Unpublish,
    /// Moderation rejection
    Reject,
    /// Owner takedown
    Archive,
}

impl VisibilityAction {
    /// Wire form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Publish => "publish",
            Self::Unpublish => "unpublish",
            Self::Reject => "reject",
            Self::Archive => "archive",
        }
    }

    const fn target(self) -> VideoStatus {
        match self {
            Self::Publish => VideoStatus::Published,
            Self::Unpublish => VideoStatus::Ready,
            Self::Reject => VideoStatus::Rejected,
            Self::Archive => VideoStatus::Archived,
        }
    }
}

impl fmt::Display for VisibilityAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VisibilityAction {
    type Err = LifecycleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "publish" => Ok(Self::Publish),
            "unpublish" => Ok(Self::Unpublish),
            "reject" => Ok(Self::Reject),
            "archive" => Ok(Self::Archive),
            other => Err(LifecycleError::bad_request(format!(
                "unknown visibility action: {other}"
            ))),
        }
    }
}

/// A visibility change request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VisibilityInput {
    /// Video to change
    pub video_id: VideoId,
    /// Action
    pub action: VisibilityAction,
    /// Audience to set (publish only)
    pub visibility: Option<Visibility>,
    /// Publish time to set (publish only)
    pub publish_at: Option<DateTime<Utc>>,
    /// Optimistic check against the aggregate version
    pub expected_version: Option<EventVersion>,
    /// Caller context
    pub context: RequestContext,
}

impl VisibilityInput {
    /// Request `action` on `video_id` with no extra fields.
    #[must_use]
    pub fn new(video_id: VideoId, action: VisibilityAction) -> Self {
        Self {
            video_id,
            action,
            visibility: None,
            publish_at: None,
            expected_version: None,
            context: RequestContext::default(),
        }
    }
}

/// Applies visibility actions.
pub struct VisibilityService<S, O, C = SystemClock> {
    writer: Arc<LifecycleWriter<S, O, C>>,
}

impl<S, O, C> VisibilityService<S, O, C>
where
    S: VideoStore,
    O: OutboxStore<S::Tx>,
    C: Clock,
{
    /// Create the service.
    pub const fn new(writer: Arc<LifecycleWriter<S, O, C>>) -> Self {
        Self { writer }
    }

    /// Apply a visibility action; emits `visibility_changed` when the overall status
    /// changes.
    ///
    /// # Errors
    ///
    /// - [`LifecycleError::BadRequest`] if `visibility`/`publish_at` accompany an action
    ///   other than publish
    /// - [`LifecycleError::NotFound`] if the video does not exist
    /// - [`LifecycleError::Conflict`] if publishing before both stages are ready,
    ///   unpublishing a video that is not live, or the action changes nothing
    /// - anything [`LifecycleWriter::update_video`] returns
    #[tracing::instrument(skip_all, fields(video_id = %input.video_id, action = %input.action))]
    pub async fn update_visibility(
        &self,
        input: VisibilityInput,
    ) -> Result<Revision, LifecycleError> {
        if input.action != VisibilityAction::Publish
            && (input.visibility.is_some() || input.publish_at.is_some())
        {
            return Err(LifecycleError::bad_request(format!(
                "{} does not take visibility or publish_at",
                input.action
            )));
        }

        let current = load_current(&self.writer, input.video_id).await?;
        let patch = plan(&current, &input)?;
        let options = UpdateOptions::new()
            .with_previous(current)
            .with_additional_events(|previous, updated| {
                let mut events = AdditionalEvents::none();
                events.push_some(EventBuilder::visibility_changed(previous, updated));
                events
            });

        self.writer.update_video(patch, options).await
    }
}

/// Guard the action against the current snapshot and build the patch.
fn plan(current: &Video, input: &VisibilityInput) -> Result<UpdateVideoInput, LifecycleError> {
    let target = input.action.target();
    let mut patch = UpdateVideoInput {
        expected_version: input.expected_version,
        status: Some(target),
        context: input.context.clone(),
        ..UpdateVideoInput::new(input.video_id)
    };

    match input.action {
        VisibilityAction::Publish => {
            if !current.stages_ready() {
                return Err(LifecycleError::conflict(format!(
                    "publish requires both stages ready (media {}, analysis {})",
                    current.media_status, current.analysis_status
                )));
            }
            let visibility_unchanged = input
                .visibility
                .is_none_or(|v| current.visibility_status == Some(v));
            let publish_at_unchanged = input
                .publish_at
                .is_none_or(|at| current.publish_at == Some(at));
            if current.status == target && visibility_unchanged && publish_at_unchanged {
                return Err(LifecycleError::conflict("video is already published"));
            }
            patch.visibility = input.visibility;
            patch.publish_at = input.publish_at;
        }
        VisibilityAction::Unpublish => {
            if current.status != VideoStatus::Published {
                return Err(LifecycleError::conflict(format!(
                    "cannot unpublish a {} video",
                    current.status
                )));
            }
            patch.visibility = Some(Visibility::Private);
        }
        VisibilityAction::Reject | VisibilityAction::Archive => {
            if current.status == target {
                return Err(LifecycleError::conflict(format!("video is already {target}")));
            }
        }
    }
    Ok(patch)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use video_catalog_core::ids::UserId;
    use video_catalog_core::video::{
        AiAttributes, FencingToken, MediaAttributes, StageStatus,
    };

    fn video(status: VideoStatus, analysis: StageStatus) -> Video {
        let at = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        Video {
            id: VideoId::new(),
            upload_user_id: UserId::new(),
            title: "t".into(),
            description: None,
            raw_file_reference: "raw".into(),
            status,
            media_status: StageStatus::Ready,
            analysis_status: analysis,
            media_token: FencingToken::default(),
            analysis_token: FencingToken::default(),
            media: MediaAttributes::default(),
            ai: AiAttributes::default(),
            visibility_status: None,
            publish_at: None,
            error_message: None,
            version: EventVersion::from_instant(at),
            created_at: at,
            updated_at: at,
        }
    }

    #[test]
    fn actions_parse_case_insensitively() {
        assert_eq!("Publish".parse::<VisibilityAction>().unwrap(), VisibilityAction::Publish);
        let err = "delete".parse::<VisibilityAction>().unwrap_err();
        assert!(matches!(err, LifecycleError::BadRequest(_)));
    }

    #[test]
    fn publish_requires_ready_stages() {
        let current = video(VideoStatus::Processing, StageStatus::Processing);
        let input = VisibilityInput::new(current.id, VisibilityAction::Publish);
        assert!(matches!(plan(&current, &input), Err(LifecycleError::Conflict(_))));
    }

    #[test]
    fn republish_is_a_no_op_unless_audience_changes() {
        let mut current = video(VideoStatus::Published, StageStatus::Ready);
        current.visibility_status = Some(Visibility::Public);

        let input = VisibilityInput::new(current.id, VisibilityAction::Publish);
        assert!(matches!(plan(&current, &input), Err(LifecycleError::Conflict(_))));

        let input = VisibilityInput {
            visibility: Some(Visibility::Unlisted),
            ..VisibilityInput::new(current.id, VisibilityAction::Publish)
        };
        assert!(plan(&current, &input).is_ok());
    }

    #[test]
    fn unpublish_goes_back_to_private_ready() {
        let current = video(VideoStatus::Published, StageStatus::Ready);
        let patch = plan(
            &current,
            &VisibilityInput::new(current.id, VisibilityAction::Unpublish),
        )
        .unwrap();
        assert_eq!(patch.status, Some(VideoStatus::Ready));
        assert_eq!(patch.visibility, Some(Visibility::Private));

        let ready = video(VideoStatus::Ready, StageStatus::Ready);
        assert!(
            plan(
                &ready,
                &VisibilityInput::new(ready.id, VisibilityAction::Unpublish)
            )
            .is_err()
        );
    }

    #[test]
    fn archive_twice_conflicts() {
        let current = video(VideoStatus::Archived, StageStatus::Ready);
        let input = VisibilityInput::new(current.id, VisibilityAction::Archive);
        assert!(matches!(plan(&current, &input), Err(LifecycleError::Conflict(_))));
    }
}
