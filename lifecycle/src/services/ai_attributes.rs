//! AI-attributes service: enrichment output of a completed analysis job.

use super::{StageCompletion, complete_stage};
use crate::writer::{LifecycleWriter, RequestContext, Revision};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use video_catalog_core::environment::{Clock, SystemClock};
use video_catalog_core::store::{OutboxStore, VideoStore};
use video_catalog_core::video::{AiAttributes, Stage};
use video_catalog_core::{LifecycleError, VideoId};

/// Output of an analysis job.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AiAttributesInput {
    /// Video analysed
    pub video_id: VideoId,
    /// Reporting job
    pub job_id: Option<String>,
    /// When the job emitted its result
    pub emitted_at: Option<DateTime<Utc>>,
    /// Enrichment output
    pub ai: AiAttributes,
    /// Caller context
    pub context: RequestContext,
}

/// Records AI enrichment and marks the analysis stage `ready`.
pub struct AiAttributesService<S, O, C = SystemClock> {
    writer: Arc<LifecycleWriter<S, O, C>>,
}

impl<S, O, C> AiAttributesService<S, O, C>
where
    S: VideoStore,
    O: OutboxStore<S::Tx>,
    C: Clock,
{
    /// Create the service.
    pub const fn new(writer: Arc<LifecycleWriter<S, O, C>>) -> Self {
        Self { writer }
    }

    /// Store enrichment output; emits `ai_enriched` unless the stage was already
    /// ready with identical output.
    ///
    /// # Errors
    ///
    /// - [`LifecycleError::BadRequest`] if the output is empty
    /// - [`LifecycleError::NotFound`] if the video does not exist
    /// - [`LifecycleError::Conflict`] if the job's token is stale or fenced
    /// - anything [`LifecycleWriter::update_video`] returns
    #[tracing::instrument(skip_all, fields(video_id = %input.video_id, job_id = ?input.job_id))]
    pub async fn update_ai_attributes(
        &self,
        input: AiAttributesInput,
    ) -> Result<Revision, LifecycleError> {
        let ai = normalize(input.ai);
        if ai == AiAttributes::default() {
            return Err(LifecycleError::bad_request("ai attributes have no fields"));
        }

        let completion = StageCompletion {
            video_id: input.video_id,
            stage: Stage::Analysis,
            job_id: input.job_id,
            emitted_at: input.emitted_at,
            context: input.context,
        };
        complete_stage(&self.writer, completion, |patch| patch.ai = Some(ai)).await
    }
}

/// Trim tags, drop blanks and duplicates, keep first-seen order.
fn normalize(mut ai: AiAttributes) -> AiAttributes {
    let mut seen = std::collections::HashSet::new();
    ai.tags = ai
        .tags
        .into_iter()
        .map(|tag| tag.trim().to_lowercase())
        .filter(|tag| !tag.is_empty() && seen.insert(tag.clone()))
        .collect();
    ai
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_are_normalized() {
        let ai = normalize(AiAttributes {
            tags: vec![" Rust ".into(), "rust".into(), String::new(), "async".into()],
            ..AiAttributes::default()
        });
        assert_eq!(ai.tags, vec!["rust", "async"]);
    }
}
