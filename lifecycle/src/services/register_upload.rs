//! Register-upload service: records a new raw upload.

use crate::writer::{CreateVideoInput, LifecycleWriter, RequestContext, Revision};
use std::sync::Arc;
use video_catalog_core::environment::{Clock, SystemClock};
use video_catalog_core::store::{OutboxStore, VideoStore};
use video_catalog_core::{LifecycleError, UserId, VideoId};

/// A raw upload to register.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegisterUploadInput {
    /// Identity chosen by the upload flow, if any
    pub video_id: Option<VideoId>,
    /// Uploader
    pub upload_user_id: UserId,
    /// Title
    pub title: String,
    /// Description
    pub description: Option<String>,
    /// Storage reference of the raw file
    pub raw_file_reference: String,
    /// Caller context
    pub context: RequestContext,
}

/// Registers uploads as new `pending_upload` videos.
pub struct RegisterUploadService<S, O, C = SystemClock> {
    writer: Arc<LifecycleWriter<S, O, C>>,
}

impl<S, O, C> RegisterUploadService<S, O, C>
where
    S: VideoStore,
    O: OutboxStore<S::Tx>,
    C: Clock,
{
    /// Create the service.
    pub const fn new(writer: Arc<LifecycleWriter<S, O, C>>) -> Self {
        Self { writer }
    }

    /// Register an upload; emits one `created` event.
    ///
    /// # Errors
    ///
    /// See [`LifecycleWriter::create_video`].
    pub async fn register(&self, input: RegisterUploadInput) -> Result<Revision, LifecycleError> {
        let description = input
            .description
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());

        self.writer
            .create_video(CreateVideoInput {
                video_id: input.video_id,
                upload_user_id: input.upload_user_id,
                title: input.title,
                description,
                raw_file_reference: input.raw_file_reference.trim().to_string(),
                context: input.context,
            })
            .await
    }
}
