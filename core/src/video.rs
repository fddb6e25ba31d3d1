//! The Video aggregate.
//!
//! A video moves through `pending_upload → processing → ready → published`, with
//! `failed`, `rejected` and `archived` as side exits. Its overall [`VideoStatus`] is
//! derived (see [`crate::policy`]) from two independent sub-machines: the media
//! (transcode) stage and the analysis (AI) stage, each a [`StageStatus`].
//!
//! Each stage also records a [`FencingToken`]: the `job_id` and `emitted_at` of the
//! last accepted completion signal, used to reject stale or superseded signals.

use crate::ids::{EventVersion, UserId, VideoId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error returned when a status string is not part of the closed set.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown {kind}: {value}")]
pub struct ParseStatusError {
    kind: &'static str,
    value: String,
}

impl ParseStatusError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

macro_rules! string_enum {
    ($name:ident, $label:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            /// All values, in declaration order.
            pub const ALL: &'static [Self] = &[$(Self::$variant),+];

            /// Storage / wire representation.
            #[must_use]
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ParseStatusError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($text => Ok(Self::$variant),)+
                    _ => Err(ParseStatusError::new($label, s)),
                }
            }
        }
    };
}

/// Overall lifecycle status of a video.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoStatus {
    /// Registered, raw file not yet processed
    PendingUpload,
    /// At least one stage is still running
    Processing,
    /// Both stages finished, not yet visible
    Ready,
    /// Live
    Published,
    /// A stage failed
    Failed,
    /// Rejected by moderation
    Rejected,
    /// Taken down by the owner
    Archived,
}

string_enum!(VideoStatus, "video status", {
    PendingUpload => "pending_upload",
    Processing => "processing",
    Ready => "ready",
    Published => "published",
    Failed => "failed",
    Rejected => "rejected",
    Archived => "archived",
});

/// Status of a single processing stage (media or analysis).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Not started
    Pending,
    /// Running
    Processing,
    /// Completed
    Ready,
    /// Failed
    Failed,
}

string_enum!(StageStatus, "stage status", {
    Pending => "pending",
    Processing => "processing",
    Ready => "ready",
    Failed => "failed",
});

impl StageStatus {
    /// Whether the stage still has work outstanding.
    #[must_use]
    pub const fn is_in_flight(self) -> bool {
        matches!(self, Self::Pending | Self::Processing)
    }
}

/// Audience of a video.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    /// Listed and playable by anyone
    Public,
    /// Playable by link only
    Unlisted,
    /// Owner only
    Private,
}

string_enum!(Visibility, "visibility", {
    Public => "public",
    Unlisted => "unlisted",
    Private => "private",
});

/// The two independent processing stages.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Transcoding, thumbnails, HLS packaging
    Media,
    /// AI enrichment (difficulty, summary, tags, subtitles)
    Analysis,
}

string_enum!(Stage, "stage", {
    Media => "media",
    Analysis => "analysis",
});

/// Fencing token of a stage: the last accepted `(job_id, emitted_at)` pair.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FencingToken {
    /// Job that produced the last accepted signal
    pub job_id: Option<String>,
    /// When that job emitted the signal
    pub emitted_at: Option<DateTime<Utc>>,
}

impl FencingToken {
    /// Create a token.
    #[must_use]
    pub fn new(job_id: impl Into<String>, emitted_at: DateTime<Utc>) -> Self {
        Self {
            job_id: Some(job_id.into()),
            emitted_at: Some(emitted_at),
        }
    }
}

/// Output of the media stage.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaAttributes {
    /// Duration in microseconds
    pub duration_micros: Option<i64>,
    /// Encoded resolution, e.g. `1920x1080`
    pub encoded_resolution: Option<String>,
    /// Encoded bitrate in kbps
    pub encoded_bitrate: Option<i32>,
    /// Thumbnail URL
    pub thumbnail_url: Option<String>,
    /// HLS master playlist URL
    pub hls_master_playlist: Option<String>,
}

/// Output of the analysis stage.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AiAttributes {
    /// Difficulty label
    pub difficulty: Option<String>,
    /// Generated summary
    pub summary: Option<String>,
    /// Generated tags
    pub tags: Vec<String>,
    /// Raw subtitle file URL
    pub raw_subtitle_url: Option<String>,
}

/// The video aggregate, the unit of transactional consistency.
///
/// Mutated only through the lifecycle writer, which persists it together with the
/// events announcing the change.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Video {
    /// Identity
    pub id: VideoId,
    /// Uploader
    pub upload_user_id: UserId,
    /// Title
    pub title: String,
    /// Description
    pub description: Option<String>,
    /// Storage reference of the raw upload
    pub raw_file_reference: String,
    /// Overall status
    pub status: VideoStatus,
    /// Media stage status
    pub media_status: StageStatus,
    /// Analysis stage status
    pub analysis_status: StageStatus,
    /// Media stage fencing token
    pub media_token: FencingToken,
    /// Analysis stage fencing token
    pub analysis_token: FencingToken,
    /// Media stage output
    pub media: MediaAttributes,
    /// Analysis stage output
    pub ai: AiAttributes,
    /// Audience; `None` until chosen
    pub visibility_status: Option<Visibility>,
    /// When the video went (or goes) live
    pub publish_at: Option<DateTime<Utc>>,
    /// Last stage failure
    pub error_message: Option<String>,
    /// Version of the last event written for this aggregate
    pub version: EventVersion,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last mutation time
    pub updated_at: DateTime<Utc>,
}

impl Video {
    /// Status of the given stage.
    #[must_use]
    pub const fn stage_status(&self, stage: Stage) -> StageStatus {
        match stage {
            Stage::Media => self.media_status,
            Stage::Analysis => self.analysis_status,
        }
    }

    /// Fencing token of the given stage.
    #[must_use]
    pub const fn stage_token(&self, stage: Stage) -> &FencingToken {
        match stage {
            Stage::Media => &self.media_token,
            Stage::Analysis => &self.analysis_token,
        }
    }

    /// Whether both stages have completed.
    #[must_use]
    pub fn stages_ready(&self) -> bool {
        self.media_status == StageStatus::Ready && self.analysis_status == StageStatus::Ready
    }
}
