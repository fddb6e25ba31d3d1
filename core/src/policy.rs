//! Stage/status policy.
//!
//! Pure rules deciding how a video's overall status follows its two sub-stages, and
//! whether a stage-transition signal may be applied at all.
//!
//! # Status Derivation
//!
//! Evaluated top to bottom, first match wins:
//!
//! | Condition | Result |
//! |-----------|--------|
//! | stage just set to `failed` | `failed` |
//! | a stage is `pending`/`processing` and current is not `published` | `processing` |
//! | both stages `ready` | `published` if already published, else `ready` |
//! | current is `failed` (and the stage just set did not fail) | `processing` |
//! | otherwise | unchanged |
//!
//! `published` is therefore sticky against stage churn: only an explicit visibility
//! action moves a video out of it.
//!
//! # Fencing
//!
//! A completion signal carries a `(job_id, emitted_at)` token. It is rejected when it
//! does not strictly advance past the stored token's `emitted_at`, or when it comes
//! from a different job and cannot prove it is newer.

use crate::error::LifecycleError;
use crate::video::{Stage, StageStatus, Video, VideoStatus};
use chrono::{DateTime, Utc};

/// Derive the overall status from the two stage statuses.
///
/// `latest` is the stage status that the current write has just set.
///
/// # Examples
///
/// ```
/// use video_catalog_core::policy::derive_overall_status;
/// use video_catalog_core::video::{StageStatus, VideoStatus};
///
/// let status = derive_overall_status(
///     VideoStatus::Processing,
///     StageStatus::Ready,
///     StageStatus::Ready,
///     StageStatus::Ready,
/// );
/// assert_eq!(status, VideoStatus::Ready);
/// ```
#[must_use]
pub fn derive_overall_status(
    current: VideoStatus,
    media: StageStatus,
    analysis: StageStatus,
    latest: StageStatus,
) -> VideoStatus {
    if latest == StageStatus::Failed {
        return VideoStatus::Failed;
    }

    if (media.is_in_flight() || analysis.is_in_flight()) && current != VideoStatus::Published {
        return VideoStatus::Processing;
    }

    if media == StageStatus::Ready && analysis == StageStatus::Ready {
        return if current == VideoStatus::Published {
            VideoStatus::Published
        } else {
            VideoStatus::Ready
        };
    }

    if current == VideoStatus::Failed {
        // Recovery: a stage was re-run after an earlier failure.
        return VideoStatus::Processing;
    }

    current
}

/// A stage-transition signal as received from a processing job.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StageTransition {
    /// Stage being transitioned
    pub stage: Stage,
    /// Stage status the caller believes is stored, if it checks
    pub expected_status: Option<StageStatus>,
    /// Job emitting the signal
    pub job_id: Option<String>,
    /// When the job emitted the signal
    pub emitted_at: Option<DateTime<Utc>>,
}

/// Check a stage transition against the stored aggregate.
///
/// # Errors
///
/// Returns [`LifecycleError::Conflict`] when:
/// - `expected_status` disagrees with the stored stage status
/// - `emitted_at` does not advance past the stored `emitted_at` (stale or redelivered)
/// - the signal comes from a different job than the stored one and does not carry a
///   strictly newer `emitted_at` (fenced)
pub fn validate_stage_transition(
    current: &Video,
    transition: &StageTransition,
) -> Result<(), LifecycleError> {
    let stage = transition.stage;
    let stored_status = current.stage_status(stage);

    if let Some(expected) = transition.expected_status {
        if expected != stored_status {
            return Err(LifecycleError::conflict(format!(
                "{stage} status is {stored_status}, expected {expected}"
            )));
        }
    }

    let stored = current.stage_token(stage);

    if let (Some(incoming), Some(recorded)) = (transition.emitted_at, stored.emitted_at) {
        if incoming < recorded {
            return Err(LifecycleError::conflict(format!(
                "stale {stage} signal: emitted_at {incoming} is older than {recorded}"
            )));
        }
        if incoming == recorded && transition.job_id == stored.job_id {
            return Err(LifecycleError::conflict(format!(
                "duplicate {stage} signal: emitted_at {incoming} already applied"
            )));
        }
    }

    if let (Some(incoming_job), Some(recorded_job)) = (&transition.job_id, &stored.job_id) {
        let advances = match (transition.emitted_at, stored.emitted_at) {
            (Some(incoming), Some(recorded)) => incoming > recorded,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if incoming_job != recorded_job && !advances {
            return Err(LifecycleError::conflict(format!(
                "{stage} job {incoming_job} is fenced by job {recorded_job}"
            )));
        }
    }

    Ok(())
}
