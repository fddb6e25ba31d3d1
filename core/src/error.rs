//! Error taxonomy of the write path.
//!
//! Every failure surfaced by the lifecycle writer and the stage services is one of
//! five kinds. Storage sentinel errors ([`StoreError`]) are translated here so that
//! callers never see storage-specific types.

use crate::store::StoreError;
use thiserror::Error;

/// Discriminant of a [`LifecycleError`], used for metrics labels and transport mapping.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Aggregate absent
    NotFound,
    /// Optimistic check or fencing failed
    Conflict,
    /// Missing or invalid input
    BadRequest,
    /// Deadline exceeded
    GatewayTimeout,
    /// Unexpected failure
    Internal,
}

impl ErrorKind {
    /// Label form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::BadRequest => "bad_request",
            Self::GatewayTimeout => "gateway_timeout",
            Self::Internal => "internal",
        }
    }
}

/// Errors returned by lifecycle writes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    /// The aggregate does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Version mismatch, stage-status mismatch, stale `emitted_at`, job fencing
    /// violation, or a visibility no-op.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Missing or invalid fields, empty update, unknown stage/action/kind.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// The unit of work exceeded its deadline and was rolled back.
    #[error("Gateway timeout: {0}")]
    GatewayTimeout(String),

    /// Unexpected storage or encoding failure.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl LifecycleError {
    /// Shorthand for [`LifecycleError::Conflict`].
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Shorthand for [`LifecycleError::BadRequest`].
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    /// Discriminant of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::BadRequest(_) => ErrorKind::BadRequest,
            Self::GatewayTimeout(_) => ErrorKind::GatewayTimeout,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }
}

impl From<StoreError> for LifecycleError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => Self::NotFound(format!("video {id}")),
            StoreError::AlreadyExists(id) => Self::Conflict(format!("video {id} already exists")),
            StoreError::VersionConflict { expected, actual } => Self::Conflict(format!(
                "version mismatch: expected {expected}, found {actual}"
            )),
            StoreError::Timeout(msg) => Self::GatewayTimeout(msg),
            StoreError::Database(msg) => Self::Internal(msg),
        }
    }
}
