//! Storage contracts of the write side.
//!
//! The lifecycle writer needs three things from storage, all sharing one transaction:
//!
//! - a [`TransactionScope`] to open and commit a unit of work
//! - a [`VideoStore`] to read and conditionally write the aggregate row
//! - an [`OutboxStore`] to enqueue the messages announcing the change
//!
//! Dropping a transaction handle without committing it rolls the unit of work back.
//! That is the only rollback path, so early returns via `?` and cancelled futures
//! both leave storage untouched.

use crate::ids::{EventVersion, VideoId};
use crate::video::Video;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::future::Future;
use thiserror::Error;
use uuid::Uuid;

/// Storage sentinel errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No row for the aggregate.
    #[error("Video not found: {0}")]
    NotFound(VideoId),

    /// A row with the same identity already exists.
    #[error("Video already exists: {0}")]
    AlreadyExists(VideoId),

    /// Conditional write lost against a concurrent writer.
    #[error("Version conflict: expected {expected}, actual {actual}")]
    VersionConflict {
        /// Version the writer read
        expected: EventVersion,
        /// Version found in storage
        actual: EventVersion,
    },

    /// The storage call did not complete in time.
    #[error("Storage timeout: {0}")]
    Timeout(String),

    /// Any other storage failure.
    #[error("Database error: {0}")]
    Database(String),
}

/// Opens and commits units of work.
pub trait TransactionScope: Send + Sync {
    /// Transaction handle. Dropping it without [`TransactionScope::commit`] rolls back.
    type Tx: Send;

    /// Begin a unit of work.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if no transaction can be opened.
    fn begin(&self) -> impl Future<Output = Result<Self::Tx, StoreError>> + Send;

    /// Commit a unit of work.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the commit fails; nothing is applied in that case.
    fn commit(&self, tx: Self::Tx) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// Aggregate persistence.
pub trait VideoStore: TransactionScope {
    /// Read a video outside any unit of work.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure. Absence is `Ok(None)`.
    fn get(&self, id: VideoId) -> impl Future<Output = Result<Option<Video>, StoreError>> + Send;

    /// Read a video inside a unit of work, locking it against concurrent writers
    /// where the backend supports that.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure. Absence is `Ok(None)`.
    fn load(
        &self,
        tx: &mut Self::Tx,
        id: VideoId,
    ) -> impl Future<Output = Result<Option<Video>, StoreError>> + Send;

    /// Insert a new video.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::AlreadyExists`] if the id is taken.
    fn insert(
        &self,
        tx: &mut Self::Tx,
        video: &Video,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Replace a video, provided its stored version is still `expected`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the row is gone and
    /// [`StoreError::VersionConflict`] if another writer got there first.
    fn update(
        &self,
        tx: &mut Self::Tx,
        video: &Video,
        expected: EventVersion,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Remove a video, provided its stored version is still `expected`.
    ///
    /// # Errors
    ///
    /// Same as [`VideoStore::update`].
    fn delete(
        &self,
        tx: &mut Self::Tx,
        id: VideoId,
        expected: EventVersion,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// A message queued for delivery.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboxMessage {
    /// Event identifier, doubles as the delivery idempotency key downstream
    pub event_id: Uuid,
    /// Aggregate type name
    pub aggregate_type: String,
    /// Aggregate identifier as text
    pub aggregate_id: String,
    /// Event type identifier
    pub event_type: String,
    /// Encoded envelope
    pub payload: Vec<u8>,
    /// Delivery headers (`schema_version`, `content_type`, ...)
    pub headers: BTreeMap<String, String>,
    /// Earliest delivery time
    pub available_at: DateTime<Utc>,
}

/// Header names written on outbox messages.
pub mod headers {
    /// Version of the event schema
    pub const SCHEMA_VERSION: &str = "schema_version";
    /// Encoding of the payload bytes
    pub const CONTENT_TYPE: &str = "content_type";
    /// Caller-supplied idempotency key
    pub const IDEMPOTENCY_KEY: &str = "idempotency_key";
    /// Caller trace identifier
    pub const TRACE_ID: &str = "trace_id";
}

/// The outbox enqueue contract.
///
/// Claiming, leasing, retry and publishing belong to the outbox relay, not here.
pub trait OutboxStore<Tx>: Send + Sync {
    /// Queue a message inside the caller's unit of work.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the message cannot be written; the caller must then
    /// abandon the unit of work.
    fn enqueue(
        &self,
        tx: &mut Tx,
        message: OutboxMessage,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}
