//! In-memory video store and outbox sharing one transaction.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use crate::transaction::{self, InMemoryTx};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use video_catalog_core::event::{EventEnvelope, decode_envelope};
use video_catalog_core::store::{
    OutboxMessage, OutboxStore, StoreError, TransactionScope, VideoStore,
};
use video_catalog_core::{EventVersion, Video, VideoId};

/// Committed contents of an [`InMemoryVideoStore`].
#[derive(Clone, Debug, Default)]
pub struct VideoState {
    /// Aggregate rows
    pub videos: HashMap<VideoId, Video>,
    /// Enqueued outbox messages, in enqueue order
    pub outbox: Vec<OutboxMessage>,
}

/// Transaction handle of [`InMemoryVideoStore`].
pub type VideoTx = InMemoryTx<VideoState>;

/// In-memory [`VideoStore`] + [`OutboxStore`].
///
/// Both contracts write into the same staged transaction, so a unit of work either
/// lands the row change and its messages together or neither.
///
/// # Example
///
/// ```
/// use video_catalog_testing::InMemoryVideoStore;
/// use video_catalog_core::store::TransactionScope;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemoryVideoStore::new();
/// let tx = store.begin().await?;
/// store.commit(tx).await?;
/// assert_eq!(store.commits(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryVideoStore {
    state: Arc<Mutex<VideoState>>,
    fail_enqueue: Arc<AtomicBool>,
    commit_delay_ms: Arc<AtomicU64>,
    commits: Arc<AtomicU64>,
}

impl InMemoryVideoStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `enqueue` fail.
    pub fn fail_enqueue(&self, fail: bool) {
        self.fail_enqueue.store(fail, Ordering::SeqCst);
    }

    /// Delay every subsequent `commit`, for deadline tests.
    pub fn set_commit_delay(&self, delay: Duration) {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.commit_delay_ms.store(millis, Ordering::SeqCst);
    }

    /// Number of committed transactions.
    #[must_use]
    pub fn commits(&self) -> u64 {
        self.commits.load(Ordering::SeqCst)
    }

    /// Insert a row directly, bypassing transactions.
    pub async fn seed(&self, video: Video) {
        self.state.lock().await.videos.insert(video.id, video);
    }

    /// Committed row.
    pub async fn video(&self, id: VideoId) -> Option<Video> {
        self.state.lock().await.videos.get(&id).cloned()
    }

    /// Committed outbox messages.
    pub async fn outbox(&self) -> Vec<OutboxMessage> {
        self.state.lock().await.outbox.clone()
    }

    /// Committed outbox messages decoded back into envelopes.
    ///
    /// # Panics
    ///
    /// Panics if a committed payload cannot be decoded.
    #[allow(clippy::expect_used)]
    pub async fn envelopes(&self) -> Vec<EventEnvelope> {
        self.outbox()
            .await
            .iter()
            .map(|message| decode_envelope(&message.payload).expect("outbox payload should decode"))
            .collect()
    }

    /// Event type identifiers of the committed outbox, in order.
    pub async fn event_types(&self) -> Vec<String> {
        self.outbox()
            .await
            .into_iter()
            .map(|message| message.event_type)
            .collect()
    }
}

impl TransactionScope for InMemoryVideoStore {
    type Tx = VideoTx;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        Ok(transaction::begin(&self.state).await)
    }

    async fn commit(&self, tx: Self::Tx) -> Result<(), StoreError> {
        let delay = self.commit_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        transaction::commit(tx);
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl VideoStore for InMemoryVideoStore {
    async fn get(&self, id: VideoId) -> Result<Option<Video>, StoreError> {
        Ok(self.video(id).await)
    }

    async fn load(&self, tx: &mut Self::Tx, id: VideoId) -> Result<Option<Video>, StoreError> {
        Ok(tx.state().videos.get(&id).cloned())
    }

    async fn insert(&self, tx: &mut Self::Tx, video: &Video) -> Result<(), StoreError> {
        let videos = &mut tx.state_mut().videos;
        if videos.contains_key(&video.id) {
            return Err(StoreError::AlreadyExists(video.id));
        }
        videos.insert(video.id, video.clone());
        Ok(())
    }

    async fn update(
        &self,
        tx: &mut Self::Tx,
        video: &Video,
        expected: EventVersion,
    ) -> Result<(), StoreError> {
        let stored = tx
            .state_mut()
            .videos
            .get_mut(&video.id)
            .ok_or(StoreError::NotFound(video.id))?;
        if stored.version != expected {
            return Err(StoreError::VersionConflict {
                expected,
                actual: stored.version,
            });
        }
        *stored = video.clone();
        Ok(())
    }

    async fn delete(
        &self,
        tx: &mut Self::Tx,
        id: VideoId,
        expected: EventVersion,
    ) -> Result<(), StoreError> {
        let videos = &mut tx.state_mut().videos;
        let actual = videos.get(&id).ok_or(StoreError::NotFound(id))?.version;
        if actual != expected {
            return Err(StoreError::VersionConflict { expected, actual });
        }
        videos.remove(&id);
        Ok(())
    }
}

impl OutboxStore<VideoTx> for InMemoryVideoStore {
    async fn enqueue(&self, tx: &mut VideoTx, message: OutboxMessage) -> Result<(), StoreError> {
        if self.fail_enqueue.load(Ordering::SeqCst) {
            return Err(StoreError::Database("outbox unavailable".into()));
        }
        tx.state_mut().outbox.push(message);
        Ok(())
    }
}
