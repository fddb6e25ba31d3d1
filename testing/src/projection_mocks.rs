//! In-memory projection stores
//!
//! Provides fast, deterministic storage for consumer tests:
//! - [`InMemoryCatalogStore`]: catalog rows keyed by video
//! - [`InMemoryEngagementStore`]: engagement state keyed by `(user, video)`
//!
//! Both stage writes in an [`InMemoryTx`] and apply them on commit.

#![allow(clippy::missing_panics_doc)]

use crate::transaction::{self, InMemoryTx};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use video_catalog_core::projection::{
    CatalogProjectionStore, EngagementStore, ProfileVideoProjection, VideoUserState,
};
use video_catalog_core::store::{StoreError, TransactionScope};
use video_catalog_core::{UserId, VideoId};

type CatalogRows = HashMap<VideoId, ProfileVideoProjection>;
type EngagementRows = HashMap<(UserId, VideoId), VideoUserState>;

/// In-memory [`CatalogProjectionStore`].
///
/// # Example
///
/// ```
/// use video_catalog_testing::InMemoryCatalogStore;
///
/// # async fn example() {
/// let store = InMemoryCatalogStore::new();
/// assert_eq!(store.row_count().await, 0);
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryCatalogStore {
    rows: Arc<Mutex<CatalogRows>>,
    fail_writes: Arc<AtomicBool>,
}

impl InMemoryCatalogStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `upsert` fail with a storage error.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Committed row.
    pub async fn row(&self, video_id: VideoId) -> Option<ProfileVideoProjection> {
        self.rows.lock().await.get(&video_id).cloned()
    }

    /// Number of committed rows.
    pub async fn row_count(&self) -> usize {
        self.rows.lock().await.len()
    }

    /// Videos with a committed row.
    pub async fn row_ids(&self) -> Vec<VideoId> {
        self.rows.lock().await.keys().copied().collect()
    }
}

impl TransactionScope for InMemoryCatalogStore {
    type Tx = InMemoryTx<CatalogRows>;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        Ok(transaction::begin(&self.rows).await)
    }

    async fn commit(&self, tx: Self::Tx) -> Result<(), StoreError> {
        transaction::commit(tx);
        Ok(())
    }
}

impl CatalogProjectionStore for InMemoryCatalogStore {
    async fn get(&self, video_id: VideoId) -> Result<Option<ProfileVideoProjection>, StoreError> {
        Ok(self.row(video_id).await)
    }

    async fn load(
        &self,
        tx: &mut Self::Tx,
        video_id: VideoId,
    ) -> Result<Option<ProfileVideoProjection>, StoreError> {
        Ok(tx.state().get(&video_id).cloned())
    }

    async fn upsert(
        &self,
        tx: &mut Self::Tx,
        row: &ProfileVideoProjection,
    ) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Database("catalog store unavailable".into()));
        }
        if let Some(current) = tx.state().get(&row.video_id) {
            if current.version >= row.version {
                return Err(StoreError::VersionConflict {
                    expected: row.version,
                    actual: current.version,
                });
            }
        }
        tx.state_mut().insert(row.video_id, row.clone());
        Ok(())
    }
}

/// In-memory [`EngagementStore`].
#[derive(Clone, Debug, Default)]
pub struct InMemoryEngagementStore {
    rows: Arc<Mutex<EngagementRows>>,
}

impl InMemoryEngagementStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed state.
    pub async fn state(&self, user_id: UserId, video_id: VideoId) -> Option<VideoUserState> {
        self.rows.lock().await.get(&(user_id, video_id)).cloned()
    }
}

impl TransactionScope for InMemoryEngagementStore {
    type Tx = InMemoryTx<EngagementRows>;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        Ok(transaction::begin(&self.rows).await)
    }

    async fn commit(&self, tx: Self::Tx) -> Result<(), StoreError> {
        transaction::commit(tx);
        Ok(())
    }
}

impl EngagementStore for InMemoryEngagementStore {
    async fn get(
        &self,
        user_id: UserId,
        video_id: VideoId,
    ) -> Result<Option<VideoUserState>, StoreError> {
        Ok(self.state(user_id, video_id).await)
    }

    async fn load(
        &self,
        tx: &mut Self::Tx,
        user_id: UserId,
        video_id: VideoId,
    ) -> Result<Option<VideoUserState>, StoreError> {
        Ok(tx.state().get(&(user_id, video_id)).cloned())
    }

    async fn upsert(&self, tx: &mut Self::Tx, state: &VideoUserState) -> Result<(), StoreError> {
        tx.state_mut()
            .insert((state.user_id, state.video_id), state.clone());
        Ok(())
    }
}
