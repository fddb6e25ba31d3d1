//! `PostgreSQL` implementations of the projection stores.
//!
//! # Overview
//!
//! Both stores keep their rows in the read-side database and hand out
//! `sqlx` transactions as their unit of work:
//!
//! - [`PgCatalogStore`]: `profile_video_projections`, one row per video
//! - [`PgEngagementStore`]: `video_user_states`, one row per `(user, video)`
//!
//! `load` first claims the key with an empty placeholder row
//! (`INSERT ... ON CONFLICT DO NOTHING`) and then locks it with `FOR UPDATE`. A second
//! delivery for the same key blocks on the claim until the first one commits or rolls
//! back, then reads what it left behind. This holds for keys that have no row yet,
//! which `FOR UPDATE` alone cannot lock. Placeholders are reported as absent and only
//! survive a transaction that commits without writing.
//!
//! Upserts are guarded as well: a catalog row is only replaced by a higher version,
//! and each engagement flag only by a newer `occurred_at`.
//!
//! # Separate Database (CQRS)
//!
//! ```ignore
//! use video_catalog_projections::postgres::*;
//!
//! let catalog = PgCatalogStore::connect("postgres://localhost/read_models").await?;
//! catalog.migrate().await?;
//! let engagement = PgEngagementStore::new(catalog.pool().clone());
//! ```

use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};
use video_catalog_core::projection::{
    CatalogProjectionStore, EngagementStore, ProfileVideoProjection, VideoUserState,
};
use video_catalog_core::store::{StoreError, TransactionScope};
use video_catalog_core::video::Visibility;
use video_catalog_core::{EventVersion, UserId, VideoId};

/// Transaction handle of the projection stores.
pub type PgTx = Transaction<'static, Postgres>;

fn storage_error(context: &str, err: &sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::PoolTimedOut => StoreError::Timeout(format!("{context}: {err}")),
        _ => StoreError::Database(format!("{context}: {err}")),
    }
}

async fn connect_pool(database_url: &str) -> Result<PgPool, StoreError> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .map_err(|e| storage_error("Failed to connect", &e))
}

async fn begin(pool: &PgPool) -> Result<PgTx, StoreError> {
    pool.begin()
        .await
        .map_err(|e| storage_error("Failed to begin transaction", &e))
}

async fn commit(tx: PgTx) -> Result<(), StoreError> {
    tx.commit()
        .await
        .map_err(|e| storage_error("Failed to commit", &e))
}

/// PostgreSQL-backed catalog projection.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE profile_video_projections (
///     video_id UUID PRIMARY KEY,
///     title TEXT,
///     description TEXT,
///     duration_micros BIGINT,
///     thumbnail_url TEXT,
///     hls_master_playlist TEXT,
///     status TEXT,
///     visibility TEXT,
///     published_at TIMESTAMPTZ,
///     version BIGINT NOT NULL,
///     updated_at TIMESTAMPTZ NOT NULL
/// );
/// ```
#[derive(Clone, Debug)]
pub struct PgCatalogStore {
    pool: PgPool,
}

impl PgCatalogStore {
    /// Create a store using an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a store with its own connection to the read-side database.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the connection fails.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        Ok(Self::new(connect_pool(database_url).await?))
    }

    /// Run the projection migrations (both projection tables).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("Migration failed: {e}")))
    }

    /// Get the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_projection(row: &PgRow) -> Result<ProfileVideoProjection, sqlx::Error> {
        let visibility: Option<String> = row.try_get("visibility")?;
        let visibility = visibility
            .map(|v| v.parse::<Visibility>())
            .transpose()
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;

        Ok(ProfileVideoProjection {
            video_id: VideoId::from_uuid(row.try_get("video_id")?),
            title: row.try_get("title")?,
            description: row.try_get("description")?,
            duration_micros: row.try_get("duration_micros")?,
            thumbnail_url: row.try_get("thumbnail_url")?,
            hls_master_playlist: row.try_get("hls_master_playlist")?,
            status: row.try_get("status")?,
            visibility,
            published_at: row.try_get("published_at")?,
            version: EventVersion::new(row.try_get("version")?),
            updated_at: row.try_get("updated_at")?,
        })
    }
}

const CATALOG_COLUMNS: &str = "video_id, title, description, duration_micros, thumbnail_url, \
     hls_master_playlist, status, visibility, published_at, version, updated_at";

impl TransactionScope for PgCatalogStore {
    type Tx = PgTx;

    async fn begin(&self) -> Result<PgTx, StoreError> {
        begin(&self.pool).await
    }

    async fn commit(&self, tx: PgTx) -> Result<(), StoreError> {
        commit(tx).await
    }
}

impl CatalogProjectionStore for PgCatalogStore {
    async fn get(&self, video_id: VideoId) -> Result<Option<ProfileVideoProjection>, StoreError> {
        let query = format!(
            "SELECT {CATALOG_COLUMNS} FROM profile_video_projections \
             WHERE video_id = $1 AND version > 0"
        );
        let row = sqlx::query(&query)
            .bind(*video_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| storage_error("Failed to get projection", &e))?;

        row.as_ref()
            .map(Self::row_to_projection)
            .transpose()
            .map_err(|e| storage_error("Failed to read projection", &e))
    }

    async fn load(
        &self,
        tx: &mut PgTx,
        video_id: VideoId,
    ) -> Result<Option<ProfileVideoProjection>, StoreError> {
        sqlx::query(
            r"
            INSERT INTO profile_video_projections (video_id, version, updated_at)
            VALUES ($1, 0, NOW())
            ON CONFLICT (video_id) DO NOTHING
            ",
        )
        .bind(*video_id.as_uuid())
        .execute(&mut **tx)
        .await
        .map_err(|e| storage_error("Failed to claim projection", &e))?;

        let query = format!(
            "SELECT {CATALOG_COLUMNS} FROM profile_video_projections WHERE video_id = $1 FOR UPDATE"
        );
        let row = sqlx::query(&query)
            .bind(*video_id.as_uuid())
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| storage_error("Failed to load projection", &e))?;

        let loaded = row
            .as_ref()
            .map(Self::row_to_projection)
            .transpose()
            .map_err(|e| storage_error("Failed to read projection", &e))?;
        Ok(loaded.filter(|row| row.version > EventVersion::INITIAL))
    }

    async fn upsert(&self, tx: &mut PgTx, row: &ProfileVideoProjection) -> Result<(), StoreError> {
        let result = sqlx::query(
            r"
            INSERT INTO profile_video_projections (
                video_id, title, description, duration_micros, thumbnail_url,
                hls_master_playlist, status, visibility, published_at, version, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (video_id) DO UPDATE SET
                title = EXCLUDED.title,
                description = EXCLUDED.description,
                duration_micros = EXCLUDED.duration_micros,
                thumbnail_url = EXCLUDED.thumbnail_url,
                hls_master_playlist = EXCLUDED.hls_master_playlist,
                status = EXCLUDED.status,
                visibility = EXCLUDED.visibility,
                published_at = EXCLUDED.published_at,
                version = EXCLUDED.version,
                updated_at = EXCLUDED.updated_at
            WHERE profile_video_projections.version < EXCLUDED.version
            ",
        )
        .bind(*row.video_id.as_uuid())
        .bind(&row.title)
        .bind(&row.description)
        .bind(row.duration_micros)
        .bind(&row.thumbnail_url)
        .bind(&row.hls_master_playlist)
        .bind(&row.status)
        .bind(row.visibility.map(Visibility::as_str))
        .bind(row.published_at)
        .bind(row.version.value())
        .bind(row.updated_at)
        .execute(&mut **tx)
        .await
        .map_err(|e| storage_error("Failed to upsert projection", &e))?;

        if result.rows_affected() == 0 {
            let actual: i64 = sqlx::query_scalar(
                "SELECT version FROM profile_video_projections WHERE video_id = $1",
            )
            .bind(*row.video_id.as_uuid())
            .fetch_one(&mut **tx)
            .await
            .map_err(|e| storage_error("Failed to read projection version", &e))?;

            tracing::warn!(
                video_id = %row.video_id,
                version = %row.version,
                current = actual,
                "Catalog upsert lost to a newer version"
            );
            return Err(StoreError::VersionConflict {
                expected: row.version,
                actual: EventVersion::new(actual),
            });
        }
        Ok(())
    }
}

/// PostgreSQL-backed engagement projection.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE video_user_states (
///     user_id UUID NOT NULL,
///     video_id UUID NOT NULL,
///     has_liked BOOLEAN NOT NULL DEFAULT FALSE,
///     liked_occurred_at TIMESTAMPTZ,
///     has_bookmarked BOOLEAN NOT NULL DEFAULT FALSE,
///     bookmarked_occurred_at TIMESTAMPTZ,
///     updated_at TIMESTAMPTZ NOT NULL,
///     PRIMARY KEY (user_id, video_id)
/// );
/// ```
#[derive(Clone, Debug)]
pub struct PgEngagementStore {
    pool: PgPool,
}

impl PgEngagementStore {
    /// Create a store using an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a store with its own connection to the read-side database.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the connection fails.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        Ok(Self::new(connect_pool(database_url).await?))
    }

    /// Get the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_state(row: &PgRow) -> Result<VideoUserState, sqlx::Error> {
        Ok(VideoUserState {
            user_id: UserId::from_uuid(row.try_get("user_id")?),
            video_id: VideoId::from_uuid(row.try_get("video_id")?),
            has_liked: row.try_get("has_liked")?,
            liked_occurred_at: row.try_get("liked_occurred_at")?,
            has_bookmarked: row.try_get("has_bookmarked")?,
            bookmarked_occurred_at: row.try_get("bookmarked_occurred_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

const ENGAGEMENT_COLUMNS: &str = "user_id, video_id, has_liked, liked_occurred_at, \
     has_bookmarked, bookmarked_occurred_at, updated_at";

/// Excludes unclaimed placeholders: every applied event sets one of the fences.
const ENGAGEMENT_SEEN: &str =
    "(liked_occurred_at IS NOT NULL OR bookmarked_occurred_at IS NOT NULL)";

impl TransactionScope for PgEngagementStore {
    type Tx = PgTx;

    async fn begin(&self) -> Result<PgTx, StoreError> {
        begin(&self.pool).await
    }

    async fn commit(&self, tx: PgTx) -> Result<(), StoreError> {
        commit(tx).await
    }
}

impl EngagementStore for PgEngagementStore {
    async fn get(
        &self,
        user_id: UserId,
        video_id: VideoId,
    ) -> Result<Option<VideoUserState>, StoreError> {
        let query = format!(
            "SELECT {ENGAGEMENT_COLUMNS} FROM video_user_states \
             WHERE user_id = $1 AND video_id = $2 AND {ENGAGEMENT_SEEN}"
        );
        let row = sqlx::query(&query)
            .bind(*user_id.as_uuid())
            .bind(*video_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| storage_error("Failed to get engagement", &e))?;

        row.as_ref()
            .map(Self::row_to_state)
            .transpose()
            .map_err(|e| storage_error("Failed to read engagement", &e))
    }

    async fn load(
        &self,
        tx: &mut PgTx,
        user_id: UserId,
        video_id: VideoId,
    ) -> Result<Option<VideoUserState>, StoreError> {
        sqlx::query(
            r"
            INSERT INTO video_user_states (user_id, video_id, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (user_id, video_id) DO NOTHING
            ",
        )
        .bind(*user_id.as_uuid())
        .bind(*video_id.as_uuid())
        .execute(&mut **tx)
        .await
        .map_err(|e| storage_error("Failed to claim engagement", &e))?;

        let query = format!(
            "SELECT {ENGAGEMENT_COLUMNS} FROM video_user_states \
             WHERE user_id = $1 AND video_id = $2 FOR UPDATE"
        );
        let row = sqlx::query(&query)
            .bind(*user_id.as_uuid())
            .bind(*video_id.as_uuid())
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| storage_error("Failed to load engagement", &e))?;

        let loaded = row
            .as_ref()
            .map(Self::row_to_state)
            .transpose()
            .map_err(|e| storage_error("Failed to read engagement", &e))?;
        Ok(loaded.filter(|state| {
            state.liked_occurred_at.is_some() || state.bookmarked_occurred_at.is_some()
        }))
    }

    async fn upsert(&self, tx: &mut PgTx, state: &VideoUserState) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO video_user_states (
                user_id, video_id, has_liked, liked_occurred_at,
                has_bookmarked, bookmarked_occurred_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (user_id, video_id) DO UPDATE SET
                has_liked = CASE
                    WHEN video_user_states.liked_occurred_at IS NULL
                        OR EXCLUDED.liked_occurred_at > video_user_states.liked_occurred_at
                    THEN EXCLUDED.has_liked ELSE video_user_states.has_liked END,
                liked_occurred_at = CASE
                    WHEN video_user_states.liked_occurred_at IS NULL
                        OR EXCLUDED.liked_occurred_at > video_user_states.liked_occurred_at
                    THEN EXCLUDED.liked_occurred_at ELSE video_user_states.liked_occurred_at END,
                has_bookmarked = CASE
                    WHEN video_user_states.bookmarked_occurred_at IS NULL
                        OR EXCLUDED.bookmarked_occurred_at
                            > video_user_states.bookmarked_occurred_at
                    THEN EXCLUDED.has_bookmarked ELSE video_user_states.has_bookmarked END,
                bookmarked_occurred_at = CASE
                    WHEN video_user_states.bookmarked_occurred_at IS NULL
                        OR EXCLUDED.bookmarked_occurred_at
                            > video_user_states.bookmarked_occurred_at
                    THEN EXCLUDED.bookmarked_occurred_at
                    ELSE video_user_states.bookmarked_occurred_at END,
                updated_at = GREATEST(video_user_states.updated_at, EXCLUDED.updated_at)
            ",
        )
        .bind(*state.user_id.as_uuid())
        .bind(*state.video_id.as_uuid())
        .bind(state.has_liked)
        .bind(state.liked_occurred_at)
        .bind(state.has_bookmarked)
        .bind(state.bookmarked_occurred_at)
        .bind(state.updated_at)
        .execute(&mut **tx)
        .await
        .map_err(|e| storage_error("Failed to upsert engagement", &e))?;

        Ok(())
    }
}
