//! `PostgreSQL` video store.
//!
//! One row per aggregate in `videos`. Stage outputs are stored as `JSONB`; statuses
//! as their wire text. Writes are conditional on the version the writer read, so a
//! concurrent writer that slipped in between is reported as a conflict rather than
//! silently overwritten.

use crate::{PgTx, storage_error};
use sqlx::Row;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::types::Json;
use video_catalog_core::store::{StoreError, TransactionScope, VideoStore};
use video_catalog_core::video::{
    AiAttributes, FencingToken, MediaAttributes, StageStatus, VideoStatus, Visibility,
};
use video_catalog_core::{EventVersion, UserId, Video, VideoId};

const COLUMNS: &str = "id, upload_user_id, title, description, raw_file_reference, status, \
     media_status, analysis_status, media_job_id, media_emitted_at, analysis_job_id, \
     analysis_emitted_at, media, ai, visibility_status, publish_at, error_message, version, \
     created_at, updated_at";

/// `PostgreSQL`-backed [`VideoStore`].
///
/// # Example
///
/// ```no_run
/// use video_catalog_postgres::{PgVideoStore, PostgresConfig};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let pool = PostgresConfig::from_env().connect().await?;
/// let store = PgVideoStore::new(pool);
/// store.migrate().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct PgVideoStore {
    pool: PgPool,
}

impl PgVideoStore {
    /// Create a store with the given connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run the write-side migrations (`videos`, `outbox_messages`).
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

    /// Explain why a conditional write touched no row.
    async fn missed_write(tx: &mut PgTx, id: VideoId, expected: EventVersion) -> StoreError {
        let current = sqlx::query("SELECT version FROM videos WHERE id = $1")
            .bind(*id.as_uuid())
            .fetch_optional(&mut **tx)
            .await;

        match current {
            Ok(None) => StoreError::NotFound(id),
            Ok(Some(row)) => match row.try_get::<i64, _>("version") {
                Ok(actual) => {
                    tracing::warn!(
                        video_id = %id,
                        expected = %expected,
                        actual,
                        "Conditional write lost against a concurrent writer"
                    );
                    metrics::counter!("video_store.version_conflicts").increment(1);
                    StoreError::VersionConflict {
                        expected,
                        actual: EventVersion::new(actual),
                    }
                }
                Err(e) => storage_error("Failed to read version", &e),
            },
            Err(e) => storage_error("Failed to read version", &e),
        }
    }
}

fn parse_text<T>(row: &PgRow, column: &str) -> Result<T, sqlx::Error>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let text: String = row.try_get(column)?;
    text.parse().map_err(|e| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(e),
    })
}

fn row_to_video(row: &PgRow) -> Result<Video, sqlx::Error> {
    let visibility: Option<String> = row.try_get("visibility_status")?;
    let visibility_status = visibility
        .map(|v| v.parse::<Visibility>())
        .transpose()
        .map_err(|e| sqlx::Error::ColumnDecode {
            index: "visibility_status".to_string(),
            source: Box::new(e),
        })?;
    let Json(media): Json<MediaAttributes> = row.try_get("media")?;
    let Json(ai): Json<AiAttributes> = row.try_get("ai")?;

    Ok(Video {
        id: VideoId::from_uuid(row.try_get("id")?),
        upload_user_id: UserId::from_uuid(row.try_get("upload_user_id")?),
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        raw_file_reference: row.try_get("raw_file_reference")?,
        status: parse_text::<VideoStatus>(row, "status")?,
        media_status: parse_text::<StageStatus>(row, "media_status")?,
        analysis_status: parse_text::<StageStatus>(row, "analysis_status")?,
        media_token: FencingToken {
            job_id: row.try_get("media_job_id")?,
            emitted_at: row.try_get("media_emitted_at")?,
        },
        analysis_token: FencingToken {
            job_id: row.try_get("analysis_job_id")?,
            emitted_at: row.try_get("analysis_emitted_at")?,
        },
        media,
        ai,
        visibility_status,
        publish_at: row.try_get("publish_at")?,
        error_message: row.try_get("error_message")?,
        version: EventVersion::new(row.try_get("version")?),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

impl TransactionScope for PgVideoStore {
    type Tx = PgTx;

    async fn begin(&self) -> Result<PgTx, StoreError> {
        self.pool
            .begin()
            .await
            .map_err(|e| storage_error("Failed to begin transaction", &e))
    }

    async fn commit(&self, tx: PgTx) -> Result<(), StoreError> {
        tx.commit()
            .await
            .map_err(|e| storage_error("Failed to commit", &e))
    }
}

impl VideoStore for PgVideoStore {
    async fn get(&self, id: VideoId) -> Result<Option<Video>, StoreError> {
        let query = format!("SELECT {COLUMNS} FROM videos WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(*id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| storage_error("Failed to get video", &e))?;

        row.as_ref()
            .map(row_to_video)
            .transpose()
            .map_err(|e| storage_error("Failed to read video", &e))
    }

    async fn load(&self, tx: &mut PgTx, id: VideoId) -> Result<Option<Video>, StoreError> {
        let query = format!("SELECT {COLUMNS} FROM videos WHERE id = $1 FOR UPDATE");
        let row = sqlx::query(&query)
            .bind(*id.as_uuid())
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| storage_error("Failed to load video", &e))?;

        row.as_ref()
            .map(row_to_video)
            .transpose()
            .map_err(|e| storage_error("Failed to read video", &e))
    }

    async fn insert(&self, tx: &mut PgTx, video: &Video) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO videos (
                id, upload_user_id, title, description, raw_file_reference, status,
                media_status, analysis_status, media_job_id, media_emitted_at,
                analysis_job_id, analysis_emitted_at, media, ai, visibility_status,
                publish_at, error_message, version, created_at, updated_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                $11, $12, $13, $14, $15, $16, $17, $18, $19, $20
            )
            ",
        )
        .bind(*video.id.as_uuid())
        .bind(*video.upload_user_id.as_uuid())
        .bind(&video.title)
        .bind(&video.description)
        .bind(&video.raw_file_reference)
        .bind(video.status.as_str())
        .bind(video.media_status.as_str())
        .bind(video.analysis_status.as_str())
        .bind(&video.media_token.job_id)
        .bind(video.media_token.emitted_at)
        .bind(&video.analysis_token.job_id)
        .bind(video.analysis_token.emitted_at)
        .bind(Json(&video.media))
        .bind(Json(&video.ai))
        .bind(video.visibility_status.map(Visibility::as_str))
        .bind(video.publish_at)
        .bind(&video.error_message)
        .bind(video.version.value())
        .bind(video.created_at)
        .bind(video.updated_at)
        .execute(&mut **tx)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::AlreadyExists(video.id)
            }
            _ => storage_error("Failed to insert video", &e),
        })?;

        Ok(())
    }

    async fn update(
        &self,
        tx: &mut PgTx,
        video: &Video,
        expected: EventVersion,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r"
            UPDATE videos SET
                title = $3,
                description = $4,
                raw_file_reference = $5,
                status = $6,
                media_status = $7,
                analysis_status = $8,
                media_job_id = $9,
                media_emitted_at = $10,
                analysis_job_id = $11,
                analysis_emitted_at = $12,
                media = $13,
                ai = $14,
                visibility_status = $15,
                publish_at = $16,
                error_message = $17,
                version = $18,
                updated_at = $19
            WHERE id = $1 AND version = $2
            ",
        )
        .bind(*video.id.as_uuid())
        .bind(expected.value())
        .bind(&video.title)
        .bind(&video.description)
        .bind(&video.raw_file_reference)
        .bind(video.status.as_str())
        .bind(video.media_status.as_str())
        .bind(video.analysis_status.as_str())
        .bind(&video.media_token.job_id)
        .bind(video.media_token.emitted_at)
        .bind(&video.analysis_token.job_id)
        .bind(video.analysis_token.emitted_at)
        .bind(Json(&video.media))
        .bind(Json(&video.ai))
        .bind(video.visibility_status.map(Visibility::as_str))
        .bind(video.publish_at)
        .bind(&video.error_message)
        .bind(video.version.value())
        .bind(video.updated_at)
        .execute(&mut **tx)
        .await
        .map_err(|e| storage_error("Failed to update video", &e))?;

        if result.rows_affected() == 0 {
            return Err(Self::missed_write(tx, video.id, expected).await);
        }
        Ok(())
    }

    async fn delete(
        &self,
        tx: &mut PgTx,
        id: VideoId,
        expected: EventVersion,
    ) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM videos WHERE id = $1 AND version = $2")
            .bind(*id.as_uuid())
            .bind(expected.value())
            .execute(&mut **tx)
            .await
            .map_err(|e| storage_error("Failed to delete video", &e))?;

        if result.rows_affected() == 0 {
            return Err(Self::missed_write(tx, id, expected).await);
        }
        Ok(())
    }
}
