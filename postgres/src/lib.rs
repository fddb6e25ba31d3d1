//! `PostgreSQL` write-side storage for the video catalog.
//!
//! This crate provides the production storage behind the lifecycle writer. It uses
//! sqlx and supports:
//!
//! - Video persistence with conditional (optimistic) writes
//! - Row locking of the aggregate for the length of a unit of work
//! - A transactional outbox sharing the aggregate's transaction
//! - Connection pooling configured from the environment
//!
//! # Example
//!
//! ```ignore
//! use video_catalog_lifecycle::LifecycleWriter;
//! use video_catalog_postgres::{PgOutboxStore, PgVideoStore, PostgresConfig};
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let pool = PostgresConfig::from_env().connect().await?;
//!     let store = PgVideoStore::new(pool.clone());
//!     store.migrate().await?;
//!
//!     let writer = LifecycleWriter::new(store, PgOutboxStore::new(pool), SystemClock);
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod outbox;
pub mod video_store;

pub use config::PostgresConfig;
pub use outbox::PgOutboxStore;
pub use video_store::PgVideoStore;

use sqlx::{Postgres, Transaction};
use video_catalog_core::store::StoreError;

/// Transaction handle shared by the video store and the outbox.
pub type PgTx = Transaction<'static, Postgres>;

/// Map a sqlx failure onto the storage sentinels.
pub(crate) fn storage_error(context: &str, err: &sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::PoolTimedOut => StoreError::Timeout(format!("{context}: {err}")),
        _ => StoreError::Database(format!("{context}: {err}")),
    }
}
