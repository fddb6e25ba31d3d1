//! Read-side projection consumers for the video catalog.
//!
//! # Overview
//!
//! Lifecycle events leave the write side through the outbox and arrive here, at least
//! once and in any order. Each consumer folds them into a read model idempotently:
//!
//! - **[`CatalogConsumer`]**: one `ProfileVideoProjection` row per video, gated on the
//!   version of the last merged event (whole-row gate)
//! - **[`EngagementConsumer`]**: like/bookmark flags per `(user, video)`, each gated on
//!   its own `occurred_at` (per-field gate)
//! - **[`InboxProcessor`]**: runs a consumer for one delivered message inside a
//!   transaction, under a deadline, and records the outcome
//!
//! # CQRS Separation
//!
//! The projection tables live in the read-side database, apart from the write model:
//!
//! ```text
//! Write DB (videos + outbox)  →  Relay / Bus  →  Inbox  →  Projection DB (Read)
//! ```
//!
//! # Consuming
//!
//! ```ignore
//! use video_catalog_projections::{CatalogConsumer, ConsumerConfig, InboxProcessor};
//! use video_catalog_projections::postgres::PgCatalogStore;
//!
//! let store = PgCatalogStore::connect(&read_db_url).await?;
//! store.migrate().await?;
//!
//! let inbox = InboxProcessor::new(CatalogConsumer::new(store, SystemClock))
//!     .with_config(ConsumerConfig::from_env());
//!
//! match inbox.process(&delivery.payload, &delivery.metadata).await {
//!     Ok(_) => delivery.ack().await?,
//!     Err(e) if e.is_retryable() => delivery.nack().await?,
//!     Err(_) => delivery.reject().await?,
//! }
//! ```

pub mod catalog;
pub mod config;
pub mod engagement;
pub mod inbox;
pub mod postgres;

// Re-export main types for convenience
pub use catalog::{CatalogConsumer, CatalogMessage};
pub use config::ConsumerConfig;
pub use engagement::{
    EngagementAction, EngagementConsumer, EngagementEvent, EngagementKind, EngagementMessage,
};
pub use inbox::InboxProcessor;
pub use postgres::{PgCatalogStore, PgEngagementStore};
