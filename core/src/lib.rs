//! # Video Catalog Core
//!
//! Core types and rules for the video catalog lifecycle.
//!
//! This crate is pure: it performs no I/O. It provides the building blocks that the
//! write side (`video-catalog-lifecycle`) and the read side (`video-catalog-projections`)
//! share:
//!
//! - **Aggregate**: the [`Video`](video::Video) and its independent sub-stage statuses
//! - **Policy**: overall status derivation and stage-transition fencing ([`policy`])
//! - **Events**: the closed [`EventPayload`](event::EventPayload) sum type, the wire
//!   [`EventEnvelope`](event::EventEnvelope) and its codecs ([`event`])
//! - **Builder**: event construction with diffing and duplicate suppression ([`builder`])
//! - **Contracts**: transaction scopes, the outbox `Enqueue` contract and projection
//!   stores ([`store`], [`projection`])
//!
//! ## Data Flow
//!
//! ```text
//! Stage Service ──▶ Policy ──▶ Lifecycle Writer ──▶ VideoStore + OutboxStore (one tx)
//!                                                         │
//!                                          Message Bus ◀──┘ (external)
//!                                                │
//!                 Catalog / Engagement consumers ◀┘ (version / timestamp gated)
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};

pub mod builder;
pub mod error;
pub mod event;
pub mod ids;
pub mod metrics;
pub mod policy;
pub mod projection;
pub mod store;
pub mod video;

pub use error::{ErrorKind, LifecycleError};
pub use event::{DomainEvent, EventEnvelope, EventKind, EventPayload};
pub use ids::{EventVersion, UserId, VideoId};
pub use video::{StageStatus, Video, VideoStatus, Visibility};

/// Environment module - injected dependencies that make the core deterministic.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use video_catalog_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let earlier = clock.now();
    /// assert!(clock.now() >= earlier);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
