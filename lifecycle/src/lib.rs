//! # Video Catalog Lifecycle
//!
//! The write side of the video catalog: a transactional-outbox writer and the stage
//! application services built on it.
//!
//! Every state change of a video and the events announcing it are written in one unit
//! of work. A projection therefore never sees an event for a change that did not
//! commit, and no committed change goes unannounced.
//!
//! ## Components
//!
//! - [`LifecycleWriter`]: create / update / delete inside one transaction, with
//!   optimistic version checks, event versioning and outbox enqueue
//! - [`services`]: register-upload, processing-status, media-info, AI-attributes and
//!   visibility adapters that apply the stage/status policy before writing
//! - [`config`]: writer configuration loaded from the environment
//! - [`metrics`]: Prometheus-backed
//!   [`MetricsRecorder`](video_catalog_core::metrics::MetricsRecorder)
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use video_catalog_lifecycle::{LifecycleWriter, services::RegisterUploadService};
//! use video_catalog_core::environment::SystemClock;
//!
//! let writer = Arc::new(LifecycleWriter::new(video_store, outbox_store, SystemClock));
//! let uploads = RegisterUploadService::new(Arc::clone(&writer));
//! let revision = uploads.register(input).await?;
//! ```

pub mod config;
pub mod metrics;
pub mod services;
pub mod writer;

pub use config::WriterConfig;
pub use writer::{
    AdditionalEvents, CreateVideoInput, DeleteVideoInput, LifecycleWriter, RequestContext,
    Revision, UpdateOptions, UpdateVideoInput,
};
