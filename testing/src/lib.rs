//! # Video Catalog Testing
//!
//! Testing utilities for the video catalog lifecycle and its projections.
//!
//! This crate provides:
//! - Mock implementations of environment traits (clocks, metrics, encoders)
//! - In-memory transactional stores for the write side and both projections
//! - Fixtures for common aggregates
//!
//! ## Example
//!
//! ```ignore
//! use video_catalog_testing::{InMemoryVideoStore, test_clock};
//!
//! #[tokio::test]
//! async fn registers_upload() {
//!     let store = InMemoryVideoStore::new();
//!     let writer = LifecycleWriter::new(store.clone(), store.clone(), test_clock());
//!
//!     writer.create_video(input).await.unwrap();
//!     assert_eq!(store.event_types().await, vec!["video.created"]);
//! }
//! ```

use chrono::{DateTime, Utc};
use video_catalog_core::environment::Clock;

pub mod projection_mocks;
pub mod transaction;
pub mod video_store;

/// Mock implementations for testing.
pub mod mocks {
    #![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
    #![allow(clippy::missing_panics_doc)]

    use super::{Clock, DateTime, Utc};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex, PoisonError};
    use video_catalog_core::ErrorKind;
    use video_catalog_core::event::{EventEncoder, EventEnvelope, EventError, EventKind};
    use video_catalog_core::metrics::{MetricsRecorder, WriteOperation, write_result_label};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use video_catalog_testing::mocks::FixedClock;
    /// use video_catalog_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }

    /// Clock that only moves when told to.
    ///
    /// Clones share the same time, so a test can hold one handle while the code under
    /// test holds another.
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        time: Arc<Mutex<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Start at `time`.
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(Mutex::new(time)),
            }
        }

        /// Move forward (or, with a negative duration, backwards).
        pub fn advance(&self, by: chrono::Duration) {
            let mut time = self.time.lock().unwrap_or_else(PoisonError::into_inner);
            *time += by;
        }

        /// Jump to `time`.
        pub fn set(&self, time: DateTime<Utc>) {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner) = time;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    /// Metrics recorder that counts calls by label.
    #[derive(Debug, Clone, Default)]
    pub struct RecordingMetrics {
        counts: Arc<Mutex<HashMap<String, u64>>>,
    }

    impl RecordingMetrics {
        /// Create an empty recorder.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        fn bump(&self, key: String) {
            let mut counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
            *counts.entry(key).or_insert(0) += 1;
        }

        fn get(&self, key: &str) -> u64 {
            let counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
            counts.get(key).copied().unwrap_or(0)
        }

        /// Writes recorded for `operation` with `result` (`"ok"` or an error kind label).
        #[must_use]
        pub fn writes(&self, operation: WriteOperation, result: &str) -> u64 {
            self.get(&format!("write:{}:{result}", operation.as_str()))
        }

        /// Events of `kind` enqueued.
        #[must_use]
        pub fn enqueued(&self, kind: EventKind) -> u64 {
            self.get(&format!("enqueued:{kind}"))
        }

        /// Events of `kind` suppressed.
        #[must_use]
        pub fn suppressed(&self, kind: EventKind) -> u64 {
            self.get(&format!("suppressed:{kind}"))
        }

        /// Messages handled by `consumer` with `outcome`.
        #[must_use]
        pub fn consumed(&self, consumer: &str, outcome: &str) -> u64 {
            self.get(&format!("consumed:{consumer}:{outcome}"))
        }
    }

    impl MetricsRecorder for RecordingMetrics {
        fn write_completed(&self, operation: WriteOperation, error: Option<ErrorKind>) {
            self.bump(format!(
                "write:{}:{}",
                operation.as_str(),
                write_result_label(error)
            ));
        }

        fn event_enqueued(&self, kind: EventKind) {
            self.bump(format!("enqueued:{kind}"));
        }

        fn event_suppressed(&self, kind: EventKind) {
            self.bump(format!("suppressed:{kind}"));
        }

        fn message_consumed(&self, consumer: &str, outcome: &str) {
            self.bump(format!("consumed:{consumer}:{outcome}"));
        }
    }

    /// Encoder that succeeds a fixed number of times, then fails.
    #[derive(Debug, Clone)]
    pub struct FailingEncoder {
        remaining: Arc<AtomicUsize>,
    }

    impl FailingEncoder {
        /// Fail on every call.
        #[must_use]
        pub fn always() -> Self {
            Self::after(0)
        }

        /// Succeed `successes` times, then fail.
        #[must_use]
        pub fn after(successes: usize) -> Self {
            Self {
                remaining: Arc::new(AtomicUsize::new(successes)),
            }
        }
    }

    impl EventEncoder for FailingEncoder {
        fn encode(&self, envelope: &EventEnvelope) -> Result<Vec<u8>, EventError> {
            let allowed = self
                .remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if allowed {
                video_catalog_core::event::BincodeEncoder.encode(envelope)
            } else {
                Err(EventError::Serialization("forced encode failure".into()))
            }
        }

        fn content_type(&self) -> &'static str {
            "application/x-bincode"
        }
    }
}

/// Fixtures for common aggregates.
pub mod fixtures {
    use super::{DateTime, Utc};
    use video_catalog_core::ids::{EventVersion, UserId, VideoId};
    use video_catalog_core::video::{
        AiAttributes, FencingToken, MediaAttributes, StageStatus, Video, VideoStatus,
    };

    /// A freshly registered video, versioned at `now`.
    #[must_use]
    pub fn video(now: DateTime<Utc>) -> Video {
        Video {
            id: VideoId::new(),
            upload_user_id: UserId::new(),
            title: "Intro to Rust".to_string(),
            description: Some("Ownership in ten minutes".to_string()),
            raw_file_reference: "uploads/raw/intro.mp4".to_string(),
            status: VideoStatus::PendingUpload,
            media_status: StageStatus::Pending,
            analysis_status: StageStatus::Pending,
            media_token: FencingToken::default(),
            analysis_token: FencingToken::default(),
            media: MediaAttributes::default(),
            ai: AiAttributes::default(),
            visibility_status: None,
            publish_at: None,
            error_message: None,
            version: EventVersion::from_instant(now),
            created_at: now,
            updated_at: now,
        }
    }

    /// A video with both stages complete and overall status `ready`.
    #[must_use]
    pub fn ready_video(now: DateTime<Utc>) -> Video {
        let mut video = video(now);
        video.status = VideoStatus::Ready;
        video.media_status = StageStatus::Ready;
        video.analysis_status = StageStatus::Ready;
        video.media = MediaAttributes {
            duration_micros: Some(600_000_000),
            encoded_resolution: Some("1920x1080".to_string()),
            encoded_bitrate: Some(4_500),
            thumbnail_url: Some("https://cdn.example.com/t/intro.jpg".to_string()),
            hls_master_playlist: Some("https://cdn.example.com/h/intro.m3u8".to_string()),
        };
        video.ai = AiAttributes {
            difficulty: Some("beginner".to_string()),
            summary: Some("Ownership basics".to_string()),
            tags: vec!["rust".to_string(), "ownership".to_string()],
            raw_subtitle_url: None,
        };
        video
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use proptest::prelude::*;
    use video_catalog_core::video::{StageStatus, VideoStatus};

    /// Any overall status.
    pub fn video_status() -> impl Strategy<Value = VideoStatus> {
        proptest::sample::select(VideoStatus::ALL)
    }

    /// Any stage status.
    pub fn stage_status() -> impl Strategy<Value = StageStatus> {
        proptest::sample::select(StageStatus::ALL)
    }

    /// Microsecond offsets used to jitter clocks, including regressions.
    pub fn clock_jitter_micros() -> impl Strategy<Value = i64> {
        -5_000_000i64..5_000_000
    }
}

/// Install a test subscriber honouring `RUST_LOG`. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// Re-export commonly used items
pub use mocks::{FailingEncoder, FixedClock, ManualClock, RecordingMetrics, test_clock};
pub use projection_mocks::{InMemoryCatalogStore, InMemoryEngagementStore};
pub use transaction::InMemoryTx;
pub use video_store::{InMemoryVideoStore, VideoTx};
