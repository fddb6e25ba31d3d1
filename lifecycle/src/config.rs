//! Writer configuration.
//!
//! Loads configuration from environment variables with sensible defaults.

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Lifecycle writer configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriterConfig {
    /// Aggregate type stamped on events and outbox messages
    pub aggregate_type: String,
    /// Event schema version written to the `schema_version` header
    pub schema_version: String,
    /// Deadline of one unit of work, including commit
    pub write_timeout: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            aggregate_type: "video".to_string(),
            schema_version: "1".to_string(),
            write_timeout: Duration::from_secs(5),
        }
    }
}

impl WriterConfig {
    /// Load configuration from environment variables.
    ///
    /// - `VIDEO_WRITE_TIMEOUT_MS` (default 5000)
    /// - `VIDEO_EVENT_SCHEMA_VERSION` (default `1`)
    ///
    /// Unparseable values fall back to the default.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            aggregate_type: defaults.aggregate_type,
            schema_version: env::var("VIDEO_EVENT_SCHEMA_VERSION")
                .unwrap_or(defaults.schema_version),
            write_timeout: env::var("VIDEO_WRITE_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map_or(defaults.write_timeout, Duration::from_millis),
        }
    }

    /// Override the write deadline.
    #[must_use]
    pub const fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }
}
