//! Consumer configuration.
//!
//! Loads configuration from environment variables with sensible defaults.

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Projection consumer configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerConfig {
    /// Deadline for handling one message, including commit
    pub handle_timeout: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            handle_timeout: Duration::from_secs(5),
        }
    }
}

impl ConsumerConfig {
    /// Load configuration from environment variables.
    ///
    /// - `PROJECTION_HANDLE_TIMEOUT_MS` (default 5000)
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            handle_timeout: env::var("PROJECTION_HANDLE_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map_or_else(|| Self::default().handle_timeout, Duration::from_millis),
        }
    }

    /// Override the handling deadline.
    #[must_use]
    pub const fn with_handle_timeout(mut self, timeout: Duration) -> Self {
        self.handle_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_timeout_is_five_seconds() {
        assert_eq!(ConsumerConfig::default().handle_timeout, Duration::from_secs(5));
    }
}
