//! Identifier and version newtypes.
//!
//! This module defines strong types for aggregate identification (`VideoId`, `UserId`)
//! and clock-derived versioning (`EventVersion`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Error type for identifier parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid identifier: {0}")]
pub struct ParseIdError(String);

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(Uuid);

        impl $name {
            /// Generate a new random identifier.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wrap an existing UUID.
            #[must_use]
            pub const fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            /// Get the underlying UUID.
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }

            /// Whether this is the nil UUID (treated as a missing identifier).
            #[must_use]
            pub fn is_nil(&self) -> bool {
                self.0.is_nil()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s.trim())
                    .map(Self)
                    .map_err(|e| ParseIdError(format!("{s}: {e}")))
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }
    };
}

uuid_id!(
    /// Unique identifier of a video aggregate.
    ///
    /// # Examples
    ///
    /// ```
    /// use video_catalog_core::ids::VideoId;
    ///
    /// let id = VideoId::new();
    /// let parsed: VideoId = id.to_string().parse().unwrap();
    /// assert_eq!(id, parsed);
    /// ```
    VideoId
);

uuid_id!(
    /// Unique identifier of a user (uploader or engaging viewer).
    UserId
);

/// Clock-derived version number.
///
/// Versions are UTC microseconds since the Unix epoch. They are a monotonic surrogate
/// rather than a sequence: an aggregate's next version is the later of "now" and
/// "one microsecond after the previous version", so versions keep increasing even
/// if the wall clock steps backwards.
///
/// # Examples
///
/// ```
/// use video_catalog_core::ids::EventVersion;
/// use chrono::{TimeZone, Utc};
///
/// let t = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
/// let v = EventVersion::from_instant(t);
/// assert_eq!(v.instant(), Some(t));
///
/// // A regressed clock still yields a newer version.
/// let earlier = Utc.with_ymd_and_hms(2024, 12, 31, 0, 0, 0).unwrap();
/// assert_eq!(EventVersion::next_after(v, earlier), v.next());
/// ```
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct EventVersion(i64);

impl EventVersion {
    /// The version of "nothing written yet".
    pub const INITIAL: Self = Self(0);

    /// Create a version from a raw microsecond value.
    #[must_use]
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    /// Version for an instant (its UTC microsecond timestamp).
    #[must_use]
    pub fn from_instant(at: DateTime<Utc>) -> Self {
        Self(at.timestamp_micros())
    }

    /// The next version after `previous`, given the current time.
    #[must_use]
    pub fn next_after(previous: Self, now: DateTime<Utc>) -> Self {
        Self::from_instant(now).max(previous.next())
    }

    /// The raw microsecond value.
    #[must_use]
    pub const fn value(self) -> i64 {
        self.0
    }

    /// The version one microsecond later.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// The instant this version denotes, if representable.
    #[must_use]
    pub fn instant(self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_micros(self.0)
    }
}

impl fmt::Display for EventVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for EventVersion {
    fn from(value: i64) -> Self {
        Self(value)
    }
}
