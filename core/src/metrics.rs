//! Metrics recorder seam.
//!
//! The writer and the consumers report through an injected [`MetricsRecorder`]
//! instead of process-wide state. Production wiring installs a Prometheus-backed
//! recorder; tests use [`NoopMetrics`] or a recording double.

use crate::error::ErrorKind;
use crate::event::EventKind;

/// Write operation label.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum WriteOperation {
    /// `CreateVideo`
    Create,
    /// `UpdateVideo`
    Update,
    /// `DeleteVideo`
    Delete,
}

impl WriteOperation {
    /// Label form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

/// Result label of a write: `"ok"` or the error kind.
#[must_use]
pub const fn write_result_label(error: Option<ErrorKind>) -> &'static str {
    match error {
        None => "ok",
        Some(kind) => kind.as_str(),
    }
}

/// Receives lifecycle and consumer measurements.
pub trait MetricsRecorder: Send + Sync {
    /// A write finished, successfully (`error == None`) or not.
    fn write_completed(&self, operation: WriteOperation, error: Option<ErrorKind>);

    /// An event was enqueued in a committed unit of work.
    fn event_enqueued(&self, kind: EventKind);

    /// A stage-completion event was suppressed because nothing observable changed.
    fn event_suppressed(&self, kind: EventKind);

    /// A consumer finished handling one delivered message.
    ///
    /// `outcome` is an [`ApplyOutcome`](crate::projection::ApplyOutcome) label on
    /// success or a [`ConsumerError`](crate::projection::ConsumerError) label on failure.
    fn message_consumed(&self, consumer: &str, outcome: &str);
}

/// Recorder that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsRecorder for NoopMetrics {
    fn write_completed(&self, _operation: WriteOperation, _error: Option<ErrorKind>) {}

    fn event_enqueued(&self, _kind: EventKind) {}

    fn event_suppressed(&self, _kind: EventKind) {}

    fn message_consumed(&self, _consumer: &str, _outcome: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_labels() {
        assert_eq!(write_result_label(None), "ok");
        assert_eq!(write_result_label(Some(ErrorKind::Conflict)), "conflict");
    }
}
