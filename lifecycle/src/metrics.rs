//! Prometheus-backed metrics recorder.
//!
//! [`PrometheusMetrics`] forwards every measurement to the `metrics` facade:
//! - `video_writes_total{operation,result}`
//! - `video_events_enqueued_total{kind}`
//! - `video_events_suppressed_total{kind}`
//! - `projection_messages_total{consumer,outcome}`
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use video_catalog_lifecycle::metrics::{PrometheusMetrics, install_prometheus};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let handle = install_prometheus()?;
//! let recorder = Arc::new(PrometheusMetrics);
//! // ... inject `recorder` into the writer and consumers ...
//! println!("{}", handle.render());
//! # Ok(())
//! # }
//! ```

use metrics::{counter, describe_counter};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use thiserror::Error;
use video_catalog_core::ErrorKind;
use video_catalog_core::event::EventKind;
use video_catalog_core::metrics::{MetricsRecorder, WriteOperation, write_result_label};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Register all metric descriptions.
pub fn describe_metrics() {
    describe_counter!(
        "video_writes_total",
        "Total number of lifecycle writes by operation and result"
    );
    describe_counter!(
        "video_events_enqueued_total",
        "Total number of domain events enqueued to the outbox"
    );
    describe_counter!(
        "video_events_suppressed_total",
        "Total number of stage-completion events suppressed as duplicates"
    );
    describe_counter!(
        "projection_messages_total",
        "Total number of delivered messages handled by projection consumers"
    );
}

/// Install a Prometheus recorder and return its render handle.
///
/// # Errors
///
/// Returns [`MetricsError::Install`] if a global recorder is already installed.
pub fn install_prometheus() -> Result<PrometheusHandle, MetricsError> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| MetricsError::Install(e.to_string()))?;
    describe_metrics();
    tracing::info!("Prometheus metrics recorder installed");
    Ok(handle)
}

/// [`MetricsRecorder`] writing to the `metrics` facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrometheusMetrics;

impl MetricsRecorder for PrometheusMetrics {
    fn write_completed(&self, operation: WriteOperation, error: Option<ErrorKind>) {
        counter!(
            "video_writes_total",
            "operation" => operation.as_str(),
            "result" => write_result_label(error)
        )
        .increment(1);
    }

    fn event_enqueued(&self, kind: EventKind) {
        counter!("video_events_enqueued_total", "kind" => kind.as_str()).increment(1);
    }

    fn event_suppressed(&self, kind: EventKind) {
        counter!("video_events_suppressed_total", "kind" => kind.as_str()).increment(1);
    }

    fn message_consumed(&self, consumer: &str, outcome: &str) {
        counter!(
            "projection_messages_total",
            "consumer" => consumer.to_string(),
            "outcome" => outcome.to_string()
        )
        .increment(1);
    }
}
