//! Inbox delivery driver.
//!
//! Runs one delivered message through an [`InboxHandler`]:
//!
//! ```text
//! decode ─▶ begin ─▶ handle(tx, event, metadata) ─▶ commit
//! ```
//!
//! all under [`ConsumerConfig::handle_timeout`]. Any error, or expiry of the deadline,
//! drops the transaction so nothing is applied. Retrying is left to the delivery
//! mechanism, which can consult [`ConsumerError::is_retryable`].

use crate::config::ConsumerConfig;
use std::sync::Arc;
use video_catalog_core::metrics::{MetricsRecorder, NoopMetrics};
use video_catalog_core::projection::{ApplyOutcome, ConsumerError, InboxHandler, InboxMetadata};
use video_catalog_core::store::TransactionScope;

/// Drives an [`InboxHandler`] one message at a time.
pub struct InboxProcessor<H> {
    handler: H,
    config: ConsumerConfig,
    metrics: Arc<dyn MetricsRecorder>,
}

impl<H: InboxHandler> InboxProcessor<H> {
    /// Wrap `handler` with default configuration and no metrics.
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            config: ConsumerConfig::default(),
            metrics: Arc::new(NoopMetrics),
        }
    }

    /// Replace the configuration.
    #[must_use]
    pub fn with_config(mut self, config: ConsumerConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the metrics recorder.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsRecorder>) -> Self {
        self.metrics = metrics;
        self
    }

    /// The wrapped handler.
    pub const fn handler(&self) -> &H {
        &self.handler
    }

    /// Process one delivered message.
    ///
    /// Stale and unsupported messages are `Ok(ApplyOutcome::Skipped(_))`.
    ///
    /// # Errors
    ///
    /// - [`ConsumerError::Decode`] / [`ConsumerError::Invalid`] for messages that will
    ///   never apply
    /// - [`ConsumerError::Storage`] if the projection store fails
    /// - [`ConsumerError::Timeout`] if handling exceeds its deadline
    #[tracing::instrument(
        skip_all,
        fields(
            consumer = self.handler.name(),
            message_id = ?metadata.message_id,
            attempt = metadata.attempt
        )
    )]
    pub async fn process(
        &self,
        raw: &[u8],
        metadata: &InboxMetadata,
    ) -> Result<ApplyOutcome, ConsumerError> {
        let result = tokio::time::timeout(self.config.handle_timeout, self.run(raw, metadata))
            .await
            .unwrap_or_else(|_| {
                Err(ConsumerError::Timeout(format!(
                    "handling exceeded {} ms",
                    self.config.handle_timeout.as_millis()
                )))
            });

        let consumer = self.handler.name();
        match &result {
            Ok(outcome) => self.metrics.message_consumed(consumer, outcome.as_str()),
            Err(err) => {
                self.metrics.message_consumed(consumer, err.as_str());
                if err.is_retryable() {
                    tracing::error!(error = %err, "Message handling failed");
                } else {
                    tracing::warn!(error = %err, "Message cannot be applied");
                }
            }
        }
        result
    }

    async fn run(
        &self,
        raw: &[u8],
        metadata: &InboxMetadata,
    ) -> Result<ApplyOutcome, ConsumerError> {
        let event = self.handler.decode(raw)?;
        let store = self.handler.store();

        let mut tx = store.begin().await?;
        let outcome = self.handler.handle(&mut tx, &event, metadata).await?;
        if outcome.is_applied() {
            store.commit(tx).await?;
        }
        Ok(outcome)
    }
}
