//! Extract: copy a landed blob to the raw container and announce it.

use std::sync::Arc;

use serde_json::json;
use tracing::{info, warn};

use super::{settings, settle, ExtractSettings, StageKind, StageOutcome, StagePolicy, StageReport};
use crate::config::EtlConfig;
use crate::errors::{ConfigError, EtlError};
use crate::events::{self, EventSink, NoOpEventSink};
use crate::queue::MessageQueue;
use crate::storage::{leaf_name, BlobRef, BlobStore};

/// A blob arrival as reported by the storage trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobEvent {
    /// Full name, usually `<container>/<path>`.
    pub name: String,
    /// Blob content.
    pub content: Vec<u8>,
    /// Size reported by the trigger.
    pub length: u64,
}

impl BlobEvent {
    /// Creates an event whose reported length matches the content.
    #[must_use]
    pub fn new(name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        let content = content.into();
        Self {
            name: name.into(),
            length: content.len() as u64,
            content,
        }
    }
}

/// The Extract stage.
pub struct ExtractStage {
    blobs: Arc<dyn BlobStore>,
    queue: Arc<dyn MessageQueue>,
    events: Arc<dyn EventSink>,
    settings: Result<ExtractSettings, ConfigError>,
}

impl ExtractStage {
    /// Creates the stage with explicit settings.
    #[must_use]
    pub fn new(
        settings: ExtractSettings,
        blobs: Arc<dyn BlobStore>,
        queue: Arc<dyn MessageQueue>,
    ) -> Self {
        Self {
            blobs,
            queue,
            events: Arc::new(NoOpEventSink),
            settings: Ok(settings),
        }
    }

    /// Creates the stage from the pipeline configuration.
    ///
    /// Invalid settings are kept and reported on every invocation.
    #[must_use]
    pub fn from_config(
        config: &EtlConfig,
        blobs: Arc<dyn BlobStore>,
        queue: Arc<dyn MessageQueue>,
    ) -> Self {
        Self {
            blobs,
            queue,
            events: Arc::new(NoOpEventSink),
            settings: ExtractSettings::from_config(config),
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = sink;
        self
    }

    /// Returns the stage's failure policy.
    #[must_use]
    pub fn policy(&self) -> StagePolicy {
        StagePolicy::for_stage(StageKind::Extract)
    }

    /// Handles one blob arrival.
    ///
    /// # Errors
    ///
    /// Every failure propagates. Nothing is enqueued unless the copy succeeded.
    pub async fn handle_blob(&self, event: &BlobEvent) -> Result<StageOutcome, EtlError> {
        let result = self.copy_and_announce(event).await;
        settle(self.policy(), self.events.as_ref(), result).await
    }

    async fn copy_and_announce(&self, event: &BlobEvent) -> Result<StageOutcome, EtlError> {
        info!(
            stage = "extract",
            name = %event.name,
            bytes = event.length,
            "Blob trigger received"
        );
        if event.length != event.content.len() as u64 {
            warn!(
                stage = "extract",
                reported = event.length,
                actual = event.content.len(),
                "Reported blob length differs from content length"
            );
        }

        let settings = settings(&self.settings)?;
        let leaf = leaf_name(&event.name);
        if leaf.is_empty() {
            return Err(EtlError::InvalidInput(format!(
                "blob name '{}' has no file name",
                event.name
            )));
        }

        let destination = BlobRef::new(settings.raw_container.as_str(), leaf)?;
        self.blobs.write(&destination, &event.content).await?;
        info!(
            stage = "extract",
            name = %event.name,
            container = %settings.raw_container,
            "Copied blob to raw container"
        );

        let announcement = destination.to_string();
        self.queue
            .send(&settings.transform_queue, &announcement)
            .await?;
        info!(
            stage = "extract",
            queue = %settings.transform_queue,
            message = %announcement,
            "Sent message to queue"
        );

        self.events
            .emit(
                events::EXTRACT_COMPLETED,
                Some(json!({"source": event.name, "destination": announcement, "bytes": event.content.len()})),
            )
            .await;

        Ok(StageOutcome::Completed(StageReport::Extracted {
            destination,
            bytes: event.content.len(),
        }))
    }
}
