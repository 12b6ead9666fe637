//! Load: copy finished data into the final output container.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::{error, info};

use super::{
    settings, settle, ErrorCondition, LoadSettings, QueueStage, StageKind, StageOutcome,
    StageReport,
};
use crate::config::EtlConfig;
use crate::core::{PipelineMessage, TransformedDataset};
use crate::errors::{ConfigError, DecodeError, EtlError, StorageError};
use crate::events::{self, EventSink, NoOpEventSink};
use crate::queue::QueueMessage;
use crate::storage::{BlobRef, BlobStore};

/// The Load stage.
pub struct LoadStage {
    blobs: Arc<dyn BlobStore>,
    events: Arc<dyn EventSink>,
    settings: Result<LoadSettings, ConfigError>,
}

impl LoadStage {
    /// Creates the stage with explicit settings.
    #[must_use]
    pub fn new(settings: LoadSettings, blobs: Arc<dyn BlobStore>) -> Self {
        Self {
            blobs,
            events: Arc::new(NoOpEventSink),
            settings: Ok(settings),
        }
    }

    /// Creates the stage from the pipeline configuration.
    #[must_use]
    pub fn from_config(config: &EtlConfig, blobs: Arc<dyn BlobStore>) -> Self {
        Self {
            blobs,
            events: Arc::new(NoOpEventSink),
            settings: LoadSettings::from_config(config),
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = sink;
        self
    }

    async fn process(&self, message: &QueueMessage) -> Result<StageOutcome, EtlError> {
        let payload = message.text()?;
        info!(stage = "load", payload = %payload, "Processing queue item");
        if payload.is_empty() {
            return Err(DecodeError::EmptyPayload.into());
        }
        let decoded = PipelineMessage::parse(payload)?;
        let settings = settings(&self.settings)?;

        let copied = match decoded {
            PipelineMessage::Bare(name) => {
                let source = BlobRef::new(settings.source_container.as_str(), name)?;
                vec![self.load_blob(settings, &source).await?]
            }
            PipelineMessage::Transformed(dataset) => {
                if !dataset.is_success() {
                    return self.policy().resolve_as(
                        ErrorCondition::RemoteJobFailure,
                        EtlError::InvalidInput(format!(
                            "dataset '{}' from run {} has status '{}'",
                            dataset.dataset_name, dataset.databricks_run_id, dataset.status
                        )),
                    );
                }
                self.load_dataset(settings, &dataset).await?
            }
        };

        self.events
            .emit(
                events::LOAD_COMPLETED,
                Some(json!({
                    "destination": settings.final_output_container,
                    "copied": copied.iter().map(ToString::to_string).collect::<Vec<_>>(),
                })),
            )
            .await;

        Ok(StageOutcome::Completed(StageReport::Loaded { copied }))
    }

    async fn load_dataset(
        &self,
        settings: &LoadSettings,
        dataset: &TransformedDataset,
    ) -> Result<Vec<BlobRef>, EtlError> {
        let (container, prefix) = dataset.location();
        let sources = self.blobs.list(container, prefix).await?;
        if sources.is_empty() {
            return Err(StorageError::not_found(container, prefix).into());
        }
        info!(
            stage = "load",
            run_id = %dataset.databricks_run_id,
            blobs = sources.len(),
            base_path = %dataset.processed_data_base_path,
            "Loading transformed dataset"
        );

        let mut copied = Vec::with_capacity(sources.len());
        for source in &sources {
            copied.push(self.load_blob(settings, source).await?);
        }
        Ok(copied)
    }

    async fn load_blob(&self, settings: &LoadSettings, source: &BlobRef) -> Result<BlobRef, EtlError> {
        if !self.blobs.exists(source).await? {
            error!(
                stage = "load",
                blob = %source.name(),
                container = %source.container(),
                "Source blob not found"
            );
            return Err(StorageError::not_found(source.container(), source.name()).into());
        }

        let destination = source.in_container(&settings.final_output_container)?;
        info!(
            stage = "load",
            blob = %source.name(),
            from = %source.container(),
            to = %destination.container(),
            "Starting copy of blob"
        );
        let content = self.blobs.read(source).await?;
        self.blobs.write(&destination, &content).await?;
        info!(
            stage = "load",
            blob = %destination.name(),
            container = %destination.container(),
            "Successfully loaded blob"
        );
        Ok(destination)
    }
}

#[async_trait]
impl QueueStage for LoadStage {
    fn kind(&self) -> StageKind {
        StageKind::Load
    }

    async fn handle(&self, message: &QueueMessage) -> Result<StageOutcome, EtlError> {
        let result = self.process(message).await;
        settle(self.policy(), self.events.as_ref(), result).await
    }
}
