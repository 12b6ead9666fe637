//! Pipeline assembly with capability validation.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use super::SubmissionLedger;
use crate::cancellation::CancellationToken;
use crate::compute::JobRunner;
use crate::config::EtlConfig;
use crate::errors::ConfigError;
use crate::events::{EventSink, NoOpEventSink};
use crate::queue::MessageQueue;
use crate::stages::{
    ExtractStage, LoadStage, QueueStage, StageKind, TrainSettings, TrainStage, TransformSettings,
    TransformStage,
};
use crate::storage::BlobStore;
use crate::worker::QueueWorker;

/// The four stages wired to shared collaborators.
pub struct Pipeline {
    config: EtlConfig,
    queue: Arc<dyn MessageQueue>,
    events: Arc<dyn EventSink>,
    extract: ExtractStage,
    transform: Arc<TransformStage>,
    load: Arc<LoadStage>,
    train: Arc<TrainStage>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("transform_queue", &self.config.queues.transform)
            .field("load_queue", &self.config.queues.load)
            .field("train_queue", &self.config.queues.train)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Returns the configuration the stages were built from.
    #[must_use]
    pub fn config(&self) -> &EtlConfig {
        &self.config
    }

    /// Returns the blob-triggered Extract stage.
    #[must_use]
    pub fn extract(&self) -> &ExtractStage {
        &self.extract
    }

    /// Returns the Transform stage.
    #[must_use]
    pub fn transform(&self) -> &TransformStage {
        &self.transform
    }

    /// Returns the Load stage.
    #[must_use]
    pub fn load(&self) -> &LoadStage {
        &self.load
    }

    /// Returns the Train stage.
    #[must_use]
    pub fn train(&self) -> &TrainStage {
        &self.train
    }

    /// Returns the queue feeding a queue-triggered stage.
    ///
    /// Extract is blob-triggered and Load has no queue unless one is
    /// configured; both return `None`.
    #[must_use]
    pub fn queue_for(&self, stage: StageKind) -> Option<&str> {
        match stage {
            StageKind::Extract => None,
            StageKind::Transform => Some(&self.config.queues.transform),
            StageKind::Load => self.config.queues.load.as_deref(),
            StageKind::Train => Some(&self.config.queues.train),
        }
    }

    /// Returns the stage that consumes `queue`, if any.
    #[must_use]
    pub fn stage_for_queue(&self, queue: &str) -> Option<Arc<dyn QueueStage>> {
        [StageKind::Transform, StageKind::Load, StageKind::Train]
            .into_iter()
            .find(|kind| self.queue_for(*kind) == Some(queue))
            .and_then(|kind| self.queue_stage(kind))
    }

    /// Creates a worker that feeds `stage` from its queue.
    #[must_use]
    pub fn worker(&self, stage: StageKind) -> Option<QueueWorker> {
        let queue_name = self.queue_for(stage)?;
        let worker = QueueWorker::new(queue_name, Arc::clone(&self.queue), self.queue_stage(stage)?)
            .with_event_sink(Arc::clone(&self.events))
            .with_max_dequeue_count(self.config.worker.max_dequeue_count);
        Some(worker)
    }

    fn queue_stage(&self, stage: StageKind) -> Option<Arc<dyn QueueStage>> {
        let stage: Arc<dyn QueueStage> = match stage {
            StageKind::Extract => return None,
            StageKind::Transform => self.transform.clone(),
            StageKind::Load => self.load.clone(),
            StageKind::Train => self.train.clone(),
        };
        Some(stage)
    }
}

/// Builder for a [`Pipeline`].
///
/// The blob store, the queue and the job runner are required; everything
/// else has a default.
pub struct PipelineBuilder {
    config: EtlConfig,
    blobs: Option<Arc<dyn BlobStore>>,
    queue: Option<Arc<dyn MessageQueue>>,
    runner: Option<Arc<dyn JobRunner>>,
    events: Arc<dyn EventSink>,
    ledger: Option<Arc<dyn SubmissionLedger>>,
    cancel: Option<Arc<CancellationToken>>,
    transform_max_wait: Option<Duration>,
    train_raise_on_failure: bool,
}

impl PipelineBuilder {
    /// Creates a builder over a loaded configuration.
    #[must_use]
    pub fn new(config: EtlConfig) -> Self {
        Self {
            config,
            blobs: None,
            queue: None,
            runner: None,
            events: Arc::new(NoOpEventSink),
            ledger: None,
            cancel: None,
            transform_max_wait: None,
            train_raise_on_failure: false,
        }
    }

    /// Sets the blob store.
    #[must_use]
    pub fn blob_store(mut self, blobs: Arc<dyn BlobStore>) -> Self {
        self.blobs = Some(blobs);
        self
    }

    /// Sets the message queue.
    #[must_use]
    pub fn queue(mut self, queue: Arc<dyn MessageQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Sets the compute job runner.
    #[must_use]
    pub fn job_runner(mut self, runner: Arc<dyn JobRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    /// Sets the event sink shared by every stage.
    #[must_use]
    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = sink;
        self
    }

    /// Enables re-attaching Transform redeliveries through `ledger`.
    #[must_use]
    pub fn submission_ledger(mut self, ledger: Arc<dyn SubmissionLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Lets `token` stop Transform and Train waits.
    #[must_use]
    pub fn cancellation(mut self, token: Arc<CancellationToken>) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Bounds the Transform wait locally.
    #[must_use]
    pub fn transform_max_wait(mut self, max_wait: Duration) -> Self {
        self.transform_max_wait = Some(max_wait);
        self
    }

    /// Makes terminal training failures propagate.
    #[must_use]
    pub fn train_raise_on_failure(mut self, raise: bool) -> Self {
        self.train_raise_on_failure = raise;
        self
    }

    /// Builds the pipeline.
    ///
    /// Stage settings are validated here but reported per invocation, so a
    /// pipeline with an unconfigured stage still serves the others.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingCapability`] when the blob store, the
    /// queue or the job runner was not provided.
    pub fn build(self) -> Result<Pipeline, ConfigError> {
        let blobs = self.blobs.ok_or(ConfigError::MissingCapability("blob store"))?;
        let queue = self.queue.ok_or(ConfigError::MissingCapability("message queue"))?;
        let runner = self
            .runner
            .ok_or(ConfigError::MissingCapability("compute job runner"))?;
        let config = self.config;

        let extract = ExtractStage::from_config(&config, Arc::clone(&blobs), Arc::clone(&queue))
            .with_event_sink(Arc::clone(&self.events));

        let mut transform = match (TransformSettings::from_config(&config), self.transform_max_wait) {
            (Ok(settings), Some(max_wait)) => TransformStage::new(
                settings.with_max_wait(max_wait),
                Arc::clone(&runner),
                Arc::clone(&queue),
            ),
            _ => TransformStage::from_config(&config, Arc::clone(&runner), Arc::clone(&queue)),
        }
        .with_event_sink(Arc::clone(&self.events));
        if let Some(ledger) = self.ledger {
            transform = transform.with_ledger(ledger);
        }

        let load = LoadStage::from_config(&config, Arc::clone(&blobs))
            .with_event_sink(Arc::clone(&self.events));

        let mut train = match TrainSettings::from_config(&config) {
            Ok(settings) => TrainStage::new(
                settings.with_raise_on_failure(self.train_raise_on_failure),
                Arc::clone(&runner),
            ),
            Err(_) => TrainStage::from_config(&config, Arc::clone(&runner)),
        }
        .with_event_sink(Arc::clone(&self.events));

        if let Some(token) = self.cancel {
            transform = transform.with_cancel(Arc::clone(&token));
            train = train.with_cancel(token);
        }

        info!(
            transform_queue = %config.queues.transform,
            load_queue = ?config.queues.load,
            train_queue = %config.queues.train,
            host = %runner.host(),
            "Pipeline assembled"
        );

        Ok(Pipeline {
            config,
            queue,
            events: self.events,
            extract,
            transform: Arc::new(transform),
            load: Arc::new(load),
            train: Arc::new(train),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::InMemoryQueue;
    use crate::storage::InMemoryBlobStore;
    use crate::testing::{fixture_config, ScriptedJobRunner};

    fn complete() -> PipelineBuilder {
        PipelineBuilder::new(fixture_config(&[]))
            .blob_store(Arc::new(InMemoryBlobStore::new()))
            .queue(Arc::new(InMemoryQueue::new()))
            .job_runner(Arc::new(ScriptedJobRunner::new()))
    }

    #[test]
    fn test_missing_runner_is_rejected() {
        let err = PipelineBuilder::new(fixture_config(&[]))
            .blob_store(Arc::new(InMemoryBlobStore::new()))
            .queue(Arc::new(InMemoryQueue::new()))
            .build()
            .unwrap_err();
        assert_eq!(err, ConfigError::MissingCapability("compute job runner"));
    }

    #[test]
    fn test_missing_store_is_rejected() {
        let err = PipelineBuilder::new(fixture_config(&[]))
            .queue(Arc::new(InMemoryQueue::new()))
            .job_runner(Arc::new(ScriptedJobRunner::new()))
            .build()
            .unwrap_err();
        assert_eq!(err, ConfigError::MissingCapability("blob store"));
    }

    #[test]
    fn test_routes_queues_to_stages() {
        let pipeline = complete().build().unwrap();

        assert_eq!(pipeline.queue_for(StageKind::Extract), None);
        assert_eq!(pipeline.queue_for(StageKind::Load), Some("load-queue"));
        assert_eq!(
            pipeline.stage_for_queue("train-queue").map(|s| s.kind()),
            Some(StageKind::Train)
        );
        assert_eq!(
            pipeline.stage_for_queue("transform-queue").map(|s| s.kind()),
            Some(StageKind::Transform)
        );
        assert!(pipeline.stage_for_queue("unknown").is_none());
        assert!(pipeline.worker(StageKind::Extract).is_none());
    }

    #[test]
    fn test_unconfigured_load_queue_has_no_worker() {
        let pipeline = PipelineBuilder::new(fixture_config(&["LOAD_TRIGGER_QUEUE_NAME"]))
            .blob_store(Arc::new(InMemoryBlobStore::new()))
            .queue(Arc::new(InMemoryQueue::new()))
            .job_runner(Arc::new(ScriptedJobRunner::new()))
            .build()
            .unwrap();
        assert!(pipeline.worker(StageKind::Load).is_none());
        assert_eq!(
            pipeline.worker(StageKind::Transform).unwrap().queue_name(),
            "transform-queue"
        );
    }

    #[test]
    fn test_train_policy_follows_raise_flag() {
        let pipeline = complete().train_raise_on_failure(true).build().unwrap();
        assert_eq!(
            pipeline
                .train()
                .policy()
                .policy_for(crate::stages::ErrorCondition::RemoteJobFailure),
            crate::stages::FailurePolicy::Propagate
        );
    }
}
