//! Transform: run the transform notebook for a trigger message and notify Load.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::{error, info, warn};

use super::{
    settings, settle, QueueStage, StageKind, StageOutcome, StageReport, TransformSettings,
};
use crate::cancellation::CancellationToken;
use crate::compute::{JobRunner, RunWaiter};
use crate::config::EtlConfig;
use crate::core::{
    run_url, transform_run_name, JobSubmission, PipelineMessage, ResultState, SubmittedRun,
    TransformedDataset,
};
use crate::errors::{ConfigError, EtlError};
use crate::events::{self, EventSink, NoOpEventSink};
use crate::pipeline::{submission_key, SubmissionLedger};
use crate::queue::{MessageQueue, QueueMessage};

const UNKNOWN_FAILURE: &str = "Unknown error during Databricks run.";

/// The Transform stage.
pub struct TransformStage {
    runner: Arc<dyn JobRunner>,
    queue: Arc<dyn MessageQueue>,
    events: Arc<dyn EventSink>,
    ledger: Option<Arc<dyn SubmissionLedger>>,
    cancel: Option<Arc<CancellationToken>>,
    settings: Result<TransformSettings, ConfigError>,
}

impl TransformStage {
    /// Creates the stage with explicit settings.
    #[must_use]
    pub fn new(
        settings: TransformSettings,
        runner: Arc<dyn JobRunner>,
        queue: Arc<dyn MessageQueue>,
    ) -> Self {
        Self::with_settings(Ok(settings), runner, queue)
    }

    /// Creates the stage from the pipeline configuration.
    ///
    /// Missing settings are kept and reported on every invocation, before
    /// anything is submitted.
    #[must_use]
    pub fn from_config(
        config: &EtlConfig,
        runner: Arc<dyn JobRunner>,
        queue: Arc<dyn MessageQueue>,
    ) -> Self {
        Self::with_settings(TransformSettings::from_config(config), runner, queue)
    }

    fn with_settings(
        settings: Result<TransformSettings, ConfigError>,
        runner: Arc<dyn JobRunner>,
        queue: Arc<dyn MessageQueue>,
    ) -> Self {
        Self {
            runner,
            queue,
            events: Arc::new(NoOpEventSink),
            ledger: None,
            cancel: None,
            settings,
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = sink;
        self
    }

    /// Re-attaches redelivered messages to the run recorded in `ledger`.
    #[must_use]
    pub fn with_ledger(mut self, ledger: Arc<dyn SubmissionLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Stops waiting when `token` is cancelled.
    #[must_use]
    pub fn with_cancel(mut self, token: Arc<CancellationToken>) -> Self {
        self.cancel = Some(token);
        self
    }

    async fn process(&self, message: &QueueMessage) -> Result<StageOutcome, EtlError> {
        let context = message.text().map_err(|e| {
            error!(stage = "transform", message_id = %message.id(), "Trigger message is not UTF-8");
            e
        })?;
        info!(stage = "transform", trigger = %context, "Processing queue item");
        let settings = settings(&self.settings)?;

        let key = submission_key(StageKind::Transform.as_str(), context);
        let (submitted, reattached) = match self.recorded_run(&key).await? {
            Some(run) => (run, true),
            None => (self.submit(settings, context, &key).await?, false),
        };
        let run_id = submitted.run_id.clone();

        info!(stage = "transform", run_id = %run_id, "Waiting for Databricks run to complete");
        let mut waiter = RunWaiter::new(self.runner.as_ref(), settings.wait_policy());
        if let Some(token) = &self.cancel {
            waiter = waiter.with_cancel(Arc::clone(token));
        }
        let outcome = waiter.wait_blocking(&run_id).await?;

        let Some(info) = outcome.info else {
            if outcome.cancelled {
                return Err(EtlError::WaitCancelled { run_id });
            }
            return Err(EtlError::WaitTimedOut {
                run_id,
                elapsed_seconds: outcome.elapsed.as_secs(),
            });
        };

        let result_state = info.state.result_state.unwrap_or(ResultState::Unknown);
        info!(
            stage = "transform",
            run_id = %run_id,
            life_cycle_state = %info.lifecycle(),
            result_state = %result_state,
            "Databricks run finished"
        );

        if !info.state.succeeded() {
            if let Some(ledger) = &self.ledger {
                ledger.forget(&key).await;
            }
            let reason = if info.state.state_message.is_empty() {
                UNKNOWN_FAILURE.to_string()
            } else {
                info.state.state_message.clone()
            };
            return Err(EtlError::remote_job_failed(
                run_id,
                info.lifecycle(),
                result_state,
                reason,
            ));
        }

        info!(stage = "transform", run_id = %run_id, "Databricks notebook run completed successfully");
        let forwarded_to = self.notify_load(settings, &submitted).await?;

        self.events
            .emit(
                events::TRANSFORM_COMPLETED,
                Some(json!({"run_id": run_id, "reattached": reattached, "forwarded_to": forwarded_to})),
            )
            .await;

        Ok(StageOutcome::Completed(StageReport::Transformed {
            run_id,
            reattached,
            forwarded_to,
        }))
    }

    async fn recorded_run(&self, key: &str) -> Result<Option<SubmittedRun>, EtlError> {
        let Some(ledger) = &self.ledger else {
            return Ok(None);
        };
        let Some(entry) = ledger.lookup(key).await else {
            return Ok(None);
        };

        let info = self.runner.get_run(&entry.run.run_id).await?;
        if info.lifecycle().is_terminal() && !info.state.succeeded() {
            info!(
                stage = "transform",
                run_id = %entry.run.run_id,
                life_cycle_state = %info.lifecycle(),
                "Recorded run ended without success; submitting a new run"
            );
            ledger.forget(key).await;
            return Ok(None);
        }

        info!(
            stage = "transform",
            run_id = %entry.run.run_id,
            "Redelivered message; re-attaching to recorded run"
        );
        self.events
            .emit(
                events::TRANSFORM_REATTACHED,
                Some(json!({"run_id": entry.run.run_id})),
            )
            .await;
        Ok(Some(entry.run))
    }

    async fn submit(
        &self,
        settings: &TransformSettings,
        context: &str,
        key: &str,
    ) -> Result<SubmittedRun, EtlError> {
        let submission = JobSubmission::notebook(
            transform_run_name(context),
            settings.notebook_path.as_str(),
            settings.notebook_parameters(context),
            settings.cluster.clone(),
            settings.run_timeout.as_secs(),
        );
        info!(
            stage = "transform",
            cluster = %settings.cluster.spec,
            parameters = ?submission.parameters(),
            "Submitting notebook to Databricks"
        );

        let submitted = self.runner.submit(&submission).await?;
        info!(
            stage = "transform",
            run_id = %submitted.run_id,
            "Databricks run submitted. Run ID: {}, Run URL: {}",
            submitted.run_id,
            run_url(self.runner.host(), &submitted)
        );

        if let Some(ledger) = &self.ledger {
            ledger.record(key, submitted.clone()).await;
        }
        self.events
            .emit(
                events::TRANSFORM_SUBMITTED,
                Some(json!({"run_id": submitted.run_id, "run_name": submission.run_name()})),
            )
            .await;

        Ok(submitted)
    }

    async fn notify_load(
        &self,
        settings: &TransformSettings,
        submitted: &SubmittedRun,
    ) -> Result<Option<String>, EtlError> {
        let Some(load_queue) = &settings.load_queue else {
            warn!(
                stage = "transform",
                "LOAD_TRIGGER_QUEUE_NAME not configured. Cannot trigger next load step"
            );
            return Ok(None);
        };

        let notification = PipelineMessage::Transformed(TransformedDataset::successful(
            &settings.processed_container,
            submitted.run_id.clone(),
        ));
        self.queue.send(load_queue, &notification.encode()?).await?;
        info!(stage = "transform", queue = %load_queue, "Message sent to '{load_queue}'.");

        Ok(Some(load_queue.clone()))
    }
}

#[async_trait]
impl QueueStage for TransformStage {
    fn kind(&self) -> StageKind {
        StageKind::Transform
    }

    async fn handle(&self, message: &QueueMessage) -> Result<StageOutcome, EtlError> {
        let result = self.process(message).await;
        settle(self.policy(), self.events.as_ref(), result).await
    }
}
