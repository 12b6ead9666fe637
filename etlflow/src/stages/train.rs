//! Train: run the registered training job and track it to an end.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use super::{
    settings, settle, ErrorCondition, FailurePolicy, QueueStage, StageKind, StageOutcome,
    StagePolicy, StageReport, TrainSettings,
};
use crate::cancellation::CancellationToken;
use crate::compute::{JobRunner, RunWaiter, WaitOutcome};
use crate::config::EtlConfig;
use crate::core::{
    JobId, JobSubmission, LifecycleState, ResultState, RunId, RunInfo, SubmittedRun,
};
use crate::errors::{ConfigError, EtlError};
use crate::events::{self, EventSink, NoOpEventSink};
use crate::queue::QueueMessage;

/// Final status of one training run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainingReport {
    /// The run.
    pub run_id: RunId,
    /// The registered job.
    pub job_id: JobId,
    /// Last lifecycle state, `TIMED_OUT_WAITING` if polling gave up.
    pub life_cycle_state: LifecycleState,
    /// Result state, `UNKNOWN` when none was reported.
    pub result_state: ResultState,
    /// The run's state message.
    pub state_message: String,
    /// Parsed notebook output; `null` unless the run succeeded.
    pub notebook_output: Value,
    /// Seconds spent polling.
    pub elapsed_seconds: u64,
    /// Status queries issued.
    pub polls: u32,
    /// When tracking ended.
    pub finished_at: DateTime<Utc>,
}

impl TrainingReport {
    /// Returns true if the run succeeded.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.result_state == ResultState::Success
    }
}

/// Parses a notebook's exit value as JSON.
///
/// Anything that is not valid JSON, including an absent result, is wrapped
/// as `{"raw_output": <string or null>}`.
#[must_use]
pub fn parse_notebook_output(result: Option<&str>) -> Value {
    result
        .and_then(|raw| serde_json::from_str(raw).ok())
        .unwrap_or_else(|| json!({ "raw_output": result }))
}

/// The Train stage.
pub struct TrainStage {
    runner: Arc<dyn JobRunner>,
    events: Arc<dyn EventSink>,
    cancel: Option<Arc<CancellationToken>>,
    settings: Result<TrainSettings, ConfigError>,
}

impl TrainStage {
    /// Creates the stage with explicit settings.
    #[must_use]
    pub fn new(settings: TrainSettings, runner: Arc<dyn JobRunner>) -> Self {
        Self {
            runner,
            events: Arc::new(NoOpEventSink),
            cancel: None,
            settings: Ok(settings),
        }
    }

    /// Creates the stage from the pipeline configuration.
    #[must_use]
    pub fn from_config(config: &EtlConfig, runner: Arc<dyn JobRunner>) -> Self {
        Self {
            runner,
            events: Arc::new(NoOpEventSink),
            cancel: None,
            settings: TrainSettings::from_config(config),
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = sink;
        self
    }

    /// Stops polling when `token` is cancelled.
    #[must_use]
    pub fn with_cancel(mut self, token: Arc<CancellationToken>) -> Self {
        self.cancel = Some(token);
        self
    }

    async fn process(&self, message: &QueueMessage) -> Result<StageOutcome, EtlError> {
        info!(stage = "train", message_id = %message.id(), "Processing queue message");
        let body = message.text()?;
        info!(stage = "train", body = %body, "Message body");
        let settings = settings(&self.settings)?;

        let submission = JobSubmission::existing_job(settings.job_id.clone(), settings.job_parameters());
        let submitted = match self.runner.submit(&submission).await {
            Ok(submitted) => submitted,
            Err(err) => {
                return self
                    .policy()
                    .resolve_as(ErrorCondition::SubmitFailure, err.into());
            }
        };
        info!(stage = "train", run_id = %submitted.run_id, "Triggered Databricks job");
        self.events
            .emit(
                events::TRAIN_SUBMITTED,
                Some(json!({"run_id": submitted.run_id, "job_id": settings.job_id})),
            )
            .await;

        info!(stage = "train", run_id = %submitted.run_id, "Polling Databricks run status");
        let mut waiter = RunWaiter::new(self.runner.as_ref(), settings.wait_policy());
        if let Some(token) = &self.cancel {
            waiter = waiter.with_cancel(Arc::clone(token));
        }
        let outcome = waiter.poll(&submitted.run_id).await?;
        if outcome.cancelled {
            return Err(EtlError::WaitCancelled {
                run_id: submitted.run_id,
            });
        }

        let report = self.report(settings, &submitted, outcome).await?;
        self.events
            .emit(events::TRAIN_COMPLETED, serde_json::to_value(&report).ok())
            .await;

        if !report.succeeded() {
            error!(
                stage = "train",
                run_id = %report.run_id,
                result_state = %report.result_state,
                "Databricks job {} failed: {}",
                report.run_id,
                report.result_state
            );
            if report.life_cycle_state != LifecycleState::TimedOutWaiting {
                let failure = EtlError::remote_job_failed(
                    report.run_id.clone(),
                    report.life_cycle_state,
                    report.result_state,
                    report.state_message.clone(),
                );
                if self.policy().policy_for(ErrorCondition::RemoteJobFailure)
                    == FailurePolicy::Propagate
                {
                    return Err(failure);
                }
            }
        }

        Ok(StageOutcome::Completed(StageReport::Trained(report)))
    }

    /// Reads the notebook result of a succeeded run. A failed fetch is
    /// logged and reported as `{"raw_output": null}`.
    async fn notebook_output(&self, info: &RunInfo) -> Value {
        if let Some(output) = &info.output {
            return parse_notebook_output(output.notebook_result.as_deref());
        }
        let output_run = info.output_run_id();
        match self.runner.get_output(output_run).await {
            Ok(output) => parse_notebook_output(output.notebook_result.as_deref()),
            Err(err) => {
                warn!(
                    stage = "train",
                    run_id = %info.run_id,
                    output_run_id = %output_run,
                    error = %err,
                    "Could not fetch notebook output"
                );
                parse_notebook_output(None)
            }
        }
    }

    async fn report(
        &self,
        settings: &TrainSettings,
        submitted: &SubmittedRun,
        outcome: WaitOutcome,
    ) -> Result<TrainingReport, EtlError> {
        let elapsed_seconds = outcome.elapsed.as_secs();
        let finished_at = Utc::now();

        let Some(info) = outcome.info else {
            let limit = settings.max_wait.as_secs();
            let report = TrainingReport {
                run_id: submitted.run_id.clone(),
                job_id: settings.job_id.clone(),
                life_cycle_state: LifecycleState::TimedOutWaiting,
                result_state: ResultState::Unknown,
                state_message: format!("Timed out after {limit} seconds."),
                notebook_output: Value::Null,
                elapsed_seconds,
                polls: outcome.polls,
                finished_at,
            };
            warn!(
                stage = "train",
                run_id = %report.run_id,
                polls = report.polls,
                "Job polling timed out"
            );
            return Ok(report);
        };

        let result_state = info.state.result_or_unknown();
        let notebook_output = if info.state.succeeded() {
            self.notebook_output(&info).await
        } else {
            Value::Null
        };

        let report = TrainingReport {
            run_id: info.run_id.clone(),
            job_id: settings.job_id.clone(),
            life_cycle_state: info.lifecycle(),
            result_state,
            state_message: info.state.state_message.clone(),
            notebook_output,
            elapsed_seconds,
            polls: outcome.polls,
            finished_at,
        };
        info!(
            stage = "train",
            run_id = %report.run_id,
            life_cycle_state = %report.life_cycle_state,
            result_state = %report.result_state,
            polls = report.polls,
            "Job completed"
        );
        Ok(report)
    }
}

#[async_trait]
impl QueueStage for TrainStage {
    fn kind(&self) -> StageKind {
        StageKind::Train
    }

    fn policy(&self) -> StagePolicy {
        match &self.settings {
            Ok(settings) if settings.raise_on_failure => {
                StagePolicy::TRAIN.with(ErrorCondition::RemoteJobFailure, FailurePolicy::Propagate)
            }
            _ => StagePolicy::TRAIN,
        }
    }

    async fn handle(&self, message: &QueueMessage) -> Result<StageOutcome, EtlError> {
        let result = self.process(message).await;
        settle(self.policy(), self.events.as_ref(), result).await
    }
}
