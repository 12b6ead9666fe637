//! The four pipeline stages.
//!
//! Each stage maps one input (a landed blob or a queue message) to at most
//! one output message plus storage and compute side effects. Stages hold
//! only shared collaborators and validated settings, so one value can serve
//! concurrent invocations.

mod extract;
mod load;
mod policy;
mod settings;
mod train;
mod transform;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;

use crate::core::RunId;
use crate::errors::{ConfigError, EtlError};
use crate::events::{self, EventSink};
use crate::queue::QueueMessage;
use crate::storage::BlobRef;

pub use extract::{BlobEvent, ExtractStage};
pub use load::LoadStage;
pub use policy::{ErrorCondition, FailurePolicy, StageKind, StagePolicy};
pub use settings::{ExtractSettings, LoadSettings, TrainSettings, TransformSettings};
pub use train::{parse_notebook_output, TrainStage, TrainingReport};
pub use transform::TransformStage;

/// What a completed stage did.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "stage", rename_all = "lowercase")]
pub enum StageReport {
    /// A blob was copied to the raw container and announced.
    Extracted {
        /// Where the copy was written.
        destination: BlobRef,
        /// Bytes written.
        bytes: usize,
    },
    /// A transform run succeeded.
    Transformed {
        /// The run.
        run_id: RunId,
        /// True if the run was found in the redelivery ledger.
        reattached: bool,
        /// Queue the notification went to, if any.
        forwarded_to: Option<String>,
    },
    /// Blobs were copied to the final output container.
    Loaded {
        /// The written copies.
        copied: Vec<BlobRef>,
    },
    /// A training run was tracked to an end.
    Trained(TrainingReport),
}

/// The result of a stage invocation that did not propagate an error.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StageOutcome {
    /// The stage did its work.
    Completed(StageReport),
    /// The stage logged a failure and returned, per its policy.
    Skipped {
        /// The stage.
        stage: StageKind,
        /// The failure class.
        condition: ErrorCondition,
        /// The error text.
        reason: String,
    },
}

impl StageOutcome {
    /// Returns true for a logged-and-returned failure.
    #[must_use]
    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped { .. })
    }

    /// Returns the report of a completed invocation.
    #[must_use]
    pub fn report(&self) -> Option<&StageReport> {
        match self {
            Self::Completed(report) => Some(report),
            Self::Skipped { .. } => None,
        }
    }
}

/// A stage triggered by one queue message.
#[async_trait]
pub trait QueueStage: Send + Sync {
    /// Which stage this is.
    fn kind(&self) -> StageKind;

    /// The failure policy table applied to this stage's errors.
    fn policy(&self) -> StagePolicy {
        StagePolicy::for_stage(self.kind())
    }

    /// Handles one delivery.
    ///
    /// `Ok` means the message is consumed, whether the work completed or a
    /// failure was logged and swallowed. `Err` means the invocation failed
    /// and the message may be redelivered.
    async fn handle(&self, message: &QueueMessage) -> Result<StageOutcome, EtlError>;
}

/// Returns stored settings or the configuration error they failed with.
fn settings<T>(stored: &Result<T, ConfigError>) -> Result<&T, EtlError> {
    stored.as_ref().map_err(|e| EtlError::Config(e.clone()))
}

/// Applies the policy to a failed run and reports the outcome to the sink.
async fn settle(
    policy: StagePolicy,
    sink: &dyn EventSink,
    result: Result<StageOutcome, EtlError>,
) -> Result<StageOutcome, EtlError> {
    let resolved = match result {
        Ok(outcome) => Ok(outcome),
        Err(err) => policy.resolve(err),
    };

    match &resolved {
        Ok(StageOutcome::Skipped {
            stage,
            condition,
            reason,
        }) => {
            sink.emit(
                events::STAGE_SKIPPED,
                Some(json!({"stage": stage, "condition": condition, "reason": reason})),
            )
            .await;
        }
        Err(err) => {
            sink.emit(
                events::STAGE_FAILED,
                Some(json!({
                    "stage": policy.stage(),
                    "condition": err.condition(),
                    "error": err.to_string(),
                })),
            )
            .await;
        }
        Ok(StageOutcome::Completed(_)) => {}
    }

    resolved
}
