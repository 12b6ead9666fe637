//! Declared per-stage failure policies.
//!
//! Each stage either propagates a failure, so the host marks the invocation
//! failed and the queue redelivers, or logs it and returns normally, so the
//! message counts as consumed. The choice is a table per stage rather than a
//! property of individual code paths.

use std::fmt;

use serde::Serialize;
use tracing::{error, warn};

use self::FailurePolicy::{LogAndReturn, Propagate};
use super::StageOutcome;
use crate::errors::EtlError;

/// The four pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    /// Blob landing → raw container.
    Extract,
    /// Raw data → compute transform run.
    Transform,
    /// Processed data → final output container.
    Load,
    /// Training run trigger.
    Train,
}

impl StageKind {
    /// Returns the lowercase stage name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Extract => "extract",
            Self::Transform => "transform",
            Self::Load => "load",
            Self::Train => "train",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure classes a stage can meet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCondition {
    /// Required configuration is absent or invalid.
    MissingConfig,
    /// The payload is not UTF-8 or not a recognized shape.
    Decode,
    /// Storage, queue or compute I/O failed.
    Io,
    /// A compute run finished without succeeding.
    RemoteJobFailure,
    /// Waiting on a run hit its ceiling.
    Timeout,
    /// The blob to copy does not exist.
    MissingSource,
    /// The compute service refused or failed a submission.
    SubmitFailure,
}

impl ErrorCondition {
    /// Every condition, in table order.
    pub const ALL: [Self; 7] = [
        Self::MissingConfig,
        Self::Decode,
        Self::Io,
        Self::RemoteJobFailure,
        Self::Timeout,
        Self::MissingSource,
        Self::SubmitFailure,
    ];

    /// Returns the snake-case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MissingConfig => "missing_config",
            Self::Decode => "decode",
            Self::Io => "io",
            Self::RemoteJobFailure => "remote_job_failure",
            Self::Timeout => "timeout",
            Self::MissingSource => "missing_source",
            Self::SubmitFailure => "submit_failure",
        }
    }
}

impl fmt::Display for ErrorCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a stage does with a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Return the error; the invocation fails and may be retried.
    Propagate,
    /// Log the error and complete; the message is not retried.
    LogAndReturn,
}

/// A stage's failure policy table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StagePolicy {
    stage: StageKind,
    missing_config: FailurePolicy,
    decode: FailurePolicy,
    io: FailurePolicy,
    remote_job_failure: FailurePolicy,
    timeout: FailurePolicy,
    missing_source: FailurePolicy,
    submit_failure: FailurePolicy,
}

impl StagePolicy {
    /// Extract propagates everything.
    pub const EXTRACT: Self = Self::uniform(StageKind::Extract, Propagate);

    /// Transform propagates everything so the queue can redeliver.
    pub const TRANSFORM: Self = Self::uniform(StageKind::Transform, Propagate);

    /// Load swallows everything except copy I/O failures.
    pub const LOAD: Self = Self::uniform(StageKind::Load, LogAndReturn)
        .with(ErrorCondition::Io, Propagate)
        .with(ErrorCondition::SubmitFailure, Propagate);

    /// Train swallows everything except status-query I/O failures.
    pub const TRAIN: Self = Self::uniform(StageKind::Train, LogAndReturn)
        .with(ErrorCondition::Io, Propagate);

    const fn uniform(stage: StageKind, policy: FailurePolicy) -> Self {
        Self {
            stage,
            missing_config: policy,
            decode: policy,
            io: policy,
            remote_job_failure: policy,
            timeout: policy,
            missing_source: policy,
            submit_failure: policy,
        }
    }

    /// Returns the default table for a stage.
    #[must_use]
    pub const fn for_stage(stage: StageKind) -> Self {
        match stage {
            StageKind::Extract => Self::EXTRACT,
            StageKind::Transform => Self::TRANSFORM,
            StageKind::Load => Self::LOAD,
            StageKind::Train => Self::TRAIN,
        }
    }

    /// Overrides one cell of the table.
    #[must_use]
    pub const fn with(mut self, condition: ErrorCondition, policy: FailurePolicy) -> Self {
        match condition {
            ErrorCondition::MissingConfig => self.missing_config = policy,
            ErrorCondition::Decode => self.decode = policy,
            ErrorCondition::Io => self.io = policy,
            ErrorCondition::RemoteJobFailure => self.remote_job_failure = policy,
            ErrorCondition::Timeout => self.timeout = policy,
            ErrorCondition::MissingSource => self.missing_source = policy,
            ErrorCondition::SubmitFailure => self.submit_failure = policy,
        }
        self
    }

    /// Returns the stage this table belongs to.
    #[must_use]
    pub const fn stage(&self) -> StageKind {
        self.stage
    }

    /// Looks up the policy for a condition.
    #[must_use]
    pub const fn policy_for(&self, condition: ErrorCondition) -> FailurePolicy {
        match condition {
            ErrorCondition::MissingConfig => self.missing_config,
            ErrorCondition::Decode => self.decode,
            ErrorCondition::Io => self.io,
            ErrorCondition::RemoteJobFailure => self.remote_job_failure,
            ErrorCondition::Timeout => self.timeout,
            ErrorCondition::MissingSource => self.missing_source,
            ErrorCondition::SubmitFailure => self.submit_failure,
        }
    }

    /// Applies the table to an error classified by [`EtlError::condition`].
    ///
    /// # Errors
    ///
    /// Returns the error unchanged when the policy is [`FailurePolicy::Propagate`].
    pub fn resolve(&self, err: EtlError) -> Result<StageOutcome, EtlError> {
        self.resolve_as(err.condition(), err)
    }

    /// Applies the table to an error under an explicit condition.
    ///
    /// # Errors
    ///
    /// Returns the error unchanged when the policy is [`FailurePolicy::Propagate`].
    pub fn resolve_as(
        &self,
        condition: ErrorCondition,
        err: EtlError,
    ) -> Result<StageOutcome, EtlError> {
        match self.policy_for(condition) {
            Propagate => {
                error!(stage = %self.stage, %condition, error = %err, "Stage failed");
                Err(err)
            }
            LogAndReturn => {
                if condition == ErrorCondition::MissingSource {
                    error!(stage = %self.stage, %condition, error = %err, "Source not found, nothing to do");
                } else {
                    warn!(stage = %self.stage, %condition, error = %err, "Stage returned without completing");
                }
                Ok(StageOutcome::Skipped {
                    stage: self.stage,
                    condition,
                    reason: err.to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{ConfigError, DecodeError, StorageError};

    fn table(policy: &StagePolicy) -> Vec<FailurePolicy> {
        ErrorCondition::ALL
            .iter()
            .map(|c| policy.policy_for(*c))
            .collect()
    }

    #[test]
    fn test_extract_and_transform_propagate_everything() {
        assert!(table(&StagePolicy::EXTRACT).iter().all(|p| *p == Propagate));
        assert!(table(&StagePolicy::TRANSFORM).iter().all(|p| *p == Propagate));
    }

    #[test]
    fn test_load_table() {
        assert_eq!(
            table(&StagePolicy::LOAD),
            vec![
                LogAndReturn, // missing config
                LogAndReturn, // decode
                Propagate,    // io
                LogAndReturn, // remote job failure
                LogAndReturn, // timeout
                LogAndReturn, // missing source
                Propagate,    // submit failure
            ]
        );
    }

    #[test]
    fn test_train_table() {
        assert_eq!(
            table(&StagePolicy::TRAIN),
            vec![
                LogAndReturn,
                LogAndReturn,
                Propagate,
                LogAndReturn,
                LogAndReturn,
                LogAndReturn,
                LogAndReturn,
            ]
        );
    }

    #[test]
    fn test_for_stage_matches_constants() {
        assert_eq!(StagePolicy::for_stage(StageKind::Load), StagePolicy::LOAD);
        assert_eq!(StagePolicy::for_stage(StageKind::Train).stage(), StageKind::Train);
    }

    #[test]
    fn test_resolve_swallows_per_table() {
        let outcome = StagePolicy::LOAD
            .resolve(StorageError::not_found("datasets", "orders.csv").into())
            .unwrap();
        match outcome {
            StageOutcome::Skipped {
                stage, condition, ..
            } => {
                assert_eq!(stage, StageKind::Load);
                assert_eq!(condition, ErrorCondition::MissingSource);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_resolve_propagates_per_table() {
        let err = StagePolicy::TRANSFORM
            .resolve(ConfigError::Missing("DATABRICKS_HOST").into())
            .unwrap_err();
        assert!(matches!(err, EtlError::Config(ConfigError::Missing("DATABRICKS_HOST"))));

        let err = StagePolicy::LOAD
            .resolve(StorageError::io("writing", std::io::Error::other("disk full")).into())
            .unwrap_err();
        assert_eq!(err.condition(), ErrorCondition::Io);
    }

    #[test]
    fn test_override_cell() {
        let strict = StagePolicy::TRAIN.with(ErrorCondition::RemoteJobFailure, Propagate);
        assert_eq!(strict.policy_for(ErrorCondition::RemoteJobFailure), Propagate);
        assert_eq!(strict.policy_for(ErrorCondition::Decode), LogAndReturn);

        let outcome = strict.resolve(DecodeError::EmptyPayload.into()).unwrap();
        assert!(outcome.is_skipped());
    }
}
