//! Error types for the etlflow pipeline.
//!
//! Every stage returns [`EtlError`]. Each variant maps onto an
//! [`ErrorCondition`], which the stage's declared
//! [`StagePolicy`](crate::stages::StagePolicy) turns into either a
//! propagated failure or a logged early return.

use std::str::Utf8Error;

use thiserror::Error;

use crate::core::{LifecycleState, ResultState, RunId};
use crate::stages::ErrorCondition;

/// The main error type for etlflow operations.
#[derive(Debug, Error)]
pub enum EtlError {
    /// Required configuration is missing or malformed.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// A queue payload could not be decoded.
    #[error("{0}")]
    Decode(#[from] DecodeError),

    /// A blob store operation failed.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// A message queue operation failed.
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    /// The compute job runner could not be reached or answered badly.
    #[error("Compute error: {0}")]
    Compute(#[from] ComputeError),

    /// A compute run reached a terminal state without succeeding.
    #[error(
        "Databricks run {run_id} failed or was canceled. LifeCycleState: {lifecycle_state}, \
         ResultState: {result_state}. Reason: {message}"
    )]
    RemoteJobFailed {
        /// The failed run.
        run_id: RunId,
        /// Lifecycle state reported for the run.
        lifecycle_state: LifecycleState,
        /// Result state reported for the run.
        result_state: ResultState,
        /// The job's own state message.
        message: String,
    },

    /// Waiting on a run exceeded the configured ceiling.
    #[error("Timed out waiting for run {run_id} after {elapsed_seconds}s")]
    WaitTimedOut {
        /// The run being waited on.
        run_id: RunId,
        /// Seconds spent waiting.
        elapsed_seconds: u64,
    },

    /// Waiting on a run was cancelled locally; the run itself continues.
    #[error("Stopped waiting for run {run_id}: cancelled")]
    WaitCancelled {
        /// The run being waited on.
        run_id: RunId,
    },

    /// The input event or message is structurally unusable.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EtlError {
    /// Classifies the error for policy resolution.
    #[must_use]
    pub fn condition(&self) -> ErrorCondition {
        match self {
            Self::Config(_) => ErrorCondition::MissingConfig,
            Self::Decode(_) | Self::InvalidInput(_) | Self::Serialization(_) => {
                ErrorCondition::Decode
            }
            Self::Storage(StorageError::NotFound { .. }) => ErrorCondition::MissingSource,
            Self::Storage(StorageError::InvalidName(_)) => ErrorCondition::Decode,
            Self::Storage(_) | Self::Queue(_) | Self::Compute(_) => ErrorCondition::Io,
            Self::RemoteJobFailed { .. } => ErrorCondition::RemoteJobFailure,
            Self::WaitTimedOut { .. } | Self::WaitCancelled { .. } => ErrorCondition::Timeout,
        }
    }

    /// Creates a remote job failure from a terminal run state.
    #[must_use]
    pub fn remote_job_failed(
        run_id: RunId,
        lifecycle_state: LifecycleState,
        result_state: ResultState,
        message: impl Into<String>,
    ) -> Self {
        Self::RemoteJobFailed {
            run_id,
            lifecycle_state,
            result_state,
            message: message.into(),
        }
    }
}

/// Configuration errors, raised eagerly when settings are assembled.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A required option is absent.
    #[error("missing configuration value: {0}")]
    Missing(&'static str),

    /// An option is present but unparseable.
    #[error("invalid value for {name}: {reason}")]
    Invalid {
        /// The option name.
        name: &'static str,
        /// Why it was rejected.
        reason: String,
    },

    /// A collaborator that must be injected at startup was not provided.
    #[error("missing pipeline capability: {0}")]
    MissingCapability(&'static str),
}

impl ConfigError {
    /// Creates an invalid-value error.
    #[must_use]
    pub fn invalid(name: &'static str, reason: impl ToString) -> Self {
        Self::Invalid {
            name,
            reason: reason.to_string(),
        }
    }
}

/// Errors decoding a queue payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The body is not UTF-8.
    #[error("Could not decode queue message body as UTF-8: {0}")]
    InvalidUtf8(#[from] Utf8Error),

    /// The body is not valid base64.
    #[error("Could not decode queue message body as base64: {0}")]
    InvalidBase64(String),

    /// The body is empty.
    #[error("Queue message body is empty")]
    EmptyPayload,

    /// The body looks structured but does not match any known shape.
    #[error("Unrecognized message format: {0}")]
    Format(String),
}

/// Errors raised by a [`BlobStore`](crate::storage::BlobStore).
#[derive(Debug, Error)]
pub enum StorageError {
    /// The blob does not exist.
    #[error("blob '{name}' not found in container '{container}'")]
    NotFound {
        /// Container searched.
        container: String,
        /// Blob name (or prefix) searched.
        name: String,
    },

    /// A container or blob name is not acceptable.
    #[error("invalid blob name: {0}")]
    InvalidName(String),

    /// The backend failed.
    #[error("{context}: {source}")]
    Io {
        /// What was being attempted.
        context: String,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },
}

impl StorageError {
    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(container: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            container: container.into(),
            name: name.into(),
        }
    }

    /// Wraps an I/O error with context.
    #[must_use]
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

/// Errors raised by a [`MessageQueue`](crate::queue::MessageQueue).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    /// A receipt does not correspond to an in-flight delivery.
    #[error("unknown delivery receipt '{0}'")]
    UnknownReceipt(String),

    /// The backend rejected the operation.
    #[error("queue backend failure: {0}")]
    Backend(String),
}

/// Errors raised by a [`JobRunner`](crate::compute::JobRunner).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ComputeError {
    /// The service answered with a non-success status.
    #[error("HTTP Error: {status} - {body}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },

    /// The request never got an answer.
    #[error("Request error: {0}")]
    Transport(String),

    /// The service answered with something unparseable.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// The request could not be built from the submission.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}
