//! The compute job runner: submission, status queries and waiting.
//!
//! [`JobRunner`] is the seam the stages consume. [`RunWaiter`] layers the
//! two waiting modes on top of it: a blocking wait delegated to the runner
//! and a cooperative poll driven by the caller.

#[cfg(feature = "databricks")]
mod databricks;
mod wait;

use async_trait::async_trait;

use crate::core::{JobSubmission, RunId, RunInfo, RunOutput, SubmittedRun};
use crate::errors::ComputeError;

#[cfg(feature = "databricks")]
pub use databricks::{DatabricksClient, DEFAULT_REQUEST_TIMEOUT, DEFAULT_WAIT_INTERVAL};
pub use wait::{RunWaiter, WaitOutcome, WaitPolicy};

/// A managed compute service that runs jobs.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait JobRunner: Send + Sync {
    /// Base URL of the service, used to render run links.
    fn host(&self) -> &str;

    /// Submits a job and returns its run id.
    async fn submit(&self, submission: &JobSubmission) -> Result<SubmittedRun, ComputeError>;

    /// Queries the current state of a run.
    async fn get_run(&self, run_id: &RunId) -> Result<RunInfo, ComputeError>;

    /// Fetches the output of a terminal run.
    ///
    /// For multi-task runs pass a task run, see [`RunInfo::output_run_id`].
    async fn get_output(&self, run_id: &RunId) -> Result<RunOutput, ComputeError>;

    /// Waits until the run reaches a terminal lifecycle state. Output is not
    /// fetched.
    async fn wait_until_terminal(&self, run_id: &RunId) -> Result<RunInfo, ComputeError>;
}
