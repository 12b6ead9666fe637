//! Core types shared by every stage.
//!
//! This module provides:
//! - The inter-stage message contract
//! - Compute job submissions, run identifiers and run states

mod job;
mod message;

pub use job::{
    run_url, transform_run_name, ClusterSpec, JobId, JobSubmission, LifecycleState, NewCluster,
    ResultState, RunId, RunInfo, RunOutput, RunState, RunTask, SubmittedRun, TaskDefinition,
    RUN_NAME_CONTEXT_LIMIT, TRANSFORM_RUN_PREFIX,
};
pub use message::{
    PipelineMessage, TransformedDataset, DATASET_NAME, PROCESSED_FOLDER,
    TRANSFORMED_SUCCESSFULLY,
};
