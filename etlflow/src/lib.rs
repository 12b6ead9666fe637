//! # Etlflow
//!
//! Queue-driven extract, transform, load and train stages over blob storage
//! and a managed Spark job runner.
//!
//! Etlflow provides:
//!
//! - **Stages**: Extract copies landed blobs, Transform runs a notebook job,
//!   Load copies results to the final output, Train runs a registered job
//! - **Declared failure policies**: each stage either propagates or logs and
//!   returns, per failure class
//! - **Pluggable collaborators**: blob store, message queue and compute job
//!   runner behind async traits, with in-memory and Databricks implementations
//! - **Hosting**: a queue worker that completes, redelivers or dead-letters
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use etlflow::prelude::*;
//!
//! let config = EtlConfig::from_env()?;
//! let pipeline = PipelineBuilder::new(config.clone())
//!     .blob_store(Arc::new(InMemoryBlobStore::new()))
//!     .queue(Arc::new(InMemoryQueue::new()))
//!     .job_runner(Arc::new(DatabricksClient::from_config(&config.compute)?))
//!     .build()?;
//!
//! pipeline.extract().handle_blob(&BlobEvent::new("datasets/orders.csv", bytes)).await?;
//! pipeline.worker(StageKind::Transform).unwrap().drain(10).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod compute;
pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod observability;
pub mod pipeline;
pub mod queue;
pub mod stages;
pub mod storage;
pub mod testing;
pub mod worker;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    #[cfg(feature = "databricks")]
    pub use crate::compute::DatabricksClient;
    pub use crate::compute::{JobRunner, RunWaiter, WaitPolicy};
    pub use crate::config::EtlConfig;
    pub use crate::core::{
        JobId, JobSubmission, LifecycleState, PipelineMessage, ResultState, RunId, RunInfo,
        TransformedDataset,
    };
    pub use crate::errors::{ComputeError, ConfigError, EtlError};
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::observability::{init_tracing, LogFormat};
    pub use crate::pipeline::{InMemoryLedger, Pipeline, PipelineBuilder, SubmissionLedger};
    pub use crate::queue::{InMemoryQueue, MessageQueue, QueueMessage};
    pub use crate::stages::{
        BlobEvent, ErrorCondition, ExtractStage, LoadStage, QueueStage, StageKind, StageOutcome,
        StagePolicy, StageReport, TrainStage, TrainingReport, TransformStage,
    };
    pub use crate::storage::{BlobRef, BlobStore, InMemoryBlobStore, LocalBlobStore};
    pub use crate::worker::{Dispatch, QueueWorker};
}
