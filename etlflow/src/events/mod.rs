//! Stage lifecycle events.
//!
//! Stages report what they did through an [`EventSink`] in addition to
//! their `tracing` output, so hosts and tests can observe the pipeline
//! without scraping logs.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

/// A blob was copied to the raw container and announced.
pub const EXTRACT_COMPLETED: &str = "extract.completed";
/// A transform run was submitted.
pub const TRANSFORM_SUBMITTED: &str = "transform.submitted";
/// A redelivered message re-attached to an existing run.
pub const TRANSFORM_REATTACHED: &str = "transform.reattached";
/// A transform run succeeded.
pub const TRANSFORM_COMPLETED: &str = "transform.completed";
/// Blobs were copied to the final output container.
pub const LOAD_COMPLETED: &str = "load.completed";
/// A training run was submitted.
pub const TRAIN_SUBMITTED: &str = "train.submitted";
/// A training run was reported.
pub const TRAIN_COMPLETED: &str = "train.completed";
/// A stage logged a failure and returned.
pub const STAGE_SKIPPED: &str = "stage.skipped";
/// A stage failure was propagated to the host.
pub const STAGE_FAILED: &str = "stage.failed";
/// A message exceeded its delivery limit.
pub const MESSAGE_DEAD_LETTERED: &str = "worker.dead_lettered";
