//! Pipeline assembly.
//!
//! This module provides:
//! - [`PipelineBuilder`], which wires the stages to their collaborators
//! - The submission ledger that lets redelivered Transform messages
//!   re-attach to their run

mod builder;
mod idempotency;

#[cfg(test)]
mod integration_tests;

pub use builder::{Pipeline, PipelineBuilder};
pub use idempotency::{submission_key, InMemoryLedger, LedgerEntry, SubmissionLedger};
