//! Assertions over stage outcomes.

use crate::errors::EtlError;
use crate::stages::{ErrorCondition, StageOutcome, StageReport};

/// Asserts that the stage completed and returns its report.
///
/// # Panics
///
/// Panics if the result is an error or a skip.
#[track_caller]
pub fn assert_completed(result: &Result<StageOutcome, EtlError>) -> &StageReport {
    match result {
        Ok(StageOutcome::Completed(report)) => report,
        Ok(StageOutcome::Skipped {
            condition, reason, ..
        }) => panic!("Expected completion, stage skipped on {condition}: {reason}"),
        Err(err) => panic!("Expected completion, stage failed: {err}"),
    }
}

/// Asserts that the stage logged a failure of `expected` class and returned.
///
/// # Panics
///
/// Panics on any other result.
#[track_caller]
pub fn assert_skipped(result: &Result<StageOutcome, EtlError>, expected: ErrorCondition) {
    match result {
        Ok(StageOutcome::Skipped { condition, .. }) => assert_eq!(
            *condition, expected,
            "Expected skip on {expected}, got skip on {condition}"
        ),
        Ok(StageOutcome::Completed(report)) => {
            panic!("Expected skip on {expected}, stage completed: {report:?}")
        }
        Err(err) => panic!("Expected skip on {expected}, stage failed: {err}"),
    }
}

/// Asserts that the stage propagated an error of `expected` class and returns it.
///
/// # Panics
///
/// Panics on any other result.
#[track_caller]
pub fn assert_propagated(
    result: &Result<StageOutcome, EtlError>,
    expected: ErrorCondition,
) -> &EtlError {
    match result {
        Err(err) => {
            assert_eq!(
                err.condition(),
                expected,
                "Expected {expected} error, got {err}"
            );
            err
        }
        Ok(outcome) => panic!("Expected {expected} error, got {outcome:?}"),
    }
}
