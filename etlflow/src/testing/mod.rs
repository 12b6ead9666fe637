//! Testing utilities for etlflow stages.
//!
//! This module provides:
//! - A scripted compute runner that replays run states
//! - Configuration fixtures
//! - Assertions over stage outcomes

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{assert_completed, assert_propagated, assert_skipped};
pub use fixtures::{fixture_config, fixture_pairs, FIXTURE_HOST};
pub use mocks::ScriptedJobRunner;
