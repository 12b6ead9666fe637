//! Cooperative cancellation for local waits.
//!
//! Cancelling stops a stage from waiting on a compute run. The remote run
//! itself keeps going.

mod token;

pub use token::CancellationToken;
