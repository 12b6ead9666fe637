//! Waiting on compute runs.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::JobRunner;
use crate::cancellation::CancellationToken;
use crate::core::{LifecycleState, RunId, RunInfo};
use crate::errors::ComputeError;

/// How long and how often to wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    /// Delay between status queries in poll mode.
    pub poll_interval: Duration,
    /// Ceiling on total waiting time; `None` waits indefinitely.
    pub max_wait: Option<Duration>,
}

impl WaitPolicy {
    /// Creates an unbounded policy.
    #[must_use]
    pub const fn new(poll_interval: Duration) -> Self {
        Self {
            poll_interval,
            max_wait: None,
        }
    }

    /// Sets the waiting ceiling.
    #[must_use]
    pub const fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = Some(max_wait);
        self
    }
}

/// What a wait observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitOutcome {
    /// The run waited on.
    pub run_id: RunId,
    /// The terminal run info, when the run finished.
    pub info: Option<RunInfo>,
    /// The last lifecycle state observed.
    pub last_state: LifecycleState,
    /// Time spent waiting.
    pub elapsed: Duration,
    /// The ceiling was reached first.
    pub timed_out: bool,
    /// The cancellation token fired first.
    pub cancelled: bool,
    /// Status queries issued by the waiter.
    pub polls: u32,
}

impl WaitOutcome {
    /// Returns true if the run reached a terminal state.
    #[must_use]
    pub fn finished(&self) -> bool {
        self.info.is_some()
    }
}

/// Waits on runs through a [`JobRunner`].
pub struct RunWaiter<'a> {
    runner: &'a dyn JobRunner,
    policy: WaitPolicy,
    cancel: Option<Arc<CancellationToken>>,
}

impl<'a> RunWaiter<'a> {
    /// Creates a waiter.
    #[must_use]
    pub fn new(runner: &'a dyn JobRunner, policy: WaitPolicy) -> Self {
        Self {
            runner,
            policy,
            cancel: None,
        }
    }

    /// Stops waiting when `token` is cancelled.
    #[must_use]
    pub fn with_cancel(mut self, token: Arc<CancellationToken>) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Delegates to the runner's own wait, bounded by the policy ceiling.
    ///
    /// # Errors
    ///
    /// Propagates the runner's error.
    pub async fn wait_blocking(&self, run_id: &RunId) -> Result<WaitOutcome, ComputeError> {
        let started = Instant::now();
        let bounded = async {
            let wait = self.runner.wait_until_terminal(run_id);
            match self.policy.max_wait {
                Some(limit) => tokio::time::timeout(limit, wait).await.ok(),
                None => Some(wait.await),
            }
        };

        let result = match &self.cancel {
            Some(token) => tokio::select! {
                result = bounded => Some(result),
                () = token.cancelled() => None,
            },
            None => Some(bounded.await),
        };

        let mut outcome = self.pending(run_id, started, 0);
        match result {
            None => {
                warn!(run_id = %run_id, "Stopped waiting on run: cancelled");
                outcome.cancelled = true;
            }
            Some(None) => {
                warn!(run_id = %run_id, elapsed = ?outcome.elapsed, "Stopped waiting on run: ceiling reached");
                outcome.timed_out = true;
                outcome.last_state = LifecycleState::TimedOutWaiting;
            }
            Some(Some(result)) => {
                let info = result?;
                outcome.last_state = info.lifecycle();
                outcome.info = Some(info);
            }
        }
        Ok(outcome)
    }

    /// Queries the run at the top of each iteration and sleeps between
    /// queries until it is terminal, the ceiling passes or the token fires.
    ///
    /// # Errors
    ///
    /// A failed status query ends the loop and propagates.
    pub async fn poll(&self, run_id: &RunId) -> Result<WaitOutcome, ComputeError> {
        let started = Instant::now();
        let mut polls = 0_u32;
        let mut last_state = LifecycleState::Pending;

        loop {
            if let Some(limit) = self.policy.max_wait {
                if started.elapsed() >= limit {
                    warn!(run_id = %run_id, polls, "Run did not finish within {}s", limit.as_secs());
                    let mut outcome = self.pending(run_id, started, polls);
                    outcome.timed_out = true;
                    outcome.last_state = LifecycleState::TimedOutWaiting;
                    return Ok(outcome);
                }
            }

            if self.is_cancelled() {
                return Ok(self.cancelled(run_id, started, polls, last_state));
            }

            let info = self.runner.get_run(run_id).await?;
            polls += 1;
            last_state = info.lifecycle();
            debug!(
                run_id = %run_id,
                poll = polls,
                life_cycle_state = %last_state,
                "Polled run state"
            );

            if last_state.is_terminal() {
                info!(run_id = %run_id, polls, life_cycle_state = %last_state, "Run reached a terminal state");
                let mut outcome = self.pending(run_id, started, polls);
                outcome.last_state = last_state;
                outcome.info = Some(info);
                return Ok(outcome);
            }

            match &self.cancel {
                Some(token) => tokio::select! {
                    () = tokio::time::sleep(self.policy.poll_interval) => {}
                    () = token.cancelled() => {
                        return Ok(self.cancelled(run_id, started, polls, last_state));
                    }
                },
                None => tokio::time::sleep(self.policy.poll_interval).await,
            }
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|t| t.is_cancelled())
    }

    fn pending(&self, run_id: &RunId, started: Instant, polls: u32) -> WaitOutcome {
        WaitOutcome {
            run_id: run_id.clone(),
            info: None,
            last_state: LifecycleState::Pending,
            elapsed: started.elapsed(),
            timed_out: false,
            cancelled: false,
            polls,
        }
    }

    fn cancelled(
        &self,
        run_id: &RunId,
        started: Instant,
        polls: u32,
        last_state: LifecycleState,
    ) -> WaitOutcome {
        warn!(run_id = %run_id, polls, "Stopped polling run: cancelled");
        let mut outcome = self.pending(run_id, started, polls);
        outcome.cancelled = true;
        outcome.last_state = last_state;
        outcome
    }
}
