//! Scripted compute runner.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::compute::JobRunner;
use crate::core::{
    JobId, JobSubmission, LifecycleState, ResultState, RunId, RunInfo, RunOutput, RunState,
    SubmittedRun,
};
use crate::errors::ComputeError;
use crate::testing::FIXTURE_HOST;

/// A [`JobRunner`] that replays a script of run states.
///
/// Every status query consumes the next scripted state; the last one repeats.
/// Status queries never carry output; it is only served by `get_output`.
/// Run ids are handed out sequentially from 1001. The runner's own wait sleeps
/// one second between queries so paused-clock tests can bound it.
#[derive(Debug)]
pub struct ScriptedJobRunner {
    host: String,
    job_id: Option<JobId>,
    next_run_id: AtomicI64,
    script: Mutex<VecDeque<RunState>>,
    output: Mutex<RunOutput>,
    submissions: Mutex<Vec<JobSubmission>>,
    status_queries: AtomicU32,
    submit_error: Mutex<Option<ComputeError>>,
    status_error: Mutex<Option<ComputeError>>,
    output_error: Mutex<Option<ComputeError>>,
    output_requests: Mutex<Vec<RunId>>,
}

impl Default for ScriptedJobRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedJobRunner {
    /// Creates a runner whose runs succeed on the first query.
    #[must_use]
    pub fn new() -> Self {
        Self {
            host: FIXTURE_HOST.to_string(),
            job_id: None,
            next_run_id: AtomicI64::new(1001),
            script: Mutex::new(VecDeque::from([RunState::terminated(ResultState::Success)])),
            output: Mutex::new(RunOutput::default()),
            submissions: Mutex::new(Vec::new()),
            status_queries: AtomicU32::new(0),
            submit_error: Mutex::new(None),
            status_error: Mutex::new(None),
            output_error: Mutex::new(None),
            output_requests: Mutex::new(Vec::new()),
        }
    }

    /// Creates a runner that reports `running` polls of RUNNING, then `last`.
    #[must_use]
    pub fn running_then(running: usize, last: RunState) -> Self {
        let mut script: VecDeque<RunState> = (0..running)
            .map(|_| RunState::new(LifecycleState::Running))
            .collect();
        script.push_back(last);
        Self::new().with_script(script)
    }

    /// Creates a runner that never leaves RUNNING.
    #[must_use]
    pub fn never_finishing() -> Self {
        Self::new().with_script([RunState::new(LifecycleState::Running)])
    }

    /// Replaces the state script.
    #[must_use]
    pub fn with_script(self, states: impl IntoIterator<Item = RunState>) -> Self {
        *self.script.lock() = states.into_iter().collect();
        self
    }

    /// Sets the output returned once a run succeeds.
    #[must_use]
    pub fn with_output(self, output: RunOutput) -> Self {
        *self.output.lock() = output;
        self
    }

    /// Reports this job id on submission.
    #[must_use]
    pub fn with_job_id(mut self, job_id: impl Into<JobId>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }

    /// Starts run ids at `first`.
    #[must_use]
    pub fn with_first_run_id(self, first: i64) -> Self {
        self.next_run_id.store(first, Ordering::SeqCst);
        self
    }

    /// Makes every submission fail.
    #[must_use]
    pub fn failing_submit(self, error: ComputeError) -> Self {
        *self.submit_error.lock() = Some(error);
        self
    }

    /// Makes every status query fail.
    #[must_use]
    pub fn failing_status(self, error: ComputeError) -> Self {
        *self.status_error.lock() = Some(error);
        self
    }

    /// Makes every output fetch fail.
    #[must_use]
    pub fn failing_output(self, error: ComputeError) -> Self {
        *self.output_error.lock() = Some(error);
        self
    }

    /// Returns the runs whose output was requested.
    #[must_use]
    pub fn output_requests(&self) -> Vec<RunId> {
        self.output_requests.lock().clone()
    }

    /// Returns the submissions received so far.
    #[must_use]
    pub fn submissions(&self) -> Vec<JobSubmission> {
        self.submissions.lock().clone()
    }

    /// Returns the number of submissions.
    #[must_use]
    pub fn submit_count(&self) -> usize {
        self.submissions.lock().len()
    }

    /// Returns the number of status queries answered.
    #[must_use]
    pub fn status_queries(&self) -> u32 {
        self.status_queries.load(Ordering::SeqCst)
    }

    fn next_state(&self) -> RunState {
        let mut script = self.script.lock();
        if script.len() > 1 {
            script.pop_front().unwrap_or_else(|| RunState::new(LifecycleState::Unknown))
        } else {
            script
                .front()
                .cloned()
                .unwrap_or_else(|| RunState::new(LifecycleState::Unknown))
        }
    }
}

#[async_trait]
impl JobRunner for ScriptedJobRunner {
    fn host(&self) -> &str {
        &self.host
    }

    async fn submit(&self, submission: &JobSubmission) -> Result<SubmittedRun, ComputeError> {
        if let Some(error) = self.submit_error.lock().clone() {
            return Err(error);
        }
        self.submissions.lock().push(submission.clone());
        let run_id = self.next_run_id.fetch_add(1, Ordering::SeqCst);
        Ok(SubmittedRun {
            run_id: RunId::from(run_id),
            job_id: self.job_id.clone(),
        })
    }

    async fn get_run(&self, run_id: &RunId) -> Result<RunInfo, ComputeError> {
        if let Some(error) = self.status_error.lock().clone() {
            return Err(error);
        }
        self.status_queries.fetch_add(1, Ordering::SeqCst);

        let mut info = RunInfo::new(run_id.clone(), self.next_state());
        info.job_id.clone_from(&self.job_id);
        Ok(info)
    }

    async fn get_output(&self, run_id: &RunId) -> Result<RunOutput, ComputeError> {
        self.output_requests.lock().push(run_id.clone());
        if let Some(error) = self.output_error.lock().clone() {
            return Err(error);
        }
        Ok(self.output.lock().clone())
    }

    async fn wait_until_terminal(&self, run_id: &RunId) -> Result<RunInfo, ComputeError> {
        loop {
            let info = self.get_run(run_id).await?;
            if info.lifecycle().is_terminal() {
                return Ok(info);
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }
}
