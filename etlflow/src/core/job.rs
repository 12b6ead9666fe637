//! Compute job types: submissions, run identifiers and run states.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

// The pattern is a literal; `test_static_patterns_compile` forces it.
static RUN_NAME_UNSAFE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_-]").expect("run name pattern is valid"));

/// Maximum number of trigger-context characters kept in a run name.
pub const RUN_NAME_CONTEXT_LIMIT: usize = 50;

/// Prefix for transform run names.
pub const TRANSFORM_RUN_PREFIX: &str = "olist_transform_run_";

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(String);

        impl $name {
            /// Wraps a raw identifier.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id.to_string())
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        // Canonical integers travel as JSON numbers, anything else as a
        // string, so "007" and "+5" come back unchanged.
        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                match self.0.parse::<i64>() {
                    Ok(numeric) if numeric.to_string() == self.0 => {
                        serializer.serialize_i64(numeric)
                    }
                    _ => serializer.serialize_str(&self.0),
                }
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                #[derive(Deserialize)]
                #[serde(untagged)]
                enum Raw {
                    Int(i64),
                    Str(String),
                }

                Ok(match Raw::deserialize(deserializer)? {
                    Raw::Int(id) => Self(id.to_string()),
                    Raw::Str(id) => Self(id),
                })
            }
        }
    };
}

opaque_id!(
    /// Identifier of one compute run, returned at submission time.
    RunId
);

opaque_id!(
    /// Identifier of a registered compute job.
    JobId
);

/// The execution phase of a compute run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleState {
    /// Queued, not yet running.
    Pending,
    /// Executing.
    Running,
    /// Shutting down after execution.
    Terminating,
    /// Finished; `result_state` is meaningful.
    Terminated,
    /// Not executed; `result_state` is meaningful.
    Skipped,
    /// The service failed; `result_state` is not trustworthy.
    InternalError,
    /// Local marker: the caller stopped waiting before a terminal state.
    TimedOutWaiting,
    /// Any state this crate does not know.
    #[serde(other)]
    Unknown,
}

impl LifecycleState {
    /// Returns the wire name of the state.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Terminating => "TERMINATING",
            Self::Terminated => "TERMINATED",
            Self::Skipped => "SKIPPED",
            Self::InternalError => "INTERNAL_ERROR",
            Self::TimedOutWaiting => "TIMED_OUT_WAITING",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Returns true once the run will not change state again.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Terminated | Self::Skipped | Self::InternalError)
    }

    /// Returns true if `result_state` can be trusted in this state.
    #[must_use]
    pub const fn carries_result(self) -> bool {
        matches!(self, Self::Terminated | Self::Skipped)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The outcome of a run in a terminal lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultState {
    /// The run succeeded.
    Success,
    /// The run failed.
    Failed,
    /// The run hit its own timeout.
    Timedout,
    /// The run was canceled.
    Canceled,
    /// No usable result.
    #[serde(other)]
    Unknown,
}

impl ResultState {
    /// Returns the wire name of the state.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
            Self::Timedout => "TIMEDOUT",
            Self::Canceled => "CANCELED",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for ResultState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State block of a run as reported by the runner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunState {
    /// Lifecycle phase.
    pub life_cycle_state: LifecycleState,
    /// Outcome, if reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_state: Option<ResultState>,
    /// Free-text status from the service.
    #[serde(default)]
    pub state_message: String,
}

impl RunState {
    /// Creates a state without a result.
    #[must_use]
    pub fn new(life_cycle_state: LifecycleState) -> Self {
        Self {
            life_cycle_state,
            result_state: None,
            state_message: String::new(),
        }
    }

    /// Creates a terminated state with a result.
    #[must_use]
    pub fn terminated(result_state: ResultState) -> Self {
        Self {
            life_cycle_state: LifecycleState::Terminated,
            result_state: Some(result_state),
            state_message: String::new(),
        }
    }

    /// Sets the state message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.state_message = message.into();
        self
    }

    /// Returns the result state only where the lifecycle makes it trustworthy.
    #[must_use]
    pub fn trusted_result(&self) -> Option<ResultState> {
        if self.life_cycle_state.carries_result() {
            self.result_state
        } else {
            None
        }
    }

    /// Returns the trusted result, or `UNKNOWN`.
    #[must_use]
    pub fn result_or_unknown(&self) -> ResultState {
        self.trusted_result().unwrap_or(ResultState::Unknown)
    }

    /// Returns true if the run finished successfully.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.trusted_result() == Some(ResultState::Success)
    }
}

/// Output of a terminal run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOutput {
    /// The notebook's exit value, usually a JSON string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notebook_result: Option<String>,
    /// Error text on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunOutput {
    /// Creates an output with a notebook result.
    #[must_use]
    pub fn notebook(result: impl Into<String>) -> Self {
        Self {
            notebook_result: Some(result.into()),
            error: None,
        }
    }
}

/// One task of a multi-task run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunTask {
    /// The task's own run, the one that carries notebook output.
    pub run_id: RunId,
    /// Key of the task inside the run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_key: Option<String>,
}

/// A run as reported by a status query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunInfo {
    /// The run.
    pub run_id: RunId,
    /// The owning job, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
    /// Current state.
    pub state: RunState,
    /// Task runs, empty for single-task runs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tasks: Vec<RunTask>,
    /// Output, present only in terminal states.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<RunOutput>,
}

impl RunInfo {
    /// Creates run info with the given state.
    #[must_use]
    pub fn new(run_id: RunId, state: RunState) -> Self {
        Self {
            run_id,
            job_id: None,
            state,
            tasks: Vec::new(),
            output: None,
        }
    }

    /// Adds a task run.
    #[must_use]
    pub fn with_task(mut self, task: RunTask) -> Self {
        self.tasks.push(task);
        self
    }

    /// Returns the run whose output holds the notebook result.
    ///
    /// Multi-task runs only expose output per task; the first task is the
    /// notebook.
    #[must_use]
    pub fn output_run_id(&self) -> &RunId {
        self.tasks.first().map_or(&self.run_id, |task| &task.run_id)
    }

    /// Attaches output.
    #[must_use]
    pub fn with_output(mut self, output: RunOutput) -> Self {
        self.output = Some(output);
        self
    }

    /// Returns the lifecycle state.
    #[must_use]
    pub fn lifecycle(&self) -> LifecycleState {
        self.state.life_cycle_state
    }
}

/// Response to a submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmittedRun {
    /// The new run.
    pub run_id: RunId,
    /// The job the run belongs to, when the service reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
}

/// Renders a link to the run in the compute workspace UI.
///
/// One-time runs have no job id and use the shorter `#run/` form.
#[must_use]
pub fn run_url(host: &str, run: &SubmittedRun) -> String {
    let host = host.trim_end_matches('/');
    match &run.job_id {
        Some(job_id) => format!("{host}/#job/{job_id}/run/{}", run.run_id),
        None => format!("{host}/#run/{}", run.run_id),
    }
}

/// Worker layout of a job cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ClusterSpec {
    /// Driver only, no workers.
    SingleNode,
    /// Autoscaling worker pool.
    Autoscale {
        /// Lower bound.
        min_workers: u32,
        /// Upper bound.
        max_workers: u32,
    },
}

impl ClusterSpec {
    /// Chooses the layout from worker bounds: both zero means single node.
    #[must_use]
    pub const fn from_bounds(min_workers: u32, max_workers: u32) -> Self {
        if min_workers == 0 && max_workers == 0 {
            Self::SingleNode
        } else {
            Self::Autoscale {
                min_workers,
                max_workers,
            }
        }
    }
}

impl fmt::Display for ClusterSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SingleNode => write!(f, "single node"),
            Self::Autoscale {
                min_workers,
                max_workers,
            } => write!(f, "autoscale min_workers={min_workers}, max_workers={max_workers}"),
        }
    }
}

/// A new job cluster definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCluster {
    /// Spark runtime version.
    pub spark_version: String,
    /// Node type for driver and workers.
    pub node_type_id: String,
    /// Worker layout.
    pub spec: ClusterSpec,
}

/// What a submission runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskDefinition {
    /// A notebook on a new job cluster, run once.
    Notebook {
        /// Workspace path of the notebook.
        path: String,
        /// Parameters handed to the notebook.
        base_parameters: BTreeMap<String, String>,
    },
    /// A run of a registered job.
    ExistingJob {
        /// The job to run.
        job_id: JobId,
        /// Parameters handed to the job's notebook.
        notebook_params: BTreeMap<String, String>,
    },
}

/// An immutable job submission descriptor.
///
/// One descriptor yields exactly one run identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobSubmission {
    run_name: String,
    task: TaskDefinition,
    cluster: Option<NewCluster>,
    timeout_seconds: u64,
}

impl JobSubmission {
    /// Describes a one-time notebook run on a new cluster.
    #[must_use]
    pub fn notebook(
        run_name: impl Into<String>,
        path: impl Into<String>,
        base_parameters: BTreeMap<String, String>,
        cluster: NewCluster,
        timeout_seconds: u64,
    ) -> Self {
        Self {
            run_name: run_name.into(),
            task: TaskDefinition::Notebook {
                path: path.into(),
                base_parameters,
            },
            cluster: Some(cluster),
            timeout_seconds,
        }
    }

    /// Describes a run of a registered job. Empty parameter values are dropped.
    #[must_use]
    pub fn existing_job(job_id: JobId, notebook_params: BTreeMap<String, String>) -> Self {
        let notebook_params = notebook_params
            .into_iter()
            .filter(|(_, value)| !value.is_empty())
            .collect();

        Self {
            run_name: format!("job_{job_id}_run"),
            task: TaskDefinition::ExistingJob {
                job_id,
                notebook_params,
            },
            cluster: None,
            timeout_seconds: 0,
        }
    }

    /// Returns the run name.
    #[must_use]
    pub fn run_name(&self) -> &str {
        &self.run_name
    }

    /// Returns the task definition.
    #[must_use]
    pub fn task(&self) -> &TaskDefinition {
        &self.task
    }

    /// Returns the cluster, for notebook submissions.
    #[must_use]
    pub fn cluster(&self) -> Option<&NewCluster> {
        self.cluster.as_ref()
    }

    /// Returns the run timeout; zero means none.
    #[must_use]
    pub fn timeout_seconds(&self) -> u64 {
        self.timeout_seconds
    }

    /// Returns the parameters forwarded to the task.
    #[must_use]
    pub fn parameters(&self) -> &BTreeMap<String, String> {
        match &self.task {
            TaskDefinition::Notebook {
                base_parameters, ..
            } => base_parameters,
            TaskDefinition::ExistingJob {
                notebook_params, ..
            } => notebook_params,
        }
    }
}

/// Builds a run name from a trigger context.
///
/// Characters outside `[A-Za-z0-9_-]` become `_` and the context is cut to
/// [`RUN_NAME_CONTEXT_LIMIT`] characters.
#[must_use]
pub fn transform_run_name(context: &str) -> String {
    let safe = RUN_NAME_UNSAFE.replace_all(context, "_");
    let truncated: String = safe.chars().take(RUN_NAME_CONTEXT_LIMIT).collect();
    format!("{TRANSFORM_RUN_PREFIX}{truncated}")
}
