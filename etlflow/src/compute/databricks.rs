//! Databricks Jobs API client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::JobRunner;
use crate::config::{ComputeConfig, Secret};
use crate::core::{
    ClusterSpec, JobId, JobSubmission, NewCluster, RunId, RunInfo, RunOutput, RunState, RunTask,
    SubmittedRun, TaskDefinition,
};
use crate::errors::{ComputeError, EtlError};

/// Per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Delay between status queries in [`JobRunner::wait_until_terminal`].
pub const DEFAULT_WAIT_INTERVAL: Duration = Duration::from_secs(10);

const JOB_CLUSTER_KEY: &str = "transform_etl_job_cluster";
const NOTEBOOK_TASK_KEY: &str = "olist_notebook_task";

const RUNS_SUBMIT: &str = "/api/2.1/jobs/runs/submit";
const RUN_NOW: &str = "/api/2.1/jobs/run-now";
const RUNS_GET: &str = "/api/2.1/jobs/runs/get";
const RUNS_GET_OUTPUT: &str = "/api/2.1/jobs/runs/get-output";

#[derive(Debug, Deserialize)]
struct RunNowResponse {
    run_id: RunId,
}

#[derive(Debug, Deserialize)]
struct RunResponse {
    #[serde(default)]
    run_id: Option<RunId>,
    #[serde(default)]
    job_id: Option<JobId>,
    state: RunState,
    #[serde(default)]
    tasks: Vec<RunTask>,
}

#[derive(Debug, Default, Deserialize)]
struct NotebookOutput {
    #[serde(default)]
    result: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OutputResponse {
    #[serde(default)]
    notebook_output: Option<NotebookOutput>,
    #[serde(default)]
    error: Option<String>,
}

/// A [`JobRunner`] over the Databricks REST API with bearer-token auth.
#[derive(Debug, Clone)]
pub struct DatabricksClient {
    http: Client,
    host: String,
    token: Secret,
    wait_interval: Duration,
}

impl DatabricksClient {
    /// Creates a client with the default request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`ComputeError::Transport`] if the HTTP client cannot be built.
    pub fn new(host: impl Into<String>, token: Secret) -> Result<Self, ComputeError> {
        Self::with_timeout(host, token, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Creates a client with a custom request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`ComputeError::Transport`] if the HTTP client cannot be built.
    pub fn with_timeout(
        host: impl Into<String>,
        token: Secret,
        timeout: Duration,
    ) -> Result<Self, ComputeError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ComputeError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            host: host.into().trim_end_matches('/').to_string(),
            token,
            wait_interval: DEFAULT_WAIT_INTERVAL,
        })
    }

    /// Creates a client from the compute configuration.
    ///
    /// # Errors
    ///
    /// Fails when the host or token is missing, or the client cannot be built.
    pub fn from_config(config: &ComputeConfig) -> Result<Self, EtlError> {
        let (host, token) = config.credentials()?;
        Ok(Self::new(host, token.clone())?)
    }

    /// Sets the delay between status queries while waiting.
    #[must_use]
    pub fn with_wait_interval(mut self, interval: Duration) -> Self {
        self.wait_interval = interval;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.host)
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ComputeError> {
        let response = request
            .bearer_auth(self.token.expose())
            .send()
            .await
            .map_err(|e| ComputeError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ComputeError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(ComputeError::Http {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|e| ComputeError::InvalidResponse(e.to_string()))
    }
}

fn cluster_body(cluster: &NewCluster) -> Value {
    let mut body = json!({
        "spark_version": cluster.spark_version,
        "node_type_id": cluster.node_type_id,
        "enable_elastic_disk": true,
    });

    match cluster.spec {
        ClusterSpec::SingleNode => {
            body["num_workers"] = json!(0);
            body["spark_conf"] = json!({ "spark.databricks.cluster.profile": "singleNode" });
        }
        ClusterSpec::Autoscale {
            min_workers,
            max_workers,
        } => {
            body["autoscale"] = json!({
                "min_workers": min_workers,
                "max_workers": max_workers,
            });
        }
    }

    body
}

fn numeric_job_id(job_id: &JobId) -> Result<i64, ComputeError> {
    job_id
        .as_str()
        .parse::<i64>()
        .map_err(|_| ComputeError::InvalidRequest(format!("job id '{job_id}' is not numeric")))
}

#[async_trait]
impl JobRunner for DatabricksClient {
    fn host(&self) -> &str {
        &self.host
    }

    async fn submit(&self, submission: &JobSubmission) -> Result<SubmittedRun, ComputeError> {
        match submission.task() {
            TaskDefinition::Notebook {
                path,
                base_parameters,
            } => {
                let cluster = submission.cluster().ok_or_else(|| {
                    ComputeError::InvalidRequest("notebook submission without a cluster".into())
                })?;
                info!(cluster = %cluster.spec, run_name = submission.run_name(), "Submitting notebook run");

                let body = json!({
                    "run_name": submission.run_name(),
                    "tasks": [{
                        "task_key": NOTEBOOK_TASK_KEY,
                        "job_cluster_key": JOB_CLUSTER_KEY,
                        "notebook_task": {
                            "notebook_path": path,
                            "base_parameters": base_parameters,
                        },
                    }],
                    "job_clusters": [{
                        "job_cluster_key": JOB_CLUSTER_KEY,
                        "new_cluster": cluster_body(cluster),
                    }],
                    "timeout_seconds": submission.timeout_seconds(),
                });

                self.send_json(self.http.post(self.url(RUNS_SUBMIT)).json(&body))
                    .await
            }
            TaskDefinition::ExistingJob {
                job_id,
                notebook_params,
            } => {
                let body = json!({
                    "job_id": numeric_job_id(job_id)?,
                    "notebook_params": notebook_params,
                });
                debug!(job_id = %job_id, "Triggering existing job");

                let response: RunNowResponse = self
                    .send_json(self.http.post(self.url(RUN_NOW)).json(&body))
                    .await?;
                Ok(SubmittedRun {
                    run_id: response.run_id,
                    job_id: Some(job_id.clone()),
                })
            }
        }
    }

    async fn get_run(&self, run_id: &RunId) -> Result<RunInfo, ComputeError> {
        let response: RunResponse = self
            .send_json(
                self.http
                    .get(self.url(RUNS_GET))
                    .query(&[("run_id", run_id.as_str())]),
            )
            .await?;

        let id = response.run_id.unwrap_or_else(|| run_id.clone());
        let mut info = RunInfo::new(id, response.state);
        info.job_id = response.job_id;
        info.tasks = response.tasks;
        Ok(info)
    }

    async fn get_output(&self, run_id: &RunId) -> Result<RunOutput, ComputeError> {
        let response: OutputResponse = self
            .send_json(
                self.http
                    .get(self.url(RUNS_GET_OUTPUT))
                    .query(&[("run_id", run_id.as_str())]),
            )
            .await?;

        Ok(RunOutput {
            notebook_result: response.notebook_output.unwrap_or_default().result,
            error: response.error,
        })
    }

    async fn wait_until_terminal(&self, run_id: &RunId) -> Result<RunInfo, ComputeError> {
        loop {
            let info = self.get_run(run_id).await?;
            let state = info.lifecycle();

            if state.is_terminal() {
                return Ok(info);
            }

            debug!(run_id = %run_id, life_cycle_state = %state, "Run not finished yet");
            tokio::time::sleep(self.wait_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{LifecycleState, ResultState};
    use std::collections::BTreeMap;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> DatabricksClient {
        DatabricksClient::new(server.uri(), Secret::new("dapi-test"))
            .unwrap()
            .with_wait_interval(Duration::from_millis(10))
    }

    fn notebook_submission(spec: ClusterSpec) -> JobSubmission {
        let params = BTreeMap::from([("input_file_name".to_string(), "orders.csv".to_string())]);
        JobSubmission::notebook(
            "olist_transform_run_orders_csv",
            "/Repos/etl/transform",
            params,
            NewCluster {
                spark_version: "13.3.x-scala2.12".into(),
                node_type_id: "Standard_F4s_v2".into(),
                spec,
            },
            1800,
        )
    }

    #[tokio::test]
    async fn test_submit_single_node_notebook_run() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(RUNS_SUBMIT))
            .and(header("authorization", "Bearer dapi-test"))
            .and(body_partial_json(json!({
                "run_name": "olist_transform_run_orders_csv",
                "timeout_seconds": 1800,
                "tasks": [{
                    "task_key": "olist_notebook_task",
                    "job_cluster_key": "transform_etl_job_cluster",
                    "notebook_task": {
                        "notebook_path": "/Repos/etl/transform",
                        "base_parameters": {"input_file_name": "orders.csv"},
                    },
                }],
                "job_clusters": [{
                    "job_cluster_key": "transform_etl_job_cluster",
                    "new_cluster": {
                        "num_workers": 0,
                        "enable_elastic_disk": true,
                        "spark_conf": {"spark.databricks.cluster.profile": "singleNode"},
                    },
                }],
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"run_id": 12345})))
            .expect(1)
            .mount(&server)
            .await;

        let submitted = client(&server)
            .submit(&notebook_submission(ClusterSpec::SingleNode))
            .await
            .unwrap();

        assert_eq!(submitted.run_id, RunId::new("12345"));
        assert_eq!(submitted.job_id, None);
    }

    #[tokio::test]
    async fn test_submit_autoscale_cluster() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(RUNS_SUBMIT))
            .and(body_partial_json(json!({
                "job_clusters": [{
                    "new_cluster": {"autoscale": {"min_workers": 1, "max_workers": 4}},
                }],
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"run_id": 1, "job_id": 77})),
            )
            .mount(&server)
            .await;

        let submitted = client(&server)
            .submit(&notebook_submission(ClusterSpec::Autoscale {
                min_workers: 1,
                max_workers: 4,
            }))
            .await
            .unwrap();
        assert_eq!(submitted.job_id, Some(JobId::new("77")));
    }

    #[tokio::test]
    async fn test_run_now_sends_integer_job_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(RUN_NOW))
            .and(body_partial_json(json!({
                "job_id": 987,
                "notebook_params": {"STORAGE_ACCOUNT_NAME": "teststorage"},
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"run_id": 555})))
            .mount(&server)
            .await;

        let params = BTreeMap::from([(
            "STORAGE_ACCOUNT_NAME".to_string(),
            "teststorage".to_string(),
        )]);
        let submitted = client(&server)
            .submit(&JobSubmission::existing_job(JobId::new("987"), params))
            .await
            .unwrap();

        assert_eq!(submitted.run_id, RunId::new("555"));
        assert_eq!(submitted.job_id, Some(JobId::new("987")));
    }

    #[tokio::test]
    async fn test_non_numeric_job_id_is_rejected_before_sending() {
        let server = MockServer::start().await;
        let err = client(&server)
            .submit(&JobSubmission::existing_job(JobId::new("training"), BTreeMap::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, ComputeError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_http_error_maps_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(RUNS_GET))
            .respond_with(ResponseTemplate::new(401).set_body_string("Unauthorized"))
            .mount(&server)
            .await;

        let err = client(&server).get_run(&RunId::new("1")).await.unwrap_err();
        assert_eq!(
            err,
            ComputeError::Http {
                status: 401,
                body: "Unauthorized".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_get_run_parses_state() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(RUNS_GET))
            .and(query_param("run_id", "42"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "run_id": 42,
                "job_id": 7,
                "run_name": "ignored",
                "state": {
                    "life_cycle_state": "TERMINATED",
                    "result_state": "FAILED",
                    "state_message": "Notebook threw",
                },
            })))
            .mount(&server)
            .await;

        let info = client(&server).get_run(&RunId::new("42")).await.unwrap();
        assert_eq!(info.lifecycle(), LifecycleState::Terminated);
        assert_eq!(info.state.result_state, Some(ResultState::Failed));
        assert_eq!(info.state.state_message, "Notebook threw");
        assert_eq!(info.job_id, Some(JobId::new("7")));
    }

    #[tokio::test]
    async fn test_wait_polls_until_terminal_without_fetching_output() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(RUNS_GET))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "run_id": 9,
                "state": {"life_cycle_state": "RUNNING"},
            })))
            .up_to_n_times(2)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(RUNS_GET))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "run_id": 9,
                "state": {"life_cycle_state": "TERMINATED", "result_state": "SUCCESS"},
                "tasks": [{"run_id": 10, "task_key": "olist_notebook_task"}],
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(RUNS_GET_OUTPUT))
            .respond_with(ResponseTemplate::new(400).set_body_string(
                "Retrieving the output of runs with multiple tasks is not supported.",
            ))
            .expect(0)
            .mount(&server)
            .await;

        let info = client(&server)
            .wait_until_terminal(&RunId::new("9"))
            .await
            .unwrap();

        assert!(info.state.succeeded());
        assert!(info.output.is_none());
        assert_eq!(info.output_run_id(), &RunId::new("10"));
    }

    #[tokio::test]
    async fn test_get_run_without_top_level_id_keeps_requested_id() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(RUNS_GET))
            .and(query_param("run_id", "42"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "state": {"life_cycle_state": "TERMINATED", "result_state": "SUCCESS"},
                "tasks": [{"run_id": 43}],
            })))
            .mount(&server)
            .await;

        let info = client(&server).get_run(&RunId::new("42")).await.unwrap();
        assert_eq!(info.run_id, RunId::new("42"));
        assert_eq!(info.output_run_id(), &RunId::new("43"));
    }

    #[tokio::test]
    async fn test_get_output_reads_notebook_result() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(RUNS_GET_OUTPUT))
            .and(query_param("run_id", "43"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "notebook_output": {"result": "{\"accuracy\": 0.9}", "truncated": false},
            })))
            .expect(1)
            .mount(&server)
            .await;

        let output = client(&server).get_output(&RunId::new("43")).await.unwrap();
        assert_eq!(output.notebook_result.as_deref(), Some("{\"accuracy\": 0.9}"));
    }

    #[test]
    fn test_debug_does_not_leak_token() {
        let client = DatabricksClient::new("https://adb.example/", Secret::new("dapi-secret")).unwrap();
        assert!(!format!("{client:?}").contains("dapi-secret"));
        assert_eq!(client.host(), "https://adb.example");
    }
}
