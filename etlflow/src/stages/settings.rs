//! Per-stage settings, validated once from [`EtlConfig`].

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;
use tracing::warn;

use crate::compute::WaitPolicy;
use crate::config::{require, EtlConfig, Secret};
use crate::core::{ClusterSpec, JobId, NewCluster};
use crate::errors::ConfigError;
use crate::storage::validate_container;

fn container(name: &str, variable: &'static str) -> Result<String, ConfigError> {
    validate_container(name).map_err(|e| ConfigError::invalid(variable, e))?;
    Ok(name.to_string())
}

/// Extract destination and downstream queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractSettings {
    /// Container receiving landed blobs.
    pub raw_container: String,
    /// Queue announcing them.
    pub transform_queue: String,
}

impl ExtractSettings {
    /// Builds the settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for a malformed container name.
    pub fn from_config(config: &EtlConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            raw_container: container(&config.storage.raw_container, "RAW_DATA_CONTAINER_NAME")?,
            transform_queue: config.queues.transform.clone(),
        })
    }
}

/// Everything Transform needs to submit and report a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransformSettings {
    /// Notebook to run.
    pub notebook_path: String,
    /// Container the notebook reads from.
    pub raw_container: String,
    /// Container the notebook writes to.
    pub processed_container: String,
    /// Storage account handed to the notebook.
    pub storage_account_name: String,
    /// Queue for the transformed notification; absent means Load is not triggered.
    pub load_queue: Option<String>,
    /// Job cluster definition.
    pub cluster: NewCluster,
    /// Run timeout.
    pub run_timeout: Duration,
    /// Optional local ceiling on the blocking wait.
    pub max_wait: Option<Duration>,
}

impl TransformSettings {
    /// Builds the settings, requiring the compute credentials, the notebook
    /// path, both containers and the storage account.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Missing`] naming the first absent variable.
    pub fn from_config(config: &EtlConfig) -> Result<Self, ConfigError> {
        config.compute.credentials()?;
        let notebook_path = require(
            config.compute.notebook_path.as_deref(),
            "DATABRICKS_NOTEBOOK_PATH",
        )?;
        let processed = require(
            config.storage.processed_container.as_deref(),
            "PROCESSED_DATA_CONTAINER_NAME",
        )?;
        let account = require(
            config.storage.account_name.as_deref(),
            "STORAGE_ACCOUNT_NAME",
        )?;

        Ok(Self {
            notebook_path: notebook_path.to_string(),
            raw_container: container(&config.storage.raw_container, "RAW_DATA_CONTAINER_NAME")?,
            processed_container: container(processed, "PROCESSED_DATA_CONTAINER_NAME")?,
            storage_account_name: account.to_string(),
            load_queue: config.queues.load.clone(),
            cluster: NewCluster {
                spark_version: config.compute.spark_version.clone(),
                node_type_id: config.compute.node_type_id.clone(),
                spec: ClusterSpec::from_bounds(
                    config.compute.min_workers,
                    config.compute.max_workers,
                ),
            },
            run_timeout: config.compute.run_timeout,
            max_wait: None,
        })
    }

    /// Bounds the blocking wait locally.
    #[must_use]
    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = Some(max_wait);
        self
    }

    /// Returns the parameters handed to the notebook.
    #[must_use]
    pub fn notebook_parameters(&self, trigger_context: &str) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("input_file_name".to_string(), trigger_context.to_string()),
            ("raw_data_container".to_string(), self.raw_container.clone()),
            (
                "processed_data_container".to_string(),
                self.processed_container.clone(),
            ),
            (
                "storage_account_name".to_string(),
                self.storage_account_name.clone(),
            ),
        ])
    }

    /// Returns the wait policy for the blocking wait.
    #[must_use]
    pub fn wait_policy(&self) -> WaitPolicy {
        let policy = WaitPolicy::new(Duration::from_secs(1));
        match self.max_wait {
            Some(limit) => policy.with_max_wait(limit),
            None => policy,
        }
    }
}

/// Load source and destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadSettings {
    /// Container bare-path payloads are read from.
    pub source_container: String,
    /// Container every copy is written to.
    pub final_output_container: String,
}

impl LoadSettings {
    /// Builds the settings, requiring the final output container.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Missing`] or [`ConfigError::Invalid`].
    pub fn from_config(config: &EtlConfig) -> Result<Self, ConfigError> {
        let destination = require(
            config.storage.final_output_container.as_deref(),
            "FINAL_OUTPUT_CONTAINER_NAME",
        )?;
        Ok(Self {
            source_container: container(
                &config.storage.datasets_container,
                "DATASETS_CONTAINER_NAME",
            )?,
            final_output_container: container(destination, "FINAL_OUTPUT_CONTAINER_NAME")?,
        })
    }
}

/// Everything Train needs to trigger and track a training run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrainSettings {
    /// Registered training job.
    pub job_id: JobId,
    /// Storage account handed to the job.
    pub storage_account_name: String,
    /// Datasets container handed to the job.
    pub datasets_container: String,
    /// Models container handed to the job.
    pub models_container: Option<String>,
    /// Storage key handed to the job; absence means fallback auth.
    pub account_key: Option<Secret>,
    /// Delay between status queries.
    pub poll_interval: Duration,
    /// Ceiling on polling.
    pub max_wait: Duration,
    /// Propagate terminal run failures instead of reporting them.
    pub raise_on_failure: bool,
}

impl TrainSettings {
    /// Builds the settings, requiring the compute credentials, the job id and
    /// the storage account.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Missing`] naming the first absent variable.
    pub fn from_config(config: &EtlConfig) -> Result<Self, ConfigError> {
        config.compute.credentials()?;
        let job_id = require(
            config.compute.training_job_id.as_deref(),
            "DATABRICKS_JOB_ID_MODEL_TRAINING",
        )?;
        let account = require(
            config.storage.account_name.as_deref(),
            "STORAGE_ACCOUNT_NAME",
        )?;

        Ok(Self {
            job_id: JobId::new(job_id),
            storage_account_name: account.to_string(),
            datasets_container: config.storage.datasets_container.clone(),
            models_container: config.storage.models_container.clone(),
            account_key: config.storage.account_key.clone(),
            poll_interval: config.train.poll_interval,
            max_wait: config.train.max_wait,
            raise_on_failure: false,
        })
    }

    /// Sets whether terminal failures propagate.
    #[must_use]
    pub fn with_raise_on_failure(mut self, raise: bool) -> Self {
        self.raise_on_failure = raise;
        self
    }

    /// Returns the job parameters. Empty values are left out.
    #[must_use]
    pub fn job_parameters(&self) -> BTreeMap<String, String> {
        if self.account_key.is_none() {
            warn!(
                stage = "train",
                "Storage account key not configured; the training job will fall back to its own authentication"
            );
        }

        let mut params = BTreeMap::from([
            (
                "STORAGE_ACCOUNT_NAME".to_string(),
                self.storage_account_name.clone(),
            ),
            (
                "DATASETS_CONTAINER_NAME".to_string(),
                self.datasets_container.clone(),
            ),
            (
                "MODELS_CONTAINER_NAME".to_string(),
                self.models_container.clone().unwrap_or_default(),
            ),
        ]);
        if let Some(key) = &self.account_key {
            params.insert(
                "AZURE_STORAGE_ACCOUNT_KEY".to_string(),
                key.expose().to_string(),
            );
        }
        params.retain(|_, value| !value.is_empty());
        params
    }

    /// Returns the polling policy.
    #[must_use]
    pub fn wait_policy(&self) -> WaitPolicy {
        WaitPolicy::new(self.poll_interval).with_max_wait(self.max_wait)
    }
}
