//! Environment-sourced pipeline configuration.
//!
//! The whole option set is read once into [`EtlConfig`]. Optional values stay
//! `None` here; each stage's settings type decides which of them it requires
//! and turns their absence into a [`ConfigError::Missing`].

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::errors::ConfigError;

/// Default raw container (Extract destination, Transform input).
pub const DEFAULT_RAW_CONTAINER: &str = "raw-data";
/// Default datasets container (Load source).
pub const DEFAULT_DATASETS_CONTAINER: &str = "datasets";
/// Default Extract → Transform queue.
pub const DEFAULT_TRANSFORM_QUEUE: &str = "transform-queue";
/// Default Train trigger queue.
pub const DEFAULT_TRAIN_QUEUE: &str = "train-queue";
/// Default cluster node type.
pub const DEFAULT_NODE_TYPE_ID: &str = "Standard_F4s_v2";
/// Default Spark runtime.
pub const DEFAULT_SPARK_VERSION: &str = "13.3.x-scala2.12";
/// Default run timeout in seconds.
pub const DEFAULT_RUN_TIMEOUT_SECONDS: u64 = 1800;
/// Default Train poll interval in seconds.
pub const DEFAULT_POLL_INTERVAL_SECONDS: u64 = 60;
/// Default Train wait ceiling in seconds.
pub const DEFAULT_MAX_WAIT_SECONDS: u64 = 1800;
/// Default delivery attempts before a message is dead-lettered.
pub const DEFAULT_MAX_DEQUEUE_COUNT: u32 = 5;

/// A secret string that never prints.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    /// Wraps a secret.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the secret value.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl Serialize for Secret {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("***")
    }
}

/// Blob storage options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageConfig {
    /// Storage account name.
    pub account_name: Option<String>,
    /// Storage account key; absence means fallback authentication.
    pub account_key: Option<Secret>,
    /// Container that Load reads from and Train reads datasets from.
    pub datasets_container: String,
    /// Container Extract writes to.
    pub raw_container: String,
    /// Container the transform job writes to.
    pub processed_container: Option<String>,
    /// Container the training job writes models to.
    pub models_container: Option<String>,
    /// Container Load writes to.
    pub final_output_container: Option<String>,
}

/// Queue names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueConfig {
    /// Extract → Transform queue.
    pub transform: String,
    /// Transform → Load queue; absent means Load is not triggered.
    pub load: Option<String>,
    /// Train trigger queue.
    pub train: String,
}

/// Compute service options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComputeConfig {
    /// Workspace URL.
    pub host: Option<String>,
    /// Bearer token.
    pub token: Option<Secret>,
    /// Transform notebook path.
    pub notebook_path: Option<String>,
    /// Registered training job.
    pub training_job_id: Option<String>,
    /// Cluster node type.
    pub node_type_id: String,
    /// Spark runtime version.
    pub spark_version: String,
    /// Lower worker bound.
    pub min_workers: u32,
    /// Upper worker bound.
    pub max_workers: u32,
    /// Run timeout.
    pub run_timeout: Duration,
}

impl ComputeConfig {
    /// Returns the host and token, or the first missing one.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Missing`] naming the absent variable.
    pub fn credentials(&self) -> Result<(&str, &Secret), ConfigError> {
        let host = require(self.host.as_deref(), "DATABRICKS_HOST")?;
        let token = self
            .token
            .as_ref()
            .ok_or(ConfigError::Missing("DATABRICKS_TOKEN"))?;
        Ok((host, token))
    }
}

/// Train polling options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrainConfig {
    /// Delay between status queries.
    pub poll_interval: Duration,
    /// Ceiling on total polling time.
    pub max_wait: Duration,
}

/// Hosting loop options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerConfig {
    /// Deliveries before a message moves to the poison queue.
    pub max_dequeue_count: u32,
}

/// The full pipeline configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EtlConfig {
    /// Blob storage.
    pub storage: StorageConfig,
    /// Queues.
    pub queues: QueueConfig,
    /// Compute service.
    pub compute: ComputeConfig,
    /// Train polling.
    pub train: TrainConfig,
    /// Hosting loop.
    pub worker: WorkerConfig,
}

impl EtlConfig {
    /// Reads the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when a numeric option does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads the configuration from key/value pairs.
    ///
    /// # Errors
    ///
    /// Same as [`EtlConfig::from_env`].
    pub fn from_pairs<'a, I>(pairs: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let map: HashMap<String, String> = pairs
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Self::from_lookup(|name| map.get(name).cloned())
    }

    /// Reads the configuration through a lookup function.
    ///
    /// Blank values count as absent.
    ///
    /// # Errors
    ///
    /// Same as [`EtlConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };

        let storage = StorageConfig {
            account_name: env
                .optional("STORAGE_ACCOUNT_NAME")
                .or_else(|| env.optional("STORAGE_ACCOUNT_NAME_PARAM")),
            account_key: env.optional("AZURE_STORAGE_ACCOUNT_KEY_PARAM").map(Secret::new),
            datasets_container: env
                .optional("DATASETS_CONTAINER_NAME")
                .or_else(|| env.optional("DATASETS_CONTAINER_NAME_PARAM"))
                .unwrap_or_else(|| DEFAULT_DATASETS_CONTAINER.to_string()),
            raw_container: env.or_default("RAW_DATA_CONTAINER_NAME", DEFAULT_RAW_CONTAINER),
            processed_container: env.optional("PROCESSED_DATA_CONTAINER_NAME"),
            models_container: env.optional("MODELS_CONTAINER_NAME_PARAM"),
            final_output_container: env.optional("FINAL_OUTPUT_CONTAINER_NAME"),
        };

        let queues = QueueConfig {
            transform: env.or_default("TRANSFORM_QUEUE_NAME", DEFAULT_TRANSFORM_QUEUE),
            load: env.optional("LOAD_TRIGGER_QUEUE_NAME"),
            train: env.or_default("TRAIN_QUEUE_NAME", DEFAULT_TRAIN_QUEUE),
        };

        let compute = ComputeConfig {
            host: env.optional("DATABRICKS_HOST"),
            token: env.optional("DATABRICKS_TOKEN").map(Secret::new),
            notebook_path: env.optional("DATABRICKS_NOTEBOOK_PATH"),
            training_job_id: env.optional("DATABRICKS_JOB_ID_MODEL_TRAINING"),
            node_type_id: env.or_default("DATABRICKS_NODE_TYPE_ID", DEFAULT_NODE_TYPE_ID),
            spark_version: env.or_default("DATABRICKS_SPARK_VERSION", DEFAULT_SPARK_VERSION),
            min_workers: env.parse_u32("DATABRICKS_MIN_WORKERS", 0)?,
            max_workers: env.parse_u32("DATABRICKS_MAX_WORKERS", 0)?,
            run_timeout: Duration::from_secs(
                env.parse_u64("DATABRICKS_RUN_TIMEOUT_SECONDS", DEFAULT_RUN_TIMEOUT_SECONDS)?,
            ),
        };

        if compute.min_workers > compute.max_workers {
            return Err(ConfigError::invalid(
                "DATABRICKS_MIN_WORKERS",
                format!(
                    "min_workers {} exceeds max_workers {}",
                    compute.min_workers, compute.max_workers
                ),
            ));
        }

        let poll_seconds =
            env.parse_u64("TRAIN_POLL_INTERVAL_SECONDS", DEFAULT_POLL_INTERVAL_SECONDS)?;
        if poll_seconds == 0 {
            return Err(ConfigError::invalid(
                "TRAIN_POLL_INTERVAL_SECONDS",
                "must be greater than zero",
            ));
        }

        let train = TrainConfig {
            poll_interval: Duration::from_secs(poll_seconds),
            max_wait: Duration::from_secs(
                env.parse_u64("TRAIN_MAX_WAIT_SECONDS", DEFAULT_MAX_WAIT_SECONDS)?,
            ),
        };

        let worker = WorkerConfig {
            max_dequeue_count: env
                .parse_u32("QUEUE_MAX_DEQUEUE_COUNT", DEFAULT_MAX_DEQUEUE_COUNT)?
                .max(1),
        };

        Ok(Self {
            storage,
            queues,
            compute,
            train,
            worker,
        })
    }
}

/// Returns the value or a [`ConfigError::Missing`] naming it.
///
/// # Errors
///
/// Returns [`ConfigError::Missing`] when `value` is `None`.
pub fn require<'a>(value: Option<&'a str>, name: &'static str) -> Result<&'a str, ConfigError> {
    value.ok_or(ConfigError::Missing(name))
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, name: &str) -> Option<String> {
        (self.lookup)(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn or_default(&self, name: &str, default: &str) -> String {
        self.optional(name).unwrap_or_else(|| default.to_string())
    }

    fn parse_u64(&self, name: &'static str, default: u64) -> Result<u64, ConfigError> {
        self.optional(name).map_or(Ok(default), |raw| {
            raw.parse::<u64>()
                .map_err(|error| ConfigError::invalid(name, error))
        })
    }

    fn parse_u32(&self, name: &'static str, default: u32) -> Result<u32, ConfigError> {
        self.optional(name).map_or(Ok(default), |raw| {
            raw.parse::<u32>()
                .map_err(|error| ConfigError::invalid(name, error))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_from_empty_environment() {
        let config = EtlConfig::from_pairs([]).unwrap();

        assert_eq!(config.storage.raw_container, "raw-data");
        assert_eq!(config.storage.datasets_container, "datasets");
        assert_eq!(config.queues.transform, "transform-queue");
        assert_eq!(config.queues.load, None);
        assert_eq!(config.compute.node_type_id, "Standard_F4s_v2");
        assert_eq!(config.compute.spark_version, "13.3.x-scala2.12");
        assert_eq!(config.compute.min_workers, 0);
        assert_eq!(config.compute.run_timeout, Duration::from_secs(1800));
        assert_eq!(config.train.poll_interval, Duration::from_secs(60));
        assert_eq!(config.train.max_wait, Duration::from_secs(1800));
        assert_eq!(config.worker.max_dequeue_count, 5);
    }

    #[test]
    fn test_param_suffixed_fallbacks() {
        let config = EtlConfig::from_pairs([
            ("STORAGE_ACCOUNT_NAME_PARAM", "teststorage"),
            ("DATASETS_CONTAINER_NAME_PARAM", "datasets-param"),
        ])
        .unwrap();

        assert_eq!(config.storage.account_name.as_deref(), Some("teststorage"));
        assert_eq!(config.storage.datasets_container, "datasets-param");
    }

    #[test]
    fn test_blank_values_are_absent() {
        let config = EtlConfig::from_pairs([("LOAD_TRIGGER_QUEUE_NAME", "  ")]).unwrap();
        assert_eq!(config.queues.load, None);
    }

    #[test]
    fn test_invalid_number_is_rejected() {
        let err = EtlConfig::from_pairs([("DATABRICKS_MAX_WORKERS", "many")]).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                name: "DATABRICKS_MAX_WORKERS",
                ..
            }
        ));
    }

    #[test]
    fn test_inverted_worker_bounds_are_rejected() {
        let err = EtlConfig::from_pairs([
            ("DATABRICKS_MIN_WORKERS", "4"),
            ("DATABRICKS_MAX_WORKERS", "2"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("exceeds"));
    }

    #[test]
    fn test_credentials_report_first_missing() {
        let config = EtlConfig::from_pairs([("DATABRICKS_HOST", "https://adb")]).unwrap();
        assert_eq!(
            config.compute.credentials().unwrap_err(),
            ConfigError::Missing("DATABRICKS_TOKEN")
        );
    }

    #[test]
    fn test_secrets_are_redacted() {
        let config = EtlConfig::from_pairs([
            ("DATABRICKS_TOKEN", "dapi-secret"),
            ("AZURE_STORAGE_ACCOUNT_KEY_PARAM", "key-secret"),
        ])
        .unwrap();

        let debug = format!("{config:?}");
        assert!(!debug.contains("dapi-secret"));
        assert!(!debug.contains("key-secret"));

        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("dapi-secret"));
        assert_eq!(config.compute.token.unwrap().expose(), "dapi-secret");
    }
}
