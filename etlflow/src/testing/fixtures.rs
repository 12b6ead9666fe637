//! Configuration fixtures.

use crate::config::EtlConfig;

/// Compute host used by the fixtures.
pub const FIXTURE_HOST: &str = "https://adb-123.azuredatabricks.net";

/// Returns a complete set of environment pairs for every stage.
#[must_use]
pub fn fixture_pairs() -> Vec<(&'static str, &'static str)> {
    vec![
        ("STORAGE_ACCOUNT_NAME", "teststorage"),
        ("DATASETS_CONTAINER_NAME", "datasets"),
        ("RAW_DATA_CONTAINER_NAME", "raw-data"),
        ("PROCESSED_DATA_CONTAINER_NAME", "processed-data"),
        ("MODELS_CONTAINER_NAME_PARAM", "models"),
        ("FINAL_OUTPUT_CONTAINER_NAME", "final-output"),
        ("TRANSFORM_QUEUE_NAME", "transform-queue"),
        ("LOAD_TRIGGER_QUEUE_NAME", "load-queue"),
        ("TRAIN_QUEUE_NAME", "train-queue"),
        ("DATABRICKS_HOST", FIXTURE_HOST),
        ("DATABRICKS_TOKEN", "dapi-fixture"),
        ("DATABRICKS_NOTEBOOK_PATH", "/Repos/etl/transform"),
        ("DATABRICKS_JOB_ID_MODEL_TRAINING", "987"),
        ("AZURE_STORAGE_ACCOUNT_KEY_PARAM", "fixture-key"),
    ]
}

/// Builds a configuration from [`fixture_pairs`], minus the named variables.
///
/// # Panics
///
/// Panics if the fixture pairs do not parse, which would be a bug in the fixture.
#[must_use]
#[allow(clippy::expect_used)]
pub fn fixture_config(without: &[&str]) -> EtlConfig {
    let pairs = fixture_pairs()
        .into_iter()
        .filter(|(name, _)| !without.contains(name));
    EtlConfig::from_pairs(pairs).expect("fixture configuration parses")
}
