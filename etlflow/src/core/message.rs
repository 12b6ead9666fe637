//! The inter-stage message contract.
//!
//! Two payload shapes coexist. A bare string (usually `"<container>/<name>"`)
//! is the simple form that Extract emits and Transform treats as an opaque
//! trigger label. Structured payloads are JSON objects carrying a `kind`
//! discriminator. Kind-less JSON with the transformed-dataset fields is
//! accepted as legacy input.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::job::RunId;
use crate::errors::DecodeError;

/// Status literal for a successful transform.
pub const TRANSFORMED_SUCCESSFULLY: &str = "transformed_successfully";

/// Dataset name reported by the transform stage.
pub const DATASET_NAME: &str = "olist_ecommerce";

/// Folder of processed output inside the processed container.
pub const PROCESSED_FOLDER: &str = "olist_ecommerce_processed";

/// Notification that a dataset was transformed by a compute run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformedDataset {
    /// Dataset identifier.
    pub dataset_name: String,
    /// `<container>/<prefix>` of the processed output.
    pub processed_data_base_path: String,
    /// `transformed_successfully` or another status.
    pub status: String,
    /// Run that produced the data.
    pub databricks_run_id: RunId,
}

impl TransformedDataset {
    /// Creates the success notification for a processed container.
    #[must_use]
    pub fn successful(processed_container: &str, run_id: RunId) -> Self {
        Self {
            dataset_name: DATASET_NAME.to_string(),
            processed_data_base_path: format!("{processed_container}/{PROCESSED_FOLDER}"),
            status: TRANSFORMED_SUCCESSFULLY.to_string(),
            databricks_run_id: run_id,
        }
    }

    /// Returns true if the status reports success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == TRANSFORMED_SUCCESSFULLY
    }

    /// Splits the base path into container and prefix.
    #[must_use]
    pub fn location(&self) -> (&str, &str) {
        self.processed_data_base_path
            .split_once('/')
            .unwrap_or((self.processed_data_base_path.as_str(), ""))
    }
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Envelope {
    Transformed(TransformedDataset),
}

/// A decoded pipeline message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineMessage {
    /// An opaque string, normally a blob path.
    Bare(String),
    /// A transformed-dataset notification.
    Transformed(TransformedDataset),
}

impl PipelineMessage {
    /// Creates a bare message.
    #[must_use]
    pub fn bare(payload: impl Into<String>) -> Self {
        Self::Bare(payload.into())
    }

    /// Decodes raw queue bytes.
    ///
    /// # Errors
    ///
    /// Fails on non-UTF-8 bytes or on malformed structured payloads.
    pub fn decode(body: &[u8]) -> Result<Self, DecodeError> {
        let text = std::str::from_utf8(body)?;
        Self::parse(text)
    }

    /// Parses a UTF-8 payload, dispatching on its shape.
    ///
    /// # Errors
    ///
    /// Fails when a payload starting with `{` is not a known JSON shape.
    pub fn parse(payload: &str) -> Result<Self, DecodeError> {
        if !payload.trim_start().starts_with('{') {
            return Ok(Self::Bare(payload.to_string()));
        }

        let value: serde_json::Value = serde_json::from_str(payload)
            .map_err(|e| DecodeError::Format(format!("invalid JSON payload: {e}")))?;

        if value.get("kind").is_some() {
            let envelope: Envelope = serde_json::from_value(value)
                .map_err(|e| DecodeError::Format(format!("invalid envelope: {e}")))?;
            return Ok(match envelope {
                Envelope::Transformed(dataset) => Self::Transformed(dataset),
            });
        }

        let dataset: TransformedDataset = serde_json::from_value(value)
            .map_err(|e| DecodeError::Format(format!("JSON payload without 'kind': {e}")))?;
        debug!(
            dataset = %dataset.dataset_name,
            "Accepted legacy structured message without a kind discriminator"
        );
        Ok(Self::Transformed(dataset))
    }

    /// Encodes the message as a queue payload.
    ///
    /// # Errors
    ///
    /// Fails only if JSON serialization fails.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        match self {
            Self::Bare(payload) => Ok(payload.clone()),
            Self::Transformed(dataset) => {
                serde_json::to_string(&Envelope::Transformed(dataset.clone()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_bare_payload() {
        let msg = PipelineMessage::parse("raw-data/orders.csv").unwrap();
        assert_eq!(msg, PipelineMessage::bare("raw-data/orders.csv"));
        assert_eq!(msg.encode().unwrap(), "raw-data/orders.csv");
    }

    #[test]
    fn test_envelope_carries_kind_and_status() {
        let msg = PipelineMessage::Transformed(TransformedDataset::successful(
            "processed-data",
            RunId::new("67890"),
        ));
        let encoded = msg.encode().unwrap();
        let value: serde_json::Value = serde_json::from_str(&encoded).unwrap();

        assert_eq!(value["kind"], "transformed");
        assert_eq!(value["status"], "transformed_successfully");
        assert_eq!(value["dataset_name"], "olist_ecommerce");
        assert_eq!(
            value["processed_data_base_path"],
            "processed-data/olist_ecommerce_processed"
        );
        assert_eq!(value["databricks_run_id"], 67890);
        assert_eq!(PipelineMessage::parse(&encoded).unwrap(), msg);
    }

    #[test]
    fn test_legacy_json_without_kind() {
        let legacy = r#"{
            "dataset_name": "olist_ecommerce",
            "processed_data_base_path": "processed/olist_ecommerce_processed",
            "status": "transformed_successfully",
            "databricks_run_id": "test-run-123"
        }"#;

        match PipelineMessage::parse(legacy).unwrap() {
            PipelineMessage::Transformed(dataset) => {
                assert!(dataset.is_success());
                assert_eq!(dataset.databricks_run_id.as_str(), "test-run-123");
                assert_eq!(dataset.location(), ("processed", "olist_ecommerce_processed"));
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_json_is_format_error() {
        let err = PipelineMessage::parse(r#"{"dataset_id": "x"}"#).unwrap_err();
        assert!(matches!(err, DecodeError::Format(_)));

        let err = PipelineMessage::parse(r#"{"kind": "exploded"}"#).unwrap_err();
        assert!(matches!(err, DecodeError::Format(_)));

        let err = PipelineMessage::parse("{not json").unwrap_err();
        assert!(matches!(err, DecodeError::Format(_)));
    }

    #[test]
    fn test_decode_rejects_invalid_utf8() {
        let err = PipelineMessage::decode(&[0x66, 0x6f, 0xff]).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidUtf8(_)));
    }

    #[test]
    fn test_location_without_prefix() {
        let mut dataset = TransformedDataset::successful("processed", RunId::new("1"));
        dataset.processed_data_base_path = "processed".to_string();
        assert_eq!(dataset.location(), ("processed", ""));
    }
}
