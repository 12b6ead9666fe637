//! At-least-once FIFO message queues.
//!
//! A delivered message stays in flight until the consumer either completes
//! it (removed for good) or abandons it (back on the queue with its dequeue
//! count kept). Stages never retry on their own; redelivery is the queue's
//! job.

mod memory;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::errors::{DecodeError, QueueError};

pub use memory::InMemoryQueue;

/// Suffix of the queue that receives messages past their delivery limit.
pub const POISON_SUFFIX: &str = "-poison";

/// Returns the poison queue paired with `queue`.
#[must_use]
pub fn poison_queue_name(queue: &str) -> String {
    format!("{queue}{POISON_SUFFIX}")
}

/// One queue message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    id: Uuid,
    body: Vec<u8>,
    dequeue_count: u32,
    inserted_at: DateTime<Utc>,
}

impl QueueMessage {
    /// Creates a message from raw bytes.
    #[must_use]
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            id: Uuid::new_v4(),
            body: body.into(),
            dequeue_count: 0,
            inserted_at: Utc::now(),
        }
    }

    /// Creates a message from text.
    #[must_use]
    pub fn from_text(text: &str) -> Self {
        Self::new(text.as_bytes())
    }

    /// Creates a message from a base64-encoded body.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::InvalidBase64`] if the body does not decode.
    pub fn from_base64(encoded: &str) -> Result<Self, DecodeError> {
        let body = BASE64
            .decode(encoded.trim())
            .map_err(|e| DecodeError::InvalidBase64(e.to_string()))?;
        Ok(Self::new(body))
    }

    /// Returns the body encoded as base64.
    #[must_use]
    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.body)
    }

    /// Returns the message id.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Returns the raw body.
    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Returns the body as UTF-8 text.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::InvalidUtf8`] for non-UTF-8 bodies.
    pub fn text(&self) -> Result<&str, DecodeError> {
        Ok(std::str::from_utf8(&self.body)?)
    }

    /// Returns how many times the message has been delivered.
    #[must_use]
    pub fn dequeue_count(&self) -> u32 {
        self.dequeue_count
    }

    /// Returns when the message was first enqueued.
    #[must_use]
    pub fn inserted_at(&self) -> DateTime<Utc> {
        self.inserted_at
    }

    pub(crate) fn mark_delivered(&mut self) {
        self.dequeue_count = self.dequeue_count.saturating_add(1);
    }
}

/// An at-least-once FIFO queue service.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Appends a raw message to a queue.
    async fn send_bytes(&self, queue: &str, body: Vec<u8>) -> Result<(), QueueError>;

    /// Appends a text message to a queue.
    async fn send(&self, queue: &str, text: &str) -> Result<(), QueueError> {
        self.send_bytes(queue, text.as_bytes().to_vec()).await
    }

    /// Takes the next message and marks it in flight.
    async fn receive(&self, queue: &str) -> Result<Option<QueueMessage>, QueueError>;

    /// Deletes an in-flight message.
    async fn complete(&self, queue: &str, message: &QueueMessage) -> Result<(), QueueError>;

    /// Returns an in-flight message to the back of its queue.
    async fn abandon(&self, queue: &str, message: QueueMessage) -> Result<(), QueueError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base64_body() {
        let message = QueueMessage::from_text("raw-data/orders.csv");
        let encoded = message.to_base64();
        assert_eq!(encoded, "cmF3LWRhdGEvb3JkZXJzLmNzdg==");

        let decoded = QueueMessage::from_base64(&encoded).unwrap();
        assert_eq!(decoded.text().unwrap(), "raw-data/orders.csv");
        assert_ne!(decoded.id(), message.id());
    }

    #[test]
    fn test_invalid_base64_is_decode_error() {
        let err = QueueMessage::from_base64("not base64!").unwrap_err();
        assert!(matches!(err, DecodeError::InvalidBase64(_)));
    }

    #[test]
    fn test_text_rejects_invalid_utf8() {
        let message = QueueMessage::new(vec![0xc3, 0x28]);
        assert!(matches!(message.text(), Err(DecodeError::InvalidUtf8(_))));
        assert_eq!(message.dequeue_count(), 0);
    }

    #[test]
    fn test_poison_queue_name() {
        assert_eq!(poison_queue_name("transform-queue"), "transform-queue-poison");
    }
}
