//! In-memory queue service.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;
use uuid::Uuid;

use super::{MessageQueue, QueueMessage};
use crate::errors::QueueError;

#[derive(Debug, Default)]
struct Queues {
    ready: HashMap<String, VecDeque<QueueMessage>>,
    in_flight: HashMap<(String, Uuid), QueueMessage>,
}

/// A process-local queue service. Cloning shares the queues.
#[derive(Debug, Clone, Default)]
pub struct InMemoryQueue {
    inner: Arc<Mutex<Queues>>,
}

impl InMemoryQueue {
    /// Creates an empty service.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues a prepared message as-is, keeping its dequeue count.
    pub fn push_raw(&self, queue: &str, message: QueueMessage) {
        self.inner
            .lock()
            .ready
            .entry(queue.to_string())
            .or_default()
            .push_back(message);
    }

    /// Returns the text of every waiting message, front first.
    ///
    /// Non-UTF-8 bodies are rendered lossily.
    #[must_use]
    pub fn messages(&self, queue: &str) -> Vec<String> {
        self.inner
            .lock()
            .ready
            .get(queue)
            .map(|messages| {
                messages
                    .iter()
                    .map(|m| String::from_utf8_lossy(m.body()).into_owned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Returns the number of waiting messages.
    #[must_use]
    pub fn len(&self, queue: &str) -> usize {
        self.inner.lock().ready.get(queue).map_or(0, VecDeque::len)
    }

    /// Returns the number of delivered but unsettled messages.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.inner.lock().in_flight.len()
    }
}

#[async_trait]
impl MessageQueue for InMemoryQueue {
    async fn send_bytes(&self, queue: &str, body: Vec<u8>) -> Result<(), QueueError> {
        debug!(queue, bytes = body.len(), "Enqueued message");
        self.push_raw(queue, QueueMessage::new(body));
        Ok(())
    }

    async fn receive(&self, queue: &str) -> Result<Option<QueueMessage>, QueueError> {
        let mut queues = self.inner.lock();
        let Some(mut message) = queues.ready.get_mut(queue).and_then(VecDeque::pop_front) else {
            return Ok(None);
        };
        message.mark_delivered();
        queues
            .in_flight
            .insert((queue.to_string(), message.id()), message.clone());
        Ok(Some(message))
    }

    async fn complete(&self, queue: &str, message: &QueueMessage) -> Result<(), QueueError> {
        self.inner
            .lock()
            .in_flight
            .remove(&(queue.to_string(), message.id()))
            .map(|_| ())
            .ok_or_else(|| QueueError::UnknownReceipt(message.id().to_string()))
    }

    async fn abandon(&self, queue: &str, message: QueueMessage) -> Result<(), QueueError> {
        let mut queues = self.inner.lock();
        let key = (queue.to_string(), message.id());
        let Some(tracked) = queues.in_flight.remove(&key) else {
            return Err(QueueError::UnknownReceipt(message.id().to_string()));
        };
        queues
            .ready
            .entry(queue.to_string())
            .or_default()
            .push_back(tracked);
        Ok(())
    }
}
