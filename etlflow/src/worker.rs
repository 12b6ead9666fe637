//! Queue-triggered invocation of a stage.
//!
//! [`QueueWorker`] stands in for the hosting trigger: it receives one message,
//! hands it to a [`QueueStage`] and settles the delivery. A successful
//! invocation completes the message, a failed one abandons it for
//! redelivery, and a message that keeps failing is moved to the poison queue.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::cancellation::CancellationToken;
use crate::config::DEFAULT_MAX_DEQUEUE_COUNT;
use crate::errors::EtlError;
use crate::events::{self, EventSink, NoOpEventSink};
use crate::queue::{poison_queue_name, MessageQueue};
use crate::stages::{QueueStage, StageOutcome};

/// How one delivery was settled.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// The queue was empty.
    Idle,
    /// The stage returned and the message was completed.
    Completed(StageOutcome),
    /// The stage failed and the message was returned to the queue.
    Redelivered {
        /// The stage error.
        error: String,
        /// Deliveries so far.
        dequeue_count: u32,
    },
    /// The stage failed too often and the message went to the poison queue.
    DeadLettered {
        /// The stage error.
        error: String,
        /// Deliveries so far.
        dequeue_count: u32,
    },
}

/// Feeds one queue into one stage.
pub struct QueueWorker {
    queue_name: String,
    queue: Arc<dyn MessageQueue>,
    stage: Arc<dyn QueueStage>,
    events: Arc<dyn EventSink>,
    max_dequeue_count: u32,
}

impl QueueWorker {
    /// Creates a worker for `queue_name`.
    #[must_use]
    pub fn new(
        queue_name: impl Into<String>,
        queue: Arc<dyn MessageQueue>,
        stage: Arc<dyn QueueStage>,
    ) -> Self {
        Self {
            queue_name: queue_name.into(),
            queue,
            stage,
            events: Arc::new(NoOpEventSink),
            max_dequeue_count: DEFAULT_MAX_DEQUEUE_COUNT,
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = sink;
        self
    }

    /// Sets how many deliveries a message gets before it is dead-lettered.
    #[must_use]
    pub fn with_max_dequeue_count(mut self, max: u32) -> Self {
        self.max_dequeue_count = max.max(1);
        self
    }

    /// Returns the queue this worker reads.
    #[must_use]
    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// Receives and settles at most one message.
    ///
    /// # Errors
    ///
    /// Returns queue errors. Stage errors are settled, not returned.
    pub async fn run_once(&self) -> Result<Dispatch, EtlError> {
        let Some(message) = self.queue.receive(&self.queue_name).await? else {
            return Ok(Dispatch::Idle);
        };
        debug!(
            queue = %self.queue_name,
            message_id = %message.id(),
            dequeue_count = message.dequeue_count(),
            "Received message"
        );

        match self.stage.handle(&message).await {
            Ok(outcome) => {
                self.queue.complete(&self.queue_name, &message).await?;
                Ok(Dispatch::Completed(outcome))
            }
            Err(err) => {
                let dequeue_count = message.dequeue_count();
                let error = err.to_string();
                if dequeue_count >= self.max_dequeue_count {
                    let poison = poison_queue_name(&self.queue_name);
                    self.queue.send_bytes(&poison, message.body().to_vec()).await?;
                    self.queue.complete(&self.queue_name, &message).await?;
                    error!(
                        queue = %self.queue_name,
                        poison_queue = %poison,
                        message_id = %message.id(),
                        dequeue_count,
                        error = %error,
                        "Message moved to poison queue"
                    );
                    self.events
                        .emit(
                            events::MESSAGE_DEAD_LETTERED,
                            Some(json!({
                                "queue": self.queue_name,
                                "poison_queue": poison,
                                "message_id": message.id(),
                                "dequeue_count": dequeue_count,
                                "error": error,
                            })),
                        )
                        .await;
                    Ok(Dispatch::DeadLettered {
                        error,
                        dequeue_count,
                    })
                } else {
                    warn!(
                        queue = %self.queue_name,
                        message_id = %message.id(),
                        dequeue_count,
                        error = %error,
                        "Invocation failed; message will be redelivered"
                    );
                    self.queue.abandon(&self.queue_name, message).await?;
                    Ok(Dispatch::Redelivered {
                        error,
                        dequeue_count,
                    })
                }
            }
        }
    }

    /// Settles messages until the queue is empty or `max_messages` deliveries
    /// have been handled.
    ///
    /// # Errors
    ///
    /// Returns the first queue error.
    pub async fn drain(&self, max_messages: usize) -> Result<Vec<Dispatch>, EtlError> {
        let mut dispatched = Vec::new();
        while dispatched.len() < max_messages {
            match self.run_once().await? {
                Dispatch::Idle => break,
                other => dispatched.push(other),
            }
        }
        info!(queue = %self.queue_name, handled = dispatched.len(), "Queue drained");
        Ok(dispatched)
    }

    /// Polls the queue until `cancel` fires, sleeping `idle_interval` whenever
    /// it is empty.
    ///
    /// # Errors
    ///
    /// Returns the first queue error.
    pub async fn run(
        &self,
        cancel: &CancellationToken,
        idle_interval: Duration,
    ) -> Result<(), EtlError> {
        info!(queue = %self.queue_name, "Worker started");
        while !cancel.is_cancelled() {
            if self.run_once().await? == Dispatch::Idle {
                tokio::select! {
                    () = tokio::time::sleep(idle_interval) => {}
                    () = cancel.cancelled() => {}
                }
            }
        }
        info!(queue = %self.queue_name, reason = ?cancel.reason(), "Worker stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectingEventSink;
    use crate::queue::{InMemoryQueue, QueueMessage};
    use crate::stages::{ErrorCondition, StageKind};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Fails the first `failures` deliveries, then skips.
    struct Flaky {
        failures: Mutex<u32>,
    }

    impl Flaky {
        fn new(failures: u32) -> Arc<Self> {
            Arc::new(Self {
                failures: Mutex::new(failures),
            })
        }
    }

    #[async_trait]
    impl QueueStage for Flaky {
        fn kind(&self) -> StageKind {
            StageKind::Load
        }

        async fn handle(&self, _message: &QueueMessage) -> Result<StageOutcome, EtlError> {
            let mut failures = self.failures.lock();
            if *failures > 0 {
                *failures -= 1;
                return Err(EtlError::InvalidInput("boom".into()));
            }
            Ok(StageOutcome::Skipped {
                stage: StageKind::Load,
                condition: ErrorCondition::Decode,
                reason: "nothing to do".into(),
            })
        }
    }

    #[tokio::test]
    async fn test_idle_on_empty_queue() {
        let queue = InMemoryQueue::new();
        let worker = QueueWorker::new("load-queue", Arc::new(queue), Flaky::new(0));
        assert_eq!(worker.run_once().await.unwrap(), Dispatch::Idle);
    }

    #[tokio::test]
    async fn test_success_completes_message() {
        let queue = InMemoryQueue::new();
        queue.send("load-queue", "orders.csv").await.unwrap();
        let worker = QueueWorker::new("load-queue", Arc::new(queue.clone()), Flaky::new(0));

        assert!(matches!(
            worker.run_once().await.unwrap(),
            Dispatch::Completed(StageOutcome::Skipped { .. })
        ));
        assert_eq!(queue.len("load-queue"), 0);
        assert_eq!(queue.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_failure_redelivers_then_succeeds() {
        let queue = InMemoryQueue::new();
        queue.send("load-queue", "orders.csv").await.unwrap();
        let worker = QueueWorker::new("load-queue", Arc::new(queue.clone()), Flaky::new(2));

        let dispatched = worker.drain(10).await.unwrap();

        assert_eq!(dispatched.len(), 3);
        assert_eq!(
            dispatched[0],
            Dispatch::Redelivered {
                error: "Invalid input: boom".into(),
                dequeue_count: 1
            }
        );
        assert!(matches!(dispatched[2], Dispatch::Completed(_)));
        assert_eq!(queue.len("load-queue-poison"), 0);
    }

    #[tokio::test]
    async fn test_poison_after_max_dequeue_count() {
        let queue = InMemoryQueue::new();
        queue.send("load-queue", "orders.csv").await.unwrap();
        let sink = Arc::new(CollectingEventSink::new());
        let worker = QueueWorker::new("load-queue", Arc::new(queue.clone()), Flaky::new(u32::MAX))
            .with_max_dequeue_count(3)
            .with_event_sink(sink.clone());

        let dispatched = worker.drain(10).await.unwrap();

        assert_eq!(dispatched.len(), 3);
        assert!(matches!(
            dispatched[2],
            Dispatch::DeadLettered {
                dequeue_count: 3,
                ..
            }
        ));
        assert_eq!(queue.len("load-queue"), 0);
        assert_eq!(queue.messages("load-queue-poison"), vec!["orders.csv"]);
        assert_eq!(sink.count(events::MESSAGE_DEAD_LETTERED), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_cancel() {
        let queue = InMemoryQueue::new();
        let worker = Arc::new(QueueWorker::new(
            "load-queue",
            Arc::new(queue.clone()),
            Flaky::new(0),
        ));
        let token = Arc::new(CancellationToken::new());

        let handle = {
            let worker = Arc::clone(&worker);
            let token = Arc::clone(&token);
            tokio::spawn(async move { worker.run(&token, Duration::from_secs(5)).await })
        };

        queue.send("load-queue", "orders.csv").await.unwrap();
        tokio::time::sleep(Duration::from_secs(12)).await;
        assert_eq!(queue.len("load-queue"), 0);

        token.cancel("test over");
        handle.await.unwrap().unwrap();
    }
}
