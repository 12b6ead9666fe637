//! End-to-end tests over in-memory collaborators.

#[cfg(test)]
mod tests {
    use crate::compute::JobRunner;
    use crate::config::EtlConfig;
    use crate::core::{
        JobSubmission, PipelineMessage, ResultState, RunId, RunInfo, RunOutput, RunState,
        SubmittedRun, TaskDefinition, PROCESSED_FOLDER,
    };
    use crate::errors::ComputeError;
    use crate::events::{self, CollectingEventSink};
    use crate::pipeline::{InMemoryLedger, Pipeline, PipelineBuilder};
    use crate::queue::{InMemoryQueue, MessageQueue};
    use crate::stages::{BlobEvent, StageKind, StageOutcome, StageReport};
    use crate::storage::{leaf_name, BlobRef, BlobStore, InMemoryBlobStore};
    use crate::testing::{fixture_config, fixture_pairs, ScriptedJobRunner};
    use crate::worker::Dispatch;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;

    /// Plays the transform notebook: on submission it writes an upper-cased
    /// copy of the input into the processed container.
    struct NotebookRunner {
        inner: ScriptedJobRunner,
        blobs: InMemoryBlobStore,
    }

    impl NotebookRunner {
        fn new(inner: ScriptedJobRunner, blobs: &InMemoryBlobStore) -> Arc<Self> {
            Arc::new(Self {
                inner,
                blobs: blobs.clone(),
            })
        }
    }

    #[async_trait]
    impl JobRunner for NotebookRunner {
        fn host(&self) -> &str {
            self.inner.host()
        }

        async fn submit(&self, submission: &JobSubmission) -> Result<SubmittedRun, ComputeError> {
            if let TaskDefinition::Notebook {
                base_parameters, ..
            } = submission.task()
            {
                let input = &base_parameters["input_file_name"];
                let source = BlobRef::parse(input)
                    .map_err(|e| ComputeError::InvalidRequest(e.to_string()))?;
                let content = self
                    .blobs
                    .read(&source)
                    .await
                    .map_err(|e| ComputeError::InvalidRequest(e.to_string()))?;
                let stem = leaf_name(input).trim_end_matches(".csv");
                let output = BlobRef::new(
                    base_parameters["processed_data_container"].as_str(),
                    format!("{PROCESSED_FOLDER}/{stem}/part-00000.csv"),
                )
                .map_err(|e| ComputeError::InvalidRequest(e.to_string()))?;
                self.blobs.insert(output, content.to_ascii_uppercase());
            }
            self.inner.submit(submission).await
        }

        async fn get_run(&self, run_id: &RunId) -> Result<RunInfo, ComputeError> {
            self.inner.get_run(run_id).await
        }

        async fn get_output(&self, run_id: &RunId) -> Result<RunOutput, ComputeError> {
            self.inner.get_output(run_id).await
        }

        async fn wait_until_terminal(&self, run_id: &RunId) -> Result<RunInfo, ComputeError> {
            self.inner.wait_until_terminal(run_id).await
        }
    }

    struct Harness {
        blobs: InMemoryBlobStore,
        queue: InMemoryQueue,
        sink: Arc<CollectingEventSink>,
        pipeline: Pipeline,
    }

    fn harness(config: EtlConfig, runner: ScriptedJobRunner) -> Harness {
        let blobs = InMemoryBlobStore::new();
        let queue = InMemoryQueue::new();
        let sink = Arc::new(CollectingEventSink::new());
        let pipeline = PipelineBuilder::new(config)
            .blob_store(Arc::new(blobs.clone()))
            .queue(Arc::new(queue.clone()))
            .job_runner(NotebookRunner::new(runner, &blobs))
            .event_sink(sink.clone())
            .submission_ledger(Arc::new(InMemoryLedger::new()))
            .build()
            .unwrap();
        Harness {
            blobs,
            queue,
            sink,
            pipeline,
        }
    }

    fn blob(path: &str) -> BlobRef {
        BlobRef::parse(path).unwrap()
    }

    #[tokio::test]
    async fn test_blob_flows_through_extract_transform_load() {
        let h = harness(fixture_config(&[]), ScriptedJobRunner::new());

        h.pipeline
            .extract()
            .handle_blob(&BlobEvent::new("datasets/olist/orders.csv", b"id,status\n1,delivered\n".to_vec()))
            .await
            .unwrap();
        assert_eq!(h.queue.messages("transform-queue"), vec!["raw-data/orders.csv"]);

        let transformed = h
            .pipeline
            .worker(StageKind::Transform)
            .unwrap()
            .drain(10)
            .await
            .unwrap();
        assert_eq!(transformed.len(), 1);
        assert!(matches!(
            &transformed[0],
            Dispatch::Completed(StageOutcome::Completed(StageReport::Transformed { .. }))
        ));

        let notification = h.queue.messages("load-queue");
        assert_eq!(notification.len(), 1);
        assert!(matches!(
            PipelineMessage::parse(&notification[0]).unwrap(),
            PipelineMessage::Transformed(dataset) if dataset.is_success()
        ));

        let loaded = h
            .pipeline
            .worker(StageKind::Load)
            .unwrap()
            .drain(10)
            .await
            .unwrap();
        assert_eq!(loaded.len(), 1);

        let output = blob(&format!("final-output/{PROCESSED_FOLDER}/orders/part-00000.csv"));
        assert_eq!(h.blobs.get(&output).unwrap(), b"ID,STATUS\n1,DELIVERED\n");
        assert_eq!(h.queue.len("transform-queue"), 0);
        assert_eq!(h.queue.len("load-queue"), 0);
        assert_eq!(h.queue.in_flight(), 0);

        for event in [
            events::EXTRACT_COMPLETED,
            events::TRANSFORM_SUBMITTED,
            events::TRANSFORM_COMPLETED,
            events::LOAD_COMPLETED,
        ] {
            assert_eq!(h.sink.count(event), 1, "{event}");
        }
    }

    #[tokio::test]
    async fn test_failing_transform_is_dead_lettered() {
        let mut pairs = fixture_pairs();
        pairs.push(("QUEUE_MAX_DEQUEUE_COUNT", "2"));
        let runner = ScriptedJobRunner::new()
            .with_script([RunState::terminated(ResultState::Failed).with_message("bad schema")]);
        let h = harness(EtlConfig::from_pairs(pairs).unwrap(), runner);
        h.blobs.insert(blob("raw-data/orders.csv"), b"x".to_vec());
        h.queue.send("transform-queue", "raw-data/orders.csv").await.unwrap();

        let dispatched = h
            .pipeline
            .worker(StageKind::Transform)
            .unwrap()
            .drain(10)
            .await
            .unwrap();

        assert_eq!(dispatched.len(), 2);
        assert!(matches!(&dispatched[0], Dispatch::Redelivered { error, .. } if error.contains("bad schema")));
        assert!(matches!(&dispatched[1], Dispatch::DeadLettered { dequeue_count: 2, .. }));
        assert_eq!(
            h.queue.messages("transform-queue-poison"),
            vec!["raw-data/orders.csv"]
        );
        assert_eq!(h.queue.len("load-queue"), 0);
        assert_eq!(h.sink.count(events::STAGE_FAILED), 2);
        assert_eq!(h.sink.count(events::MESSAGE_DEAD_LETTERED), 1);
    }

    #[tokio::test]
    async fn test_load_skip_is_not_redelivered() {
        let h = harness(fixture_config(&[]), ScriptedJobRunner::new());
        h.queue.send("load-queue", "missing.csv").await.unwrap();

        let dispatched = h
            .pipeline
            .worker(StageKind::Load)
            .unwrap()
            .drain(10)
            .await
            .unwrap();

        assert_eq!(dispatched.len(), 1);
        assert!(matches!(
            &dispatched[0],
            Dispatch::Completed(StageOutcome::Skipped { .. })
        ));
        assert_eq!(h.queue.len("load-queue"), 0);
        assert_eq!(h.blobs.count_in("final-output"), 0);
    }

    #[tokio::test]
    async fn test_malformed_bodies_never_crash_consumers() {
        let h = harness(fixture_config(&[]), ScriptedJobRunner::new());
        for queue in ["transform-queue", "load-queue", "train-queue"] {
            h.queue.send_bytes(queue, vec![0xff, 0xfe, 0xfd]).await.unwrap();
        }

        for kind in [StageKind::Transform, StageKind::Load, StageKind::Train] {
            let worker = h.pipeline.worker(kind).unwrap();
            let first = worker.run_once().await.unwrap();
            assert!(!matches!(first, Dispatch::Idle), "{kind}");
        }
        assert_eq!(h.queue.len("load-queue"), 0);
        assert_eq!(h.queue.len("train-queue"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_train_through_worker() {
        let runner = ScriptedJobRunner::running_then(2, RunState::terminated(ResultState::Success))
            .with_output(RunOutput::notebook(r#"{"rmse": 0.42}"#));
        let h = harness(fixture_config(&[]), runner);
        h.queue.send("train-queue", "retrain").await.unwrap();

        let dispatched = h
            .pipeline
            .worker(StageKind::Train)
            .unwrap()
            .run_once()
            .await
            .unwrap();

        match dispatched {
            Dispatch::Completed(StageOutcome::Completed(StageReport::Trained(report))) => {
                assert_eq!(report.polls, 3);
                assert_eq!(report.notebook_output, json!({"rmse": 0.42}));
            }
            other => panic!("unexpected dispatch: {other:?}"),
        }
        assert_eq!(h.queue.len("train-queue"), 0);
    }
}
