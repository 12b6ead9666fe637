//! Runs the pipeline once against local storage and a Databricks workspace.
//!
//! ```text
//! etl-local [--train] [--storage-root <dir>] <file>...
//! ```
//!
//! Each file is ingested through Extract as `datasets/<file name>`, then the
//! transform and load queues are drained. `--train` also runs Train once.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use etlflow::prelude::*;

const DRAIN_LIMIT: usize = 100;

#[derive(Parser, Debug)]
#[command(name = "etl-local", version, about = "Run the ETL pipeline once against local storage")]
struct Args {
    /// Also run the training job once after loading
    #[arg(long)]
    train: bool,

    /// Root directory of the local blob store
    #[arg(long, env = "ETL_LOCAL_STORAGE_ROOT", default_value = "./.etl-storage")]
    storage_root: PathBuf,

    /// Files to ingest through Extract
    #[arg(required_unless_present = "train")]
    files: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(LogFormat::from_env()?);

    let config = EtlConfig::from_env().context("loading configuration")?;
    info!(root = %args.storage_root.display(), "Using local blob storage");

    let queue = Arc::new(InMemoryQueue::new());
    let runner = Arc::new(DatabricksClient::from_config(&config.compute)?);
    let pipeline = PipelineBuilder::new(config)
        .blob_store(Arc::new(LocalBlobStore::new(args.storage_root.clone())))
        .queue(queue)
        .job_runner(runner)
        .event_sink(Arc::new(LoggingEventSink::default()))
        .submission_ledger(Arc::new(InMemoryLedger::new()))
        .build()?;

    for path in &args.files {
        let content = tokio::fs::read(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .with_context(|| format!("{} has no usable file name", path.display()))?;
        let event = BlobEvent::new(
            format!("{}/{name}", pipeline.config().storage.datasets_container),
            content,
        );
        pipeline.extract().handle_blob(&event).await?;
    }

    for stage in [StageKind::Transform, StageKind::Load] {
        match pipeline.worker(stage) {
            Some(worker) => {
                let dispatched = worker.drain(DRAIN_LIMIT).await?;
                info!(stage = %stage, handled = dispatched.len(), "Stage drained");
            }
            None => warn!(stage = %stage, "No queue configured; stage skipped"),
        }
    }

    if args.train {
        let outcome = pipeline
            .train()
            .handle(&QueueMessage::from_text("etl-local"))
            .await?;
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    }

    Ok(())
}
