//! Shared integration test infrastructure for s3bulk-rs.
//!
//! Batches run against the in-memory storage service so that scenarios are
//! deterministic. Helpers for tests against a real S3 endpoint live in
//! [`e2e`] and are only compiled with `--cfg e2e_test`.

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use s3bulk_rs::config::args::build_config_from_args;
use s3bulk_rs::storage::Storage;
use s3bulk_rs::storage::memory::MemoryStorage;
use s3bulk_rs::{
    BatchPipeline, Config, MonitorSnapshot, ProgressMonitor, create_pipeline_cancellation_token,
};

#[cfg(e2e_test)]
pub mod e2e;

/// Outcome of one batch run.
#[derive(Debug)]
pub struct BatchOutcome {
    pub result: anyhow::Result<()>,
    pub snapshot: MonitorSnapshot,
    pub finish_message: Option<String>,
    pub report_path: Option<std::path::PathBuf>,
    pub item_errors: u64,
}

pub fn init_dummy_tracing_subscriber() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("dummy=trace")
        .try_init();
}

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

/// Builds a config from command-line arguments (without the program name)
/// and pins the knobs that would make a test slow or flaky.
pub fn build_config(args: &[&str]) -> Config {
    let mut full_args = vec!["s3bulk"];
    full_args.extend_from_slice(args);
    full_args.extend_from_slice(&["--retry-times", "1", "--show-no-progress", "-qq"]);

    build_config_from_args(full_args).unwrap()
}

pub async fn run_batch(
    config: Config,
    source: Option<&MemoryStorage>,
    target: Option<&MemoryStorage>,
) -> BatchOutcome {
    let boxed = |storage: Option<&MemoryStorage>| -> Option<Storage> {
        storage.map(|storage| Box::new(storage.clone()) as Storage)
    };

    let mut pipeline = BatchPipeline::with_storages(
        config,
        boxed(source),
        boxed(target),
        create_pipeline_cancellation_token(),
    );
    let result = pipeline.run().await;

    BatchOutcome {
        result,
        snapshot: pipeline.monitor().snapshot(),
        finish_message: pipeline.take_finish_message(),
        report_path: pipeline.report_path().map(|path| path.to_path_buf()),
        item_errors: pipeline.item_errors(),
    }
}
