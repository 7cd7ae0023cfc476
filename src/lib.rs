/*!
# Overview
s3bulk-rs runs bulk operations against S3 buckets: listing, setting ACLs,
rewriting metadata, removing objects and multipart uploads, and copying
between local directories and buckets.

## Features
- **Concurrent batches**: one listing producer feeds a pool of workers through a bounded channel
- **Filtering**: ordered `--include` / `--exclude` base-name globs and a modification time window
- **Retries**: every remote call is retried a bounded number of times
- **Continue on error**: item errors are written to a report file instead of aborting the batch
- **Resumable transfers**: multipart checkpoints, snapshot sync and partitioned downloads
- **Library-First**: the s3bulk CLI is a thin wrapper over this crate

## As a Library

```toml
[dependencies]
s3bulk-rs = "0.1"
tokio = { version = "1", features = ["full"] }
```

```no_run
use s3bulk_rs::config::args::build_config_from_args;
use s3bulk_rs::{BatchPipeline, create_pipeline_cancellation_token};

#[tokio::main]
async fn main() {
    let args = vec!["s3bulk", "set-acl", "s3://my-bucket/logs/", "private", "-r", "-f"];
    let config = build_config_from_args(args).unwrap();

    let mut pipeline = BatchPipeline::new(config, create_pipeline_cancellation_token()).await;
    let result = pipeline.run().await;
    if let Some(message) = pipeline.take_finish_message() {
        println!("{message}");
    }
    if let Err(e) = result {
        eprintln!("{e:#}");
    }
}
```
*/

#![allow(clippy::collapsible_if)]
#![allow(clippy::unnecessary_unwrap)]

pub mod config;
pub mod coordinator;
pub mod filters;
pub mod lister;
pub mod monitor;
pub mod operation;
pub mod pipeline;
pub mod reporter;
pub mod retry;
pub mod stage;
pub mod storage;
pub mod transfer;
pub mod types;
pub mod worker;

#[cfg(test)]
pub(crate) mod test_utils;

pub use config::Config;
pub use monitor::{ExitStatus, MonitorSnapshot, ProgressMonitor};
pub use pipeline::BatchPipeline;
pub use types::error::{S3bulkError, exit_code_from_error};
pub use types::token::{PipelineCancellationToken, create_pipeline_cancellation_token};
