//! Per-item commands run by the workers.
//!
//! One [`ObjectOperation`] is resolved from `Config::operation` when the
//! pipeline is built and shared by every worker.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::TransferConfig;
use crate::monitor::ProgressMonitor;
use crate::storage::Storage;
use crate::transfer::multipart::PartContext;
use crate::transfer::planner::PlanOverrides;
use crate::transfer::snapshot::SnapshotTracker;
use crate::transfer::throttle::Throttle;
use crate::types::ObjectEntry;
use crate::types::error::{RetryTarget, is_not_found_error};

pub mod copy;
pub mod download;
pub mod remove;
pub mod set_acl;
pub mod set_meta;
pub mod upload;

pub use copy::CopyOperation;
pub use download::DownloadOperation;
pub use remove::RemoveOperation;
pub use set_acl::SetAclOperation;
pub use set_meta::SetMetaOperation;
pub use upload::UploadOperation;

/// What happened to one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    Done { bytes: u64 },
    /// Nothing to do, e.g. the destination is already up to date.
    Skipped { bytes: u64 },
}

#[async_trait]
pub trait ObjectOperation: Send + Sync {
    fn name(&self) -> &'static str;

    /// Identity reported when retries of `entry` run out.
    fn retry_target(&self, entry: &ObjectEntry) -> RetryTarget;

    async fn process(&self, entry: &ObjectEntry) -> Result<ItemOutcome>;
}

/// Settings shared by the three `cp` directions.
#[derive(Clone)]
pub struct TransferSettings {
    pub update: bool,
    pub bigfile_threshold: u64,
    pub overrides: PlanOverrides,
    pub max_speed: Option<u64>,
    pub checkpoint_dir: PathBuf,
    pub snapshot: Option<Arc<SnapshotTracker>>,
    pub monitor: Arc<dyn ProgressMonitor>,
}

impl TransferSettings {
    pub fn new(
        config: &TransferConfig,
        snapshot: Option<Arc<SnapshotTracker>>,
        monitor: Arc<dyn ProgressMonitor>,
    ) -> Self {
        Self {
            update: config.update,
            bigfile_threshold: config.bigfile_threshold,
            overrides: PlanOverrides {
                part_size: config.part_size,
                parallel: config.parallel,
            },
            max_speed: config.max_speed,
            checkpoint_dir: config.checkpoint_dir.clone(),
            snapshot,
            monitor,
        }
    }

    /// Empty objects always go in one request.
    pub fn is_multipart(&self, size: u64) -> bool {
        size > 0 && size >= self.bigfile_threshold
    }

    /// A fresh bandwidth budget for one transfer.
    pub fn part_context(&self) -> PartContext {
        PartContext {
            overrides: self.overrides,
            throttle: Arc::new(Throttle::new(self.max_speed)),
            monitor: self.monitor.clone(),
        }
    }

    pub fn mark_done(&self, entry: &ObjectEntry) -> Result<()> {
        match &self.snapshot {
            Some(snapshot) => snapshot.mark_done(entry),
            None => Ok(()),
        }
    }
}

/// Update mode skips a source that is not newer than its destination.
pub fn is_up_to_date(source: &ObjectEntry, destination_modified: Option<DateTime<Utc>>) -> bool {
    match (source.last_modified, destination_modified) {
        (Some(source), Some(destination)) => destination >= source,
        _ => false,
    }
}

/// Last modification of `key`, `None` when it does not exist.
pub async fn remote_modified(storage: &Storage, key: &str) -> Result<Option<DateTime<Utc>>> {
    match storage.head_object(key).await {
        Ok(head) => Ok(head.last_modified),
        Err(e) if is_not_found_error(&e) => Ok(None),
        Err(e) => Err(e),
    }
}
