use std::sync::Arc;

use tracing::trace;

use crate::config::FilterConfig;
use crate::filters::FilterChain;
use crate::transfer::partition::PartitionSpec;
use crate::transfer::snapshot::SnapshotTracker;
use crate::types::ObjectEntry;

/// Outcome of [`ObjectSelector::select`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    Selected,
    Filtered,
    /// Recorded in the snapshot with the same modification time.
    AlreadyDone,
}

/// Decides which listed entries become work items.
///
/// Applied identically by the scan producer and the listing producer so
/// that monitor totals agree with what the workers receive.
#[derive(Debug, Clone, Default)]
pub struct ObjectSelector {
    chain: FilterChain,
    start_time: Option<i64>,
    end_time: Option<i64>,
    partition: Option<PartitionSpec>,
    snapshot: Option<Arc<SnapshotTracker>>,
}

impl ObjectSelector {
    pub fn new(filter_config: &FilterConfig) -> Self {
        Self {
            chain: filter_config.chain.clone(),
            start_time: filter_config.start_time,
            end_time: filter_config.end_time,
            partition: None,
            snapshot: None,
        }
    }

    pub fn with_partition(mut self, partition: Option<PartitionSpec>) -> Self {
        self.partition = partition;
        self
    }

    pub fn with_snapshot(mut self, snapshot: Option<Arc<SnapshotTracker>>) -> Self {
        self.snapshot = snapshot;
        self
    }

    pub fn select(&self, entry: &ObjectEntry) -> Selection {
        if !self.chain.matches(&entry.key) || !self.in_time_range(entry) {
            return Selection::Filtered;
        }

        if let Some(partition) = &self.partition {
            if !partition.owns(&entry.key) {
                trace!(key = %entry.key, partition = %partition, "key belongs to another partition.");
                return Selection::Filtered;
            }
        }

        if let Some(snapshot) = &self.snapshot {
            if snapshot.is_done(entry) {
                trace!(key = %entry.key, "key already transferred according to snapshot.");
                return Selection::AlreadyDone;
            }
        }

        Selection::Selected
    }

    fn in_time_range(&self, entry: &ObjectEntry) -> bool {
        let Some(modified) = entry.last_modified.map(|t| t.timestamp()) else {
            return true;
        };
        if self.start_time.is_some_and(|start| modified < start) {
            return false;
        }
        if self.end_time.is_some_and(|end| modified > end) {
            return false;
        }
        true
    }
}
