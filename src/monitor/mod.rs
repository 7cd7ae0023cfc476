//! Progress monitors.
//!
//! Every monitor has a scan phase, fed by the scan producer with the totals
//! of what the batch is going to touch, and a work phase, fed by the workers
//! with per-item outcomes. Counters are atomics so that any task may update
//! them; rendering takes a single lock so that concurrent renders never
//! interleave and the first finish render wins.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::types::{EntryKind, ObjectEntry};

pub mod object;
pub mod remove;
pub mod transfer;

pub use object::ObjectMonitor;
pub use remove::{RemoveMonitor, RemoveTarget};
pub use transfer::TransferMonitor;

/// How the batch ended, as far as the caller of a finish render knows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Normal,
    Error,
}

/// Receives totals from the scan producer.
pub trait ScanMonitor: Send + Sync {
    fn update_scan(&self, entry: &ObjectEntry);
    fn set_scan_error(&self, message: &str);
    fn set_scan_end(&self);
}

/// Receives item outcomes from the workers and renders progress text.
pub trait ProgressMonitor: ScanMonitor {
    fn record_ok(&self, entry: &ObjectEntry, bytes: u64);
    fn record_skip(&self, entry: &ObjectEntry, bytes: u64);
    fn record_error(&self, entry: &ObjectEntry);

    /// Bytes moved so far by an in-flight transfer.
    fn add_transferred(&self, _bytes: u64) {}

    fn snapshot(&self) -> MonitorSnapshot;

    /// Progress text, or the final text when `finish` is set. Returns an empty
    /// string once a finish render happened, and for progress renders that
    /// the monitor chooses to rate-limit.
    fn progress_bar(&self, finish: bool, exit_status: ExitStatus) -> String;
}

/// Point-in-time copy of a monitor's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonitorSnapshot {
    pub total: u64,
    pub total_size: u64,
    pub total_uploads: u64,
    pub scan_ended: bool,
    pub scan_failed: bool,
    pub ok: u64,
    pub err: u64,
    pub skip: u64,
    pub ok_uploads: u64,
    pub err_uploads: u64,
    pub ok_bytes: u64,
    pub skip_bytes: u64,
    pub transferred_bytes: u64,
}

impl MonitorSnapshot {
    pub fn dealt(&self) -> u64 {
        self.ok + self.err + self.skip + self.ok_uploads + self.err_uploads
    }

    /// Whether `total` is the final count of items.
    pub fn total_known(&self) -> bool {
        self.scan_ended && !self.scan_failed
    }

    pub fn all_total(&self) -> u64 {
        self.total + self.total_uploads
    }

    /// Percentage of dealt items, 100 for an empty batch.
    pub fn percent(&self) -> u64 {
        match self.all_total() {
            0 => 100,
            total => (self.dealt() * 100 / total).min(100),
        }
    }

    /// What was seen so far when the total is not known yet.
    pub fn scanned(&self) -> u64 {
        self.all_total().max(self.dealt())
    }
}

/// Totals fed by the scan producer.
#[derive(Debug, Default)]
pub(crate) struct ScanState {
    count: AtomicU64,
    size: AtomicU64,
    uploads: AtomicU64,
    ended: AtomicBool,
    failed: AtomicBool,
}

impl ScanState {
    pub(crate) fn update(&self, entry: &ObjectEntry) {
        match entry.kind {
            EntryKind::Upload => {
                self.uploads.fetch_add(1, Ordering::SeqCst);
            }
            EntryKind::Object | EntryKind::File => {
                self.count.fetch_add(1, Ordering::SeqCst);
                self.size.fetch_add(entry.size, Ordering::SeqCst);
            }
        }
    }

    pub(crate) fn set_error(&self, message: &str) {
        tracing::warn!("scan failed: {message}");
        self.failed.store(true, Ordering::SeqCst);
        self.ended.store(true, Ordering::SeqCst);
    }

    pub(crate) fn set_end(&self) {
        self.ended.store(true, Ordering::SeqCst);
    }

    pub(crate) fn fill(&self, snapshot: &mut MonitorSnapshot) {
        snapshot.total = self.count.load(Ordering::SeqCst);
        snapshot.total_size = self.size.load(Ordering::SeqCst);
        snapshot.total_uploads = self.uploads.load(Ordering::SeqCst);
        snapshot.scan_ended = self.ended.load(Ordering::SeqCst);
        snapshot.scan_failed = self.failed.load(Ordering::SeqCst);
    }
}
