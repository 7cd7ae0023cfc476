use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use bitflags::bitflags;

use super::{ExitStatus, MonitorSnapshot, ProgressMonitor, ScanMonitor, ScanState};
use crate::types::{EntryKind, ObjectEntry};

bitflags! {
    /// What a remove batch deletes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RemoveTarget: u8 {
        const OBJECT = 0b0001;
        const MULTIPART = 0b0010;
        const BUCKET = 0b0100;
        const ALL_TYPE = Self::OBJECT.bits() | Self::MULTIPART.bits();
    }
}

impl Default for RemoveTarget {
    fn default() -> Self {
        RemoveTarget::OBJECT
    }
}

/// Monitor for remove batches. Objects and multipart uploads are counted
/// separately, and the removal of the bucket itself is reported last.
#[derive(Debug)]
pub struct RemoveMonitor {
    targets: RemoveTarget,
    scan: ScanState,
    ok_objects: AtomicU64,
    err_objects: AtomicU64,
    ok_uploads: AtomicU64,
    err_uploads: AtomicU64,
    removed_bucket: Mutex<Option<String>>,
    finished: Mutex<bool>,
}

impl RemoveMonitor {
    pub fn new(targets: RemoveTarget) -> Self {
        Self {
            targets,
            scan: ScanState::default(),
            ok_objects: AtomicU64::new(0),
            err_objects: AtomicU64::new(0),
            ok_uploads: AtomicU64::new(0),
            err_uploads: AtomicU64::new(0),
            removed_bucket: Mutex::new(None),
            finished: Mutex::new(false),
        }
    }

    pub fn targets(&self) -> RemoveTarget {
        self.targets
    }

    pub fn set_removed_bucket(&self, bucket: &str) {
        *self.removed_bucket.lock().unwrap() = Some(bucket.to_string());
    }

    pub fn removed_bucket(&self) -> Option<String> {
        self.removed_bucket.lock().unwrap().clone()
    }

    fn counts(&self, objects: u64, uploads: u64) -> String {
        let mut parts = Vec::new();
        if self.targets.contains(RemoveTarget::OBJECT) {
            parts.push(format!("{objects} objects"));
        }
        if self.targets.contains(RemoveTarget::MULTIPART) {
            parts.push(format!("{uploads} uploadIds"));
        }
        parts.join(", ")
    }

    fn total_info(&self, snapshot: &MonitorSnapshot) -> (&'static str, String) {
        if snapshot.total_known() {
            return (
                "Total",
                self.counts(snapshot.total, snapshot.total_uploads),
            );
        }

        let objects = snapshot.total.max(snapshot.ok + snapshot.err);
        let uploads = snapshot
            .total_uploads
            .max(snapshot.ok_uploads + snapshot.err_uploads);
        ("Scanned", self.counts(objects, uploads))
    }

    fn ok_info(&self, snapshot: &MonitorSnapshot) -> String {
        format!(
            "Removed {}.",
            self.counts(snapshot.ok, snapshot.ok_uploads)
        )
    }

    fn error_info(snapshot: &MonitorSnapshot) -> String {
        let mut parts = Vec::new();
        if snapshot.err != 0 {
            parts.push(format!("{} objects", snapshot.err));
        }
        if snapshot.err_uploads != 0 {
            parts.push(format!("{} uploadIds", snapshot.err_uploads));
        }
        if parts.is_empty() {
            String::new()
        } else {
            format!(" Error {}.", parts.join(", "))
        }
    }

    fn progress_text(&self, snapshot: &MonitorSnapshot) -> String {
        if !self.targets.intersects(RemoveTarget::ALL_TYPE) {
            return String::new();
        }

        let (label, total) = self.total_info(snapshot);
        let ok = self.ok_info(snapshot);
        let error = Self::error_info(snapshot);
        if snapshot.total_known() {
            format!(
                "{label} {total}. {ok}{error} Progress: {}%",
                snapshot.percent()
            )
        } else {
            format!("{label} {total}. {ok}{error}")
        }
    }

    fn finish_text(&self, snapshot: &MonitorSnapshot, exit_status: ExitStatus) -> String {
        let removed_bucket = self.removed_bucket();
        let mut lines = Vec::new();

        if self.targets.intersects(RemoveTarget::ALL_TYPE) {
            let (label, total) = self.total_info(snapshot);
            let ok = self.ok_info(snapshot);
            let bucket_missing =
                self.targets.contains(RemoveTarget::BUCKET) && removed_bucket.is_none();

            lines.push(if exit_status == ExitStatus::Error || bucket_missing {
                format!("{label} {total}. {ok} when error happens.")
            } else if snapshot.err + snapshot.err_uploads != 0 {
                format!(
                    "FinishWithError: {label} {total}. {ok}{}",
                    Self::error_info(snapshot)
                )
            } else {
                format!("Succeed: {label} {total}. {ok}")
            });
        }

        if let Some(bucket) = removed_bucket {
            lines.push(format!("Removed Bucket: {bucket}"));
        }

        lines.join("\n")
    }
}

impl ScanMonitor for RemoveMonitor {
    fn update_scan(&self, entry: &ObjectEntry) {
        self.scan.update(entry);
    }

    fn set_scan_error(&self, message: &str) {
        self.scan.set_error(message);
    }

    fn set_scan_end(&self) {
        self.scan.set_end();
    }
}

impl ProgressMonitor for RemoveMonitor {
    fn record_ok(&self, entry: &ObjectEntry, _bytes: u64) {
        match entry.kind {
            EntryKind::Upload => self.ok_uploads.fetch_add(1, Ordering::SeqCst),
            EntryKind::Object | EntryKind::File => self.ok_objects.fetch_add(1, Ordering::SeqCst),
        };
    }

    // Nothing is skipped when removing.
    fn record_skip(&self, _entry: &ObjectEntry, _bytes: u64) {}

    fn record_error(&self, entry: &ObjectEntry) {
        match entry.kind {
            EntryKind::Upload => self.err_uploads.fetch_add(1, Ordering::SeqCst),
            EntryKind::Object | EntryKind::File => self.err_objects.fetch_add(1, Ordering::SeqCst),
        };
    }

    fn snapshot(&self) -> MonitorSnapshot {
        let mut snapshot = MonitorSnapshot {
            ok: self.ok_objects.load(Ordering::SeqCst),
            err: self.err_objects.load(Ordering::SeqCst),
            ok_uploads: self.ok_uploads.load(Ordering::SeqCst),
            err_uploads: self.err_uploads.load(Ordering::SeqCst),
            ..MonitorSnapshot::default()
        };
        self.scan.fill(&mut snapshot);
        snapshot
    }

    fn progress_bar(&self, finish: bool, exit_status: ExitStatus) -> String {
        let mut finished = self.finished.lock().unwrap();
        if *finished {
            return String::new();
        }

        let snapshot = self.snapshot();
        if !finish {
            return self.progress_text(&snapshot);
        }

        *finished = true;
        self.finish_text(&snapshot, exit_status)
    }
}
