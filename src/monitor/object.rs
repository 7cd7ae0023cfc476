use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use super::{ExitStatus, MonitorSnapshot, ProgressMonitor, ScanMonitor, ScanState};
use crate::types::ObjectEntry;

/// Monitor for batches that apply one in-place change per object, such as
/// setting an ACL or replacing metadata.
#[derive(Debug)]
pub struct ObjectMonitor {
    operation: String,
    scan: ScanState,
    ok: AtomicU64,
    err: AtomicU64,
    skip: AtomicU64,
    finished: Mutex<bool>,
}

impl ObjectMonitor {
    /// `operation` is the past-tense label shown in front of the counters,
    /// e.g. `"Set acl on"`.
    pub fn new(operation: &str) -> Self {
        Self {
            operation: operation.to_string(),
            scan: ScanState::default(),
            ok: AtomicU64::new(0),
            err: AtomicU64::new(0),
            skip: AtomicU64::new(0),
            finished: Mutex::new(false),
        }
    }

    fn progress_text(&self, snapshot: &MonitorSnapshot) -> String {
        let op = &self.operation;
        let error = if snapshot.err == 0 {
            String::new()
        } else {
            format!(", Error {} objects", snapshot.err)
        };

        if snapshot.total_known() {
            format!(
                "Total {} objects. {op} {} objects{error}, Progress: {}%",
                snapshot.total,
                snapshot.ok,
                snapshot.percent()
            )
        } else {
            format!(
                "Scanned {} objects. {op} {} objects{error}.",
                snapshot.scanned(),
                snapshot.ok
            )
        }
    }

    fn finish_text(&self, snapshot: &MonitorSnapshot, exit_status: ExitStatus) -> String {
        let op = &self.operation;
        let (label, count) = if snapshot.total_known() {
            ("Total", snapshot.total)
        } else {
            ("Scanned", snapshot.scanned())
        };

        if exit_status == ExitStatus::Error {
            return format!(
                "{label} {count} objects. {op} {} objects(skip {} objects), when error happens.",
                snapshot.ok, snapshot.skip
            );
        }

        if snapshot.err == 0 {
            format!(
                "Succeed: {label} {count} objects. {op} {} objects(skip {} objects).",
                snapshot.ok, snapshot.skip
            )
        } else {
            format!(
                "FinishWithError: {label} {count} objects. {op} {} objects(skip {} objects), Error {} objects.",
                snapshot.ok, snapshot.skip, snapshot.err
            )
        }
    }
}

impl ScanMonitor for ObjectMonitor {
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

impl ProgressMonitor for ObjectMonitor {
    fn record_ok(&self, _entry: &ObjectEntry, _bytes: u64) {
        self.ok.fetch_add(1, Ordering::SeqCst);
    }

    fn record_skip(&self, _entry: &ObjectEntry, _bytes: u64) {
        self.skip.fetch_add(1, Ordering::SeqCst);
    }

    fn record_error(&self, _entry: &ObjectEntry) {
        self.err.fetch_add(1, Ordering::SeqCst);
    }

    fn snapshot(&self) -> MonitorSnapshot {
        let mut snapshot = MonitorSnapshot {
            ok: self.ok.load(Ordering::SeqCst),
            err: self.err.load(Ordering::SeqCst),
            skip: self.skip.load(Ordering::SeqCst),
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

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(key: &str) -> ObjectEntry {
        ObjectEntry::object(key, 1, None)
    }

    fn monitor_with(total: usize, ok: usize, err: usize, scan_end: bool) -> ObjectMonitor {
        let monitor = ObjectMonitor::new("Set acl on");
        for i in 0..total {
            monitor.update_scan(&entry(&format!("k{i}")));
        }
        if scan_end {
            monitor.set_scan_end();
        }
        for _ in 0..ok {
            monitor.record_ok(&entry("k"), 0);
        }
        for _ in 0..err {
            monitor.record_error(&entry("k"));
        }
        monitor
    }

    #[test]
    fn progress_before_scan_end_reports_scanned() {
        let monitor = monitor_with(3, 5, 0, false);
        assert_eq!(
            monitor.progress_bar(false, ExitStatus::Normal),
            "Scanned 5 objects. Set acl on 5 objects."
        );

        monitor.record_error(&entry("k"));
        assert_eq!(
            monitor.progress_bar(false, ExitStatus::Normal),
            "Scanned 6 objects. Set acl on 5 objects, Error 1 objects."
        );
    }

    #[test]
    fn progress_after_scan_end_reports_percent() {
        let monitor = monitor_with(4, 1, 1, true);
        assert_eq!(
            monitor.progress_bar(false, ExitStatus::Normal),
            "Total 4 objects. Set acl on 1 objects, Error 1 objects, Progress: 50%"
        );

        let empty = monitor_with(0, 0, 0, true);
        assert_eq!(
            empty.progress_bar(false, ExitStatus::Normal),
            "Total 0 objects. Set acl on 0 objects, Progress: 100%"
        );
    }

    #[test]
    fn scan_error_keeps_scanned_wording() {
        let monitor = monitor_with(2, 2, 0, false);
        monitor.set_scan_error("NoSuchBucket");
        assert_eq!(
            monitor.progress_bar(false, ExitStatus::Normal),
            "Scanned 2 objects. Set acl on 2 objects."
        );
        assert_eq!(
            monitor.progress_bar(true, ExitStatus::Normal),
            "Succeed: Scanned 2 objects. Set acl on 2 objects(skip 0 objects)."
        );
    }

    #[test]
    fn finish_texts() {
        let succeed = monitor_with(2, 2, 0, true);
        succeed.record_skip(&entry("k"), 0);
        assert_eq!(
            succeed.progress_bar(true, ExitStatus::Normal),
            "Succeed: Total 2 objects. Set acl on 2 objects(skip 1 objects)."
        );

        let with_error = monitor_with(3, 2, 1, true);
        assert_eq!(
            with_error.progress_bar(true, ExitStatus::Normal),
            "FinishWithError: Total 3 objects. Set acl on 2 objects(skip 0 objects), Error 1 objects."
        );

        let aborted = monitor_with(10, 1, 1, true);
        assert_eq!(
            aborted.progress_bar(true, ExitStatus::Error),
            "Total 10 objects. Set acl on 1 objects(skip 0 objects), when error happens."
        );

        let aborted_while_scanning = monitor_with(10, 1, 1, false);
        assert_eq!(
            aborted_while_scanning.progress_bar(true, ExitStatus::Error),
            "Scanned 10 objects. Set acl on 1 objects(skip 0 objects), when error happens."
        );
    }

    #[test]
    fn finish_renders_once() {
        let monitor = monitor_with(1, 1, 0, true);
        assert!(!monitor.progress_bar(true, ExitStatus::Normal).is_empty());
        assert_eq!(monitor.progress_bar(true, ExitStatus::Normal), "");
        assert_eq!(monitor.progress_bar(false, ExitStatus::Normal), "");
        assert_eq!(monitor.progress_bar(true, ExitStatus::Error), "");
    }

    #[test]
    fn concurrent_updates_are_not_lost() {
        let monitor = std::sync::Arc::new(ObjectMonitor::new("Set meta on"));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let monitor = monitor.clone();
                std::thread::spawn(move || {
                    for i in 0..1000 {
                        monitor.update_scan(&entry("k"));
                        if i % 10 == 0 {
                            monitor.record_error(&entry("k"));
                        } else {
                            monitor.record_ok(&entry("k"), 0);
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        monitor.set_scan_end();

        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.total, 8000);
        assert_eq!(snapshot.ok, 7200);
        assert_eq!(snapshot.err, 800);
        assert_eq!(snapshot.percent(), 100);
    }
}
