use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use indicatif::HumanBytes;

use super::{ExitStatus, MonitorSnapshot, ProgressMonitor, ScanMonitor, ScanState};
use crate::transfer::TransferDirection;
use crate::types::ObjectEntry;

pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug)]
struct RenderState {
    finished: bool,
    last_render: Instant,
    last_transferred: u64,
}

/// Monitor for `cp` batches. Tracks sizes as well as counts, and reports the
/// transfer speed between two progress renders. Progress renders closer
/// together than the tick interval return an empty string.
#[derive(Debug)]
pub struct TransferMonitor {
    direction: TransferDirection,
    tick_interval: Duration,
    scan: ScanState,
    ok: AtomicU64,
    err: AtomicU64,
    skip: AtomicU64,
    ok_bytes: AtomicU64,
    skip_bytes: AtomicU64,
    transferred_bytes: AtomicU64,
    render: Mutex<RenderState>,
}

impl TransferMonitor {
    pub fn new(direction: TransferDirection) -> Self {
        Self::with_tick_interval(direction, DEFAULT_TICK_INTERVAL)
    }

    pub fn with_tick_interval(direction: TransferDirection, tick_interval: Duration) -> Self {
        Self {
            direction,
            tick_interval,
            scan: ScanState::default(),
            ok: AtomicU64::new(0),
            err: AtomicU64::new(0),
            skip: AtomicU64::new(0),
            ok_bytes: AtomicU64::new(0),
            skip_bytes: AtomicU64::new(0),
            transferred_bytes: AtomicU64::new(0),
            render: Mutex::new(RenderState {
                finished: false,
                last_render: Instant::now(),
                last_transferred: 0,
            }),
        }
    }

    pub fn direction(&self) -> TransferDirection {
        self.direction
    }

    fn dealt_size(snapshot: &MonitorSnapshot) -> u64 {
        snapshot.ok_bytes + snapshot.skip_bytes
    }

    /// Percentage by size, by count when nothing has a size, 100 when empty.
    fn percent(snapshot: &MonitorSnapshot) -> u64 {
        if snapshot.total_size != 0 {
            return (Self::dealt_size(snapshot) * 100 / snapshot.total_size).min(100);
        }
        snapshot.percent()
    }

    fn count_detail(&self, snapshot: &MonitorSnapshot, with_error: bool) -> String {
        let subject = self.direction.subject();
        let mut parts = Vec::new();
        if with_error && snapshot.err != 0 {
            parts.push(format!("Error {} {subject}", snapshot.err));
        }
        if snapshot.ok != 0 {
            parts.push(format!("{} {} {subject}", self.direction.verb(), snapshot.ok));
        }
        if snapshot.skip != 0 {
            parts.push(format!("skip {} {subject}", snapshot.skip));
        }

        if parts.is_empty() {
            String::new()
        } else {
            format!("({})", parts.join(", "))
        }
    }

    fn size_detail(snapshot: &MonitorSnapshot) -> String {
        match (snapshot.ok_bytes, snapshot.skip_bytes) {
            (transferred, 0) => format!(", Transfer size: {}", HumanBytes(transferred)),
            (0, skipped) => format!(", Skip size: {}", HumanBytes(skipped)),
            (transferred, skipped) => format!(
                ", OK size: {}(transfer: {}, skip: {})",
                HumanBytes(transferred + skipped),
                HumanBytes(transferred),
                HumanBytes(skipped)
            ),
        }
    }

    fn progress_text(&self, snapshot: &MonitorSnapshot, speed: f64) -> String {
        let detail = self.count_detail(snapshot, true);
        let ok_size = HumanBytes(Self::dealt_size(snapshot));

        if snapshot.total_known() {
            format!(
                "Total num: {}, size: {}. Dealt num: {}{detail}, OK size: {ok_size}, Progress: {}%, Speed: {speed:.2}KB/s",
                snapshot.total,
                HumanBytes(snapshot.total_size),
                snapshot.dealt(),
                Self::percent(snapshot)
            )
        } else {
            format!(
                "Scanned num: {}, size: {}. Dealt num: {}{detail}, OK size: {ok_size}, Speed: {speed:.2}KB/s.",
                snapshot.scanned(),
                HumanBytes(snapshot.total_size.max(Self::dealt_size(snapshot))),
                snapshot.dealt()
            )
        }
    }

    fn finish_text(&self, snapshot: &MonitorSnapshot, exit_status: ExitStatus) -> String {
        let subject = self.direction.subject();
        let ok_num = snapshot.ok + snapshot.skip;
        let (head, total_size) = if snapshot.total_known() {
            (
                format!("Total num: {}", snapshot.total),
                snapshot.total_size,
            )
        } else {
            (
                format!("Scanned num: {}", snapshot.scanned()),
                snapshot.total_size.max(Self::dealt_size(snapshot)),
            )
        };
        let size = HumanBytes(total_size);

        if exit_status == ExitStatus::Error {
            return format!(
                "{head}, size: {size}. Dealt num: {ok_num}{}{}, when error happens.",
                self.count_detail(snapshot, false),
                Self::size_detail(snapshot)
            );
        }

        if snapshot.err == 0 {
            let skip_size = if snapshot.skip_bytes != 0 {
                format!(", Skip size: {}", HumanBytes(snapshot.skip_bytes))
            } else {
                String::new()
            };
            format!(
                "Succeed: {head}, size: {size}. OK num: {ok_num}{}{skip_size}.",
                self.count_detail(snapshot, true)
            )
        } else {
            format!(
                "FinishWithError: {head} {subject}, size: {size}. Error num: {}. OK num: {ok_num}{}{}.",
                snapshot.err,
                self.count_detail(snapshot, false),
                Self::size_detail(snapshot)
            )
        }
    }
}

impl ScanMonitor for TransferMonitor {
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

impl ProgressMonitor for TransferMonitor {
    fn record_ok(&self, _entry: &ObjectEntry, bytes: u64) {
        self.ok.fetch_add(1, Ordering::SeqCst);
        self.ok_bytes.fetch_add(bytes, Ordering::SeqCst);
    }

    fn record_skip(&self, _entry: &ObjectEntry, bytes: u64) {
        self.skip.fetch_add(1, Ordering::SeqCst);
        self.skip_bytes.fetch_add(bytes, Ordering::SeqCst);
    }

    fn record_error(&self, _entry: &ObjectEntry) {
        self.err.fetch_add(1, Ordering::SeqCst);
    }

    fn add_transferred(&self, bytes: u64) {
        self.transferred_bytes.fetch_add(bytes, Ordering::SeqCst);
    }

    fn snapshot(&self) -> MonitorSnapshot {
        let mut snapshot = MonitorSnapshot {
            ok: self.ok.load(Ordering::SeqCst),
            err: self.err.load(Ordering::SeqCst),
            skip: self.skip.load(Ordering::SeqCst),
            ok_bytes: self.ok_bytes.load(Ordering::SeqCst),
            skip_bytes: self.skip_bytes.load(Ordering::SeqCst),
            transferred_bytes: self.transferred_bytes.load(Ordering::SeqCst),
            ..MonitorSnapshot::default()
        };
        self.scan.fill(&mut snapshot);
        snapshot
    }

    fn progress_bar(&self, finish: bool, exit_status: ExitStatus) -> String {
        let mut render = self.render.lock().unwrap();
        if render.finished {
            return String::new();
        }

        let snapshot = self.snapshot();
        if finish {
            render.finished = true;
            return self.finish_text(&snapshot, exit_status);
        }

        let elapsed = render.last_render.elapsed();
        if elapsed < self.tick_interval {
            return String::new();
        }

        // Elapsed time and byte delta are taken under the same lock.
        let increment = snapshot
            .transferred_bytes
            .saturating_sub(render.last_transferred);
        let speed = match elapsed.as_secs_f64() {
            secs if secs > 0.0 => increment as f64 / 1024.0 / secs,
            _ => 0.0,
        };
        render.last_render = Instant::now();
        render.last_transferred = snapshot.transferred_bytes;

        self.progress_text(&snapshot, speed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(key: &str, size: u64) -> ObjectEntry {
        ObjectEntry::file(key, size, None)
    }

    fn monitor() -> TransferMonitor {
        TransferMonitor::with_tick_interval(TransferDirection::Upload, Duration::ZERO)
    }

    #[test]
    fn progress_is_rate_limited_by_tick() {
        let monitor = TransferMonitor::new(TransferDirection::Download);
        monitor.update_scan(&ObjectEntry::object("a", 10, None));
        assert_eq!(monitor.progress_bar(false, ExitStatus::Normal), "");

        // Finish renders ignore the tick.
        assert!(
            monitor
                .progress_bar(true, ExitStatus::Normal)
                .starts_with("Succeed:")
        );
    }

    #[test]
    fn progress_by_size_after_scan_end() {
        let monitor = monitor();
        monitor.update_scan(&file("a", 300));
        monitor.update_scan(&file("b", 100));
        monitor.set_scan_end();
        monitor.record_ok(&file("a", 300), 300);
        monitor.add_transferred(300);

        let text = monitor.progress_bar(false, ExitStatus::Normal);
        assert!(
            text.starts_with(
                "Total num: 2, size: 400 B. Dealt num: 1(upload 1 files), OK size: 300 B, Progress: 75%, Speed: "
            ),
            "{text}"
        );
        assert!(text.ends_with("KB/s"), "{text}");
    }

    #[test]
    fn progress_by_count_when_sizes_are_zero() {
        let monitor = monitor();
        for key in ["a", "b", "c", "d"] {
            monitor.update_scan(&file(key, 0));
        }
        monitor.set_scan_end();
        monitor.record_ok(&file("a", 0), 0);
        monitor.record_error(&file("b", 0));

        let text = monitor.progress_bar(false, ExitStatus::Normal);
        assert!(
            text.contains("Dealt num: 2(Error 1 files, upload 1 files), OK size: 0 B, Progress: 50%"),
            "{text}"
        );
    }

    #[test]
    fn progress_while_scanning() {
        let monitor = monitor();
        monitor.update_scan(&file("a", 10));
        monitor.record_skip(&file("a", 10), 10);
        monitor.record_ok(&file("b", 20), 20);

        let text = monitor.progress_bar(false, ExitStatus::Normal);
        assert!(
            text.starts_with(
                "Scanned num: 2, size: 30 B. Dealt num: 2(upload 1 files, skip 1 files), OK size: 30 B, Speed: "
            ),
            "{text}"
        );
    }

    #[test]
    fn finish_succeed() {
        let monitor = monitor();
        monitor.update_scan(&file("a", 10));
        monitor.update_scan(&file("b", 20));
        monitor.set_scan_end();
        monitor.record_ok(&file("a", 10), 10);
        monitor.record_skip(&file("b", 20), 20);

        assert_eq!(
            monitor.progress_bar(true, ExitStatus::Normal),
            "Succeed: Total num: 2, size: 30 B. OK num: 2(upload 1 files, skip 1 files), Skip size: 20 B."
        );
        assert_eq!(monitor.progress_bar(true, ExitStatus::Normal), "");
    }

    #[test]
    fn finish_with_error() {
        let monitor =
            TransferMonitor::with_tick_interval(TransferDirection::Download, Duration::ZERO);
        monitor.update_scan(&ObjectEntry::object("a", 10, None));
        monitor.update_scan(&ObjectEntry::object("b", 20, None));
        monitor.set_scan_end();
        monitor.record_ok(&ObjectEntry::object("a", 10, None), 10);
        monitor.record_error(&ObjectEntry::object("b", 20, None));

        assert_eq!(
            monitor.progress_bar(true, ExitStatus::Normal),
            "FinishWithError: Total num: 2 objects, size: 30 B. Error num: 1. OK num: 1(download 1 objects), Transfer size: 10 B."
        );
    }

    #[test]
    fn finish_on_abort() {
        let monitor = TransferMonitor::with_tick_interval(TransferDirection::Copy, Duration::ZERO);
        monitor.update_scan(&ObjectEntry::object("a", 10, None));
        monitor.record_ok(&ObjectEntry::object("a", 10, None), 10);
        monitor.record_skip(&ObjectEntry::object("b", 5, None), 5);

        assert_eq!(
            monitor.progress_bar(true, ExitStatus::Error),
            "Scanned num: 2, size: 15 B. Dealt num: 2(copy 1 objects, skip 1 objects), OK size: 15 B(transfer: 10 B, skip: 5 B), when error happens."
        );
    }
}
