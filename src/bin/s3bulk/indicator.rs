// Live progress line of a running batch.
//
// Polls the batch monitor and redraws one indicatif line until the batch
// finishes, then logs a summary with the final counters.

use std::sync::Arc;
use std::time::Duration;

use indicatif::{HumanBytes, ProgressBar, ProgressStyle};
use s3bulk_rs::{ExitStatus, MonitorSnapshot, PipelineCancellationToken, ProgressMonitor};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::info;

/// How often (in seconds) to refresh the progress display.
const REFRESH_INTERVAL: f32 = 1.0;

/// Spawns the indicator. It runs until `finished` is cancelled and returns
/// the last snapshot of the monitor.
pub fn show_indicator(
    monitor: Arc<dyn ProgressMonitor>,
    show_progress: bool,
    finished: PipelineCancellationToken,
) -> JoinHandle<MonitorSnapshot> {
    let progress_text = ProgressBar::new(0);
    if let Ok(progress_style) = ProgressStyle::with_template("{wide_msg}") {
        progress_text.set_style(progress_style);
    }
    if !show_progress {
        progress_text.set_draw_target(indicatif::ProgressDrawTarget::hidden());
    }

    tokio::spawn(async move {
        let start_time = Instant::now();
        let refresh = Duration::from_secs_f32(REFRESH_INTERVAL);

        loop {
            tokio::select! {
                _ = finished.cancelled() => break,
                _ = tokio::time::sleep(refresh) => {
                    let text = monitor.progress_bar(false, ExitStatus::Normal);
                    if !text.is_empty() {
                        progress_text.set_message(text);
                    }
                }
            }
        }
        progress_text.finish_and_clear();

        let snapshot = monitor.snapshot();
        info!(
            message = "batch summary",
            ok = snapshot.ok,
            skip = snapshot.skip,
            error = snapshot.err,
            ok_uploads = snapshot.ok_uploads,
            transferred = %HumanBytes(snapshot.transferred_bytes),
            duration_sec = start_time.elapsed().as_secs_f64(),
        );

        snapshot
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use s3bulk_rs::create_pipeline_cancellation_token;
    use s3bulk_rs::monitor::{ObjectMonitor, ScanMonitor};
    use s3bulk_rs::types::ObjectEntry;

    #[tokio::test]
    async fn indicator_stops_when_finished() {
        let monitor = Arc::new(ObjectMonitor::new("Set acl on"));
        let finished = create_pipeline_cancellation_token();
        finished.cancel();

        let handle = show_indicator(monitor, false, finished);
        let snapshot = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("indicator should complete within timeout")
            .expect("indicator task should not panic");

        assert_eq!(snapshot.ok, 0);
    }

    #[tokio::test]
    async fn indicator_returns_the_last_counters() {
        let monitor = Arc::new(ObjectMonitor::new("Set acl on"));
        let entry = ObjectEntry::object("a", 3, None);
        monitor.update_scan(&entry);
        monitor.set_scan_end();
        monitor.record_ok(&entry, 3);

        let finished = create_pipeline_cancellation_token();
        let handle = show_indicator(monitor.clone(), false, finished.clone());
        tokio::time::sleep(Duration::from_millis(1100)).await;
        monitor.record_error(&ObjectEntry::object("b", 1, None));
        finished.cancel();

        let snapshot = handle.await.unwrap();
        assert_eq!((snapshot.ok, snapshot.err), (1, 1));
    }
}
