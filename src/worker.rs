//! Worker pool consumer.
//!
//! Every worker reads entries from the shared item channel until it is
//! closed or the batch is cancelled, runs the batch's operation on each one
//! through the retry wrapper and reports the outcome.

use std::sync::Arc;

use async_channel::Sender;
use tracing::{debug, error, info, warn};

use crate::coordinator::{ContinuePolicy, WorkerSignal};
use crate::monitor::ProgressMonitor;
use crate::operation::{ItemOutcome, ObjectOperation};
use crate::reporter::Reporter;
use crate::retry::{RetryPolicy, with_retry};
use crate::stage::Stage;
use crate::types::ObjectEntry;
use crate::types::error::is_fatal_error;

pub struct BatchWorker {
    worker_index: u16,
    base: Stage,
    operation: Arc<dyn ObjectOperation>,
    monitor: Arc<dyn ProgressMonitor>,
    reporter: Option<Arc<dyn Reporter>>,
    policy: Arc<ContinuePolicy>,
    retry_policy: RetryPolicy,
    signals: Sender<WorkerSignal>,
}

impl BatchWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        base: Stage,
        worker_index: u16,
        operation: Arc<dyn ObjectOperation>,
        monitor: Arc<dyn ProgressMonitor>,
        reporter: Option<Arc<dyn Reporter>>,
        policy: Arc<ContinuePolicy>,
        retry_policy: RetryPolicy,
        signals: Sender<WorkerSignal>,
    ) -> Self {
        Self {
            worker_index,
            base,
            operation,
            monitor,
            reporter,
            policy,
            retry_policy,
            signals,
        }
    }

    /// Processes entries until the item channel is drained, then sends
    /// `WorkerDone`. Returns without it when the batch was cancelled or this
    /// worker stopped on an error.
    pub async fn run(self) {
        debug!(worker_index = self.worker_index, "worker started.");
        let receiver = self.base.receiver.as_ref().unwrap();

        loop {
            tokio::select! {
                recv_result = receiver.recv() => {
                    match recv_result {
                        Ok(entry) => {
                            if !self.process_entry(entry).await {
                                info!(worker_index = self.worker_index, "worker stopped on error.");
                                return;
                            }
                        }
                        Err(_) => {
                            debug!(worker_index = self.worker_index, "worker has been completed.");
                            let _ = self.signals.send(WorkerSignal::WorkerDone).await;
                            return;
                        }
                    }
                },
                _ = self.base.cancellation_token.cancelled() => {
                    info!(worker_index = self.worker_index, "worker has been cancelled.");
                    return;
                }
            }
        }
    }

    /// Returns whether the worker should go on.
    async fn process_entry(&self, entry: ObjectEntry) -> bool {
        let operation = &self.operation;
        let entry_ref = &entry;
        let result = with_retry(
            &self.retry_policy,
            operation.retry_target(entry_ref),
            move || operation.process(entry_ref),
        )
        .await;

        match result {
            Ok(ItemOutcome::Done { bytes }) => {
                self.monitor.record_ok(&entry, bytes);
                true
            }
            Ok(ItemOutcome::Skipped { bytes }) => {
                self.monitor.record_skip(&entry, bytes);
                true
            }
            Err(e) => {
                self.monitor.record_error(&entry);
                let fatal = is_fatal_error(&e);
                if fatal {
                    error!(
                        worker_index = self.worker_index,
                        key = %entry.key,
                        "{} failed with a fatal error: {e:#}",
                        self.operation.name()
                    );
                    self.policy.force_off();
                } else {
                    warn!(
                        worker_index = self.worker_index,
                        key = %entry.key,
                        "{} failed: {e:#}",
                        self.operation.name()
                    );
                    if let Some(reporter) = &self.reporter {
                        reporter.report_error(&format!("{e:#}"));
                        if let Some(prompt) = reporter.prompt(&e) {
                            warn!("{prompt}");
                        }
                    }
                }

                let _ = self.signals.send(WorkerSignal::ItemError(e)).await;
                !fatal && self.policy.is_on()
            }
        }
    }
}
