//! Completion coordination of a batch.
//!
//! The invoking task waits here for the listing producer and every worker
//! to report, and decides whether an item error aborts the batch.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Result, anyhow};
use async_channel::Receiver;
use tracing::{debug, error, warn};

use crate::monitor::{ExitStatus, ProgressMonitor};
use crate::types::error::is_fatal_error;
use crate::types::token::PipelineCancellationToken;

/// Sent by workers on the completion channel.
#[derive(Debug)]
pub enum WorkerSignal {
    ItemError(anyhow::Error),
    /// The worker drained its channel. Sent once per worker.
    WorkerDone,
}

/// Sent by the listing producer on its single-slot channel.
#[derive(Debug)]
pub enum ListingSignal {
    Done,
    Failed(anyhow::Error),
}

/// Whether item errors let the batch go on. Starts from `continue_on_error`
/// and can only be switched off.
#[derive(Debug)]
pub struct ContinuePolicy {
    on: AtomicBool,
}

impl ContinuePolicy {
    pub fn new(continue_on_error: bool) -> Self {
        Self {
            on: AtomicBool::new(continue_on_error),
        }
    }

    pub fn is_on(&self) -> bool {
        self.on.load(Ordering::SeqCst)
    }

    pub fn force_off(&self) {
        self.on.store(false, Ordering::SeqCst);
    }
}

pub struct CompletionCoordinator {
    monitor: Arc<dyn ProgressMonitor>,
    policy: Arc<ContinuePolicy>,
    cancellation_token: PipelineCancellationToken,
    item_errors: u64,
    render_on_success: bool,
    finish_message: Option<String>,
}

impl CompletionCoordinator {
    pub fn new(
        monitor: Arc<dyn ProgressMonitor>,
        policy: Arc<ContinuePolicy>,
        cancellation_token: PipelineCancellationToken,
    ) -> Self {
        Self {
            monitor,
            policy,
            cancellation_token,
            item_errors: 0,
            render_on_success: true,
            finish_message: None,
        }
    }

    /// Leaves the final render of a successful batch to the caller, for
    /// batches with work left after the items, such as removing the bucket.
    pub fn defer_success_render(mut self) -> Self {
        self.render_on_success = false;
        self
    }

    /// Waits for `worker_count + 1` completion signals (the listing `Done`
    /// and one `WorkerDone` per worker) or the first error that aborts the
    /// batch. On abort the cancellation token is cancelled and the error is
    /// returned.
    pub async fn wait(
        &mut self,
        worker_signals: Receiver<WorkerSignal>,
        listing_signal: Receiver<ListingSignal>,
        worker_count: usize,
    ) -> Result<()> {
        let expected = worker_count + 1;
        let mut done = 0;
        let mut listing_done = false;
        let mut workers_closed = false;

        while done < expected {
            if listing_done && workers_closed {
                return Err(self.abort(anyhow!("worker tasks terminated without a completion signal.")));
            }

            tokio::select! {
                biased;

                signal = listing_signal.recv(), if !listing_done => {
                    match signal {
                        Ok(ListingSignal::Done) => {
                            debug!("listing completed.");
                            listing_done = true;
                            done += 1;
                        }
                        Ok(ListingSignal::Failed(e)) => {
                            error!("listing failed: {e:#}");
                            return Err(self.abort(e));
                        }
                        Err(_) => {
                            return Err(self.abort(anyhow!("listing task terminated without a completion signal.")));
                        }
                    }
                }
                signal = worker_signals.recv(), if !workers_closed => {
                    match signal {
                        Ok(WorkerSignal::WorkerDone) => {
                            done += 1;
                        }
                        Ok(WorkerSignal::ItemError(e)) => {
                            self.item_errors += 1;
                            if is_fatal_error(&e) {
                                self.policy.force_off();
                            }
                            if !self.policy.is_on() {
                                return Err(self.abort(e));
                            }
                            debug!(item_errors = self.item_errors, "item error recorded. continuing.");
                        }
                        // The listing signal may still be on its way.
                        Err(_) => workers_closed = true,
                    }
                }
            }
        }

        if self.render_on_success {
            self.finish_message = Some(self.monitor.progress_bar(true, ExitStatus::Normal));
        }
        debug!(item_errors = self.item_errors, "batch completed.");
        Ok(())
    }

    fn abort(&mut self, e: anyhow::Error) -> anyhow::Error {
        warn!("batch aborted.");
        self.cancellation_token.cancel();
        self.finish_message = Some(self.monitor.progress_bar(true, ExitStatus::Error));
        e
    }

    /// Item errors seen so far, including the one that aborted the batch.
    pub fn item_errors(&self) -> u64 {
        self.item_errors
    }

    /// The final progress text rendered when the wait ended.
    pub fn take_finish_message(&mut self) -> Option<String> {
        self.finish_message.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::{ObjectMonitor, ScanMonitor};
    use crate::test_utils::init_dummy_tracing_subscriber;
    use crate::types::ObjectEntry;
    use crate::types::error::StorageError;
    use crate::types::token::create_pipeline_cancellation_token;

    fn coordinator(continue_on_error: bool) -> (CompletionCoordinator, Arc<ObjectMonitor>) {
        let monitor = Arc::new(ObjectMonitor::new("Set acl on"));
        let coordinator = CompletionCoordinator::new(
            monitor.clone(),
            Arc::new(ContinuePolicy::new(continue_on_error)),
            create_pipeline_cancellation_token(),
        );
        (coordinator, monitor)
    }

    fn item_error(code: &str, status: u16) -> anyhow::Error {
        anyhow!(StorageError::new(code, "message", Some(status)))
    }

    #[tokio::test]
    async fn waits_for_listing_and_every_worker() {
        init_dummy_tracing_subscriber();

        let (mut coordinator, monitor) = coordinator(false);
        monitor.set_scan_end();
        let (worker_sender, worker_receiver) = async_channel::unbounded();
        let (listing_sender, listing_receiver) = async_channel::bounded(1);

        listing_sender.send(ListingSignal::Done).await.unwrap();
        for _ in 0..3 {
            worker_sender.send(WorkerSignal::WorkerDone).await.unwrap();
        }

        coordinator
            .wait(worker_receiver, listing_receiver, 3)
            .await
            .unwrap();
        assert!(
            coordinator
                .take_finish_message()
                .unwrap()
                .starts_with("Succeed:")
        );
    }

    #[tokio::test]
    async fn deferred_render_leaves_success_to_the_caller() {
        init_dummy_tracing_subscriber();

        let (coordinator, monitor) = coordinator(false);
        let mut coordinator = coordinator.defer_success_render();
        monitor.set_scan_end();
        let (worker_sender, worker_receiver) = async_channel::unbounded();
        let (listing_sender, listing_receiver) = async_channel::bounded(1);
        listing_sender.send(ListingSignal::Done).await.unwrap();
        worker_sender.send(WorkerSignal::WorkerDone).await.unwrap();

        coordinator
            .wait(worker_receiver, listing_receiver, 1)
            .await
            .unwrap();
        assert!(coordinator.take_finish_message().is_none());
        assert!(
            monitor
                .progress_bar(true, ExitStatus::Normal)
                .starts_with("Succeed:")
        );
    }

    #[tokio::test]
    async fn continuable_errors_do_not_abort() {
        init_dummy_tracing_subscriber();

        let (mut coordinator, monitor) = coordinator(true);
        monitor.set_scan_end();
        monitor.record_error(&ObjectEntry::object("k", 0, None));
        let (worker_sender, worker_receiver) = async_channel::unbounded();
        let (listing_sender, listing_receiver) = async_channel::bounded(1);

        worker_sender
            .send(WorkerSignal::ItemError(item_error("InternalError", 500)))
            .await
            .unwrap();
        worker_sender.send(WorkerSignal::WorkerDone).await.unwrap();
        listing_sender.send(ListingSignal::Done).await.unwrap();

        coordinator
            .wait(worker_receiver, listing_receiver, 1)
            .await
            .unwrap();
        assert_eq!(coordinator.item_errors(), 1);
        assert!(
            coordinator
                .take_finish_message()
                .unwrap()
                .starts_with("FinishWithError:")
        );
    }

    #[tokio::test]
    async fn first_error_aborts_without_continue_policy() {
        init_dummy_tracing_subscriber();

        let monitor = Arc::new(ObjectMonitor::new("Set acl on"));
        let token = create_pipeline_cancellation_token();
        let mut coordinator = CompletionCoordinator::new(
            monitor,
            Arc::new(ContinuePolicy::new(false)),
            token.clone(),
        );
        let (worker_sender, worker_receiver) = async_channel::unbounded();
        let (_listing_sender, listing_receiver) = async_channel::bounded(1);

        worker_sender
            .send(WorkerSignal::ItemError(item_error("InternalError", 500)))
            .await
            .unwrap();

        let result = coordinator.wait(worker_receiver, listing_receiver, 4).await;
        assert!(result.is_err());
        assert!(token.is_cancelled());
        assert!(
            coordinator
                .take_finish_message()
                .unwrap()
                .ends_with("when error happens.")
        );
    }

    #[tokio::test]
    async fn fatal_errors_force_the_policy_off() {
        init_dummy_tracing_subscriber();

        let policy = Arc::new(ContinuePolicy::new(true));
        let mut coordinator = CompletionCoordinator::new(
            Arc::new(ObjectMonitor::new("Set acl on")),
            policy.clone(),
            create_pipeline_cancellation_token(),
        );
        let (worker_sender, worker_receiver) = async_channel::unbounded();
        let (_listing_sender, listing_receiver) = async_channel::bounded(1);

        worker_sender
            .send(WorkerSignal::ItemError(item_error("AccessDenied", 403)))
            .await
            .unwrap();

        let result = coordinator.wait(worker_receiver, listing_receiver, 1).await;
        assert!(is_fatal_error(&result.unwrap_err()));
        assert!(!policy.is_on());
    }

    #[tokio::test]
    async fn listing_failure_is_fatal_even_when_continuing() {
        init_dummy_tracing_subscriber();

        let (mut coordinator, _monitor) = coordinator(true);
        let (_worker_sender, worker_receiver) = async_channel::unbounded::<WorkerSignal>();
        let (listing_sender, listing_receiver) = async_channel::bounded(1);

        listing_sender
            .send(ListingSignal::Failed(anyhow!("listing broke")))
            .await
            .unwrap();

        let result = coordinator.wait(worker_receiver, listing_receiver, 2).await;
        assert_eq!(result.unwrap_err().to_string(), "listing broke");
    }

    #[tokio::test]
    async fn listing_outcome_after_workers_finished_is_awaited() {
        init_dummy_tracing_subscriber();

        let (mut coordinator, monitor) = coordinator(false);
        monitor.set_scan_end();
        let (worker_sender, worker_receiver) = async_channel::unbounded();
        let (listing_sender, listing_receiver) = async_channel::bounded(1);
        worker_sender.send(WorkerSignal::WorkerDone).await.unwrap();
        drop(worker_sender);

        let late_listing = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            listing_sender.send(ListingSignal::Done).await.unwrap();
        });

        coordinator
            .wait(worker_receiver, listing_receiver, 1)
            .await
            .unwrap();
        late_listing.await.unwrap();
    }

    #[tokio::test]
    async fn late_listing_failure_is_not_lost() {
        init_dummy_tracing_subscriber();

        let (mut coordinator, _monitor) = coordinator(true);
        let (worker_sender, worker_receiver) = async_channel::unbounded();
        let (listing_sender, listing_receiver) = async_channel::bounded(1);
        worker_sender.send(WorkerSignal::WorkerDone).await.unwrap();
        drop(worker_sender);
        listing_sender
            .send(ListingSignal::Failed(anyhow!("listing broke")))
            .await
            .unwrap();

        let result = coordinator.wait(worker_receiver, listing_receiver, 1).await;
        assert_eq!(result.unwrap_err().to_string(), "listing broke");
    }

    #[tokio::test]
    async fn vanished_workers_are_an_error() {
        init_dummy_tracing_subscriber();

        let (mut coordinator, _monitor) = coordinator(true);
        let (worker_sender, worker_receiver) = async_channel::unbounded::<WorkerSignal>();
        let (listing_sender, listing_receiver) = async_channel::bounded(1);
        listing_sender.send(ListingSignal::Done).await.unwrap();
        drop(worker_sender);

        assert!(
            coordinator
                .wait(worker_receiver, listing_receiver, 1)
                .await
                .is_err()
        );
    }
}
