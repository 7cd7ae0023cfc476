//! Batch pipeline orchestrator.
//!
//! Builds everything one invocation needs from a [`Config`] and wires the
//! stages together:
//!
//! ```text
//!              ┌──> ObjectScanner ──> monitor totals
//! ListingSource┤
//!              └──> ObjectLister ──> item channel ──> BatchWorker x N
//!                        │                                   │
//!                        └── ListingSignal ──> CompletionCoordinator <── WorkerSignal
//! ```
//!
//! The coordinator runs on the task that called [`BatchPipeline::run`] and
//! returns the first error that aborted the batch, if any.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, info, warn};

use crate::config::{Config, OperationConfig};
use crate::coordinator::{CompletionCoordinator, ContinuePolicy, ListingSignal, WorkerSignal};
use crate::filters::{ObjectSelector, Selection};
use crate::lister::{ListingSource, ObjectLister, ObjectScanner, file_entry};
use crate::monitor::{
    ExitStatus, ObjectMonitor, ProgressMonitor, RemoveMonitor, RemoveTarget, TransferMonitor,
};
use crate::operation::{
    CopyOperation, DownloadOperation, ObjectOperation, RemoveOperation, SetAclOperation,
    SetMetaOperation, TransferSettings, UploadOperation,
};
use crate::reporter::{FileReporter, Reporter};
use crate::retry::{RetryPolicy, with_retry};
use crate::stage::Stage;
use crate::storage::{self, Storage};
use crate::transfer::snapshot::{SnapshotKeyScheme, SnapshotStore, SnapshotTracker};
use crate::transfer::{KeyMapper, TransferDirection};
use crate::types::error::{RetryTarget, S3bulkError};
use crate::types::token::PipelineCancellationToken;
use crate::types::{ObjectEntry, StoragePath};
use crate::worker::BatchWorker;

/// One batch invocation.
///
/// ## Usage
///
/// ```no_run
/// # async fn example() -> anyhow::Result<()> {
/// use s3bulk_rs::{BatchPipeline, Config, create_pipeline_cancellation_token};
/// use s3bulk_rs::config::OperationConfig;
/// use s3bulk_rs::types::ObjectAcl;
///
/// let mut config = Config::for_target("my-bucket", "logs/");
/// config.operation = OperationConfig::SetAcl { acl: ObjectAcl::Private };
///
/// let mut pipeline = BatchPipeline::new(config, create_pipeline_cancellation_token()).await;
/// let result = pipeline.run().await;
/// if let Some(message) = pipeline.take_finish_message() {
///     println!("{message}");
/// }
/// result
/// # }
/// ```
pub struct BatchPipeline {
    config: Config,
    source: Option<Storage>,
    target: Option<Storage>,
    cancellation_token: PipelineCancellationToken,
    monitor: Arc<dyn ProgressMonitor>,
    remove_monitor: Option<Arc<RemoveMonitor>>,
    retry_policy: RetryPolicy,
    finish_message: Option<String>,
    item_errors: u64,
    report_path: Option<PathBuf>,
    ready: bool,
}

impl BatchPipeline {
    /// Creates the S3 storages for the buckets named by `config`.
    pub async fn new(config: Config, cancellation_token: PipelineCancellationToken) -> Self {
        let source = match config.source.bucket() {
            Some(bucket) => Some(storage::create_storage(&config, bucket).await),
            None => None,
        };
        let target = match config.target.as_ref().and_then(StoragePath::bucket) {
            Some(bucket) => Some(storage::create_storage(&config, bucket).await),
            None => None,
        };

        Self::with_storages(config, source, target, cancellation_token)
    }

    /// Uses the given storages instead of creating S3 ones. `source` is the
    /// bucket of `config.source`, `target` the bucket of `config.target`.
    pub fn with_storages(
        config: Config,
        source: Option<Storage>,
        target: Option<Storage>,
        cancellation_token: PipelineCancellationToken,
    ) -> Self {
        let (monitor, remove_monitor) = build_monitor(&config);
        let retry_policy = RetryPolicy::from(&config.force_retry_config);

        Self {
            config,
            source,
            target,
            cancellation_token,
            monitor,
            remove_monitor,
            retry_policy,
            finish_message: None,
            item_errors: 0,
            report_path: None,
            ready: true,
        }
    }

    /// The monitor of this batch, for progress rendering while it runs.
    pub fn monitor(&self) -> Arc<dyn ProgressMonitor> {
        self.monitor.clone()
    }

    /// The final progress text, available once `run()` returned.
    pub fn take_finish_message(&mut self) -> Option<String> {
        self.finish_message.take()
    }

    /// Item errors seen by the coordinator.
    pub fn item_errors(&self) -> u64 {
        self.item_errors
    }

    /// The report file of a batch that continued past item errors.
    pub fn report_path(&self) -> Option<&Path> {
        self.report_path.as_deref()
    }

    /// Run the batch. `ls` writes its listing to stdout.
    pub async fn run(&mut self) -> Result<()> {
        assert!(self.ready, "BatchPipeline::run() called more than once");
        self.ready = false;

        if self.config.operation == OperationConfig::List {
            return self.write_listing(&mut std::io::stdout()).await;
        }

        let snapshot = self.snapshot_tracker()?;
        let source = self.listing_source().await?;
        let selector = ObjectSelector::new(&self.config.filter_config)
            .with_partition(self.config.transfer_config.partition)
            .with_snapshot(snapshot.clone());
        let operation = self.operation(snapshot)?;

        let reporter = if self.config.continue_on_error {
            let reporter = Arc::new(FileReporter::new(
                &self.config.output_dir,
                &self.config.command_line,
            )?);
            self.report_path = Some(reporter.path().to_path_buf());
            Some(reporter)
        } else {
            None
        };

        let result = self
            .execute(
                source,
                selector,
                operation,
                reporter.clone().map(|r| r as Arc<dyn Reporter>),
            )
            .await;

        let result = match result {
            Ok(()) => self.remove_bucket_if_requested().await,
            Err(e) => Err(e),
        };
        if self.finish_message.is_none() {
            let exit_status = if result.is_ok() {
                ExitStatus::Normal
            } else {
                ExitStatus::Error
            };
            self.finish_message = Some(self.monitor.progress_bar(true, exit_status));
        }

        if let Some(reporter) = reporter {
            if !reporter.has_errors() {
                self.report_path = None;
            }
            if let Err(e) = reporter.clear() {
                warn!("failed to close the report file: {e:#}");
            }
        }

        result
    }

    /// Lists the selected objects under the source prefix as
    /// `last-modified size key` lines followed by their count.
    pub async fn list<W: Write>(&mut self, out: &mut W) -> Result<()> {
        assert!(self.ready, "BatchPipeline::list() called more than once");
        self.ready = false;
        self.write_listing(out).await
    }

    async fn write_listing<W: Write>(&self, out: &mut W) -> Result<()> {
        let bucket = self.source_storage()?.bucket().to_string();
        let selector = ObjectSelector::new(&self.config.filter_config);
        let mut cursor = self
            .object_source()
            .await?
            .cursor(self.config.max_keys, self.retry_policy);

        writeln!(out, "{:<30}{:>12}  ObjectName", "LastModifiedTime", "Size(B)")?;
        let mut count = 0u64;
        while let Some(entries) = cursor.next_page().await? {
            if self.cancellation_token.is_cancelled() {
                return Err(anyhow!(S3bulkError::Cancelled));
            }
            for entry in entries {
                if selector.select(&entry) != Selection::Selected {
                    continue;
                }
                let last_modified = entry
                    .last_modified
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
                    .unwrap_or_default();
                writeln!(
                    out,
                    "{:<30}{:>12}  s3://{bucket}/{}",
                    last_modified, entry.size, entry.key
                )?;
                self.monitor.record_ok(&entry, entry.size);
                count += 1;
            }
        }
        writeln!(out, "Object Number is: {count}")?;

        Ok(())
    }

    async fn execute(
        &mut self,
        source: ListingSource,
        selector: ObjectSelector,
        operation: Arc<dyn ObjectOperation>,
        reporter: Option<Arc<dyn Reporter>>,
    ) -> Result<()> {
        let worker_count = self.config.worker_size.max(1);
        let (item_sender, item_receiver) =
            async_channel::bounded::<ObjectEntry>(self.config.object_listing_queue_size.max(1) as usize);
        let (worker_signal_sender, worker_signal_receiver) = async_channel::unbounded();
        let (listing_signal_sender, listing_signal_receiver) = async_channel::bounded(1);
        let policy = Arc::new(ContinuePolicy::new(self.config.continue_on_error));

        debug!(
            operation = operation.name(),
            worker_size = worker_count,
            "batch has started."
        );

        self.spawn_scanner(source.clone(), selector.clone());
        self.spawn_lister(
            Stage::new(
                self.config.clone(),
                None,
                Some(item_sender),
                self.cancellation_token.clone(),
            ),
            source,
            selector,
            listing_signal_sender,
        );

        for worker_index in 0..worker_count {
            let worker = BatchWorker::new(
                Stage::new(
                    self.config.clone(),
                    Some(item_receiver.clone()),
                    None,
                    self.cancellation_token.clone(),
                ),
                worker_index,
                operation.clone(),
                self.monitor.clone(),
                reporter.clone(),
                policy.clone(),
                self.retry_policy,
                worker_signal_sender.clone(),
            );
            spawn_worker(worker_index, worker, policy.clone(), worker_signal_sender.clone());
        }
        drop(item_receiver);
        drop(worker_signal_sender);

        let mut coordinator = CompletionCoordinator::new(
            self.monitor.clone(),
            policy,
            self.cancellation_token.clone(),
        );
        if self.removes_bucket() {
            coordinator = coordinator.defer_success_render();
        }
        let result = coordinator
            .wait(
                worker_signal_receiver,
                listing_signal_receiver,
                worker_count as usize,
            )
            .await;

        self.item_errors = coordinator.item_errors();
        self.finish_message = coordinator.take_finish_message();
        result
    }

    fn spawn_scanner(&self, source: ListingSource, selector: ObjectSelector) {
        let scanner = ObjectScanner::new(
            source,
            selector,
            self.monitor.clone(),
            self.config.max_keys,
            self.retry_policy,
            self.cancellation_token.clone(),
        );
        let monitor = self.monitor.clone();

        tokio::spawn(async move {
            if let Err(e) = tokio::spawn(scanner.scan()).await {
                error!("object scanner task panicked: {}", e);
                monitor.set_scan_error(&format!("object scanner task panicked: {e}"));
            }
        });
    }

    fn spawn_lister(
        &self,
        stage: Stage,
        source: ListingSource,
        selector: ObjectSelector,
        listing_signal: async_channel::Sender<ListingSignal>,
    ) {
        let lister = ObjectLister::new(stage, source, selector, self.monitor.clone(), self.retry_policy);
        let panic_signal = listing_signal.clone();

        tokio::spawn(async move {
            let join_result = tokio::spawn(lister.run(listing_signal)).await;

            match join_result {
                Ok(()) => {
                    debug!("object lister completed.");
                }
                Err(e) => {
                    error!("object lister task panicked: {}", e);
                    let _ = panic_signal
                        .send(ListingSignal::Failed(anyhow!(
                            "object lister task panicked: {}",
                            e
                        )))
                        .await;
                }
            }
        });
    }

    fn snapshot_tracker(&self) -> Result<Option<Arc<SnapshotTracker>>> {
        let Some(snapshot_path) = &self.config.transfer_config.snapshot_path else {
            return Ok(None);
        };
        let Some(direction) = self.config.transfer_direction() else {
            return Ok(None);
        };

        let scheme = match direction {
            TransferDirection::Upload => SnapshotKeyScheme::Upload {
                local_root: self.local_root()?,
                bucket: self.target_storage()?.bucket().to_string(),
                key_mapper: self.key_mapper(direction),
            },
            TransferDirection::Download | TransferDirection::Copy => SnapshotKeyScheme::Download {
                bucket: self.source_storage()?.bucket().to_string(),
            },
        };
        let store = SnapshotStore::open(snapshot_path)?;
        info!(
            path = %snapshot_path.display(),
            records = store.len(),
            "snapshot loaded."
        );

        Ok(Some(Arc::new(SnapshotTracker::new(store, scheme))))
    }

    async fn listing_source(&self) -> Result<ListingSource> {
        match &self.config.operation {
            OperationConfig::List | OperationConfig::SetAcl { .. } | OperationConfig::SetMeta { .. } => {
                self.object_source().await
            }
            OperationConfig::Remove { targets } => {
                let mut sources = Vec::new();
                if targets.contains(RemoveTarget::OBJECT) {
                    sources.push(self.object_source().await?);
                }
                if targets.contains(RemoveTarget::MULTIPART) {
                    sources.push(self.upload_source().await?);
                }
                Ok(ListingSource::Chain(sources))
            }
            OperationConfig::Copy => match self.direction()? {
                TransferDirection::Upload => self.file_source(),
                TransferDirection::Download | TransferDirection::Copy => self.object_source().await,
            },
        }
    }

    /// Objects under the source prefix, or the single object it names.
    async fn object_source(&self) -> Result<ListingSource> {
        let storage = self.source_storage()?;
        let prefix = self.config.source.prefix().to_string();

        if self.config.recursive {
            return Ok(ListingSource::Objects {
                storage: dyn_clone::clone_box(&**storage),
                prefix,
                only_current_dir: self.config.only_current_dir,
            });
        }

        if prefix.is_empty() {
            return Err(anyhow!(S3bulkError::InvalidConfig(
                "an object key is required without --recursive".to_string()
            )));
        }
        let head = with_retry(
            &self.retry_policy,
            RetryTarget::object(storage.bucket(), &prefix),
            || storage.head_object(&prefix),
        )
        .await?;

        Ok(ListingSource::Entries(vec![ObjectEntry::object(
            prefix,
            head.size,
            head.last_modified,
        )]))
    }

    /// Multipart uploads under the source prefix, or those of the single
    /// object it names.
    async fn upload_source(&self) -> Result<ListingSource> {
        let storage = self.source_storage()?;
        let prefix = self.config.source.prefix().to_string();
        let source = ListingSource::Uploads {
            storage: dyn_clone::clone_box(&**storage),
            prefix: prefix.clone(),
            only_current_dir: self.config.only_current_dir,
        };

        if self.config.recursive {
            return Ok(source);
        }

        let mut cursor = source.cursor(self.config.max_keys, self.retry_policy);
        let mut uploads = Vec::new();
        while let Some(entries) = cursor.next_page().await? {
            uploads.extend(entries.into_iter().filter(|entry| entry.key == prefix));
        }
        Ok(ListingSource::Entries(uploads))
    }

    fn file_source(&self) -> Result<ListingSource> {
        let StoragePath::Local(path) = &self.config.source else {
            return Err(anyhow!(S3bulkError::InvalidConfig(
                "upload source must be a local path".to_string()
            )));
        };

        if self.config.recursive && path.is_dir() {
            return Ok(ListingSource::Files {
                root: path.clone(),
                only_current_dir: self.config.only_current_dir,
            });
        }
        if path.is_dir() {
            return Err(anyhow!(S3bulkError::InvalidConfig(format!(
                "{} is a directory, use --recursive to upload it",
                path.display()
            ))));
        }

        let entry = file_entry(&self.local_root()?, path)?;
        Ok(ListingSource::Entries(vec![entry]))
    }

    /// The directory uploaded entries are relative to.
    fn local_root(&self) -> Result<PathBuf> {
        let StoragePath::Local(path) = &self.config.source else {
            return Err(anyhow!(S3bulkError::InvalidConfig(
                "upload source must be a local path".to_string()
            )));
        };

        if self.config.recursive && path.is_dir() {
            return Ok(path.clone());
        }
        Ok(path.parent().map(Path::to_path_buf).unwrap_or_default())
    }

    fn key_mapper(&self, direction: TransferDirection) -> KeyMapper {
        let dest_prefix = self.config.target.as_ref().map_or("", StoragePath::prefix);
        match direction {
            TransferDirection::Upload => {
                let recursive = self.config.recursive
                    && matches!(&self.config.source, StoragePath::Local(path) if path.is_dir());
                KeyMapper::new("", dest_prefix, recursive)
            }
            TransferDirection::Download => {
                KeyMapper::new(self.config.source.prefix(), "", self.config.recursive)
            }
            TransferDirection::Copy => KeyMapper::new(
                self.config.source.prefix(),
                dest_prefix,
                self.config.recursive,
            ),
        }
    }

    fn operation(&self, snapshot: Option<Arc<SnapshotTracker>>) -> Result<Arc<dyn ObjectOperation>> {
        let operation: Arc<dyn ObjectOperation> = match &self.config.operation {
            OperationConfig::List => {
                return Err(anyhow!(S3bulkError::Pipeline(
                    "ls has no per-item operation".to_string()
                )));
            }
            OperationConfig::SetAcl { acl } => Arc::new(SetAclOperation::new(
                dyn_clone::clone_box(&**self.source_storage()?),
                *acl,
            )),
            OperationConfig::SetMeta {
                directive,
                metadata,
            } => Arc::new(SetMetaOperation::new(
                dyn_clone::clone_box(&**self.source_storage()?),
                *directive,
                metadata.clone(),
            )),
            OperationConfig::Remove { .. } => Arc::new(RemoveOperation::new(dyn_clone::clone_box(
                &**self.source_storage()?,
            ))),
            OperationConfig::Copy => {
                let direction = self.direction()?;
                let settings = TransferSettings::new(
                    &self.config.transfer_config,
                    snapshot,
                    self.monitor.clone(),
                );
                let key_mapper = self.key_mapper(direction);

                match direction {
                    TransferDirection::Upload => Arc::new(UploadOperation::new(
                        dyn_clone::clone_box(&**self.target_storage()?),
                        self.local_root()?,
                        key_mapper,
                        settings,
                    )),
                    TransferDirection::Download => {
                        let Some(StoragePath::Local(destination)) = &self.config.target else {
                            return Err(anyhow!(S3bulkError::InvalidConfig(
                                "download target must be a local path".to_string()
                            )));
                        };
                        let into_directory = self.config.recursive
                            || destination.is_dir()
                            || destination.to_string_lossy().ends_with(std::path::MAIN_SEPARATOR)
                            || destination.to_string_lossy().ends_with('/');
                        Arc::new(
                            DownloadOperation::new(
                                dyn_clone::clone_box(&**self.source_storage()?),
                                destination.clone(),
                                into_directory,
                                key_mapper,
                                settings,
                            )
                            .with_range(self.config.transfer_config.range),
                        )
                    }
                    TransferDirection::Copy => Arc::new(CopyOperation::new(
                        dyn_clone::clone_box(&**self.source_storage()?),
                        dyn_clone::clone_box(&**self.target_storage()?),
                        key_mapper,
                        settings,
                    )),
                }
            }
        };

        Ok(operation)
    }

    fn removes_bucket(&self) -> bool {
        self.remove_monitor
            .as_ref()
            .is_some_and(|monitor| monitor.targets().contains(RemoveTarget::BUCKET))
    }

    async fn remove_bucket_if_requested(&self) -> Result<()> {
        let Some(remove_monitor) = &self.remove_monitor else {
            return Ok(());
        };
        if !self.removes_bucket() {
            return Ok(());
        }
        if self.item_errors > 0 {
            warn!(
                item_errors = self.item_errors,
                "bucket is kept because some items could not be removed."
            );
            return Ok(());
        }

        let storage = self.source_storage()?;
        with_retry(
            &self.retry_policy,
            RetryTarget::bucket(storage.bucket()),
            || storage.delete_bucket(),
        )
        .await
        .with_context(|| format!("failed to remove bucket {}", storage.bucket()))?;

        remove_monitor.set_removed_bucket(storage.bucket());
        info!(bucket = %storage.bucket(), "bucket removed.");
        Ok(())
    }

    fn direction(&self) -> Result<TransferDirection> {
        self.config.transfer_direction().ok_or_else(|| {
            anyhow!(S3bulkError::InvalidConfig(
                "cp needs a remote source or a remote target".to_string()
            ))
        })
    }

    fn source_storage(&self) -> Result<&Storage> {
        self.source
            .as_ref()
            .ok_or_else(|| anyhow!(S3bulkError::Pipeline("no storage for the source".to_string())))
    }

    fn target_storage(&self) -> Result<&Storage> {
        self.target
            .as_ref()
            .ok_or_else(|| anyhow!(S3bulkError::Pipeline("no storage for the target".to_string())))
    }
}

fn build_monitor(config: &Config) -> (Arc<dyn ProgressMonitor>, Option<Arc<RemoveMonitor>>) {
    match &config.operation {
        OperationConfig::List => (Arc::new(ObjectMonitor::new("Listed")), None),
        OperationConfig::SetAcl { .. } => (Arc::new(ObjectMonitor::new("Set acl on")), None),
        OperationConfig::SetMeta { .. } => (Arc::new(ObjectMonitor::new("Set meta on")), None),
        OperationConfig::Remove { targets } => {
            let monitor = Arc::new(RemoveMonitor::new(*targets));
            (monitor.clone(), Some(monitor))
        }
        OperationConfig::Copy => {
            let direction = config
                .transfer_direction()
                .unwrap_or(TransferDirection::Copy);
            (Arc::new(TransferMonitor::new(direction)), None)
        }
    }
}

/// Runs a worker inside its own task so that a panic becomes an item error
/// that aborts the batch instead of a missing completion signal.
fn spawn_worker(
    worker_index: u16,
    worker: BatchWorker,
    policy: Arc<ContinuePolicy>,
    signals: async_channel::Sender<WorkerSignal>,
) {
    tokio::spawn(async move {
        if let Err(e) = tokio::spawn(worker.run()).await {
            error!(worker_index, "worker task panicked: {}", e);
            policy.force_off();
            let _ = signals
                .send(WorkerSignal::ItemError(anyhow!("worker task panicked: {}", e)))
                .await;
        }
    });
}
