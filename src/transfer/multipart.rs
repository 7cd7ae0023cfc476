//! Multipart engines for transfers above the big-file threshold.
//!
//! Each engine splits the object with [`plan_transfer`], hands the pending
//! part numbers to a small pool of part tasks and records finished parts as
//! they come back. Uploads and downloads persist that progress in a
//! [`Checkpoint`] so that a failed transfer resumes where it stopped. The
//! first part error stops the remaining parts.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::monitor::ProgressMonitor;
use crate::storage::Storage;
use crate::transfer::checkpoint::{Checkpoint, CheckpointKind, PartRecord, SourceIdentity};
use crate::transfer::partition::fnv1_64;
use crate::transfer::planner::{PlanOverrides, TransferPlan, plan_transfer};
use crate::transfer::throttle::Throttle;
use crate::types::error::is_no_such_upload_error;
use crate::types::token::PipelineCancellationToken;
use crate::types::{ByteRange, CompletedPart};

pub const TEMP_FILE_SUFFIX: &str = ".s3bulk.temp";

/// Shared by every part task of one transfer.
#[derive(Clone)]
pub struct PartContext {
    pub overrides: PlanOverrides,
    pub throttle: Arc<Throttle>,
    pub monitor: Arc<dyn ProgressMonitor>,
}

#[async_trait]
trait PartJob: Send + Sync {
    async fn run_part(&self, part_number: i32) -> Result<PartRecord>;
}

/// Runs `pending` parts on `worker_count` tasks and passes every finished
/// part to `on_done` in completion order. Returns the first error after all
/// tasks stopped.
async fn run_parts<F>(
    job: Arc<dyn PartJob>,
    pending: Vec<i32>,
    worker_count: usize,
    mut on_done: F,
) -> Result<()>
where
    F: FnMut(PartRecord) -> Result<()>,
{
    if pending.is_empty() {
        return Ok(());
    }

    let (part_sender, part_receiver) = async_channel::bounded(pending.len());
    for part_number in pending {
        part_sender
            .try_send(part_number)
            .context("async_channel::Sender::try_send() failed.")?;
    }
    part_sender.close();

    let (result_sender, result_receiver) = async_channel::unbounded();
    let cancellation_token = PipelineCancellationToken::new();
    let mut join_set = JoinSet::new();

    for _ in 0..worker_count.max(1) {
        let job = job.clone();
        let part_receiver = part_receiver.clone();
        let result_sender = result_sender.clone();
        let cancellation_token = cancellation_token.clone();

        join_set.spawn(async move {
            while let Ok(part_number) = part_receiver.recv().await {
                if cancellation_token.is_cancelled() {
                    break;
                }
                let result = job.run_part(part_number).await;
                let failed = result.is_err();
                if result_sender.send(result).await.is_err() || failed {
                    break;
                }
            }
        });
    }
    drop(result_sender);

    let mut first_error = None;
    while let Ok(result) = result_receiver.recv().await {
        let result = result.and_then(&mut on_done);
        if let Err(e) = result {
            cancellation_token.cancel();
            first_error.get_or_insert(e);
        }
    }

    while let Some(joined) = join_set.join_next().await {
        if let Err(e) = joined {
            first_error.get_or_insert(anyhow!("part task panicked: {e}"));
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn pending_parts(plan: &TransferPlan, checkpoint: Option<&Checkpoint>) -> Vec<i32> {
    (1..=plan.part_count as i32)
        .filter(|part_number| !checkpoint.is_some_and(|cp| cp.is_part_done(*part_number)))
        .collect()
}

struct UploadPartJob {
    storage: Storage,
    key: String,
    upload_id: String,
    local_path: PathBuf,
    plan: TransferPlan,
    size: u64,
    context: PartContext,
}

#[async_trait]
impl PartJob for UploadPartJob {
    async fn run_part(&self, part_number: i32) -> Result<PartRecord> {
        let range = self.plan.part_range(part_number as u64, self.size);
        let len = self.plan.part_len(part_number as u64, self.size);

        let mut file = tokio::fs::File::open(&self.local_path)
            .await
            .with_context(|| format!("failed to open {}", self.local_path.display()))?;
        file.seek(std::io::SeekFrom::Start(range.start)).await?;
        let mut body = vec![0; len as usize];
        file.read_exact(&mut body)
            .await
            .with_context(|| format!("failed to read {}", self.local_path.display()))?;

        self.context.throttle.consume(body.len()).await;
        let e_tag = self
            .storage
            .upload_part(&self.key, &self.upload_id, part_number, body)
            .await?;
        self.context.monitor.add_transferred(len);

        debug!(key = %self.key, part_number = part_number, size = len, "part uploaded.");
        Ok(PartRecord {
            part_number,
            size: len,
            e_tag: Some(e_tag),
            digest: None,
        })
    }
}

/// Uploads the file at `local_path` to `key` in parts, resuming from a
/// matching checkpoint under `checkpoint_dir`. A checkpoint whose upload id
/// is gone on the server side restarts the upload once from part 1.
pub async fn upload_file(
    storage: &Storage,
    local_path: &Path,
    key: &str,
    checkpoint_dir: &Path,
    context: &PartContext,
) -> Result<()> {
    let metadata = tokio::fs::metadata(local_path)
        .await
        .with_context(|| format!("failed to read metadata of {}", local_path.display()))?;
    let identity = SourceIdentity::of_file(&metadata);
    let plan = plan_transfer(identity.size, &context.overrides);

    let checkpoint_path = Checkpoint::file_path(
        checkpoint_dir,
        CheckpointKind::Upload,
        local_path,
        storage.bucket(),
        key,
    );
    let fresh_checkpoint = || {
        Checkpoint::new(
            CheckpointKind::Upload,
            local_path,
            storage.bucket(),
            key,
            identity,
            plan.part_size,
        )
    };
    let mut checkpoint = match Checkpoint::load(&checkpoint_path)? {
        Some(checkpoint)
            if checkpoint.matches(&identity, plan.part_size) && checkpoint.upload_id.is_some() =>
        {
            info!(
                key = key,
                completed_parts = checkpoint.parts.len(),
                "resuming upload from checkpoint."
            );
            checkpoint
        }
        Some(_) => {
            warn!(
                key = key,
                path = %checkpoint_path.display(),
                "source file changed since the checkpoint was written. restarting the upload."
            );
            fresh_checkpoint()
        }
        None => fresh_checkpoint(),
    };

    let mut restarted = false;
    loop {
        let upload = UploadRun {
            storage,
            local_path,
            key,
            checkpoint_path: &checkpoint_path,
            plan,
            size: identity.size,
            context,
        };
        match upload.run(&mut checkpoint).await {
            Ok(()) => return Checkpoint::remove(&checkpoint_path),
            Err(e) if is_no_such_upload_error(&e) => {
                Checkpoint::remove(&checkpoint_path)?;
                if restarted {
                    return Err(e);
                }
                warn!(
                    key = key,
                    "multipart upload no longer exists on the server. restarting the upload."
                );
                checkpoint = fresh_checkpoint();
                restarted = true;
            }
            Err(e) => return Err(e),
        }
    }
}

/// One attempt at a multipart upload, under the upload id of the checkpoint
/// or a new one.
struct UploadRun<'a> {
    storage: &'a Storage,
    local_path: &'a Path,
    key: &'a str,
    checkpoint_path: &'a Path,
    plan: TransferPlan,
    size: u64,
    context: &'a PartContext,
}

impl UploadRun<'_> {
    async fn run(&self, checkpoint: &mut Checkpoint) -> Result<()> {
        let upload_id = match checkpoint.upload_id.clone() {
            Some(upload_id) => upload_id,
            None => {
                let upload_id = self.storage.create_multipart_upload(self.key).await?;
                checkpoint.upload_id = Some(upload_id.clone());
                checkpoint.save(self.checkpoint_path)?;
                upload_id
            }
        };

        let pending = pending_parts(&self.plan, Some(&*checkpoint));
        debug!(
            key = self.key,
            part_count = self.plan.part_count,
            pending = pending.len(),
            part_size = self.plan.part_size,
            "multipart upload started."
        );

        let job = Arc::new(UploadPartJob {
            storage: dyn_clone::clone_box(&**self.storage),
            key: self.key.to_string(),
            upload_id: upload_id.clone(),
            local_path: self.local_path.to_path_buf(),
            plan: self.plan,
            size: self.size,
            context: self.context.clone(),
        });
        run_parts(job, pending, self.plan.worker_count, |record| {
            checkpoint.record_part(record);
            checkpoint.save(self.checkpoint_path)
        })
        .await?;

        self.storage
            .complete_multipart_upload(self.key, &upload_id, &checkpoint.completed_parts())
            .await
    }
}

struct DownloadPartJob {
    storage: Storage,
    key: String,
    temp_path: PathBuf,
    plan: TransferPlan,
    size: u64,
    context: PartContext,
}

#[async_trait]
impl PartJob for DownloadPartJob {
    async fn run_part(&self, part_number: i32) -> Result<PartRecord> {
        let range = self.plan.part_range(part_number as u64, self.size);
        let body = self
            .storage
            .get_object_range(&self.key, Some(range))
            .await?;
        self.context.throttle.consume(body.len()).await;

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .open(&self.temp_path)
            .await
            .with_context(|| format!("failed to open {}", self.temp_path.display()))?;
        file.seek(std::io::SeekFrom::Start(range.start)).await?;
        file.write_all(&body)
            .await
            .with_context(|| format!("failed to write {}", self.temp_path.display()))?;
        file.flush().await?;
        self.context.monitor.add_transferred(body.len() as u64);

        debug!(key = %self.key, part_number = part_number, size = body.len(), "part downloaded.");
        Ok(PartRecord {
            part_number,
            size: body.len() as u64,
            e_tag: None,
            digest: Some(fnv1_64(&body)),
        })
    }
}

/// `<file name>.s3bulk.temp` next to `local_path`.
pub fn temp_path_of(local_path: &Path) -> PathBuf {
    let mut name = local_path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(TEMP_FILE_SUFFIX);
    local_path.with_file_name(name)
}

/// Keeps the recorded parts whose size and bytes in the temp file still
/// match what was downloaded, and returns how many were dropped.
async fn verify_downloaded_parts(
    checkpoint: &mut Checkpoint,
    plan: &TransferPlan,
    size: u64,
    temp_path: &Path,
) -> Result<usize> {
    let mut file = tokio::fs::File::open(temp_path)
        .await
        .with_context(|| format!("failed to open {}", temp_path.display()))?;

    let recorded = std::mem::take(&mut checkpoint.parts);
    let recorded_count = recorded.len();
    for part in recorded {
        if part.part_number < 1 || part.part_number as u64 > plan.part_count {
            continue;
        }
        let len = plan.part_len(part.part_number as u64, size);
        if part.size != len || part.digest.is_none() {
            continue;
        }

        let range = plan.part_range(part.part_number as u64, size);
        file.seek(std::io::SeekFrom::Start(range.start)).await?;
        let mut body = vec![0; len as usize];
        file.read_exact(&mut body)
            .await
            .with_context(|| format!("failed to read {}", temp_path.display()))?;
        if part.digest == Some(fnv1_64(&body)) {
            checkpoint.parts.push(part);
        }
    }

    Ok(recorded_count - checkpoint.parts.len())
}

/// Downloads `key` of `identity.size` bytes into `local_path` in parts. The
/// parts land in a temporary file that replaces `local_path` at the end.
pub async fn download_object(
    storage: &Storage,
    key: &str,
    identity: SourceIdentity,
    local_path: &Path,
    checkpoint_dir: &Path,
    context: &PartContext,
) -> Result<()> {
    let plan = plan_transfer(identity.size, &context.overrides);
    let temp_path = temp_path_of(local_path);
    if let Some(dir) = local_path.parent() {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("failed to create directory {}", dir.display()))?;
    }

    let checkpoint_path = Checkpoint::file_path(
        checkpoint_dir,
        CheckpointKind::Download,
        local_path,
        storage.bucket(),
        key,
    );
    let temp_len = tokio::fs::metadata(&temp_path).await.map(|m| m.len()).ok();
    let resumable = temp_len == Some(identity.size);

    let mut checkpoint = match Checkpoint::load(&checkpoint_path)? {
        Some(mut checkpoint) if checkpoint.matches(&identity, plan.part_size) && resumable => {
            let dropped =
                verify_downloaded_parts(&mut checkpoint, &plan, identity.size, &temp_path).await?;
            if dropped > 0 {
                warn!(
                    key = key,
                    dropped_parts = dropped,
                    "downloaded parts no longer match the temp file. downloading them again."
                );
            }
            info!(
                key = key,
                completed_parts = checkpoint.parts.len(),
                "resuming download from checkpoint."
            );
            checkpoint
        }
        stale => {
            if stale.is_some() {
                warn!(
                    key = key,
                    path = %checkpoint_path.display(),
                    "object changed since the checkpoint was written. restarting the download."
                );
            }
            let file = tokio::fs::File::create(&temp_path)
                .await
                .with_context(|| format!("failed to create {}", temp_path.display()))?;
            file.set_len(identity.size).await?;
            Checkpoint::new(
                CheckpointKind::Download,
                local_path,
                storage.bucket(),
                key,
                identity,
                plan.part_size,
            )
        }
    };
    checkpoint.save(&checkpoint_path)?;

    let pending = pending_parts(&plan, Some(&checkpoint));
    debug!(
        key = key,
        part_count = plan.part_count,
        pending = pending.len(),
        part_size = plan.part_size,
        "multipart download started."
    );

    let job = Arc::new(DownloadPartJob {
        storage: dyn_clone::clone_box(&**storage),
        key: key.to_string(),
        temp_path: temp_path.clone(),
        plan,
        size: identity.size,
        context: context.clone(),
    });
    run_parts(job, pending, plan.worker_count, |record| {
        checkpoint.record_part(record);
        checkpoint.save(&checkpoint_path)
    })
    .await?;

    tokio::fs::rename(&temp_path, local_path)
        .await
        .with_context(|| format!("failed to rename {} to {}", temp_path.display(), local_path.display()))?;
    Checkpoint::remove(&checkpoint_path)
}

struct CopyPartJob {
    storage: Storage,
    key: String,
    upload_id: String,
    source_bucket: String,
    source_key: String,
    plan: TransferPlan,
    size: u64,
    context: PartContext,
}

#[async_trait]
impl PartJob for CopyPartJob {
    async fn run_part(&self, part_number: i32) -> Result<PartRecord> {
        let range: ByteRange = self.plan.part_range(part_number as u64, self.size);
        let len = self.plan.part_len(part_number as u64, self.size);
        let e_tag = self
            .storage
            .upload_part_copy(
                &self.key,
                &self.upload_id,
                part_number,
                &self.source_bucket,
                &self.source_key,
                range,
            )
            .await?;
        self.context.monitor.add_transferred(len);

        Ok(PartRecord {
            part_number,
            size: len,
            e_tag: Some(e_tag),
            digest: None,
        })
    }
}

/// Server side copy of `source_bucket/source_key` (`size` bytes) to `key`
/// of `storage` in parts. A failed copy aborts its upload.
pub async fn copy_object(
    storage: &Storage,
    source_bucket: &str,
    source_key: &str,
    size: u64,
    key: &str,
    context: &PartContext,
) -> Result<()> {
    let plan = plan_transfer(size, &context.overrides);
    let upload_id = storage.create_multipart_upload(key).await?;
    debug!(
        key = key,
        source_key = source_key,
        part_count = plan.part_count,
        "multipart copy started."
    );

    let job = Arc::new(CopyPartJob {
        storage: dyn_clone::clone_box(&**storage),
        key: key.to_string(),
        upload_id: upload_id.clone(),
        source_bucket: source_bucket.to_string(),
        source_key: source_key.to_string(),
        plan,
        size,
        context: context.clone(),
    });

    let mut parts = Vec::with_capacity(plan.part_count as usize);
    let result = run_parts(job, pending_parts(&plan, None), plan.worker_count, |record| {
        if let Some(e_tag) = record.e_tag {
            parts.push(CompletedPart {
                part_number: record.part_number,
                e_tag,
            });
        }
        Ok(())
    })
    .await;

    let result = match result {
        Ok(()) => {
            parts.sort_by_key(|part| part.part_number);
            storage.complete_multipart_upload(key, &upload_id, &parts).await
        }
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        if let Err(abort_error) = storage.abort_multipart_upload(key, &upload_id).await {
            warn!(key = key, upload_id = %upload_id, "failed to abort multipart copy: {abort_error:#}");
        }
        return Err(e);
    }
    Ok(())
}
