use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::debug;

use super::{ItemOutcome, ObjectOperation, TransferSettings, is_up_to_date, remote_modified};
use crate::storage::Storage;
use crate::transfer::{KeyMapper, local_path, multipart};
use crate::types::ObjectEntry;
use crate::types::error::RetryTarget;

/// Local files to a bucket.
pub struct UploadOperation {
    target: Storage,
    local_root: PathBuf,
    key_mapper: KeyMapper,
    settings: TransferSettings,
}

impl UploadOperation {
    /// Listed file keys are relative to `local_root`.
    pub fn new(
        target: Storage,
        local_root: PathBuf,
        key_mapper: KeyMapper,
        settings: TransferSettings,
    ) -> Self {
        Self {
            target,
            local_root,
            key_mapper,
            settings,
        }
    }
}

#[async_trait]
impl ObjectOperation for UploadOperation {
    fn name(&self) -> &'static str {
        "cp"
    }

    fn retry_target(&self, entry: &ObjectEntry) -> RetryTarget {
        RetryTarget::File {
            path: local_path(&self.local_root, &entry.key),
        }
    }

    async fn process(&self, entry: &ObjectEntry) -> Result<ItemOutcome> {
        let path = local_path(&self.local_root, &entry.key);
        let target_key = self.key_mapper.destination_key(&entry.key);

        if self.settings.update
            && is_up_to_date(entry, remote_modified(&self.target, &target_key).await?)
        {
            debug!(path = %path.display(), target_key = %target_key, "target is up to date. skipped.");
            return Ok(ItemOutcome::Skipped { bytes: entry.size });
        }

        if self.settings.is_multipart(entry.size) {
            multipart::upload_file(
                &self.target,
                &path,
                &target_key,
                &self.settings.checkpoint_dir,
                &self.settings.part_context(),
            )
            .await?;
        } else {
            let body = tokio::fs::read(&path)
                .await
                .with_context(|| format!("failed to read {}", path.display()))?;
            let len = body.len() as u64;
            self.settings.part_context().throttle.consume(body.len()).await;
            self.target.put_object(&target_key, body, None).await?;
            self.settings.monitor.add_transferred(len);
        }

        self.settings.mark_done(entry)?;
        debug!(path = %path.display(), target_key = %target_key, size = entry.size, "file uploaded.");
        Ok(ItemOutcome::Done { bytes: entry.size })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransferConfig;
    use crate::lister::file_entry;
    use crate::monitor::TransferMonitor;
    use crate::operation::tests::at;
    use crate::storage::memory::MemoryStorage;
    use crate::transfer::TransferDirection;
    use crate::transfer::snapshot::{SnapshotKeyScheme, SnapshotStore, SnapshotTracker};
    use std::sync::Arc;

    fn operation(
        target: &MemoryStorage,
        root: &std::path::Path,
        config: TransferConfig,
        snapshot: Option<Arc<SnapshotTracker>>,
    ) -> UploadOperation {
        UploadOperation::new(
            Box::new(target.clone()),
            root.to_path_buf(),
            KeyMapper::new("", "backup/", true),
            TransferSettings::new(
                &config,
                snapshot,
                Arc::new(TransferMonitor::new(TransferDirection::Upload)),
            ),
        )
    }

    #[tokio::test]
    async fn small_files_are_put_in_one_request() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub").join("a.txt"), b"abc").unwrap();
        let target = MemoryStorage::new("bucket");

        let entry = file_entry(dir.path(), &dir.path().join("sub").join("a.txt")).unwrap();
        let outcome = operation(&target, dir.path(), TransferConfig::default(), None)
            .process(&entry)
            .await
            .unwrap();

        assert_eq!(outcome, ItemOutcome::Done { bytes: 3 });
        assert_eq!(target.object("backup/sub/a.txt").unwrap().body, b"abc");
    }

    #[tokio::test]
    async fn big_files_are_uploaded_in_parts() {
        let dir = tempfile::tempdir().unwrap();
        let data = vec![1u8; 250 * 1024];
        std::fs::write(dir.path().join("big.bin"), &data).unwrap();
        let target = MemoryStorage::new("bucket");
        let config = TransferConfig {
            bigfile_threshold: 100 * 1024,
            part_size: Some(100 * 1024),
            checkpoint_dir: dir.path().join("checkpoint"),
            ..TransferConfig::default()
        };

        let entry = file_entry(dir.path(), &dir.path().join("big.bin")).unwrap();
        operation(&target, dir.path(), config, None)
            .process(&entry)
            .await
            .unwrap();

        assert_eq!(target.object("backup/big.bin").unwrap().body, data);
        assert_eq!(target.call_count("upload_part"), 3);
    }

    #[tokio::test]
    async fn update_mode_skips_when_the_target_is_newer() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"local").unwrap();
        let target = MemoryStorage::new("bucket");
        target.insert_object("backup/a.txt", b"remote", chrono::Utc::now() + chrono::Duration::hours(1));
        let config = TransferConfig {
            update: true,
            ..TransferConfig::default()
        };

        let entry = file_entry(dir.path(), &dir.path().join("a.txt")).unwrap();
        let outcome = operation(&target, dir.path(), config, None)
            .process(&entry)
            .await
            .unwrap();

        assert_eq!(outcome, ItemOutcome::Skipped { bytes: 5 });
        assert_eq!(target.call_count("put_object"), 0);
    }

    #[tokio::test]
    async fn successful_uploads_are_recorded_in_the_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot_dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"a").unwrap();
        let target = MemoryStorage::new("bucket");
        let tracker = Arc::new(SnapshotTracker::new(
            SnapshotStore::open(snapshot_dir.path()).unwrap(),
            SnapshotKeyScheme::Upload {
                local_root: dir.path().to_path_buf(),
                bucket: "bucket".to_string(),
                key_mapper: KeyMapper::new("", "backup/", true),
            },
        ));

        let entry = ObjectEntry::file("a.txt", 1, Some(at(100)));
        operation(&target, dir.path(), TransferConfig::default(), Some(tracker.clone()))
            .process(&entry)
            .await
            .unwrap();

        assert!(tracker.is_done(&entry));
        assert!(!tracker.is_done(&ObjectEntry::file("a.txt", 1, Some(at(101)))));
    }
}
