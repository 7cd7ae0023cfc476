use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use super::{ItemOutcome, ObjectOperation, TransferSettings, is_up_to_date};
use crate::storage::Storage;
use crate::transfer::checkpoint::SourceIdentity;
use crate::transfer::{KeyMapper, local_path, multipart};
use crate::types::error::RetryTarget;
use crate::types::{ByteRange, ObjectEntry};

/// Objects of a bucket to local files.
pub struct DownloadOperation {
    source: Storage,
    destination: PathBuf,
    /// Whether `destination` is a directory that receives the objects
    /// under their relative keys, or the path of the single file to write.
    into_directory: bool,
    key_mapper: KeyMapper,
    range: Option<ByteRange>,
    settings: TransferSettings,
}

impl DownloadOperation {
    pub fn new(
        source: Storage,
        destination: PathBuf,
        into_directory: bool,
        key_mapper: KeyMapper,
        settings: TransferSettings,
    ) -> Self {
        Self {
            source,
            destination,
            into_directory,
            key_mapper,
            range: None,
            settings,
        }
    }

    /// Only `range` of each object is written.
    pub fn with_range(mut self, range: Option<ByteRange>) -> Self {
        self.range = range;
        self
    }

    fn local_path_of(&self, entry: &ObjectEntry) -> PathBuf {
        if self.into_directory {
            local_path(&self.destination, self.key_mapper.relative(&entry.key))
        } else {
            self.destination.clone()
        }
    }

    async fn write_file(&self, path: &Path, body: &[u8]) -> Result<()> {
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("failed to create directory {}", dir.display()))?;
        }
        tokio::fs::write(path, body)
            .await
            .with_context(|| format!("failed to write {}", path.display()))
    }
}

async fn local_modified(path: &Path) -> Option<DateTime<Utc>> {
    let metadata = tokio::fs::metadata(path).await.ok()?;
    metadata.modified().ok().map(DateTime::<Utc>::from)
}

#[async_trait]
impl ObjectOperation for DownloadOperation {
    fn name(&self) -> &'static str {
        "cp"
    }

    fn retry_target(&self, entry: &ObjectEntry) -> RetryTarget {
        RetryTarget::object(self.source.bucket(), &entry.key)
    }

    async fn process(&self, entry: &ObjectEntry) -> Result<ItemOutcome> {
        let path = self.local_path_of(entry);

        if entry.is_directory_marker() {
            tokio::fs::create_dir_all(&path)
                .await
                .with_context(|| format!("failed to create directory {}", path.display()))?;
            return Ok(ItemOutcome::Done { bytes: 0 });
        }

        if self.settings.update && is_up_to_date(entry, local_modified(&path).await) {
            debug!(key = %entry.key, path = %path.display(), "local file is up to date. skipped.");
            return Ok(ItemOutcome::Skipped { bytes: entry.size });
        }

        if let Some(range) = self.range {
            let body = self.source.get_object_range(&entry.key, Some(range)).await?;
            self.write_file(&path, &body).await?;
            self.settings.monitor.add_transferred(body.len() as u64);
            debug!(key = %entry.key, range = %range.to_header_value(), "object range downloaded.");
            return Ok(ItemOutcome::Done {
                bytes: body.len() as u64,
            });
        }

        if self.settings.is_multipart(entry.size) {
            let identity = SourceIdentity {
                size: entry.size,
                modified: entry.modified_secs(),
            };
            multipart::download_object(
                &self.source,
                &entry.key,
                identity,
                &path,
                &self.settings.checkpoint_dir,
                &self.settings.part_context(),
            )
            .await?;
        } else {
            let body = self.source.get_object_range(&entry.key, None).await?;
            self.settings.part_context().throttle.consume(body.len()).await;
            self.write_file(&path, &body).await?;
            self.settings.monitor.add_transferred(body.len() as u64);
        }

        self.settings.mark_done(entry)?;
        debug!(key = %entry.key, path = %path.display(), size = entry.size, "object downloaded.");
        Ok(ItemOutcome::Done { bytes: entry.size })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransferConfig;
    use crate::monitor::TransferMonitor;
    use crate::operation::tests::at;
    use crate::storage::memory::MemoryStorage;
    use crate::transfer::TransferDirection;
    use std::sync::Arc;

    fn settings(config: TransferConfig) -> TransferSettings {
        TransferSettings::new(
            &config,
            None,
            Arc::new(TransferMonitor::new(TransferDirection::Download)),
        )
    }

    #[tokio::test]
    async fn recursive_downloads_keep_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let source = MemoryStorage::new("bucket");
        source.insert_object("logs/2024/a.log", b"line", at(100));

        let operation = DownloadOperation::new(
            Box::new(source),
            dir.path().to_path_buf(),
            true,
            KeyMapper::new("logs/", "", true),
            settings(TransferConfig::default()),
        );
        let outcome = operation
            .process(&ObjectEntry::object("logs/2024/a.log", 4, Some(at(100))))
            .await
            .unwrap();

        assert_eq!(outcome, ItemOutcome::Done { bytes: 4 });
        assert_eq!(
            std::fs::read(dir.path().join("2024").join("a.log")).unwrap(),
            b"line"
        );
    }

    #[tokio::test]
    async fn range_downloads_write_only_the_range() {
        let dir = tempfile::tempdir().unwrap();
        let source = MemoryStorage::new("bucket");
        source.insert_object("a.txt", b"0123456789", at(100));
        let path = dir.path().join("part.txt");

        let operation = DownloadOperation::new(
            Box::new(source),
            path.clone(),
            false,
            KeyMapper::new("a.txt", "", false),
            settings(TransferConfig::default()),
        )
        .with_range(Some(ByteRange::new(2, 5)));
        let outcome = operation
            .process(&ObjectEntry::object("a.txt", 10, Some(at(100))))
            .await
            .unwrap();

        assert_eq!(outcome, ItemOutcome::Done { bytes: 4 });
        assert_eq!(std::fs::read(&path).unwrap(), b"2345");
    }

    #[tokio::test]
    async fn big_objects_are_downloaded_in_parts() {
        let dir = tempfile::tempdir().unwrap();
        let data: Vec<u8> = (0..250 * 1024).map(|i| (i % 13) as u8).collect();
        let source = MemoryStorage::new("bucket");
        source.insert_object("big.bin", &data, at(100));
        let config = TransferConfig {
            bigfile_threshold: 100 * 1024,
            part_size: Some(100 * 1024),
            checkpoint_dir: dir.path().join("checkpoint"),
            ..TransferConfig::default()
        };

        let operation = DownloadOperation::new(
            Box::new(source.clone()),
            dir.path().join("out"),
            true,
            KeyMapper::new("", "", true),
            settings(config),
        );
        operation
            .process(&ObjectEntry::object("big.bin", data.len() as u64, Some(at(100))))
            .await
            .unwrap();

        assert_eq!(std::fs::read(dir.path().join("out").join("big.bin")).unwrap(), data);
        assert_eq!(source.call_count("get_object"), 3);
    }

    #[tokio::test]
    async fn update_mode_skips_newer_local_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, b"local").unwrap();
        let source = MemoryStorage::new("bucket");
        source.insert_object("a.txt", b"remote", at(100));
        let config = TransferConfig {
            update: true,
            ..TransferConfig::default()
        };

        let operation = DownloadOperation::new(
            Box::new(source),
            path.clone(),
            false,
            KeyMapper::new("a.txt", "", false),
            settings(config),
        );
        let outcome = operation
            .process(&ObjectEntry::object("a.txt", 6, Some(at(100))))
            .await
            .unwrap();

        assert_eq!(outcome, ItemOutcome::Skipped { bytes: 6 });
        assert_eq!(std::fs::read(&path).unwrap(), b"local");
    }
}
