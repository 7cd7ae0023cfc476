use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use super::{ItemOutcome, ObjectOperation, TransferSettings, is_up_to_date, remote_modified};
use crate::storage::Storage;
use crate::transfer::{KeyMapper, multipart};
use crate::types::ObjectEntry;
use crate::types::error::RetryTarget;

/// Server side copy between two buckets of one service.
pub struct CopyOperation {
    source: Storage,
    target: Storage,
    key_mapper: KeyMapper,
    settings: TransferSettings,
}

impl CopyOperation {
    pub fn new(
        source: Storage,
        target: Storage,
        key_mapper: KeyMapper,
        settings: TransferSettings,
    ) -> Self {
        Self {
            source,
            target,
            key_mapper,
            settings,
        }
    }
}

#[async_trait]
impl ObjectOperation for CopyOperation {
    fn name(&self) -> &'static str {
        "cp"
    }

    fn retry_target(&self, entry: &ObjectEntry) -> RetryTarget {
        RetryTarget::object(self.source.bucket(), &entry.key)
    }

    async fn process(&self, entry: &ObjectEntry) -> Result<ItemOutcome> {
        let target_key = self.key_mapper.destination_key(&entry.key);

        if self.settings.update
            && is_up_to_date(entry, remote_modified(&self.target, &target_key).await?)
        {
            debug!(key = %entry.key, target_key = %target_key, "target is up to date. skipped.");
            return Ok(ItemOutcome::Skipped { bytes: entry.size });
        }

        if self.settings.is_multipart(entry.size) {
            multipart::copy_object(
                &self.target,
                self.source.bucket(),
                &entry.key,
                entry.size,
                &target_key,
                &self.settings.part_context(),
            )
            .await?;
        } else {
            self.target
                .copy_object(self.source.bucket(), &entry.key, &target_key)
                .await?;
            self.settings.monitor.add_transferred(entry.size);
        }

        self.settings.mark_done(entry)?;
        debug!(key = %entry.key, target_key = %target_key, size = entry.size, "object copied.");
        Ok(ItemOutcome::Done { bytes: entry.size })
    }
}
