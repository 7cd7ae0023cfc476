use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use super::{ItemOutcome, ObjectOperation};
use crate::config::MetadataDirective;
use crate::storage::Storage;
use crate::types::error::RetryTarget;
use crate::types::{ObjectEntry, ObjectMetadata};

/// Rewrites the headers of every object in place.
pub struct SetMetaOperation {
    storage: Storage,
    directive: MetadataDirective,
    metadata: ObjectMetadata,
}

impl SetMetaOperation {
    pub fn new(storage: Storage, directive: MetadataDirective, metadata: ObjectMetadata) -> Self {
        Self {
            storage,
            directive,
            metadata,
        }
    }

    async fn target_metadata(&self, key: &str) -> Result<ObjectMetadata> {
        if self.directive == MetadataDirective::Replace {
            return Ok(self.metadata.clone());
        }

        let current = self.storage.head_object(key).await?.metadata;
        Ok(match self.directive {
            MetadataDirective::Update => current.merge(&self.metadata),
            MetadataDirective::Delete => current.without(&self.metadata),
            MetadataDirective::Replace => self.metadata.clone(),
        })
    }
}

#[async_trait]
impl ObjectOperation for SetMetaOperation {
    fn name(&self) -> &'static str {
        "set-meta"
    }

    fn retry_target(&self, entry: &ObjectEntry) -> RetryTarget {
        RetryTarget::object(self.storage.bucket(), &entry.key)
    }

    async fn process(&self, entry: &ObjectEntry) -> Result<ItemOutcome> {
        let metadata = self.target_metadata(&entry.key).await?;
        self.storage
            .replace_object_metadata(&entry.key, &metadata)
            .await?;

        debug!(key = %entry.key, directive = ?self.directive, "metadata replaced.");
        Ok(ItemOutcome::Done { bytes: 0 })
    }
}
