use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use dyn_clone::DynClone;
use leaky_bucket::RateLimiter;

use crate::config::{ClientConfig, Config};
use crate::transfer::throttle::build_rate_limiter;
use crate::types::{ByteRange, CompletedPart, ListPage, ObjectAcl, ObjectHead, ObjectMetadata, UploadPage};

pub mod memory;
pub mod s3;

/// Type alias for a boxed Storage trait object.
pub type Storage = Box<dyn StorageTrait + Send + Sync>;

/// Factory trait for creating Storage instances bound to one bucket.
#[async_trait]
pub trait StorageFactory {
    async fn create(
        bucket: &str,
        client_config: ClientConfig,
        rate_limit_api: Option<Arc<RateLimiter>>,
    ) -> Storage;
}

/// Remote calls used by the batch core, bound to one bucket.
///
/// Keys are full object keys. Every error carrying a service answer has a
/// [`crate::types::error::StorageError`] in its chain so that the retry and
/// continue policies can classify it.
#[async_trait]
pub trait StorageTrait: DynClone {
    fn bucket(&self) -> &str;

    /// One page of objects under `prefix`, starting after `marker`.
    async fn list_page(
        &self,
        prefix: &str,
        marker: Option<&str>,
        delimiter: Option<&str>,
        max_keys: i32,
    ) -> Result<ListPage>;

    /// One page of in-progress multipart uploads under `prefix`.
    async fn list_multipart_uploads_page(
        &self,
        prefix: &str,
        key_marker: Option<&str>,
        upload_id_marker: Option<&str>,
        max_uploads: i32,
    ) -> Result<UploadPage>;

    async fn head_object(&self, key: &str) -> Result<ObjectHead>;

    /// Object content, or the given inclusive byte range of it.
    async fn get_object_range(&self, key: &str, range: Option<ByteRange>) -> Result<Vec<u8>>;

    async fn put_object(
        &self,
        key: &str,
        body: Vec<u8>,
        metadata: Option<&ObjectMetadata>,
    ) -> Result<()>;

    /// Server side copy of `source_bucket/source_key` onto `key`.
    async fn copy_object(&self, source_bucket: &str, source_key: &str, key: &str) -> Result<()>;

    async fn set_object_acl(&self, key: &str, acl: ObjectAcl) -> Result<()>;

    /// Copies the object onto itself with `metadata` replacing what it had.
    async fn replace_object_metadata(&self, key: &str, metadata: &ObjectMetadata) -> Result<()>;

    async fn delete_object(&self, key: &str) -> Result<()>;

    async fn delete_bucket(&self) -> Result<()>;

    /// Returns the new upload id.
    async fn create_multipart_upload(&self, key: &str) -> Result<String>;

    /// Returns the ETag of the stored part.
    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Vec<u8>,
    ) -> Result<String>;

    /// Returns the ETag of the stored part.
    async fn upload_part_copy(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        source_bucket: &str,
        source_key: &str,
        range: ByteRange,
    ) -> Result<String>;

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<()>;

    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> Result<()>;
}

dyn_clone::clone_trait_object!(StorageTrait);

/// Create the S3 storage for `bucket`.
///
/// All storages of one batch share the API rate limiter built here when
/// `rate_limit_api` is set.
pub async fn create_storage(config: &Config, bucket: &str) -> Storage {
    let rate_limit_api = config
        .rate_limit_api
        .map(|rate| Arc::new(build_rate_limiter(rate as usize)));
    let client_config = config.client_config.clone().unwrap_or_default();

    s3::S3StorageFactory::create(bucket, client_config, rate_limit_api).await
}
