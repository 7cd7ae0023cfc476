pub mod client_builder;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{
    CompletedMultipartUpload, CompletedPart as S3CompletedPart, MetadataDirective,
    ObjectCannedAcl, RequestPayer,
};
use aws_smithy_types::error::display::DisplayErrorContext;
use aws_smithy_types::error::metadata::ProvideErrorMetadata;
use aws_smithy_types_convert::date_time::DateTimeExt;
use chrono::{DateTime, Utc};
use leaky_bucket::RateLimiter;

use crate::config::ClientConfig;
use crate::storage::{Storage, StorageFactory, StorageTrait};
use crate::types::error::StorageError;
use crate::types::{
    ByteRange, CompletedPart, ListPage, ObjectAcl, ObjectEntry, ObjectHead, ObjectMetadata,
    USER_METADATA_PREFIX, UploadPage,
};

/// Extracts the S3 error code and message from an AWS SDK error.
///
/// For service errors (S3 API responses), returns the S3 error code
/// (e.g. "AccessDenied", "InternalError") and the human-readable error
/// message from the response. For other error types (network, timeout,
/// construction failure), returns "N/A" as the code and the full error
/// description as the message.
fn extract_sdk_error_details<E>(e: &SdkError<E>) -> (String, String)
where
    E: std::error::Error + ProvideErrorMetadata + 'static,
{
    if let Some(service_err) = e.as_service_error() {
        (
            service_err.code().unwrap_or("unknown").to_string(),
            service_err.message().unwrap_or("no message").to_string(),
        )
    } else {
        ("N/A".to_string(), DisplayErrorContext(e).to_string())
    }
}

/// A [`StorageError`] carrying the HTTP status of the response, if any.
fn to_storage_error<E>(e: &SdkError<E>) -> StorageError
where
    E: std::error::Error + ProvideErrorMetadata + 'static,
{
    let (code, message) = extract_sdk_error_details(e);
    let status = e.raw_response().map(|response| response.status().as_u16());
    StorageError::new(code, message, status)
}

fn to_chrono(time: Option<&aws_sdk_s3::primitives::DateTime>) -> Option<DateTime<Utc>> {
    time.and_then(|time| time.to_chrono_utc().ok())
}

fn to_size(size: Option<i64>) -> u64 {
    size.map(|size| size.max(0) as u64).unwrap_or(0)
}

fn user_metadata(metadata: &ObjectMetadata) -> Option<HashMap<String, String>> {
    if metadata.user_metadata.is_empty() {
        return None;
    }
    Some(
        metadata
            .user_metadata
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect(),
    )
}

/// Applies the standard headers and user metadata of an [`ObjectMetadata`] to
/// a put or copy request builder.
macro_rules! with_metadata {
    ($builder:expr, $metadata:expr) => {{
        let metadata: &ObjectMetadata = $metadata;
        $builder
            .set_content_type(metadata.content_type.clone())
            .set_cache_control(metadata.cache_control.clone())
            .set_content_disposition(metadata.content_disposition.clone())
            .set_content_encoding(metadata.content_encoding.clone())
            .set_content_language(metadata.content_language.clone())
            .set_metadata(user_metadata(metadata))
    }};
}

/// Factory for creating S3 storage instances.
pub struct S3StorageFactory;

#[async_trait]
impl StorageFactory for S3StorageFactory {
    async fn create(
        bucket: &str,
        client_config: ClientConfig,
        rate_limit_api: Option<Arc<RateLimiter>>,
    ) -> Storage {
        let client = Arc::new(client_config.create_client().await);

        Box::new(S3Storage {
            bucket: bucket.to_string(),
            client,
            request_payer: client_config.request_payer.clone(),
            rate_limit_api,
        })
    }
}

#[derive(Clone)]
struct S3Storage {
    bucket: String,
    client: Arc<Client>,
    request_payer: Option<RequestPayer>,
    rate_limit_api: Option<Arc<RateLimiter>>,
}

impl S3Storage {
    async fn exec_rate_limit_api(&self) {
        if let Some(ref rate_limiter) = self.rate_limit_api {
            rate_limiter.acquire_one().await;
        }
    }

    /// Logs a failed call and turns it into a classified error. Failures are
    /// logged as warnings since most of them are retried.
    fn sdk_error<E>(&self, e: SdkError<E>, key: &str, api: &'static str) -> anyhow::Error
    where
        E: std::error::Error + ProvideErrorMetadata + 'static,
    {
        let storage_error = to_storage_error(&e);
        tracing::warn!(
            bucket = %self.bucket,
            key = %key,
            s3_error_code = %storage_error.code,
            s3_error_message = %storage_error.message,
            status = storage_error.status,
            "S3 {} API call failed for s3://{}/{}: {} ({}).",
            api,
            self.bucket,
            key,
            storage_error.code,
            storage_error.message,
        );
        anyhow!(storage_error).context(format!("aws_sdk_s3::client::{api}() failed."))
    }
}

#[async_trait]
impl StorageTrait for S3Storage {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn list_page(
        &self,
        prefix: &str,
        marker: Option<&str>,
        delimiter: Option<&str>,
        max_keys: i32,
    ) -> Result<ListPage> {
        self.exec_rate_limit_api().await;

        let output = self
            .client
            .list_objects()
            .set_request_payer(self.request_payer.clone())
            .bucket(&self.bucket)
            .prefix(prefix)
            .set_marker(marker.map(String::from))
            .set_delimiter(delimiter.map(String::from))
            .max_keys(max_keys)
            .send()
            .await
            .map_err(|e| self.sdk_error(e, prefix, "ListObjects"))?;

        let objects: Vec<ObjectEntry> = output
            .contents()
            .iter()
            .filter_map(|object| {
                object.key().map(|key| {
                    ObjectEntry::object(
                        key,
                        to_size(object.size()),
                        to_chrono(object.last_modified()),
                    )
                })
            })
            .collect();
        let common_prefixes: Vec<String> = output
            .common_prefixes()
            .iter()
            .filter_map(|common_prefix| common_prefix.prefix().map(String::from))
            .collect();

        let is_truncated = output.is_truncated() == Some(true);
        // NextMarker is only returned with a delimiter; otherwise the last key is the marker.
        let next_marker = if is_truncated {
            output.next_marker().map(String::from).or_else(|| {
                let last_key = objects.last().map(|object| object.key.clone());
                let last_prefix = common_prefixes.last().cloned();
                last_key.max(last_prefix)
            })
        } else {
            None
        };

        Ok(ListPage {
            objects,
            common_prefixes,
            prefix: output.prefix().unwrap_or(prefix).to_string(),
            next_marker,
            is_truncated,
        })
    }

    async fn list_multipart_uploads_page(
        &self,
        prefix: &str,
        key_marker: Option<&str>,
        upload_id_marker: Option<&str>,
        max_uploads: i32,
    ) -> Result<UploadPage> {
        self.exec_rate_limit_api().await;

        let output = self
            .client
            .list_multipart_uploads()
            .set_request_payer(self.request_payer.clone())
            .bucket(&self.bucket)
            .prefix(prefix)
            .set_key_marker(key_marker.map(String::from))
            .set_upload_id_marker(upload_id_marker.map(String::from))
            .max_uploads(max_uploads)
            .send()
            .await
            .map_err(|e| self.sdk_error(e, prefix, "ListMultipartUploads"))?;

        let uploads = output
            .uploads()
            .iter()
            .filter_map(|upload| match (upload.key(), upload.upload_id()) {
                (Some(key), Some(upload_id)) => Some(ObjectEntry::upload(
                    key,
                    upload_id,
                    to_chrono(upload.initiated()),
                )),
                _ => None,
            })
            .collect();

        Ok(UploadPage {
            uploads,
            prefix: output.prefix().unwrap_or(prefix).to_string(),
            next_key_marker: output.next_key_marker().map(String::from),
            next_upload_id_marker: output.next_upload_id_marker().map(String::from),
            is_truncated: output.is_truncated() == Some(true),
        })
    }

    async fn head_object(&self, key: &str) -> Result<ObjectHead> {
        self.exec_rate_limit_api().await;

        let output = self
            .client
            .head_object()
            .set_request_payer(self.request_payer.clone())
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| self.sdk_error(e, key, "HeadObject"))?;

        let mut metadata = ObjectMetadata {
            content_type: output.content_type().map(String::from),
            cache_control: output.cache_control().map(String::from),
            content_disposition: output.content_disposition().map(String::from),
            content_encoding: output.content_encoding().map(String::from),
            content_language: output.content_language().map(String::from),
            ..ObjectMetadata::default()
        };
        if let Some(user_metadata) = output.metadata() {
            for (name, value) in user_metadata {
                metadata
                    .set(&format!("{USER_METADATA_PREFIX}{name}"), value)
                    .map_err(|e| anyhow!(e))?;
            }
        }

        Ok(ObjectHead {
            size: to_size(output.content_length()),
            last_modified: to_chrono(output.last_modified()),
            e_tag: output.e_tag().map(String::from),
            metadata,
        })
    }

    async fn get_object_range(&self, key: &str, range: Option<ByteRange>) -> Result<Vec<u8>> {
        self.exec_rate_limit_api().await;

        let output = self
            .client
            .get_object()
            .set_request_payer(self.request_payer.clone())
            .bucket(&self.bucket)
            .key(key)
            .set_range(range.map(|range| range.to_header_value()))
            .send()
            .await
            .map_err(|e| self.sdk_error(e, key, "GetObject"))?;

        let body = output
            .body
            .collect()
            .await
            .context("aws_sdk_s3::primitives::ByteStream::collect() failed.")?;
        Ok(body.into_bytes().to_vec())
    }

    async fn put_object(
        &self,
        key: &str,
        body: Vec<u8>,
        metadata: Option<&ObjectMetadata>,
    ) -> Result<()> {
        self.exec_rate_limit_api().await;

        let mut builder = self
            .client
            .put_object()
            .set_request_payer(self.request_payer.clone())
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body));
        if let Some(metadata) = metadata {
            builder = with_metadata!(builder, metadata);
        }

        builder
            .send()
            .await
            .map_err(|e| self.sdk_error(e, key, "PutObject"))?;
        Ok(())
    }

    async fn copy_object(&self, source_bucket: &str, source_key: &str, key: &str) -> Result<()> {
        self.exec_rate_limit_api().await;

        self.client
            .copy_object()
            .set_request_payer(self.request_payer.clone())
            .bucket(&self.bucket)
            .key(key)
            .copy_source(copy_source(source_bucket, source_key))
            .send()
            .await
            .map_err(|e| self.sdk_error(e, key, "CopyObject"))?;
        Ok(())
    }

    async fn set_object_acl(&self, key: &str, acl: ObjectAcl) -> Result<()> {
        self.exec_rate_limit_api().await;

        self.client
            .put_object_acl()
            .set_request_payer(self.request_payer.clone())
            .bucket(&self.bucket)
            .key(key)
            .acl(ObjectCannedAcl::from(acl.as_str()))
            .send()
            .await
            .map_err(|e| self.sdk_error(e, key, "PutObjectAcl"))?;
        Ok(())
    }

    async fn replace_object_metadata(&self, key: &str, metadata: &ObjectMetadata) -> Result<()> {
        self.exec_rate_limit_api().await;

        let builder = self
            .client
            .copy_object()
            .set_request_payer(self.request_payer.clone())
            .bucket(&self.bucket)
            .key(key)
            .copy_source(copy_source(&self.bucket, key))
            .metadata_directive(MetadataDirective::Replace);

        with_metadata!(builder, metadata)
            .send()
            .await
            .map_err(|e| self.sdk_error(e, key, "CopyObject"))?;
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        self.exec_rate_limit_api().await;

        self.client
            .delete_object()
            .set_request_payer(self.request_payer.clone())
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| self.sdk_error(e, key, "DeleteObject"))?;
        Ok(())
    }

    async fn delete_bucket(&self) -> Result<()> {
        self.exec_rate_limit_api().await;

        self.client
            .delete_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| self.sdk_error(e, "", "DeleteBucket"))?;
        Ok(())
    }

    async fn create_multipart_upload(&self, key: &str) -> Result<String> {
        self.exec_rate_limit_api().await;

        let output = self
            .client
            .create_multipart_upload()
            .set_request_payer(self.request_payer.clone())
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| self.sdk_error(e, key, "CreateMultipartUpload"))?;

        output
            .upload_id()
            .map(String::from)
            .ok_or_else(|| anyhow!("CreateMultipartUpload returned no upload id for {key}."))
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Vec<u8>,
    ) -> Result<String> {
        self.exec_rate_limit_api().await;

        let output = self
            .client
            .upload_part()
            .set_request_payer(self.request_payer.clone())
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| self.sdk_error(e, key, "UploadPart"))?;

        output
            .e_tag()
            .map(String::from)
            .ok_or_else(|| anyhow!("UploadPart returned no ETag for part {part_number} of {key}."))
    }

    async fn upload_part_copy(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        source_bucket: &str,
        source_key: &str,
        range: ByteRange,
    ) -> Result<String> {
        self.exec_rate_limit_api().await;

        let output = self
            .client
            .upload_part_copy()
            .set_request_payer(self.request_payer.clone())
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .copy_source(copy_source(source_bucket, source_key))
            .copy_source_range(range.to_header_value())
            .send()
            .await
            .map_err(|e| self.sdk_error(e, key, "UploadPartCopy"))?;

        output
            .copy_part_result()
            .and_then(|result| result.e_tag())
            .map(String::from)
            .ok_or_else(|| {
                anyhow!("UploadPartCopy returned no ETag for part {part_number} of {key}.")
            })
    }

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<()> {
        self.exec_rate_limit_api().await;

        let completed = CompletedMultipartUpload::builder()
            .set_parts(Some(
                parts
                    .iter()
                    .map(|part| {
                        S3CompletedPart::builder()
                            .part_number(part.part_number)
                            .e_tag(&part.e_tag)
                            .build()
                    })
                    .collect(),
            ))
            .build();

        self.client
            .complete_multipart_upload()
            .set_request_payer(self.request_payer.clone())
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed)
            .send()
            .await
            .map_err(|e| self.sdk_error(e, key, "CompleteMultipartUpload"))?;
        Ok(())
    }

    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> Result<()> {
        self.exec_rate_limit_api().await;

        self.client
            .abort_multipart_upload()
            .set_request_payer(self.request_payer.clone())
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|e| self.sdk_error(e, key, "AbortMultipartUpload"))?;
        Ok(())
    }
}

/// `x-amz-copy-source` value: the bucket followed by the URL-encoded key.
fn copy_source(bucket: &str, key: &str) -> String {
    format!("{bucket}/{}", urlencoding::encode(key))
}
