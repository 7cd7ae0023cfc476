//! Helpers for tests against a real S3 endpoint.
//!
//! All helpers use the `s3bulk-e2e-test` AWS profile. Compiled only with
//! `RUSTFLAGS="--cfg e2e_test"`.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use aws_config::BehaviorVersion;
use aws_sdk_s3::Client;
use aws_sdk_s3::types::{
    BucketLocationConstraint, CreateBucketConfiguration, Delete, ObjectIdentifier, Permission,
};
use s3bulk_rs::config::args::build_config_from_args;
use s3bulk_rs::{BatchPipeline, Config, ProgressMonitor, create_pipeline_cancellation_token};

use super::BatchOutcome;

/// AWS profile used for all E2E tests.
pub const AWS_PROFILE: &str = "s3bulk-e2e-test";

/// Location constraint used when the profile names no region.
const DEFAULT_REGION: &str = "us-east-1";

static BUCKET_SEQUENCE: AtomicU32 = AtomicU32::new(0);

/// Deletes every object, pending upload and finally the bucket when dropped,
/// even if the test panicked.
pub struct BucketGuard {
    helper: Arc<TestHelper>,
    bucket: String,
}

impl BucketGuard {
    /// Explicit cleanup at the end of a passing test.
    pub async fn cleanup(self) {
        self.helper.delete_bucket_cascade(&self.bucket).await;
    }
}

impl Drop for BucketGuard {
    fn drop(&mut self) {
        let helper = self.helper.clone();
        let bucket = self.bucket.clone();
        // block_on() panics while the runtime shuts down after a failed test.
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            tokio::task::block_in_place(|| {
                tokio::runtime::Handle::current().block_on(async move {
                    helper.delete_bucket_cascade(&bucket).await;
                });
            });
        }));
    }
}

pub struct TestHelper {
    client: Client,
    region: String,
}

impl TestHelper {
    pub async fn new() -> Arc<Self> {
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .profile_name(AWS_PROFILE)
            .load()
            .await;

        let region = sdk_config
            .region()
            .map(|r| r.to_string())
            .unwrap_or_else(|| DEFAULT_REGION.to_string());

        Arc::new(Self {
            client: Client::new(&sdk_config),
            region,
        })
    }

    pub fn bucket_guard(self: &Arc<Self>, bucket: &str) -> BucketGuard {
        BucketGuard {
            helper: Arc::clone(self),
            bucket: bucket.to_string(),
        }
    }

    /// `s3bulk-e2e-<millis>-<pid>-<sequence>`, unique across parallel runs.
    pub fn generate_bucket_name(&self) -> String {
        format!(
            "s3bulk-e2e-{}-{}-{}",
            chrono::Utc::now().timestamp_millis(),
            std::process::id(),
            BUCKET_SEQUENCE.fetch_add(1, Ordering::Relaxed)
        )
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub async fn create_bucket(&self, bucket: &str) {
        let mut builder = self.client.create_bucket().bucket(bucket);

        // us-east-1 must NOT specify a location constraint
        if self.region != "us-east-1" {
            let constraint = BucketLocationConstraint::from(self.region.as_str());
            let config = CreateBucketConfiguration::builder()
                .location_constraint(constraint)
                .build();
            builder = builder.create_bucket_configuration(config);
        }

        builder
            .send()
            .await
            .unwrap_or_else(|e| panic!("Failed to create bucket {bucket}: {e}"));
    }

    pub async fn bucket_exists(&self, bucket: &str) -> bool {
        self.client.head_bucket().bucket(bucket).send().await.is_ok()
    }

    pub async fn delete_bucket_cascade(&self, bucket: &str) {
        self.abort_all_uploads(bucket).await;
        self.delete_all_objects(bucket).await;
        let _ = self.client.delete_bucket().bucket(bucket).send().await;
    }

    async fn abort_all_uploads(&self, bucket: &str) {
        for (key, upload_id) in self.list_uploads(bucket).await {
            let _ = self
                .client
                .abort_multipart_upload()
                .bucket(bucket)
                .key(key)
                .upload_id(upload_id)
                .send()
                .await;
        }
    }

    async fn delete_all_objects(&self, bucket: &str) {
        loop {
            let keys = self.list_objects(bucket, "").await;
            if keys.is_empty() {
                break;
            }

            for chunk in keys.chunks(1000) {
                let objects = chunk
                    .iter()
                    .map(|key| ObjectIdentifier::builder().key(key).build().unwrap())
                    .collect();
                let delete = Delete::builder()
                    .set_objects(Some(objects))
                    .quiet(true)
                    .build()
                    .unwrap();
                if self
                    .client
                    .delete_objects()
                    .bucket(bucket)
                    .delete(delete)
                    .send()
                    .await
                    .is_err()
                {
                    return;
                }
            }
        }
    }

    pub async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>) {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(body.into())
            .send()
            .await
            .unwrap_or_else(|e| panic!("Failed to put object {key} in {bucket}: {e}"));
    }

    pub async fn create_multipart_upload(&self, bucket: &str, key: &str) -> String {
        self.client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .unwrap_or_else(|e| panic!("Failed to start an upload of {key}: {e}"))
            .upload_id()
            .unwrap_or_default()
            .to_string()
    }

    /// Keys under `prefix`, in listing order.
    pub async fn list_objects(&self, bucket: &str, prefix: &str) -> Vec<String> {
        let mut keys = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut req = self.client.list_objects_v2().bucket(bucket).prefix(prefix);
            if let Some(ref token) = continuation_token {
                req = req.continuation_token(token);
            }

            let Ok(resp) = req.send().await else {
                return keys;
            };
            keys.extend(resp.contents().iter().filter_map(|o| o.key().map(str::to_string)));

            if resp.is_truncated() == Some(true) {
                continuation_token = resp.next_continuation_token().map(|s| s.to_string());
            } else {
                break;
            }
        }

        keys
    }

    /// `(key, upload id)` of every pending multipart upload.
    pub async fn list_uploads(&self, bucket: &str) -> Vec<(String, String)> {
        let Ok(resp) = self.client.list_multipart_uploads().bucket(bucket).send().await else {
            return Vec::new();
        };

        resp.uploads()
            .iter()
            .filter_map(|u| Some((u.key()?.to_string(), u.upload_id()?.to_string())))
            .collect()
    }

    pub async fn get_object_body(&self, bucket: &str, key: &str) -> Vec<u8> {
        self.client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .unwrap_or_else(|e| panic!("Failed to get object {key}: {e}"))
            .body
            .collect()
            .await
            .unwrap()
            .into_bytes()
            .to_vec()
    }

    pub async fn head_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> aws_sdk_s3::operation::head_object::HeadObjectOutput {
        self.client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .unwrap_or_else(|e| panic!("Failed to head object {key}: {e}"))
    }

    /// Whether the `AllUsers` group may read `key`.
    pub async fn is_public_read(&self, bucket: &str, key: &str) -> bool {
        let acl = self
            .client
            .get_object_acl()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .unwrap_or_else(|e| panic!("Failed to get the acl of {key}: {e}"));

        acl.grants().iter().any(|grant| {
            grant.permission() == Some(&Permission::Read)
                && grant
                    .grantee()
                    .and_then(|grantee| grantee.uri())
                    .is_some_and(|uri| uri.ends_with("/global/AllUsers"))
        })
    }

    /// Builds a `Config` from CLI-style arguments, adding the binary name and
    /// `--profile s3bulk-e2e-test` unless credentials are given.
    pub fn build_config(args: Vec<&str>) -> Config {
        let mut full_args: Vec<String> = vec!["s3bulk".to_string()];
        full_args.extend(args.iter().map(|s| s.to_string()));

        let has_credentials = full_args
            .iter()
            .any(|a| a.starts_with("--profile") || a.starts_with("--access-key"));
        if !has_credentials {
            full_args.push("--profile".to_string());
            full_args.push(AWS_PROFILE.to_string());
        }
        full_args.push("--show-no-progress".to_string());

        build_config_from_args(full_args)
            .unwrap_or_else(|e| panic!("Failed to build config from args: {e}"))
    }

    pub async fn run_pipeline(config: Config) -> BatchOutcome {
        let mut pipeline = BatchPipeline::new(config, create_pipeline_cancellation_token()).await;
        let result = pipeline.run().await;

        BatchOutcome {
            result,
            snapshot: pipeline.monitor().snapshot(),
            finish_message: pipeline.take_finish_message(),
            report_path: pipeline.report_path().map(|path| path.to_path_buf()),
            item_errors: pipeline.item_errors(),
        }
    }
}

/// Default timeout for E2E tests.
pub const E2E_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(300);

/// Wraps an async E2E test body with [`E2E_TIMEOUT`].
#[macro_export]
macro_rules! e2e_timeout {
    ($body:expr) => {
        tokio::time::timeout(common::e2e::E2E_TIMEOUT, $body)
            .await
            .expect("E2E test timed out")
    };
}
