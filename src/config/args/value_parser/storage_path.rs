use std::path::PathBuf;

use crate::types::StoragePath;

pub const S3_SCHEME: &str = "s3://";

const INVALID_S3_URL: &str =
    "URL must start with 's3://' followed by a bucket name (e.g., s3://bucket/prefix).";

pub fn check_s3_url(value: &str) -> Result<String, String> {
    let Some(rest) = value.strip_prefix(S3_SCHEME) else {
        return Err(INVALID_S3_URL.to_string());
    };
    if rest.is_empty() || rest.starts_with('/') {
        return Err(INVALID_S3_URL.to_string());
    }

    Ok(value.to_string())
}

/// `s3://bucket/prefix` becomes a remote path, anything else a local one.
pub fn parse_storage_path(value: &str) -> Result<StoragePath, String> {
    if !value.starts_with(S3_SCHEME) {
        if value.is_empty() {
            return Err("local path must not be empty".to_string());
        }
        return Ok(StoragePath::Local(PathBuf::from(value)));
    }

    check_s3_url(value)?;
    let without_scheme = &value[S3_SCHEME.len()..];
    let (bucket, prefix) = without_scheme
        .split_once('/')
        .unwrap_or((without_scheme, ""));

    Ok(StoragePath::S3 {
        bucket: bucket.to_string(),
        prefix: prefix.to_string(),
    })
}
