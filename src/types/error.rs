use std::fmt;
use std::path::PathBuf;

use anyhow::Error;
use thiserror::Error;

/// Application-level error types for s3bulk.
///
/// ## Exit Codes
///
/// Each variant maps to an exit code (via `exit_code()`):
/// - 0: Cancelled
/// - 1: General errors (Io, Pipeline)
/// - 2: Configuration errors (InvalidConfig, InvalidUri, InvalidPattern, InvalidPartition)
#[derive(Error, Debug, PartialEq)]
pub enum S3bulkError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid S3 URI: {0}")]
    InvalidUri(String),

    #[error("{0}")]
    InvalidPattern(String),

    #[error("invalid partition download spec: {0}")]
    InvalidPartition(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Pipeline error: {0}")]
    Pipeline(String),
}

impl S3bulkError {
    pub fn exit_code(&self) -> i32 {
        match self {
            S3bulkError::Cancelled => 0,
            S3bulkError::InvalidConfig(_)
            | S3bulkError::InvalidUri(_)
            | S3bulkError::InvalidPattern(_)
            | S3bulkError::InvalidPartition(_) => 2,
            _ => 1,
        }
    }
}

/// An error answered by the storage service.
///
/// `status` is `None` when the request never got an HTTP response
/// (timeouts, connection resets); such errors are always worth retrying.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct StorageError {
    pub code: String,
    pub message: String,
    pub status: Option<u16>,
}

impl StorageError {
    pub fn new(code: impl Into<String>, message: impl Into<String>, status: Option<u16>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            status,
        }
    }

    pub fn not_found(key: &str) -> Self {
        Self::new("NoSuchKey", format!("The specified key does not exist: {key}"), Some(404))
    }

    pub fn is_not_found(&self) -> bool {
        self.status == Some(404) || self.code == "NoSuchKey" || self.code == "NotFound"
    }

    pub fn is_non_retryable(&self) -> bool {
        FATAL_ERROR_CODES.contains(&self.code.as_str())
            || NON_RETRYABLE_ERROR_CODES.contains(&self.code.as_str())
    }
}

/// Service error codes that abort a batch even when `continue_on_error` is set:
/// they affect every remaining item in the same way.
pub const FATAL_ERROR_CODES: &[&str] = &[
    "NoSuchBucket",
    "InvalidAccessKeyId",
    "SignatureDoesNotMatch",
    "AccessDenied",
    "InvalidBucketName",
    "RequestTimeTooSkewed",
    "AllAccessDisabled",
    "InvalidToken",
    "ExpiredToken",
];

/// Service error codes that a retry cannot fix, on top of the fatal ones.
/// Everything else, throttling and request timeouts included, is retried.
pub const NON_RETRYABLE_ERROR_CODES: &[&str] = &[
    "NoSuchKey",
    "NotFound",
    "NoSuchUpload",
    "BucketNotEmpty",
    "InvalidArgument",
    "InvalidRequest",
    "InvalidRange",
    "MethodNotAllowed",
    "EntityTooSmall",
    "EntityTooLarge",
    "KeyTooLongError",
    "InvalidObjectState",
    "InvalidPart",
    "InvalidPartOrder",
];

/// Identity of the thing a retried call was operating on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryTarget {
    Object { bucket: String, key: String },
    Bucket { bucket: String },
    File { path: PathBuf },
}

impl RetryTarget {
    pub fn object(bucket: &str, key: &str) -> Self {
        RetryTarget::Object {
            bucket: bucket.to_string(),
            key: key.to_string(),
        }
    }

    pub fn bucket(bucket: &str) -> Self {
        RetryTarget::Bucket {
            bucket: bucket.to_string(),
        }
    }
}

impl fmt::Display for RetryTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryTarget::Object { bucket, key } => write!(f, "s3://{bucket}/{key}"),
            RetryTarget::Bucket { bucket } => write!(f, "s3://{bucket}"),
            RetryTarget::File { path } => write!(f, "{}", path.display()),
        }
    }
}

/// Context attached to the last error of a call that ran out of attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryExhausted {
    pub target: RetryTarget,
    pub attempts: u32,
}

impl fmt::Display for RetryExhausted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed after {} attempt(s)", self.target, self.attempts)
    }
}

pub fn storage_error(e: &Error) -> Option<&StorageError> {
    e.chain().find_map(|cause| cause.downcast_ref::<StorageError>())
}

/// Fatal errors switch the continue policy off.
pub fn is_fatal_error(e: &Error) -> bool {
    storage_error(e).is_some_and(|err| FATAL_ERROR_CODES.contains(&err.code.as_str()))
}

pub fn is_retryable_error(e: &Error) -> bool {
    match storage_error(e) {
        Some(err) => !err.is_non_retryable(),
        None => !is_cancelled_error(e) && e.downcast_ref::<S3bulkError>().is_none(),
    }
}

pub fn is_not_found_error(e: &Error) -> bool {
    storage_error(e).is_some_and(StorageError::is_not_found)
}

/// The multipart upload id is unknown to the server, usually because the
/// upload was aborted or completed elsewhere.
pub fn is_no_such_upload_error(e: &Error) -> bool {
    storage_error(e).is_some_and(|err| err.code == "NoSuchUpload")
}

pub fn is_cancelled_error(e: &Error) -> bool {
    if let Some(err) = e.downcast_ref::<S3bulkError>() {
        return *err == S3bulkError::Cancelled;
    }
    false
}

/// Extract the exit code from an anyhow::Error, defaulting to 1.
pub fn exit_code_from_error(e: &Error) -> i32 {
    if let Some(err) = e.downcast_ref::<S3bulkError>() {
        return err.exit_code();
    }
    1
}
