pub mod args;

use std::path::PathBuf;

use aws_sdk_s3::types::RequestPayer;
use aws_smithy_types::checksum_config::RequestChecksumCalculation;

use crate::filters::FilterChain;
use crate::monitor::RemoveTarget;
use crate::transfer::TransferDirection;
use crate::transfer::partition::PartitionSpec;
use crate::types::{ByteRange, ObjectAcl, ObjectMetadata, S3Credentials, StoragePath};

pub const DEFAULT_WORKER_SIZE: u16 = 16;
pub const DEFAULT_MAX_KEYS: i32 = 1000;
pub const DEFAULT_OBJECT_LISTING_QUEUE_SIZE: u32 = 1000;
pub const DEFAULT_RETRY_TIMES: u32 = 10;
pub const DEFAULT_RETRY_INTERVAL_MILLISECONDS: u64 = 0;
pub const DEFAULT_BIGFILE_THRESHOLD: u64 = 100 * 1024 * 1024;
pub const DEFAULT_CHECKPOINT_DIR: &str = ".s3bulk_checkpoint";
pub const DEFAULT_OUTPUT_DIR: &str = "s3bulk_output";

/// Main configuration of one s3bulk invocation.
///
/// Built from the command line by [`build_config_from_args`](args::build_config_from_args),
/// or directly for library use:
///
/// ```
/// use s3bulk_rs::Config;
/// use s3bulk_rs::config::OperationConfig;
/// use s3bulk_rs::types::ObjectAcl;
///
/// let mut config = Config::for_target("my-bucket", "logs/2024/");
/// config.operation = OperationConfig::SetAcl {
///     acl: ObjectAcl::Private,
/// };
/// assert!(config.recursive);
/// assert_eq!(config.worker_size, 16);
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    pub operation: OperationConfig,
    pub source: StoragePath,
    /// Destination of `cp`; `None` for every other operation.
    pub target: Option<StoragePath>,
    pub recursive: bool,
    /// Leaves out objects below a further `/` and files in subdirectories.
    pub only_current_dir: bool,
    pub continue_on_error: bool,
    /// Skips the confirmation prompt of a recursive `rm`.
    pub force: bool,
    pub show_no_progress: bool,
    pub client_config: Option<ClientConfig>,
    pub force_retry_config: ForceRetryConfig,
    pub tracing_config: Option<TracingConfig>,
    pub worker_size: u16,
    pub rate_limit_api: Option<u32>,
    pub object_listing_queue_size: u32,
    pub max_keys: i32,
    pub filter_config: FilterConfig,
    pub transfer_config: TransferConfig,
    pub output_dir: PathBuf,
    /// Written as the header of the report file.
    pub command_line: String,
    pub auto_complete_shell: Option<clap_complete::shells::Shell>,
}

impl Config {
    /// A recursive `ls` over `s3://bucket/prefix` with CLI defaults.
    /// Change `operation` (and `target` for `cp`) as needed.
    pub fn for_target(bucket: &str, prefix: &str) -> Self {
        Config {
            source: StoragePath::S3 {
                bucket: bucket.to_string(),
                prefix: prefix.to_string(),
            },
            recursive: true,
            continue_on_error: true,
            ..Config::default()
        }
    }

    /// Direction of a `cp`, derived from where the source and target live.
    pub fn transfer_direction(&self) -> Option<TransferDirection> {
        if self.operation != OperationConfig::Copy {
            return None;
        }
        match (&self.source, self.target.as_ref()?) {
            (StoragePath::Local(_), StoragePath::S3 { .. }) => Some(TransferDirection::Upload),
            (StoragePath::S3 { .. }, StoragePath::Local(_)) => Some(TransferDirection::Download),
            (StoragePath::S3 { .. }, StoragePath::S3 { .. }) => Some(TransferDirection::Copy),
            (StoragePath::Local(_), StoragePath::Local(_)) => None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            operation: OperationConfig::List,
            source: StoragePath::S3 {
                bucket: String::new(),
                prefix: String::new(),
            },
            target: None,
            recursive: false,
            only_current_dir: false,
            continue_on_error: false,
            force: false,
            show_no_progress: false,
            client_config: None,
            force_retry_config: ForceRetryConfig::default(),
            tracing_config: None,
            worker_size: DEFAULT_WORKER_SIZE,
            rate_limit_api: None,
            object_listing_queue_size: DEFAULT_OBJECT_LISTING_QUEUE_SIZE,
            max_keys: DEFAULT_MAX_KEYS,
            filter_config: FilterConfig::default(),
            transfer_config: TransferConfig::default(),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            command_line: String::new(),
            auto_complete_shell: None,
        }
    }
}

/// The command a batch applies to every selected item.
#[derive(Debug, Clone, PartialEq)]
pub enum OperationConfig {
    List,
    SetAcl {
        acl: ObjectAcl,
    },
    SetMeta {
        directive: MetadataDirective,
        metadata: ObjectMetadata,
    },
    Remove {
        targets: RemoveTarget,
    },
    Copy,
}

impl OperationConfig {
    pub fn name(&self) -> &'static str {
        match self {
            OperationConfig::List => "ls",
            OperationConfig::SetAcl { .. } => "set-acl",
            OperationConfig::SetMeta { .. } => "set-meta",
            OperationConfig::Remove { .. } => "rm",
            OperationConfig::Copy => "cp",
        }
    }
}

/// How `set-meta` combines the given headers with the current ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataDirective {
    /// The given headers become the complete set.
    Replace,
    /// The given headers are merged over the current ones.
    Update,
    /// The named headers are removed.
    Delete,
}

/// AWS S3 client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub credential: S3Credentials,
    pub region: Option<String>,
    pub endpoint_url: Option<String>,
    pub force_path_style: bool,
    pub accelerate: bool,
    pub request_payer: Option<RequestPayer>,
    pub retry_config: RetryConfig,
    pub cli_timeout_config: CLITimeoutConfig,
    pub disable_stalled_stream_protection: bool,
    pub request_checksum_calculation: RequestChecksumCalculation,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            credential: S3Credentials::FromEnvironment,
            region: None,
            endpoint_url: None,
            force_path_style: false,
            accelerate: false,
            request_payer: None,
            retry_config: RetryConfig {
                aws_max_attempts: 3,
                initial_backoff_milliseconds: 100,
            },
            cli_timeout_config: CLITimeoutConfig::default(),
            disable_stalled_stream_protection: false,
            request_checksum_calculation: RequestChecksumCalculation::WhenRequired,
        }
    }
}

/// Retry configuration of the AWS SDK itself (below the batch-level retry).
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub aws_max_attempts: u32,
    pub initial_backoff_milliseconds: u64,
}

#[derive(Debug, Clone, Default)]
pub struct CLITimeoutConfig {
    pub operation_timeout_milliseconds: Option<u64>,
    pub operation_attempt_timeout_milliseconds: Option<u64>,
    pub connect_timeout_milliseconds: Option<u64>,
    pub read_timeout_milliseconds: Option<u64>,
}

/// Tracing (logging) configuration.
#[derive(Debug, Clone, Copy)]
pub struct TracingConfig {
    pub tracing_level: log::Level,
    pub json_tracing: bool,
    pub aws_sdk_tracing: bool,
    pub span_events_tracing: bool,
    pub disable_color_tracing: bool,
}

/// Batch-level retry applied to every remote call.
#[derive(Debug, Clone, Copy)]
pub struct ForceRetryConfig {
    pub retry_times: u32,
    pub retry_interval_milliseconds: u64,
}

impl Default for ForceRetryConfig {
    fn default() -> Self {
        ForceRetryConfig {
            retry_times: DEFAULT_RETRY_TIMES,
            retry_interval_milliseconds: DEFAULT_RETRY_INTERVAL_MILLISECONDS,
        }
    }
}

/// Item selection applied by the listing producers.
#[derive(Debug, Clone, Default)]
pub struct FilterConfig {
    pub chain: FilterChain,
    /// Unix seconds; items modified before are skipped.
    pub start_time: Option<i64>,
    /// Unix seconds; items modified after are skipped.
    pub end_time: Option<i64>,
}

/// Options of `cp`.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    pub update: bool,
    pub bigfile_threshold: u64,
    pub part_size: Option<u64>,
    pub parallel: Option<usize>,
    /// Bytes per second, per transfer.
    pub max_speed: Option<u64>,
    pub checkpoint_dir: PathBuf,
    pub snapshot_path: Option<PathBuf>,
    pub partition: Option<PartitionSpec>,
    pub range: Option<ByteRange>,
}

impl Default for TransferConfig {
    fn default() -> Self {
        TransferConfig {
            update: false,
            bigfile_threshold: DEFAULT_BIGFILE_THRESHOLD,
            part_size: None,
            parallel: None,
            max_speed: None,
            checkpoint_dir: PathBuf::from(DEFAULT_CHECKPOINT_DIR),
            snapshot_path: None,
            partition: None,
            range: None,
        }
    }
}
