use crate::config::{
    CLITimeoutConfig, ClientConfig, Config, FilterConfig, ForceRetryConfig, MetadataDirective,
    OperationConfig, RetryConfig, TracingConfig, TransferConfig,
};
use crate::filters::{ERROR_MESSAGE_FILTER_NOT_RECURSIVE, FilterChain, parse_filter_args};
use crate::monitor::RemoveTarget;
use crate::transfer::partition::PartitionSpec;
use crate::types::{AccessKeys, ByteRange, ObjectAcl, ObjectMetadata, S3Credentials, StoragePath};
use aws_sdk_s3::types::RequestPayer;
use aws_smithy_types::checksum_config::RequestChecksumCalculation;
use clap::builder::NonEmptyStringValueParser;
use clap::{Args, Parser, Subcommand};
use clap_verbosity_flag::{Verbosity, WarnLevel};
use std::ffi::OsString;
use std::path::PathBuf;
use std::str::FromStr;

use value_parser::human_bytes::{check_human_bytes, parse_human_bytes};
use value_parser::partition::parse_partition;
use value_parser::storage_path::{check_s3_url, parse_storage_path};
use value_parser::url::check_scheme;

pub mod value_parser;

const DEFAULT_WORKER_SIZE: u16 = crate::config::DEFAULT_WORKER_SIZE;
const DEFAULT_MAX_KEYS: i32 = crate::config::DEFAULT_MAX_KEYS;
const DEFAULT_OBJECT_LISTING_QUEUE_SIZE: u32 = crate::config::DEFAULT_OBJECT_LISTING_QUEUE_SIZE;
const DEFAULT_RETRY_TIMES: u32 = crate::config::DEFAULT_RETRY_TIMES;
const DEFAULT_RETRY_INTERVAL_MILLISECONDS: u64 =
    crate::config::DEFAULT_RETRY_INTERVAL_MILLISECONDS;
const DEFAULT_OUTPUT_DIR: &str = crate::config::DEFAULT_OUTPUT_DIR;
const DEFAULT_CHECKPOINT_DIR: &str = crate::config::DEFAULT_CHECKPOINT_DIR;
const DEFAULT_BIGFILE_THRESHOLD: &str = "100MiB";
const DEFAULT_AWS_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_INITIAL_BACKOFF_MILLISECONDS: u64 = 100;
const DEFAULT_RECURSIVE: bool = false;
const DEFAULT_ONLY_CURRENT_DIR: bool = false;
const DEFAULT_FORCE: bool = false;
const DEFAULT_STOP_ON_ERROR: bool = false;
const DEFAULT_SHOW_NO_PROGRESS: bool = false;
const DEFAULT_JSON_TRACING: bool = false;
const DEFAULT_AWS_SDK_TRACING: bool = false;
const DEFAULT_SPAN_EVENTS_TRACING: bool = false;
const DEFAULT_DISABLE_COLOR_TRACING: bool = false;
const DEFAULT_FORCE_PATH_STYLE: bool = false;
const DEFAULT_ACCELERATE: bool = false;
const DEFAULT_REQUEST_PAYER: bool = false;
const DEFAULT_DISABLE_STALLED_STREAM_PROTECTION: bool = false;
const MAX_KEYS_LIMIT: i32 = 1000;

const ERROR_MESSAGE_NO_COMMAND: &str =
    "a command is required: one of ls, set-acl, set-meta, rm, cp.";
const ERROR_MESSAGE_WORKER_SIZE_ZERO: &str = "Worker size must be at least 1.";
const ERROR_MESSAGE_OBJECT_LISTING_QUEUE_SIZE_ZERO: &str =
    "Object listing queue size must be at least 1.";
const ERROR_MESSAGE_MAX_KEYS_OUT_OF_RANGE: &str = "Max keys must be between 1 and 1000.";
const ERROR_MESSAGE_TIME_WINDOW: &str = "--start-time must not be later than --end-time.";
const ERROR_MESSAGE_RM_BUCKET_WITH_KEY: &str =
    "--bucket removes the whole bucket, the URL must not contain a key.";
const ERROR_MESSAGE_RM_BUCKET_NOT_RECURSIVE: &str =
    "--bucket with --all-type or --multipart needs --recursive to empty the bucket first.";
const ERROR_MESSAGE_CP_LOCAL_TO_LOCAL: &str =
    "cp needs an s3:// URL as its source or its destination.";
const ERROR_MESSAGE_ONLY_CURRENT_DIR_NOT_RECURSIVE: &str =
    "--only-current-dir only works with --recursive.";
const ERROR_MESSAGE_RANGE: &str = "--range only works with a non-recursive download.";
const ERROR_MESSAGE_PARTITION: &str = "--partition-download only works with a download.";
const ERROR_MESSAGE_PART_SIZE_ZERO: &str = "--part-size must be at least 1 byte.";
const ERROR_MESSAGE_PARALLEL_ZERO: &str = "--parallel must be at least 1.";

/// s3bulk - bulk object operations for S3-compatible object storage.
///
/// Example:
///   s3bulk ls s3://my-bucket/logs/
///   s3bulk set-acl s3://my-bucket/logs/ private -r --include '*.log'
///   s3bulk rm s3://my-bucket/tmp/ -r -a -f
///   s3bulk cp ./photos s3://my-bucket/photos/ -r -u
#[derive(Parser, Clone, Debug)]
#[command(name = "s3bulk", version, about, long_about = None)]
pub struct CLIArgs {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Operate on every object (or file) under the given prefix (or directory).
    #[arg(short = 'r', long, env, global = true, default_value_t = DEFAULT_RECURSIVE, help_heading = "General")]
    pub recursive: bool,

    /// Only operate on the objects (or files) directly under the prefix (or directory), skipping subdirectories.
    #[arg(long, env, global = true, default_value_t = DEFAULT_ONLY_CURRENT_DIR, help_heading = "General")]
    pub only_current_dir: bool,

    /// Do not ask for confirmation before a recursive rm.
    #[arg(short = 'f', long, env, global = true, default_value_t = DEFAULT_FORCE, help_heading = "General")]
    pub force: bool,

    /// Abort the batch on the first item error instead of recording it in the report file.
    #[arg(long, env, global = true, default_value_t = DEFAULT_STOP_ON_ERROR, help_heading = "General")]
    pub stop_on_error: bool,

    /// Directory of the error report file.
    #[arg(long, env, global = true, default_value = DEFAULT_OUTPUT_DIR, help_heading = "General")]
    pub output_dir: PathBuf,

    /// Don't show the progress bar.
    #[arg(long, env, global = true, default_value_t = DEFAULT_SHOW_NO_PROGRESS, help_heading = "General")]
    pub show_no_progress: bool,

    /// Select objects whose base name matches this pattern. Repeatable, evaluated left to right.
    #[arg(long, global = true, value_parser = NonEmptyStringValueParser::new(), help_heading = "Filter",
        long_help = r#"Select objects whose base name matches this wildcard pattern.
Patterns are evaluated left to right together with --exclude;
the first one decides the initial selection. Only works with --recursive.
Supports *, ?, [seq] and [!seq]. Patterns must not contain '/'.

Example: --include '*.jpg' --exclude '*2024*'"#)]
    pub include: Vec<String>,

    /// Skip objects whose base name matches this pattern. Repeatable, evaluated left to right.
    #[arg(long, global = true, value_parser = NonEmptyStringValueParser::new(), help_heading = "Filter")]
    pub exclude: Vec<String>,

    /// Skip objects modified before this time (unix seconds).
    #[arg(long, env, global = true, help_heading = "Filter")]
    pub start_time: Option<i64>,

    /// Skip objects modified after this time (unix seconds).
    #[arg(long, env, global = true, help_heading = "Filter")]
    pub end_time: Option<i64>,

    /// Number of concurrent workers. Default: 16.
    #[arg(long, env, global = true, default_value_t = DEFAULT_WORKER_SIZE, help_heading = "Performance")]
    pub worker_size: u16,

    /// Maximum API requests per second to the storage service.
    #[arg(long, env, global = true, help_heading = "Performance")]
    pub rate_limit_api: Option<u32>,

    /// Item channel queue size between the listing and the workers. Default: 1000.
    #[arg(long, env, global = true, default_value_t = DEFAULT_OBJECT_LISTING_QUEUE_SIZE, help_heading = "Performance")]
    pub object_listing_queue_size: u32,

    /// Verbosity level. -q (quiet), default (normal), -v, -vv, -vvv.
    #[command(flatten)]
    pub verbosity: Verbosity<WarnLevel>,

    /// Output logs in JSON format.
    #[arg(long, env, global = true, default_value_t = DEFAULT_JSON_TRACING, help_heading = "Logging")]
    pub json_tracing: bool,

    /// Enable AWS SDK tracing.
    #[arg(long, env, global = true, default_value_t = DEFAULT_AWS_SDK_TRACING, help_heading = "Logging")]
    pub aws_sdk_tracing: bool,

    /// Enable tracing span events.
    #[arg(long, env, global = true, default_value_t = DEFAULT_SPAN_EVENTS_TRACING, help_heading = "Logging")]
    pub span_events_tracing: bool,

    /// Disable colored output in logs.
    #[arg(long, env, global = true, default_value_t = DEFAULT_DISABLE_COLOR_TRACING, help_heading = "Logging")]
    pub disable_color_tracing: bool,

    /// Maximum attempts of the AWS SDK for one request. Default: 3.
    #[arg(long, env, global = true, default_value_t = DEFAULT_AWS_MAX_ATTEMPTS, help_heading = "Retry")]
    pub aws_max_attempts: u32,

    /// Initial backoff in milliseconds of the AWS SDK retries. Default: 100.
    #[arg(long, env, global = true, default_value_t = DEFAULT_INITIAL_BACKOFF_MILLISECONDS, help_heading = "Retry")]
    pub initial_backoff_milliseconds: u64,

    /// Attempts of every remote call of a batch (after SDK retries). Default: 10.
    #[arg(long, env, global = true, default_value_t = DEFAULT_RETRY_TIMES, help_heading = "Retry")]
    pub retry_times: u32,

    /// Interval in ms between attempts of a remote call. Default: 0.
    #[arg(long, env, global = true, default_value_t = DEFAULT_RETRY_INTERVAL_MILLISECONDS, help_heading = "Retry")]
    pub retry_interval_milliseconds: u64,

    /// Overall operation timeout in milliseconds.
    #[arg(long, env, global = true, help_heading = "Timeout")]
    pub operation_timeout_milliseconds: Option<u64>,

    /// Per-attempt operation timeout in milliseconds.
    #[arg(long, env, global = true, help_heading = "Timeout")]
    pub operation_attempt_timeout_milliseconds: Option<u64>,

    /// Connection timeout in milliseconds.
    #[arg(long, env, global = true, help_heading = "Timeout")]
    pub connect_timeout_milliseconds: Option<u64>,

    /// Read timeout in milliseconds.
    #[arg(long, env, global = true, help_heading = "Timeout")]
    pub read_timeout_milliseconds: Option<u64>,

    /// AWS profile. If not set, uses the default credential chain.
    #[arg(long, env, global = true, value_parser = NonEmptyStringValueParser::new(), help_heading = "AWS")]
    pub profile: Option<String>,

    /// AWS access key ID.
    #[arg(long, env, global = true, conflicts_with = "profile", value_parser = NonEmptyStringValueParser::new(), help_heading = "AWS")]
    pub access_key: Option<String>,

    /// AWS secret access key.
    #[arg(long, env, global = true, requires = "access_key", value_parser = NonEmptyStringValueParser::new(), help_heading = "AWS")]
    pub secret_key: Option<String>,

    /// AWS session token.
    #[arg(long, env, global = true, requires = "access_key", value_parser = NonEmptyStringValueParser::new(), help_heading = "AWS")]
    pub session_token: Option<String>,

    /// AWS region.
    #[arg(long, env, global = true, value_parser = NonEmptyStringValueParser::new(), help_heading = "AWS")]
    pub region: Option<String>,

    /// Custom S3-compatible endpoint URL (e.g. MinIO).
    #[arg(long, env, global = true, value_parser = check_scheme, help_heading = "AWS")]
    pub endpoint_url: Option<String>,

    /// Force path-style access (required for some S3-compatible services).
    #[arg(long, env, global = true, default_value_t = DEFAULT_FORCE_PATH_STYLE, help_heading = "AWS")]
    pub force_path_style: bool,

    /// Enable S3 Transfer Acceleration.
    #[arg(long, env, global = true, default_value_t = DEFAULT_ACCELERATE, help_heading = "AWS")]
    pub accelerate: bool,

    /// Enable requester-pays.
    #[arg(long, env, global = true, default_value_t = DEFAULT_REQUEST_PAYER, help_heading = "AWS")]
    pub request_payer: bool,

    /// Disable stalled stream protection.
    #[arg(long, env, global = true, default_value_t = DEFAULT_DISABLE_STALLED_STREAM_PROTECTION, help_heading = "AWS")]
    pub disable_stalled_stream_protection: bool,

    /// Max keys per listing request (1-1000). Default: 1000.
    #[arg(long, env, global = true, default_value_t = DEFAULT_MAX_KEYS, help_heading = "Advanced")]
    pub max_keys: i32,

    /// Generate shell completions.
    #[arg(long, env, help_heading = "Advanced")]
    pub auto_complete_shell: Option<clap_complete::shells::Shell>,

    /// Raw command line, kept for the order of --include/--exclude and the report header.
    #[arg(skip)]
    pub raw_args: Vec<String>,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Command {
    /// List objects under a prefix.
    Ls {
        /// s3://<BUCKET_NAME>[/prefix]
        #[arg(value_parser = check_s3_url)]
        url: String,
    },

    /// Set the canned ACL of an object, or of every object under a prefix with -r.
    SetAcl {
        /// s3://<BUCKET_NAME>[/key]
        #[arg(value_parser = check_s3_url)]
        url: String,

        /// private, public-read, public-read-write, authenticated-read,
        /// bucket-owner-read or bucket-owner-full-control
        #[arg(value_parser = ObjectAcl::from_str)]
        acl: ObjectAcl,
    },

    /// Set the headers and user metadata of an object, or of every object under a prefix with -r.
    SetMeta(SetMetaArgs),

    /// Remove objects, multipart uploads, or a bucket.
    Rm(RmArgs),

    /// Copy between a local path and a bucket, or between buckets.
    Cp(CpArgs),
}

#[derive(Args, Clone, Debug)]
pub struct SetMetaArgs {
    /// s3://<BUCKET_NAME>[/key]
    #[arg(value_parser = check_s3_url)]
    pub url: String,

    /// Headers as Name:Value#Name2:Value2. User metadata names start with x-amz-meta-.
    #[arg(long_help = r#"Headers as Name:Value#Name2:Value2.
Supported names: Content-Type, Cache-Control, Content-Disposition,
Content-Encoding, Content-Language and x-amz-meta-*.
Without --update or --delete, the given headers replace all current ones.
With --delete, only the names are used (values may be omitted)."#)]
    pub headers: String,

    /// Merge the given headers into the current ones.
    #[arg(short = 'u', long, conflicts_with = "delete")]
    pub update: bool,

    /// Delete the named headers.
    #[arg(long)]
    pub delete: bool,
}

#[derive(Args, Clone, Debug)]
pub struct RmArgs {
    /// s3://<BUCKET_NAME>[/prefix]
    #[arg(value_parser = check_s3_url)]
    pub url: String,

    /// Remove multipart uploads instead of objects.
    #[arg(short = 'm', long, conflicts_with = "all_type")]
    pub multipart: bool,

    /// Remove objects and multipart uploads.
    #[arg(short = 'a', long)]
    pub all_type: bool,

    /// Remove the bucket itself once it is empty.
    #[arg(short = 'b', long)]
    pub bucket: bool,
}

#[derive(Args, Clone, Debug)]
pub struct CpArgs {
    /// Local path or s3://<BUCKET_NAME>[/prefix]
    #[arg(value_parser = NonEmptyStringValueParser::new())]
    pub source: String,

    /// Local path or s3://<BUCKET_NAME>[/prefix]
    #[arg(value_parser = NonEmptyStringValueParser::new())]
    pub target: String,

    /// Skip items whose destination exists and is not older than the source.
    #[arg(short = 'u', long)]
    pub update: bool,

    /// Items at least this large are transferred in parts. Default: 100MiB.
    #[arg(long, env, default_value = DEFAULT_BIGFILE_THRESHOLD, value_parser = check_human_bytes, help_heading = "Transfer")]
    pub bigfile_threshold: String,

    /// Part size of multipart transfers. Default: computed from the item size.
    #[arg(long, env, value_parser = check_human_bytes, help_heading = "Transfer")]
    pub part_size: Option<String>,

    /// Concurrent parts of one multipart transfer. Default: computed from the part count.
    #[arg(long, env, help_heading = "Transfer")]
    pub parallel: Option<usize>,

    /// Bytes per second of one transfer.
    #[arg(long, env, value_parser = check_human_bytes, help_heading = "Transfer")]
    pub max_speed: Option<String>,

    /// Directory of multipart checkpoint files.
    #[arg(long, env, default_value = DEFAULT_CHECKPOINT_DIR, help_heading = "Transfer")]
    pub checkpoint_dir: PathBuf,

    /// Snapshot file of completed items; items recorded unchanged are skipped.
    #[arg(long, env, help_heading = "Transfer")]
    pub snapshot_path: Option<PathBuf>,

    /// Download only the share of keys owned by this instance, as <index>:<total>.
    #[arg(long, env, value_parser = parse_partition, help_heading = "Transfer")]
    pub partition_download: Option<PartitionSpec>,

    /// Download only this byte range of the object, as <start>-<end> or <start>-.
    #[arg(long, value_parser = ByteRange::from_str, help_heading = "Transfer")]
    pub range: Option<ByteRange>,
}

/// Parse command-line arguments into a `CLIArgs` struct.
///
/// # Example
///
/// ```
/// use s3bulk_rs::config::args::{Command, parse_from_args};
///
/// let args = vec!["s3bulk", "rm", "s3://my-bucket/tmp/", "-r", "-a"];
/// let cli_args = parse_from_args(args).unwrap();
/// assert!(cli_args.recursive);
/// assert!(matches!(cli_args.command, Some(Command::Rm(ref rm)) if rm.all_type));
/// ```
pub fn parse_from_args<I, T>(args: I) -> Result<CLIArgs, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let args: Vec<OsString> = args.into_iter().map(Into::into).collect();
    let mut cli_args = CLIArgs::try_parse_from(args.clone())?;
    cli_args.raw_args = args
        .iter()
        .map(|arg| arg.to_string_lossy().to_string())
        .collect();

    Ok(cli_args)
}

/// Parse arguments and build a Config in one step.
pub fn build_config_from_args<I, T>(args: I) -> Result<Config, String>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli_args = parse_from_args(args).map_err(|e| e.to_string())?;
    Config::try_from(cli_args)
}

impl CLIArgs {
    fn validate(&self) -> Result<(), String> {
        if self.worker_size == 0 {
            return Err(ERROR_MESSAGE_WORKER_SIZE_ZERO.to_string());
        }
        if self.object_listing_queue_size == 0 {
            return Err(ERROR_MESSAGE_OBJECT_LISTING_QUEUE_SIZE_ZERO.to_string());
        }
        if !(1..=MAX_KEYS_LIMIT).contains(&self.max_keys) {
            return Err(ERROR_MESSAGE_MAX_KEYS_OUT_OF_RANGE.to_string());
        }
        if let (Some(start), Some(end)) = (self.start_time, self.end_time) {
            if end < start {
                return Err(ERROR_MESSAGE_TIME_WINDOW.to_string());
            }
        }
        Ok(())
    }

    /// Include/exclude rules in command-line order. Falls back to the parsed
    /// vectors (all includes, then all excludes) when the raw arguments are
    /// unknown.
    fn build_filter_chain(&self) -> Result<FilterChain, String> {
        let chain = if self.raw_args.is_empty() {
            let mut tokens = Vec::new();
            for pattern in &self.include {
                tokens.push(format!("--include={pattern}"));
            }
            for pattern in &self.exclude {
                tokens.push(format!("--exclude={pattern}"));
            }
            parse_filter_args(tokens)
        } else {
            parse_filter_args(&self.raw_args)
        };

        chain.map_err(|e| e.to_string())
    }

    fn build_filter_config(&self, recursive: bool) -> Result<FilterConfig, String> {
        let chain = self.build_filter_chain()?;
        if !chain.is_empty() && !recursive {
            return Err(ERROR_MESSAGE_FILTER_NOT_RECURSIVE.to_string());
        }

        Ok(FilterConfig {
            chain,
            start_time: self.start_time,
            end_time: self.end_time,
        })
    }

    fn build_client_config(&self) -> ClientConfig {
        let credential = if let Some(ref profile) = self.profile {
            S3Credentials::Profile(profile.clone())
        } else if let Some(ref access_key) = self.access_key {
            S3Credentials::Credentials {
                access_keys: AccessKeys {
                    access_key: access_key.clone(),
                    secret_access_key: self.secret_key.clone().unwrap_or_default(),
                    session_token: self.session_token.clone(),
                },
            }
        } else {
            S3Credentials::FromEnvironment
        };

        let request_payer = if self.request_payer {
            Some(RequestPayer::Requester)
        } else {
            None
        };

        ClientConfig {
            credential,
            region: self.region.clone(),
            endpoint_url: self.endpoint_url.clone(),
            force_path_style: self.force_path_style,
            accelerate: self.accelerate,
            request_payer,
            retry_config: RetryConfig {
                aws_max_attempts: self.aws_max_attempts,
                initial_backoff_milliseconds: self.initial_backoff_milliseconds,
            },
            cli_timeout_config: CLITimeoutConfig {
                operation_timeout_milliseconds: self.operation_timeout_milliseconds,
                operation_attempt_timeout_milliseconds: self.operation_attempt_timeout_milliseconds,
                connect_timeout_milliseconds: self.connect_timeout_milliseconds,
                read_timeout_milliseconds: self.read_timeout_milliseconds,
            },
            disable_stalled_stream_protection: self.disable_stalled_stream_protection,
            request_checksum_calculation: RequestChecksumCalculation::WhenRequired,
        }
    }

    fn build_tracing_config(&self) -> Option<TracingConfig> {
        let log_level = self.verbosity.log_level()?;

        Some(TracingConfig {
            tracing_level: log_level,
            json_tracing: self.json_tracing,
            aws_sdk_tracing: self.aws_sdk_tracing,
            span_events_tracing: self.span_events_tracing,
            disable_color_tracing: self.disable_color_tracing,
        })
    }

    fn command_line(&self) -> String {
        self.raw_args.join(" ")
    }
}

/// What a command resolves to before the shared options are applied.
struct CommandPlan {
    operation: OperationConfig,
    source: StoragePath,
    target: Option<StoragePath>,
    recursive: bool,
    transfer_config: TransferConfig,
}

impl CommandPlan {
    fn new(operation: OperationConfig, url: &str, recursive: bool) -> Result<Self, String> {
        Ok(CommandPlan {
            operation,
            source: parse_storage_path(url)?,
            target: None,
            recursive,
            transfer_config: TransferConfig::default(),
        })
    }
}

fn plan_set_meta(args: &SetMetaArgs, recursive: bool) -> Result<CommandPlan, String> {
    let directive = if args.update {
        MetadataDirective::Update
    } else if args.delete {
        MetadataDirective::Delete
    } else {
        MetadataDirective::Replace
    };
    let metadata = ObjectMetadata::parse_headers(&args.headers)?;
    if directive != MetadataDirective::Replace && metadata.is_empty() {
        return Err("set-meta --update/--delete needs at least one header.".to_string());
    }

    CommandPlan::new(
        OperationConfig::SetMeta {
            directive,
            metadata,
        },
        &args.url,
        recursive,
    )
}

fn plan_rm(args: &RmArgs, recursive: bool) -> Result<CommandPlan, String> {
    let mut targets = if args.all_type {
        RemoveTarget::ALL_TYPE
    } else if args.multipart {
        RemoveTarget::MULTIPART
    } else {
        RemoveTarget::OBJECT
    };

    let plan = CommandPlan::new(OperationConfig::List, &args.url, recursive)?;
    if args.bucket {
        if !plan.source.prefix().is_empty() {
            return Err(ERROR_MESSAGE_RM_BUCKET_WITH_KEY.to_string());
        }
        if !recursive {
            if args.all_type || args.multipart {
                return Err(ERROR_MESSAGE_RM_BUCKET_NOT_RECURSIVE.to_string());
            }
            // `rm s3://bucket -b` only removes the (already empty) bucket.
            targets = RemoveTarget::empty();
        }
        targets |= RemoveTarget::BUCKET;
    }

    Ok(CommandPlan {
        operation: OperationConfig::Remove { targets },
        ..plan
    })
}

fn plan_cp(args: &CpArgs, recursive: bool) -> Result<CommandPlan, String> {
    let source = parse_storage_path(&args.source)?;
    let target = parse_storage_path(&args.target)?;
    if !source.is_s3() && !target.is_s3() {
        return Err(ERROR_MESSAGE_CP_LOCAL_TO_LOCAL.to_string());
    }
    let is_download = source.is_s3() && !target.is_s3();

    if args.range.is_some() && (recursive || !is_download) {
        return Err(ERROR_MESSAGE_RANGE.to_string());
    }
    if args.partition_download.is_some() && !is_download {
        return Err(ERROR_MESSAGE_PARTITION.to_string());
    }

    let part_size = args
        .part_size
        .as_deref()
        .map(parse_human_bytes)
        .transpose()?;
    if part_size == Some(0) {
        return Err(ERROR_MESSAGE_PART_SIZE_ZERO.to_string());
    }
    if args.parallel == Some(0) {
        return Err(ERROR_MESSAGE_PARALLEL_ZERO.to_string());
    }

    Ok(CommandPlan {
        operation: OperationConfig::Copy,
        source,
        target: Some(target),
        recursive,
        transfer_config: TransferConfig {
            update: args.update,
            bigfile_threshold: parse_human_bytes(&args.bigfile_threshold)?,
            part_size,
            parallel: args.parallel,
            max_speed: args
                .max_speed
                .as_deref()
                .map(parse_human_bytes)
                .transpose()?
                .filter(|speed| *speed > 0),
            checkpoint_dir: args.checkpoint_dir.clone(),
            snapshot_path: args.snapshot_path.clone(),
            partition: args.partition_download,
            range: args.range,
        },
    })
}

impl TryFrom<CLIArgs> for Config {
    type Error = String;

    fn try_from(args: CLIArgs) -> Result<Self, Self::Error> {
        let tracing_config = args.build_tracing_config();

        // Only completions are generated; nothing else is needed.
        if args.auto_complete_shell.is_some() {
            return Ok(Config {
                tracing_config,
                auto_complete_shell: args.auto_complete_shell,
                ..Config::default()
            });
        }

        args.validate()?;

        let Some(command) = args.command.as_ref() else {
            return Err(ERROR_MESSAGE_NO_COMMAND.to_string());
        };
        let plan = match command {
            // ls always walks the whole prefix.
            Command::Ls { url } => CommandPlan::new(OperationConfig::List, url, true)?,
            Command::SetAcl { url, acl } => {
                CommandPlan::new(OperationConfig::SetAcl { acl: *acl }, url, args.recursive)?
            }
            Command::SetMeta(set_meta) => plan_set_meta(set_meta, args.recursive)?,
            Command::Rm(rm) => plan_rm(rm, args.recursive)?,
            Command::Cp(cp) => plan_cp(cp, args.recursive)?,
        };

        let filter_config = args.build_filter_config(plan.recursive)?;
        if args.only_current_dir && !plan.recursive {
            return Err(ERROR_MESSAGE_ONLY_CURRENT_DIR_NOT_RECURSIVE.to_string());
        }

        Ok(Config {
            operation: plan.operation,
            source: plan.source,
            target: plan.target,
            recursive: plan.recursive,
            only_current_dir: args.only_current_dir,
            continue_on_error: plan.recursive && !args.stop_on_error,
            force: args.force,
            show_no_progress: args.show_no_progress,
            client_config: Some(args.build_client_config()),
            force_retry_config: ForceRetryConfig {
                retry_times: args.retry_times,
                retry_interval_milliseconds: args.retry_interval_milliseconds,
            },
            tracing_config,
            worker_size: args.worker_size,
            rate_limit_api: args.rate_limit_api,
            object_listing_queue_size: args.object_listing_queue_size,
            max_keys: args.max_keys,
            filter_config,
            transfer_config: plan.transfer_config,
            output_dir: args.output_dir.clone(),
            command_line: args.command_line(),
            auto_complete_shell: None,
        })
    }
}
