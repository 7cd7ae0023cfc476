//! Shared test utilities for the s3bulk library crate.

use crate::config::{ClientConfig, Config, ForceRetryConfig, RetryConfig};
use crate::types::{AccessKeys, S3Credentials};

/// Initialise a dummy tracing subscriber for tests.
///
/// Uses `try_init` so that only the first call in a process actually
/// installs the subscriber; subsequent calls are silently ignored.
pub(crate) fn init_dummy_tracing_subscriber() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("dummy=trace")
        .try_init();
}

/// Client settings pointing at a local endpoint with static credentials.
pub(crate) fn make_test_client_config() -> ClientConfig {
    ClientConfig {
        credential: S3Credentials::Credentials {
            access_keys: AccessKeys {
                access_key: "test_access_key".to_string(),
                secret_access_key: "test_secret_access_key".to_string(),
                session_token: None,
            },
        },
        region: Some("us-east-1".to_string()),
        endpoint_url: Some("https://localhost:9000".to_string()),
        force_path_style: true,
        retry_config: RetryConfig {
            aws_max_attempts: 1,
            initial_backoff_milliseconds: 0,
        },
        ..ClientConfig::default()
    }
}

/// A recursive batch over `s3://test-bucket/prefix/` with four workers and
/// no batch-level retry.
pub(crate) fn make_test_config() -> Config {
    Config {
        client_config: Some(make_test_client_config()),
        force_retry_config: ForceRetryConfig {
            retry_times: 1,
            retry_interval_milliseconds: 0,
        },
        worker_size: 4,
        ..Config::for_target("test-bucket", "prefix/")
    }
}
