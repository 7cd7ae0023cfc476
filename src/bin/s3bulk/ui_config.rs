// Decides what the binary prints besides logs.

use s3bulk_rs::config::{Config, OperationConfig};

/// Whether to show the live progress line.
///
/// Returns `false` when:
/// - `show_no_progress` is set
/// - the command is `ls` (its listing owns stdout)
/// - verbosity is above Warn or JSON logging is enabled
pub fn is_progress_indicator_needed(config: &Config) -> bool {
    if config.show_no_progress || config.operation == OperationConfig::List {
        return false;
    }

    let Some(tracing_config) = config.tracing_config.as_ref() else {
        return true;
    };
    if log::Level::Warn < tracing_config.tracing_level {
        return false;
    }

    !tracing_config.json_tracing
}

/// Whether to print the finish message and the elapsed time.
pub fn is_show_result_needed(config: &Config) -> bool {
    if config.show_no_progress {
        return false;
    }

    config
        .tracing_config
        .as_ref()
        .is_none_or(|tracing_config| !tracing_config.json_tracing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use s3bulk_rs::config::TracingConfig;

    fn make_config(show_no_progress: bool, tracing_config: Option<TracingConfig>) -> Config {
        Config {
            operation: OperationConfig::Copy,
            show_no_progress,
            tracing_config,
            ..Config::for_target("test-bucket", "")
        }
    }

    fn tracing_config(tracing_level: log::Level, json_tracing: bool) -> Option<TracingConfig> {
        Some(TracingConfig {
            tracing_level,
            json_tracing,
            aws_sdk_tracing: false,
            span_events_tracing: false,
            disable_color_tracing: false,
        })
    }

    #[test]
    fn progress_indicator_needed_default() {
        let config = make_config(false, None);
        assert!(is_progress_indicator_needed(&config));
    }

    #[test]
    fn progress_indicator_suppressed_by_show_no_progress() {
        let config = make_config(true, None);
        assert!(!is_progress_indicator_needed(&config));
    }

    #[test]
    fn progress_indicator_suppressed_for_ls() {
        let config = Config {
            operation: OperationConfig::List,
            ..make_config(false, None)
        };
        assert!(!is_progress_indicator_needed(&config));
    }

    #[test]
    fn progress_indicator_suppressed_by_json_tracing() {
        let config = make_config(false, tracing_config(log::Level::Warn, true));
        assert!(!is_progress_indicator_needed(&config));
    }

    #[test]
    fn progress_indicator_suppressed_by_high_verbosity() {
        let config = make_config(false, tracing_config(log::Level::Info, false));
        assert!(!is_progress_indicator_needed(&config));
    }

    #[test]
    fn progress_indicator_shown_at_warn_level() {
        let config = make_config(false, tracing_config(log::Level::Warn, false));
        assert!(is_progress_indicator_needed(&config));
    }

    #[test]
    fn show_result_follows_quiet_and_json_settings() {
        assert!(is_show_result_needed(&make_config(false, None)));
        assert!(!is_show_result_needed(&make_config(true, None)));
        assert!(!is_show_result_needed(&make_config(
            false,
            tracing_config(log::Level::Warn, true)
        )));
        assert!(is_show_result_needed(&make_config(
            false,
            tracing_config(log::Level::Info, false)
        )));
    }
}
