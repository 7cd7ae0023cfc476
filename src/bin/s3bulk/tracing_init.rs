// Installs the tracing subscriber of the CLI binary.

use std::env;
use std::io::IsTerminal;

use tracing_subscriber::fmt::format::FmtSpan;

use s3bulk_rs::config::TracingConfig;

const EVENT_FILTER_ENV_VAR: &str = "RUST_LOG";

pub fn init_tracing(config: &TracingConfig) {
    let fmt_span = if config.span_events_tracing {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    // Logs go to stderr so that `ls` output stays clean on stdout.
    let subscriber_builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .compact()
        .with_ansi(!config.disable_color_tracing && std::io::stderr().is_terminal())
        .with_span_events(fmt_span);

    let (event_filter, show_target) = event_filter(config, env::var(EVENT_FILTER_ENV_VAR).ok());
    let subscriber_builder = subscriber_builder
        .with_env_filter(event_filter)
        .with_target(show_target);
    if config.json_tracing {
        subscriber_builder.json().init();
    } else {
        subscriber_builder.init();
    }
}

/// The event filter and whether targets are shown. SDK tracing wins over
/// `RUST_LOG`; without either only this crate logs, without targets.
fn event_filter(config: &TracingConfig, rust_log: Option<String>) -> (String, bool) {
    let level = config.tracing_level;
    let own = format!("s3bulk_rs={level},s3bulk={level}");

    if config.aws_sdk_tracing {
        let sdk = format!("aws_smithy_runtime={level},aws_config={level},aws_sigv4={level}");
        return (format!("{own},{sdk}"), true);
    }
    match rust_log {
        Some(filter) => (filter, true),
        None => (own, false),
    }
}
