use anyhow::Result;
use clap::CommandFactory;
use clap_complete::generate;
use tracing::{debug, error, trace};

use s3bulk_rs::config::Config;
use s3bulk_rs::config::args::{CLIArgs, parse_from_args};
use s3bulk_rs::{
    BatchPipeline, S3bulkError, create_pipeline_cancellation_token, exit_code_from_error,
};

mod confirm;
mod ctrl_c_handler;
pub mod indicator;
mod tracing_init;
pub mod ui_config;

/// s3bulk - bulk object operations for S3-compatible object storage.
///
/// This binary is a thin wrapper over the s3bulk-rs library.
#[cfg_attr(coverage_nightly, coverage(off))]
#[tokio::main]
async fn main() -> Result<()> {
    let config = load_config_exit_if_err();

    if let Some(shell) = config.auto_complete_shell {
        generate(
            shell,
            &mut CLIArgs::command(),
            "s3bulk",
            &mut std::io::stdout(),
        );

        return Ok(());
    }

    start_tracing_if_necessary(&config);

    trace!("config = {:?}", config);

    if let Err(e) = confirm::confirm_if_necessary(&config, &confirm::StdioPromptHandler) {
        if is_cancelled(&e) {
            debug!("cancelled by user.");
            return Ok(());
        }
        return Err(e);
    }

    let exit_code = run(config).await;
    if exit_code != 0 {
        std::process::exit(exit_code);
    }

    Ok(())
}

#[cfg_attr(coverage_nightly, coverage(off))]
fn load_config_exit_if_err() -> Config {
    let cli_args = match parse_from_args(std::env::args_os()) {
        Ok(cli_args) => cli_args,
        Err(e) => e.exit(),
    };

    match Config::try_from(cli_args) {
        Ok(config) => config,
        Err(error_message) => {
            clap::Error::raw(clap::error::ErrorKind::ValueValidation, error_message).exit()
        }
    }
}

fn start_tracing_if_necessary(config: &Config) -> bool {
    let Some(tracing_config) = config.tracing_config.as_ref() else {
        return false;
    };

    tracing_init::init_tracing(tracing_config);
    true
}

fn is_cancelled(e: &anyhow::Error) -> bool {
    matches!(e.downcast_ref::<S3bulkError>(), Some(S3bulkError::Cancelled))
}

/// Runs one batch and returns the process exit code.
async fn run(config: Config) -> i32 {
    let cancellation_token = create_pipeline_cancellation_token();
    ctrl_c_handler::spawn_ctrl_c_handler(cancellation_token.clone());

    let show_result = ui_config::is_show_result_needed(&config);
    let start_time = tokio::time::Instant::now();
    debug!(command = config.operation.name(), "batch pipeline start.");

    let mut pipeline = BatchPipeline::new(config.clone(), cancellation_token).await;
    let finished = create_pipeline_cancellation_token();
    let indicator_join_handle = indicator::show_indicator(
        pipeline.monitor(),
        ui_config::is_progress_indicator_needed(&config),
        finished.clone(),
    );

    let result = pipeline.run().await;
    finished.cancel();
    let _ = indicator_join_handle.await;

    let elapsed = start_time.elapsed().as_secs_f64();
    if show_result {
        if let Some(message) = pipeline.take_finish_message() {
            if !message.is_empty() {
                println!("{message}");
            }
        }
        if let Some(report_path) = pipeline.report_path() {
            println!("Error report: {}", report_path.display());
        }
        println!();
        println!("{elapsed:.6}(s) elapsed");
    }

    match result {
        Ok(()) => {
            debug!(duration_sec = elapsed, "s3bulk has been completed.");
            0
        }
        Err(e) if is_cancelled(&e) => {
            debug!("batch cancelled by user.");
            0
        }
        Err(e) => {
            error!(duration_sec = elapsed, "s3bulk failed: {e:#}");
            if !show_result {
                eprintln!("Error: {e:#}");
            }
            exit_code_from_error(&e)
        }
    }
}
