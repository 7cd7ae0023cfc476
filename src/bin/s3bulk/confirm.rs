// Confirmation before a recursive rm.

use std::io::{BufRead, IsTerminal, Write};

use anyhow::{Result, anyhow};
use s3bulk_rs::S3bulkError;
use s3bulk_rs::config::{Config, OperationConfig};

/// Reads the user's answer; swapped out in tests.
pub trait PromptHandler {
    fn read_confirmation(&self, question: &str) -> Result<String>;

    /// Whether both stdin and stdout are a terminal.
    fn is_interactive(&self) -> bool;
}

pub struct StdioPromptHandler;

impl PromptHandler for StdioPromptHandler {
    fn read_confirmation(&self, question: &str) -> Result<String> {
        print!("{question}");
        std::io::stdout().flush()?;

        let mut input = String::new();
        std::io::stdin().lock().read_line(&mut input)?;
        Ok(input.trim().to_string())
    }

    fn is_interactive(&self) -> bool {
        std::io::stdin().is_terminal() && std::io::stdout().is_terminal()
    }
}

/// Asks before a recursive `rm` unless `--force` is set, JSON logging is on
/// or nobody is there to answer. Anything but `y`/`yes` cancels.
pub fn confirm_if_necessary(config: &Config, prompt_handler: &dyn PromptHandler) -> Result<()> {
    if !matches!(config.operation, OperationConfig::Remove { .. }) || !config.recursive {
        return Ok(());
    }
    if config.force {
        return Ok(());
    }
    if config.tracing_config.is_some_and(|t| t.json_tracing) || !prompt_handler.is_interactive() {
        return Ok(());
    }

    let question = format!(
        "Do you really mean to remove recursively everything under {}? (y or N): ",
        config.source
    );
    let answer = prompt_handler.read_confirmation(&question)?;
    if answer.eq_ignore_ascii_case("y") || answer.eq_ignore_ascii_case("yes") {
        return Ok(());
    }

    Err(anyhow!(S3bulkError::Cancelled))
}
