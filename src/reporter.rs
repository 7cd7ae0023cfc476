//! Error report file written while a batch continues past item errors.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::Local;
use tracing::{debug, warn};

pub const REPORT_PREFIX: &str = "s3bulk_report_";
pub const REPORT_SUFFIX: &str = ".report";

/// Sink for continuable item errors.
pub trait Reporter: Send + Sync {
    fn report_error(&self, message: &str);

    /// The one-time notice pointing at the report, returned for the first
    /// call after an error was reported and `None` afterwards.
    fn prompt(&self, e: &anyhow::Error) -> Option<String>;

    /// Closes the report. An empty report is removed together with the
    /// output directory when it was created for it.
    fn clear(&self) -> Result<()>;
}

struct ReportFile {
    file: Option<File>,
    written: bool,
    prompted: bool,
}

pub struct FileReporter {
    path: PathBuf,
    output_dir: PathBuf,
    created_dir: bool,
    state: Mutex<ReportFile>,
}

impl FileReporter {
    /// Creates `<output_dir>/s3bulk_report_<YYYYMMDD_HHMMSS>.report` with
    /// `# <comment>` as its first line.
    pub fn new(output_dir: &Path, comment: &str) -> Result<Self> {
        let created_dir = !output_dir.exists();
        fs::create_dir_all(output_dir)
            .with_context(|| format!("failed to create output directory {}", output_dir.display()))?;

        let path = output_dir.join(format!(
            "{REPORT_PREFIX}{}{REPORT_SUFFIX}",
            Local::now().format("%Y%m%d_%H%M%S")
        ));
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Create reporter file error: {}", path.display()))?;
        writeln!(file, "# {comment}")
            .with_context(|| format!("failed to write {}", path.display()))?;

        debug!(path = %path.display(), "report file created.");
        Ok(Self {
            path,
            output_dir: output_dir.to_path_buf(),
            created_dir,
            state: Mutex::new(ReportFile {
                file: Some(file),
                written: false,
                prompted: false,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn has_errors(&self) -> bool {
        self.state.lock().unwrap().written
    }
}

impl Reporter for FileReporter {
    fn report_error(&self, message: &str) {
        let mut state = self.state.lock().unwrap();
        let Some(file) = state.file.as_mut() else {
            return;
        };
        let line = format!(
            "[Error] {} {message}",
            Local::now().format("%Y/%m/%d %H:%M:%S")
        );
        if let Err(e) = writeln!(file, "{line}") {
            warn!(path = %self.path.display(), "failed to write report: {e}");
            return;
        }
        state.written = true;
    }

    fn prompt(&self, e: &anyhow::Error) -> Option<String> {
        let mut state = self.state.lock().unwrap();
        if !state.written || state.prompted {
            return None;
        }
        state.prompted = true;
        Some(format!(
            "Error occurs, message: {e}. See more information in file: {}",
            self.path.display()
        ))
    }

    fn clear(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.file = None;
        if state.written {
            return Ok(());
        }

        if self.path.exists() {
            fs::remove_file(&self.path)
                .with_context(|| format!("failed to remove {}", self.path.display()))?;
        }
        if self.created_dir && self.output_dir.exists() {
            fs::remove_dir_all(&self.output_dir).with_context(|| {
                format!("failed to remove {}", self.output_dir.display())
            })?;
        }
        Ok(())
    }
}
