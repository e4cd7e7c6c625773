use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;
use tracing_subscriber::fmt::MakeWriter;

pub(crate) const LOG_FILE_NAME: &str = "schemascout.log";
const LOG_LEVEL_ENV: &str = "SCHEMASCOUT_LOG";

/// Tees formatted log lines to stderr and an optional run log file.
#[derive(Clone)]
pub(crate) struct RunLogMakeWriter {
    pub file: Option<Arc<Mutex<File>>>,
    pub suppress_stderr: bool,
}

impl<'a> MakeWriter<'a> for RunLogMakeWriter {
    type Writer = RunLogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        RunLogWriter {
            file: self.file.clone(),
            suppress_stderr: self.suppress_stderr,
        }
    }
}

pub(crate) struct RunLogWriter {
    file: Option<Arc<Mutex<File>>>,
    suppress_stderr: bool,
}

impl Write for RunLogWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if let Some(file) = &self.file {
            let mut file = file.lock().unwrap_or_else(|e| e.into_inner());
            file.write_all(buf)?;
        }
        if !self.suppress_stderr {
            std::io::stderr().write_all(buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        if let Some(file) = &self.file {
            file.lock().unwrap_or_else(|e| e.into_inner()).flush()?;
        }
        if !self.suppress_stderr {
            std::io::stderr().flush()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct LogOptions {
    pub verbose: bool,
    pub quiet: bool,
    pub output_dir: Option<PathBuf>,
}

pub(crate) fn resolve_level(verbose: bool, env_value: Option<&str>) -> Level {
    if verbose {
        return Level::DEBUG;
    }
    env_value
        .and_then(|v| Level::from_str(v.trim()).ok())
        .unwrap_or(Level::INFO)
}

fn open_run_log(dir: &Path) -> Result<File> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output directory {}", dir.display()))?;
    let path = dir.join(LOG_FILE_NAME);
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("Failed to open run log {}", path.display()))
}

/// Install the global subscriber. A second call is a no-op.
pub(crate) fn init(options: &LogOptions) -> Result<()> {
    let level = resolve_level(
        options.verbose,
        std::env::var(LOG_LEVEL_ENV).ok().as_deref(),
    );
    let file = match &options.output_dir {
        Some(dir) => Some(Arc::new(Mutex::new(open_run_log(dir)?))),
        None => None,
    };
    let make_writer = RunLogMakeWriter {
        file,
        suppress_stderr: options.quiet,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_ansi(false)
        .with_writer(make_writer)
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();
    Ok(())
}
