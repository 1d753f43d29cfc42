//! Logging setup for applications embedding the client.
//!
//! The client itself only emits `tracing` events. Applications that have no
//! subscriber of their own can install one from a [`LoggingConfig`]:
//!
//! ```rust,no_run
//! use simlink_client::LoggingConfig;
//!
//! // Stderr, no guard needed
//! LoggingConfig::stderr().init()?;
//!
//! // File logging, the guard must be held until exit
//! let _guard = LoggingConfig::file("/var/log/simlink").init()?;
//! # Ok::<(), std::io::Error>(())
//! ```
//!
//! `RUST_LOG` takes precedence over the configured level.

use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

/// Where log lines go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogOutput {
    /// Standard error.
    #[default]
    Stderr,
    /// Rolling files under [`LoggingConfig::directory`].
    File,
    /// Do not install a subscriber.
    None,
}

/// How often log files roll over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogRotation {
    /// New file every hour.
    Hourly,
    /// New file every day.
    #[default]
    Daily,
    /// Single file.
    Never,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive, such as `info` or `simlink_client=debug`.
    pub level: String,
    /// Emit JSON lines instead of human readable text.
    pub structured: bool,
    /// Output target.
    pub output: LogOutput,
    /// Directory for file output.
    pub directory: Option<PathBuf>,
    /// File name prefix for file output.
    pub file_prefix: String,
    /// Rollover policy for file output.
    pub rotation: LogRotation,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            structured: false,
            output: LogOutput::Stderr,
            directory: None,
            file_prefix: "simlink".to_string(),
            rotation: LogRotation::Daily,
        }
    }
}

/// Keeps the non-blocking file writer alive; pending lines are flushed on drop.
#[derive(Debug)]
pub struct LoggingGuard {
    _file_guard: WorkerGuard,
}

impl LoggingConfig {
    /// Human readable logs on stderr at `info`.
    pub fn stderr() -> Self {
        Self::default()
    }

    /// JSON logs in daily files under `directory`.
    pub fn file(directory: impl Into<PathBuf>) -> Self {
        Self {
            structured: true,
            output: LogOutput::File,
            directory: Some(directory.into()),
            ..Self::default()
        }
    }

    /// Installs a global subscriber for this configuration.
    ///
    /// Returns a guard for file output, which must be held for the lifetime of
    /// the program.
    ///
    /// # Errors
    ///
    /// Fails if file output has no directory, the directory cannot be
    /// created, or a global subscriber is already installed.
    pub fn init(&self) -> io::Result<Option<LoggingGuard>> {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level));

        match self.output {
            LogOutput::None => Ok(None),
            LogOutput::Stderr => {
                self.init_with_writer(filter, io::stderr)?;
                Ok(None)
            }
            LogOutput::File => {
                let dir = self.directory.as_deref().ok_or_else(|| {
                    io::Error::new(
                        io::ErrorKind::InvalidInput,
                        "File logging requires a directory (set `directory` or use LoggingConfig::file())",
                    )
                })?;
                let (writer, guard) = tracing_appender::non_blocking(self.appender(dir)?);
                self.init_with_writer(filter, writer)?;
                Ok(Some(LoggingGuard { _file_guard: guard }))
            }
        }
    }

    fn appender(&self, dir: &Path) -> io::Result<tracing_appender::rolling::RollingFileAppender> {
        std::fs::create_dir_all(dir)?;
        Ok(match self.rotation {
            LogRotation::Hourly => tracing_appender::rolling::hourly(dir, &self.file_prefix),
            LogRotation::Daily => tracing_appender::rolling::daily(dir, &self.file_prefix),
            LogRotation::Never => tracing_appender::rolling::never(dir, &self.file_prefix),
        })
    }

    fn init_with_writer<W>(&self, filter: EnvFilter, writer: W) -> io::Result<()>
    where
        W: for<'w> fmt::MakeWriter<'w> + Send + Sync + 'static,
    {
        let subscriber = tracing_subscriber::registry().with(filter);
        let result = if self.structured {
            subscriber
                .with(fmt::layer().json().with_writer(writer))
                .try_init()
        } else {
            subscriber.with(fmt::layer().with_writer(writer)).try_init()
        };
        result.map_err(|e| io::Error::other(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets() {
        let config = LoggingConfig::stderr();
        assert_eq!(config.level, "info");
        assert_eq!(config.output, LogOutput::Stderr);
        assert!(config.directory.is_none());

        let config = LoggingConfig::file("/tmp/simlink-logs");
        assert!(config.structured);
        assert_eq!(config.output, LogOutput::File);
        assert_eq!(
            config.directory.as_deref(),
            Some(Path::new("/tmp/simlink-logs"))
        );
    }

    #[test]
    fn test_file_output_requires_directory() {
        let config = LoggingConfig {
            output: LogOutput::File,
            ..LoggingConfig::default()
        };
        let err = config.init().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_none_output_installs_nothing() {
        let config = LoggingConfig {
            output: LogOutput::None,
            ..LoggingConfig::default()
        };
        assert!(config.init().unwrap().is_none());
    }
}
