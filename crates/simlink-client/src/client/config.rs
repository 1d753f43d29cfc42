//! Client configuration
//!
//! [`ClientConfig`] can be built in code, through
//! [`ClientBuilder`](super::builder::ClientBuilder), or loaded from a TOML,
//! YAML or JSON file. Environment variables with the `SIMLINK` prefix override
//! file settings, using `__` as the separator: `SIMLINK__MAX_RETRIES=5` or
//! `SIMLINK__LOGGING__LEVEL=debug`.

use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use simlink_transport_traits::DataPeriod;

use crate::error::{ClientError, Result};
use crate::logging::LoggingConfig;

/// Default environment variable prefix.
pub const ENV_PREFIX: &str = "SIMLINK";

/// Connection lifecycle and dispatch configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Name the client announces to the simulator
    pub client_name: String,

    /// Timeout for a single connect attempt in milliseconds
    pub connection_timeout_ms: u64,

    /// Delay between failed connect attempts in milliseconds
    pub retry_interval_ms: u64,

    /// Delay before reconnecting after a session ended, in milliseconds
    pub reconnect_delay_ms: u64,

    /// How long shutdown waits for subscriptions to close, in milliseconds
    pub shutdown_timeout_ms: u64,

    /// Failed connect attempts tolerated per connect cycle (0 = unlimited)
    pub max_retries: u32,

    /// Reconnect after the simulator closes the stream
    pub auto_reconnect: bool,

    /// Default subscription queue capacity
    pub buffer_size: usize,

    /// Cadence of the polled simulator state
    pub poll_period: DataPeriod,

    /// Logging setup used by applications that call `logging.init()`
    pub logging: LoggingConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_name: "simlink".to_string(),
            connection_timeout_ms: 5_000, // 5 seconds
            retry_interval_ms: 2_000,     // 2 seconds
            reconnect_delay_ms: 5_000,    // 5 seconds
            shutdown_timeout_ms: 10_000,  // 10 seconds
            max_retries: 0,
            auto_reconnect: true,
            buffer_size: 256,
            poll_period: DataPeriod::Second,
            logging: LoggingConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Loads configuration from a file, with `SIMLINK__*` environment overrides.
    ///
    /// The format follows the extension: `.toml`, `.yaml`/`.yml` or `.json`.
    ///
    /// ```rust,no_run
    /// use simlink_client::ClientConfig;
    ///
    /// let config = ClientConfig::from_file("simlink.toml")?;
    /// # Ok::<(), simlink_client::ClientError>(())
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Config`] if the file is missing, has an unknown
    /// extension, fails to parse or fails [`validate`](Self::validate).
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_file_with_prefix(path, ENV_PREFIX)
    }

    /// Like [`from_file`](Self::from_file) with a custom environment prefix.
    pub fn from_file_with_prefix(path: impl AsRef<Path>, env_prefix: &str) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ClientError::invalid_config(format!(
                "configuration file not found: {}",
                path.display()
            )));
        }

        let format = match path.extension().and_then(|s| s.to_str()) {
            Some("toml") => FileFormat::Toml,
            Some("yaml" | "yml") => FileFormat::Yaml,
            Some("json") => FileFormat::Json,
            _ => {
                return Err(ClientError::invalid_config(
                    "unsupported configuration format, use .toml, .yaml, .yml or .json",
                ));
            }
        };

        let name = path
            .to_str()
            .ok_or_else(|| ClientError::invalid_config("configuration path is not valid UTF-8"))?;

        let config: Self = Config::builder()
            .add_source(File::new(name, format))
            .add_source(Self::environment(env_prefix))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from `SIMLINK__*` environment variables alone.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Config`] if a variable fails to parse or the
    /// result fails [`validate`](Self::validate).
    pub fn from_env() -> Result<Self> {
        let config: Self = Config::builder()
            .add_source(Self::environment(ENV_PREFIX))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    fn environment(prefix: &str) -> Environment {
        Environment::with_prefix(prefix)
            .separator("__")
            .try_parsing(true)
    }

    /// Checks the values that would otherwise break the lifecycle.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Config`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.client_name.trim().is_empty() {
            return Err(ClientError::invalid_config("client_name must not be empty"));
        }
        if self.buffer_size == 0 {
            return Err(ClientError::invalid_config("buffer_size must be non-zero"));
        }
        if self.connection_timeout_ms == 0 {
            return Err(ClientError::invalid_config(
                "connection_timeout_ms must be non-zero",
            ));
        }
        if self.shutdown_timeout_ms == 0 {
            return Err(ClientError::invalid_config(
                "shutdown_timeout_ms must be non-zero",
            ));
        }
        Ok(())
    }

    /// Timeout for a single connect attempt.
    pub const fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    /// Delay between failed connect attempts.
    pub const fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    /// Delay before reconnecting.
    pub const fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Shutdown drain timeout.
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.connection_timeout(), Duration::from_secs(5));
        assert_eq!(config.retry_interval(), Duration::from_secs(2));
        assert_eq!(config.max_retries, 0);
        assert!(config.auto_reconnect);
        assert_eq!(config.buffer_size, 256);
        assert_eq!(config.poll_period, DataPeriod::Second);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_buffer() {
        let config = ClientConfig {
            buffer_size: 0,
            ..ClientConfig::default()
        };
        assert!(matches!(config.validate(), Err(ClientError::Config(_))));
    }

    #[test]
    fn test_from_toml_file_keeps_unset_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "client_name = \"cockpit\"\nmax_retries = 3\npoll_period = \"sim_frame\"\n\n[logging]\nlevel = \"debug\""
        )
        .unwrap();

        let config = ClientConfig::from_file(file.path()).unwrap();
        assert_eq!(config.client_name, "cockpit");
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.poll_period, DataPeriod::SimFrame);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.reconnect_delay_ms, 5_000);
    }

    #[test]
    fn test_unknown_extension_rejected() {
        let file = tempfile::Builder::new().suffix(".ini").tempfile().unwrap();
        assert!(matches!(
            ClientConfig::from_file(file.path()),
            Err(ClientError::Config(_))
        ));
    }

    #[test]
    fn test_missing_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = ClientConfig::from_file(dir.path().join("absent.toml")).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
