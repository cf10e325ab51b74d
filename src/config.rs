//! Runtime configuration.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Runtime configuration data.
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    /// The server's logging config, which uses Rust's `env_logger` directives.
    #[serde(default)]
    pub rust_log: String,

    /// The path to the database on disk.
    #[serde(default = "crate::database::default_data_path")]
    pub storage_data_path: String,

    /// The wall-clock budget, in seconds, granted to a single script execution.
    #[serde(default = "Config::default_engine_timeout_seconds")]
    pub engine_timeout_seconds: u64,
}

impl Config {
    /// Create a new config instance.
    ///
    /// Currently this routine just parses the runtime environment and builds the application
    /// config from that. In the future, this may take into account an optional config file as
    /// well.
    #[allow(clippy::new_without_default)]
    pub fn new() -> Result<Self> {
        let config: Config = envy::from_env().context("error building config from env")?;
        Ok(config)
    }

    /// The wall-clock budget granted to a single script execution.
    pub fn engine_timeout(&self) -> Duration {
        Duration::from_secs(self.engine_timeout_seconds)
    }

    fn default_engine_timeout_seconds() -> u64 {
        1
    }

    /// Create a test config backed by a temporary storage dir.
    #[cfg(test)]
    pub fn new_test() -> Result<(std::sync::Arc<Self>, tempfile::TempDir)> {
        let tmpdir = tempfile::tempdir().context("error creating temp dir for test")?;
        let config = Config {
            rust_log: String::new(),
            storage_data_path: tmpdir.path().display().to_string(),
            engine_timeout_seconds: 1,
        };
        Ok((std::sync::Arc::new(config), tmpdir))
    }
}
