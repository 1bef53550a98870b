//! Configuration management for the test harness.
//!
//! Provides hierarchical configuration loading and validation with:
//! - Default values as code base
//! - Environment variable overrides
//! - Configuration file support
//! - Section-wise validation
mod metacluster;
mod partition;
mod process;
pub use metacluster::*;
pub use partition::*;
pub use process::*;


use std::env;
use std::fmt::Debug;

use config::Config;
use config::ConfigError;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Environment prefix, e.g. `HARNESS__PROCESS__STARTUP_TIMEOUT_MS=5000`
const ENV_PREFIX: &str = "HARNESS";

/// Main configuration container for a harness run
///
/// Combines all section configurations with hierarchical override support:
/// 1. Default values from code implementation
/// 2. Configuration file specified by `CONFIG_PATH`
/// 3. Environment variables (highest priority)
#[derive(Serialize, Deserialize, Clone, Default)]
pub struct HarnessConfig {
    /// How supervised server/proxy processes are launched and awaited
    #[serde(default)]
    pub process: ProcessConfig,
    /// Where the fault-injection daemon lives
    #[serde(default)]
    pub partition: PartitionConfig,
    /// Working directory layout
    #[serde(default)]
    pub metacluster: MetaclusterConfig,
}

impl Debug for HarnessConfig {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("HarnessConfig")
            .field("executable_path", &self.process.executable_path)
            .field("daemon_port", &self.partition.daemon_port)
            .finish()
    }
}

impl HarnessConfig {
    /// Loads configuration from hierarchical sources without validation.
    ///
    /// Configuration sources are merged in the following order (later sources override earlier):
    /// 1. Type defaults (lowest priority)
    /// 2. Configuration file from `CONFIG_PATH` environment variable (if set)
    /// 3. Environment variables with `HARNESS__` prefix (highest priority)
    ///
    /// # Note
    /// Callers MUST call `validate()` once all overrides are applied.
    ///
    /// # Examples
    /// ```ignore
    /// std::env::set_var("HARNESS__PROCESS__EXECUTABLE_PATH", "/opt/db/bin/server");
    /// let cfg = HarnessConfig::new()?.validate()?;
    /// ```
    pub fn new() -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Ok(config_path) = env::var("CONFIG_PATH") {
            builder = builder.add_source(File::with_name(&config_path).required(true));
        }

        builder = builder.add_source(env_source());

        let config: Self = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Applies additional configuration overrides from file without validation.
    ///
    /// Merging order (later sources override earlier):
    /// 1. Current configuration values
    /// 2. New configuration file
    /// 3. Latest environment variables (highest priority)
    pub fn with_override_config(
        &self,
        path: &str,
    ) -> Result<Self> {
        let config: Self = Config::builder()
            .add_source(Config::try_from(self)?)
            .add_source(File::with_name(path))
            .add_source(env_source())
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Validates every section and returns the validated instance.
    ///
    /// # Errors
    /// - Zero timeouts or poll intervals
    /// - Zero daemon port
    /// - Empty executable path or a non-directory output folder
    pub fn validate(self) -> Result<Self> {
        self.process.validate()?;
        self.partition.validate()?;
        self.metacluster.validate()?;
        Ok(self)
    }
}

fn env_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .ignore_empty(true)
        .try_parsing(true)
        .list_separator(" ")
        .with_list_parse_key("process.command_prefix")
        .with_list_parse_key("process.extra_options")
        .with_list_parse_key("process.server_tags")
}

pub(super) fn non_zero(
    value: u64,
    name: &str,
) -> Result<()> {
    if value == 0 {
        return Err(Error::Config(ConfigError::Message(format!(
            "{name} must be greater than 0"
        ))));
    }
    Ok(())
}
