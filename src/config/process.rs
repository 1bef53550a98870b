use std::path::PathBuf;
use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use super::non_zero;
use crate::Error;
use crate::Result;

/// Launch and supervision parameters shared by every supervised process
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ProcessConfig {
    /// Server binary under test. A bare file name is looked up in `PATH`.
    /// Default: "rethinkdb"
    #[serde(default = "default_executable_path")]
    pub executable_path: PathBuf,

    /// Prepended to every command line, e.g. `["valgrind", "--quiet"]`
    #[serde(default)]
    pub command_prefix: Vec<String>,

    /// Appended to every `serve`/`proxy` command line
    #[serde(default)]
    pub extra_options: Vec<String>,

    /// Passed as `--server-tag` when a data directory is created
    #[serde(default)]
    pub server_tags: Vec<String>,

    /// Host used when other processes `--join` this one
    /// Default: "localhost"
    #[serde(default = "default_host")]
    pub host: String,

    /// Default `--bind` value unless overridden in extra options
    /// Default: "all"
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Default `--cache-size` for servers, in megabytes
    #[serde(default = "default_cache_size_mb")]
    pub cache_size_mb: u64,

    /// Upper bound for readiness, identity and log-appearance waits
    /// Default: 30s
    #[serde(default = "default_startup_timeout_ms")]
    pub startup_timeout_ms: u64,

    /// Poll interval of `wait_until_ready`
    #[serde(default = "default_ready_poll_interval_ms")]
    pub ready_poll_interval_ms: u64,

    /// Poll interval of identity accessors (ports, name, uuid)
    #[serde(default = "default_value_poll_interval_ms")]
    pub value_poll_interval_ms: u64,

    /// Poll interval for newly appended log lines
    #[serde(default = "default_log_poll_interval_ms")]
    pub log_poll_interval_ms: u64,

    /// Poll interval while waiting for the log file to be created
    #[serde(default = "default_log_appear_poll_interval_ms")]
    pub log_appear_poll_interval_ms: u64,

    /// How long `stop()` waits after SIGTERM before escalating to SIGKILL
    /// Default: 20s
    #[serde(default = "default_stop_grace_period_ms")]
    pub stop_grace_period_ms: u64,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            executable_path: default_executable_path(),
            command_prefix: vec![],
            extra_options: vec![],
            server_tags: vec![],
            host: default_host(),
            bind: default_bind(),
            cache_size_mb: default_cache_size_mb(),
            startup_timeout_ms: default_startup_timeout_ms(),
            ready_poll_interval_ms: default_ready_poll_interval_ms(),
            value_poll_interval_ms: default_value_poll_interval_ms(),
            log_poll_interval_ms: default_log_poll_interval_ms(),
            log_appear_poll_interval_ms: default_log_appear_poll_interval_ms(),
            stop_grace_period_ms: default_stop_grace_period_ms(),
        }
    }
}

impl ProcessConfig {
    pub fn validate(&self) -> Result<()> {
        if self.executable_path.as_os_str().is_empty() {
            return Err(Error::Config(ConfigError::Message(
                "process.executable_path cannot be empty".into(),
            )));
        }

        if self.host.is_empty() {
            return Err(Error::Config(ConfigError::Message(
                "process.host cannot be empty".into(),
            )));
        }

        non_zero(self.cache_size_mb, "process.cache_size_mb")?;
        non_zero(self.startup_timeout_ms, "process.startup_timeout_ms")?;
        non_zero(self.ready_poll_interval_ms, "process.ready_poll_interval_ms")?;
        non_zero(self.value_poll_interval_ms, "process.value_poll_interval_ms")?;
        non_zero(self.log_poll_interval_ms, "process.log_poll_interval_ms")?;
        non_zero(
            self.log_appear_poll_interval_ms,
            "process.log_appear_poll_interval_ms",
        )?;
        non_zero(self.stop_grace_period_ms, "process.stop_grace_period_ms")?;

        Ok(())
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn ready_poll_interval(&self) -> Duration {
        Duration::from_millis(self.ready_poll_interval_ms)
    }

    pub fn value_poll_interval(&self) -> Duration {
        Duration::from_millis(self.value_poll_interval_ms)
    }

    pub fn log_poll_interval(&self) -> Duration {
        Duration::from_millis(self.log_poll_interval_ms)
    }

    pub fn log_appear_poll_interval(&self) -> Duration {
        Duration::from_millis(self.log_appear_poll_interval_ms)
    }

    pub fn stop_grace_period(&self) -> Duration {
        Duration::from_millis(self.stop_grace_period_ms)
    }
}

fn default_executable_path() -> PathBuf {
    PathBuf::from("rethinkdb")
}
fn default_host() -> String {
    "localhost".into()
}
fn default_bind() -> String {
    "all".into()
}
fn default_cache_size_mb() -> u64 {
    512
}
fn default_startup_timeout_ms() -> u64 {
    30_000
}
fn default_ready_poll_interval_ms() -> u64 {
    50
}
fn default_value_poll_interval_ms() -> u64 {
    100
}
fn default_log_poll_interval_ms() -> u64 {
    50
}
fn default_log_appear_poll_interval_ms() -> u64 {
    100
}
fn default_stop_grace_period_ms() -> u64 {
    20_000
}
