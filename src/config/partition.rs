use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use super::non_zero;
use crate::Error;
use crate::Result;

/// Location of the fault-injection daemon
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PartitionConfig {
    /// Default: "localhost"
    #[serde(default = "default_daemon_host")]
    pub daemon_host: String,

    /// Default: 46594
    #[serde(default = "default_daemon_port")]
    pub daemon_port: u16,

    /// Name searched for in the process table before the first request
    /// Default: "resunder"
    #[serde(default = "default_daemon_process_name")]
    pub daemon_process_name: String,

    /// Disable to talk to a daemon that runs under another name or host
    #[serde(default = "default_verify_daemon_process")]
    pub verify_daemon_process: bool,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            daemon_host: default_daemon_host(),
            daemon_port: default_daemon_port(),
            daemon_process_name: default_daemon_process_name(),
            verify_daemon_process: default_verify_daemon_process(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl PartitionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.daemon_port == 0 {
            return Err(Error::Config(ConfigError::Message(
                "partition.daemon_port must be greater than 0".into(),
            )));
        }

        if self.verify_daemon_process && self.daemon_process_name.is_empty() {
            return Err(Error::Config(ConfigError::Message(
                "partition.daemon_process_name cannot be empty when verification is on".into(),
            )));
        }

        non_zero(self.connect_timeout_ms, "partition.connect_timeout_ms")
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

fn default_daemon_host() -> String {
    "localhost".into()
}
fn default_daemon_port() -> u16 {
    46594
}
fn default_daemon_process_name() -> String {
    "resunder".into()
}
fn default_verify_daemon_process() -> bool {
    true
}
fn default_connect_timeout_ms() -> u64 {
    1000
}
