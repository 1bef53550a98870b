use std::path::PathBuf;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MetaclusterConfig {
    /// Working directory for all data directories of a run.
    /// Unset: a temporary directory removed at teardown.
    #[serde(default)]
    pub output_folder: Option<PathBuf>,

    /// Where the `cluster-harness` binary writes its own log
    /// Default: "./logs"
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

impl Default for MetaclusterConfig {
    fn default() -> Self {
        Self {
            output_folder: None,
            log_dir: default_log_dir(),
        }
    }
}

impl MetaclusterConfig {
    pub fn validate(&self) -> Result<()> {
        if let Some(folder) = &self.output_folder {
            if folder.as_os_str().is_empty() {
                return Err(Error::Config(ConfigError::Message(
                    "metacluster.output_folder cannot be empty".into(),
                )));
            }
            if folder.exists() && !folder.is_dir() {
                return Err(Error::Config(ConfigError::Message(format!(
                    "metacluster.output_folder {} is not a directory",
                    folder.display()
                ))));
            }
        }

        if self.log_dir.as_os_str().is_empty() {
            return Err(Error::Config(ConfigError::Message(
                "metacluster.log_dir cannot be empty".into(),
            )));
        }

        Ok(())
    }
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("./logs")
}
