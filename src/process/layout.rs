use std::path::Path;
use std::path::PathBuf;

use crate::constants::DEFAULT_LOG_FILE;
use crate::constants::LEGACY_LOG_FILE;
use crate::file_io::bad_path;
use crate::file_io::create_unique_dir;
use crate::Result;

/// Where a process keeps its files, and what it is called
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DataLayout {
    pub(crate) name: String,
    pub(crate) data_dir: PathBuf,
    /// Log file already present in a reused data directory
    pub(crate) existing_log: Option<PathBuf>,
}

/// Resolves the requested name into a data directory.
///
/// - `None`: `generated_name` in a fresh directory under `output_folder`
/// - `"."`: `generated_name` in a fresh directory under the current directory
/// - contains a path separator: a path relative to `output_folder`; an
///   existing data directory is reused, any other existing directory becomes
///   the parent of a fresh one, a missing path is used as given
/// - anything else: that name in a fresh directory under `output_folder`
pub(crate) fn resolve_layout(
    requested: Option<&str>,
    generated_name: impl FnOnce() -> String,
    output_folder: &Path,
) -> Result<DataLayout> {
    match requested {
        None => {
            let name = generated_name();
            let data_dir = create_unique_dir(&name, output_folder)?;
            Ok(DataLayout {
                name,
                data_dir,
                existing_log: None,
            })
        }
        Some(".") => {
            let name = generated_name();
            let cwd = std::env::current_dir()?;
            let data_dir = create_unique_dir(&name, &cwd)?;
            Ok(DataLayout {
                name,
                data_dir,
                existing_log: None,
            })
        }
        Some(path) if path.contains(std::path::MAIN_SEPARATOR) => {
            // an absolute path survives the join
            let data_dir = output_folder.join(path);
            let name = data_dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| bad_path(&data_dir, "has no final component"))?;

            if data_dir.exists() {
                if !data_dir.is_dir() {
                    return Err(bad_path(&data_dir, "exists but is not a directory").into());
                }
                let existing_log = [LEGACY_LOG_FILE, DEFAULT_LOG_FILE]
                    .iter()
                    .map(|f| data_dir.join(f))
                    .find(|p| p.is_file());
                if existing_log.is_some() {
                    return Ok(DataLayout {
                        name,
                        data_dir,
                        existing_log,
                    });
                }
                // folder holding multiple server data folders
                let data_dir = create_unique_dir(&name, &data_dir)?;
                return Ok(DataLayout {
                    name,
                    data_dir,
                    existing_log: None,
                });
            }

            match data_dir.parent() {
                Some(parent) if parent.is_dir() => Ok(DataLayout {
                    name,
                    data_dir,
                    existing_log: None,
                }),
                _ => Err(bad_path(
                    &data_dir,
                    "the enclosing directory did not exist or was not a directory",
                )
                .into()),
            }
        }
        Some(name) => {
            let data_dir = create_unique_dir(name, output_folder)?;
            Ok(DataLayout {
                name: name.to_string(),
                data_dir,
                existing_log: None,
            })
        }
    }
}

/// Name passed to `create --server-name`; the server rejects dashes
pub(crate) fn desired_name(name: &str) -> String {
    name.replace('-', "_")
}
