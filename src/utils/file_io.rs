use std::env;
use std::fs::create_dir_all;
use std::fs::File;
use std::fs::OpenOptions;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::path::PathBuf;

use rand::Rng;
use tracing::debug;
use tracing::error;

use crate::constants::DATA_DIR_SUFFIX_LEN;
use crate::Result;
use crate::SetupError;

pub(crate) fn bad_path(
    path: &Path,
    reason: impl Into<String>,
) -> SetupError {
    SetupError::BadPath {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

pub fn create_parent_dir_if_not_exist(path: &Path) -> Result<()> {
    if let Some(parent_dir) = path.parent() {
        if !parent_dir.as_os_str().is_empty() && !parent_dir.exists() {
            if let Err(e) = create_dir_all(parent_dir) {
                error!("Failed to create directory {:?}: {:?}", parent_dir, e);
                return Err(e.into());
            }
        }
    }
    Ok(())
}

pub fn open_file_for_append(path: &Path) -> Result<File> {
    create_parent_dir_if_not_exist(path)?;
    let file = OpenOptions::new().append(true).create(true).open(path)?;
    Ok(file)
}

/// Makes sure `path` is a directory, creating it (but not its parents) when
/// missing.
pub(crate) fn ensure_directory(path: &Path) -> Result<()> {
    if path.exists() {
        if !path.is_dir() {
            return Err(bad_path(path, "exists but is not a directory").into());
        }
        return Ok(());
    }

    match path.parent() {
        Some(parent) if parent.as_os_str().is_empty() || parent.is_dir() => {}
        _ => {
            return Err(
                bad_path(path, "the enclosing directory does not exist or is not a directory").into(),
            )
        }
    }
    std::fs::create_dir(path)?;
    Ok(())
}

/// Creates `<parent>/<name>_<random lowercase letters>`, drawing new letters
/// until the path is unused.
pub(crate) fn create_unique_dir(
    name: &str,
    parent: &Path,
) -> Result<PathBuf> {
    if !parent.is_dir() {
        return Err(bad_path(parent, "not a directory").into());
    }

    let mut rng = rand::thread_rng();
    loop {
        let suffix: String = (0..DATA_DIR_SUFFIX_LEN)
            .map(|_| rng.gen_range(b'a'..=b'z') as char)
            .collect();
        let candidate = parent.join(format!("{name}_{suffix}"));
        if candidate.exists() {
            continue;
        }
        match std::fs::create_dir(&candidate) {
            Ok(()) => {
                debug!("created data directory {:?}", candidate);
                return Ok(candidate);
            }
            // lost a race with another generator
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e.into()),
        }
    }
}

pub(crate) fn is_executable(path: &Path) -> bool {
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Resolves the binary under test. Paths with a separator are taken as given,
/// bare names are searched in `PATH`.
pub fn resolve_executable(path: &Path) -> Result<PathBuf> {
    if path.components().count() > 1 || path.is_absolute() {
        if is_executable(path) {
            return Ok(path.to_path_buf());
        }
        return Err(SetupError::ExecutableNotFound(path.to_path_buf()).into());
    }

    if let Some(search_path) = env::var_os("PATH") {
        for dir in env::split_paths(&search_path) {
            let candidate = dir.join(path);
            if is_executable(&candidate) {
                return Ok(candidate);
            }
        }
    }
    Err(SetupError::ExecutableNotFound(path.to_path_buf()).into())
}
