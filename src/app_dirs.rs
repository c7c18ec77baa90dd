//! Application directory helpers anchored to a single `.annolab` folder.
//!
//! Config and log files live under the OS config directory by default. The
//! `ANNOLAB_CONFIG_HOME` variable overrides the base for tests or portable
//! setups.

use std::{
    path::PathBuf,
    sync::{LazyLock, Mutex},
};

use directories::BaseDirs;
use thiserror::Error;

/// Name of the application directory that lives under the OS config root.
pub const APP_DIR_NAME: &str = ".annolab";
/// Environment variable that replaces the OS config root.
pub const CONFIG_HOME_ENV: &str = "ANNOLAB_CONFIG_HOME";

static CONFIG_BASE_OVERRIDE: LazyLock<Mutex<Option<PathBuf>>> = LazyLock::new(|| Mutex::new(None));

/// Errors that can occur while resolving or preparing application directories.
#[derive(Debug, Error)]
pub enum AppDirError {
    /// No suitable base config directory could be resolved.
    #[error("No suitable base config directory available for application files")]
    NoBaseDir,
    /// Failed to create the application directory.
    #[error("Failed to create application directory at {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Return the root `.annolab` directory, creating it if needed.
pub fn app_root_dir() -> Result<PathBuf, AppDirError> {
    let base = config_base_dir().ok_or(AppDirError::NoBaseDir)?;
    ensure_dir(base.join(APP_DIR_NAME))
}

/// Return the logs directory inside the `.annolab` root, creating it if needed.
pub fn logs_dir() -> Result<PathBuf, AppDirError> {
    ensure_dir(app_root_dir()?.join("logs"))
}

/// Default workspace for datasets, weights and job staging folders.
pub fn default_workspace_dir() -> Result<PathBuf, AppDirError> {
    ensure_dir(app_root_dir()?.join("workspace"))
}

/// Default folder holding uploaded images.
pub fn default_uploads_dir() -> Result<PathBuf, AppDirError> {
    ensure_dir(app_root_dir()?.join("uploads"))
}

fn ensure_dir(path: PathBuf) -> Result<PathBuf, AppDirError> {
    std::fs::create_dir_all(&path).map_err(|source| AppDirError::CreateDir {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}

fn config_base_dir() -> Option<PathBuf> {
    if let Some(path) = CONFIG_BASE_OVERRIDE
        .lock()
        .ok()
        .and_then(|guard| guard.clone())
    {
        return Some(path);
    }
    if let Ok(path) = std::env::var(CONFIG_HOME_ENV) {
        return Some(PathBuf::from(path));
    }
    BaseDirs::new().map(|dirs| dirs.config_dir().to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    /// Points the config base at a temporary folder until dropped.
    struct OverrideGuard;

    impl OverrideGuard {
        fn set(path: PathBuf) -> Self {
            *CONFIG_BASE_OVERRIDE
                .lock()
                .expect("config base override mutex poisoned") = Some(path);
            Self
        }
    }

    impl Drop for OverrideGuard {
        fn drop(&mut self) {
            if let Ok(mut guard) = CONFIG_BASE_OVERRIDE.lock() {
                *guard = None;
            }
        }
    }

    #[test]
    fn uses_override_for_root_dir() {
        let base = tempdir().unwrap();
        let _guard = OverrideGuard::set(base.path().to_path_buf());
        let root = app_root_dir().unwrap();
        assert_eq!(root, base.path().join(APP_DIR_NAME));
        assert!(root.is_dir());
        let workspace = default_workspace_dir().unwrap();
        assert!(workspace.starts_with(&root));
    }
}
