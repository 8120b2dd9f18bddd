//! Platform paths for Taskerino data, settings and logs.

use std::path::PathBuf;
use taskerino_core::TaskerinoError;
use taskerino_core::config::Settings;

const APP_DIR: &str = "taskerino";

/// Errors that can occur during path resolution.
#[derive(Debug)]
pub enum PathError {
    /// Home directory could not be determined.
    HomeDirNotFound,
}

impl std::fmt::Display for PathError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PathError::HomeDirNotFound => write!(f, "Cannot find home directory"),
        }
    }
}

impl std::error::Error for PathError {}

impl From<PathError> for TaskerinoError {
    fn from(err: PathError) -> Self {
        TaskerinoError::config(err.to_string())
    }
}

/// Path resolution for Taskerino.
///
/// # Directory Structure
///
/// ```text
/// ~/.config/taskerino/          # Config directory
/// └── settings.toml             # Application settings
///
/// ~/.local/share/taskerino/     # Data directory
/// ├── storage/                  # Chunked entity store
/// │   ├── sessions/
/// │   │   ├── index.json
/// │   │   └── session-{id}.json
/// │   └── screenshots/
/// └── logs/
///     └── taskerino.log.YYYY-MM-DD
/// ```
pub struct TaskerinoPaths;

impl TaskerinoPaths {
    /// Returns the configuration directory (e.g. `~/.config/taskerino/`).
    pub fn config_dir() -> Result<PathBuf, PathError> {
        dirs::config_dir()
            .map(|dir| dir.join(APP_DIR))
            .ok_or(PathError::HomeDirNotFound)
    }

    /// Returns the data directory (e.g. `~/.local/share/taskerino/`).
    pub fn data_dir() -> Result<PathBuf, PathError> {
        dirs::data_dir()
            .map(|dir| dir.join(APP_DIR))
            .ok_or(PathError::HomeDirNotFound)
    }

    pub fn settings_file() -> Result<PathBuf, PathError> {
        Ok(Self::config_dir()?.join("settings.toml"))
    }

    pub fn log_dir() -> Result<PathBuf, PathError> {
        Ok(Self::data_dir()?.join("logs"))
    }

    /// Root of the chunked entity store.
    ///
    /// # Returns
    ///
    /// - `storage.rootDir` when set in the settings
    /// - `{data_dir}/storage` otherwise
    pub fn storage_dir(settings: &Settings) -> Result<PathBuf, PathError> {
        match &settings.storage.root_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(Self::data_dir()?.join("storage")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_dir_prefers_settings() {
        let mut settings = Settings::default();
        settings.storage.root_dir = Some(PathBuf::from("/tmp/taskerino-test"));
        assert_eq!(
            TaskerinoPaths::storage_dir(&settings).unwrap(),
            PathBuf::from("/tmp/taskerino-test")
        );
    }

    #[test]
    fn test_paths_share_app_dir() {
        if let Ok(file) = TaskerinoPaths::settings_file() {
            assert!(file.ends_with("taskerino/settings.toml"));
        }
        if let Ok(dir) = TaskerinoPaths::log_dir() {
            assert!(dir.ends_with("taskerino/logs"));
        }
    }
}
