//! `settings.toml` persistence.

use crate::paths::TaskerinoPaths;
use crate::storage::AtomicTomlFile;
use std::path::{Path, PathBuf};
use taskerino_core::Result;
use taskerino_core::config::Settings;

/// Reads and writes [`Settings`] atomically.
///
/// A missing file yields the defaults; every write is validated first so an
/// invalid configuration never reaches disk.
pub struct SettingsStorage {
    file: AtomicTomlFile<Settings>,
}

impl SettingsStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            file: AtomicTomlFile::new(path.into()),
        }
    }

    /// Storage at the platform settings path.
    pub fn default_location() -> Result<Self> {
        Ok(Self::new(TaskerinoPaths::settings_file()?))
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Loads the settings, falling back to defaults when the file is absent.
    pub fn load(&self) -> Result<Settings> {
        let settings = match self.file.load()? {
            Some(settings) => settings,
            None => {
                tracing::debug!(
                    "[SettingsStorage] No settings at {}, using defaults",
                    self.path().display()
                );
                Settings::default()
            }
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn save(&self, settings: &Settings) -> Result<()> {
        settings.validate()?;
        self.file.save(settings)?;
        Ok(())
    }

    /// Read-modify-write under the file lock.
    ///
    /// # Returns
    ///
    /// The settings as written.
    pub fn update<F>(&self, f: F) -> Result<Settings>
    where
        F: FnOnce(&mut Settings),
    {
        let mut candidate = self.load()?;
        f(&mut candidate);
        candidate.validate()?;
        let written = self.file.update(Settings::default(), |settings| {
            *settings = candidate.clone();
        })?;
        Ok(written)
    }
}
