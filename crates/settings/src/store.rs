//! File-backed settings store

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use harbor_core::DEFAULT_LISTEN_PORT;

use crate::{default_settings_path, Result, Settings, SettingsError};

/// Durable settings storage
///
/// `load` never fails for a missing file; `save` commits the whole snapshot
/// or nothing.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at the default settings path
    pub fn open_default() -> Self {
        Self::new(default_settings_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the last persisted snapshot, or defaults on first run
    pub fn load(&self) -> Result<Settings> {
        if !self.path.exists() {
            info!("No settings at {:?}, using defaults", self.path);
            return Ok(Settings::default());
        }

        let content = fs::read_to_string(&self.path).map_err(SettingsError::ReadError)?;
        let mut settings: Settings =
            serde_json::from_str(&content).map_err(SettingsError::ParseError)?;

        if settings.listener.port == 0 {
            warn!(
                "Persisted listen port is 0, falling back to {}",
                DEFAULT_LISTEN_PORT
            );
            settings.listener.port = DEFAULT_LISTEN_PORT;
        }

        info!("Loaded settings from {:?}", self.path);
        Ok(settings)
    }

    /// Persist a snapshot atomically
    ///
    /// The snapshot is written to a sibling temp file which is then renamed
    /// over the target.
    pub fn save(&self, settings: &Settings) -> Result<()> {
        settings.validate()?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(SettingsError::CreateDirError)?;
            }
        }

        let content = serde_json::to_string_pretty(settings).map_err(SettingsError::ParseError)?;
        let tmp_path = self.temp_path();

        if let Err(e) = write_synced(&tmp_path, content.as_bytes()) {
            let _ = fs::remove_file(&tmp_path);
            return Err(SettingsError::WriteError(e));
        }

        if let Err(e) = fs::rename(&tmp_path, &self.path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(SettingsError::WriteError(e));
        }

        info!("Saved settings to {:?}", self.path);
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "settings.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}
