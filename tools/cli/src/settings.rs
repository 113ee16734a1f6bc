//! Per-vault CLI settings stored next to the manifest.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use gitvault_storage::GitHubConfig;
use gitvault_sync::{SyncConfig, SyncMode};

/// Settings file name inside the config directory.
pub const SETTINGS_FILE: &str = "gitvault.json";

fn default_sync_mode() -> SyncMode {
    SyncMode::Manual
}

/// Everything the CLI needs to sync one vault.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub github: GitHubConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default = "default_sync_mode")]
    pub sync_mode: SyncMode,
    #[serde(default)]
    pub sync_on_startup: bool,
}

impl Settings {
    /// Location of the settings file for `vault`.
    pub fn path(vault: &Path, config_dir: &str) -> PathBuf {
        vault.join(config_dir).join(SETTINGS_FILE)
    }

    /// Load settings for `vault`.
    pub fn load(vault: &Path, config_dir: &str) -> Result<Self> {
        let path = Self::path(vault, config_dir);
        let data = std::fs::read(&path).with_context(|| {
            format!(
                "No settings at {}; run `gitvault init` first",
                path.display()
            )
        })?;
        let mut settings: Settings = serde_json::from_slice(&data)
            .with_context(|| format!("Invalid settings file {}", path.display()))?;

        // The config directory is chosen on the command line.
        settings.sync.config_dir = config_dir.to_string();
        Ok(settings)
    }

    /// Engine configuration with the settings file itself excluded.
    pub fn sync_config(&self) -> SyncConfig {
        let mut sync = self.sync.clone();
        let own = format!("{}/{}", sync.config_dir.trim_end_matches('/'), SETTINGS_FILE);
        if !sync.excluded.contains(&own) {
            sync.excluded.push(own);
        }
        sync
    }

    /// Write settings for `vault`. The token is never persisted.
    pub fn save(&self, vault: &Path) -> Result<PathBuf> {
        let path = Self::path(vault, &self.sync.config_dir);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let mut stored = self.clone();
        stored.github.token.clear();
        let json = serde_json::to_string_pretty(&stored).context("Failed to serialize settings")?;
        std::fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }
}
