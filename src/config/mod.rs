// Configuration for shelfplay
// Loaded from config.toml, with defaults written out the first time

use crate::library::IdentityStrategy;
use crate::playback::PlayerOptions;
use anyhow::{Context, Result};
use dirs::{config_dir, data_dir};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub scanner: ScannerConfig,
    pub playback: PlaybackConfig,
    pub ui: UiConfig,
    pub log_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub database_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Derive book ids from paths so they survive rescans.
    pub stable_ids: bool,
    pub read_tags: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    pub progress_interval_ms: u64,
    pub volume: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UiConfig {
    pub tick_rate_ms: u64,
}

fn app_dir(base: Option<PathBuf>) -> PathBuf {
    base.unwrap_or_else(|| PathBuf::from(".")).join("shelfplay")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: app_dir(data_dir()).join("shelfplay.db"),
        }
    }
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            stable_ids: false,
            read_tags: true,
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            progress_interval_ms: 1000,
            volume: 0.8,
        }
    }
}

impl Default for UiConfig {
    fn default() -> Self {
        Self { tick_rate_ms: 250 }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            scanner: ScannerConfig::default(),
            playback: PlaybackConfig::default(),
            ui: UiConfig::default(),
            log_dir: app_dir(data_dir()).join("logs"),
        }
    }
}

impl ScannerConfig {
    pub fn identity(&self) -> IdentityStrategy {
        if self.stable_ids {
            IdentityStrategy::PathDerived
        } else {
            IdentityStrategy::Random
        }
    }
}

impl PlaybackConfig {
    pub fn player_options(&self) -> PlayerOptions {
        PlayerOptions {
            auto_handle_interruptions: true,
            volume: self.volume.clamp(0.0, 1.0),
            // a zero interval would spin the audio thread
            progress_interval: Duration::from_millis(self.progress_interval_ms.max(50)),
        }
    }
}

impl Config {
    /// Loads the default config file, writing defaults if it does not exist yet.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("parsing {}", path.display()))?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;

        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let dir = config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?
            .join("shelfplay");

        Ok(dir.join("config.toml"))
    }

    pub fn tick_rate(&self) -> Duration {
        Duration::from_millis(self.ui.tick_rate_ms.max(10))
    }
}
