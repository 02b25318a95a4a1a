//! User settings persistence
//!
//! Stored in ~/.config/tunegrab/settings.json. Every field has a default, so a
//! missing file or a file written by an older version still loads.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::catalog::QualityTier;
use crate::scheduler::SchedulerConfig;

/// Persistent user settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Base URL of the catalog API
    pub api_url: String,
    /// Quality requested when none is given on the command line
    pub quality: QualityTier,
    /// Songs downloaded in parallel within a batch (1-10)
    pub concurrency: usize,
    /// Attempts per song in a batch
    pub max_rounds: u32,
    /// Jobs allowed to run at the same time
    pub max_active_jobs: usize,
    /// Where finished tracks are written
    pub output_dir: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        let scheduler = SchedulerConfig::default();
        Self {
            api_url: "http://localhost:6969".to_string(),
            quality: QualityTier::default(),
            concurrency: scheduler.concurrency,
            max_rounds: scheduler.max_rounds,
            max_active_jobs: scheduler.max_active_jobs,
            output_dir: default_output_dir(),
        }
    }
}

impl Settings {
    /// Load settings from the default location
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No settings found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {:?}", path))?;

        let settings: Self =
            serde_json::from_str(&contents).with_context(|| "Failed to parse settings")?;

        debug!("Loaded settings from {:?}", path);
        Ok(settings)
    }

    /// Save settings to the default location
    pub fn save(&self) -> Result<PathBuf> {
        let path = Self::config_path()?;
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory {:?}", parent))?;
        }

        let contents =
            serde_json::to_string_pretty(self).context("Failed to serialize settings")?;

        fs::write(path, contents)
            .with_context(|| format!("Failed to write settings to {:?}", path))?;

        debug!("Saved settings to {:?}", path);
        Ok(())
    }

    /// Get the settings file path
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        Ok(config_dir.join("tunegrab").join("settings.json"))
    }

    /// Scheduler limits with out-of-range values pulled back into bounds
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            max_active_jobs: self.max_active_jobs,
            concurrency: self.concurrency,
            max_rounds: self.max_rounds,
        }
        .clamped()
    }
}

fn default_output_dir() -> PathBuf {
    dirs::audio_dir()
        .or_else(dirs::download_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tunegrab")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.quality, QualityTier::Lossless);
        assert_eq!(settings.concurrency, 3);
        assert_eq!(settings.max_rounds, 5);
        assert_eq!(settings.max_active_jobs, 1);
        assert!(settings.output_dir.ends_with("tunegrab"));
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let temp = TempDir::new().unwrap();
        let settings = Settings::load_from(&temp.path().join("settings.json")).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_save_and_load() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("settings.json");

        let settings = Settings {
            api_url: "http://music.local:8080/api".to_string(),
            quality: QualityTier::Exhigh,
            concurrency: 6,
            max_rounds: 2,
            max_active_jobs: 2,
            output_dir: PathBuf::from("/music/incoming"),
        };
        settings.save_to(&path).unwrap();

        assert_eq!(Settings::load_from(&path).unwrap(), settings);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("settings.json");
        fs::write(&path, r#"{"quality": "hires", "concurrency": 8}"#).unwrap();

        let settings = Settings::load_from(&path).unwrap();
        assert_eq!(settings.quality, QualityTier::Hires);
        assert_eq!(settings.concurrency, 8);
        assert_eq!(settings.max_rounds, 5);
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("settings.json");
        fs::write(&path, "{not json").unwrap();
        assert!(Settings::load_from(&path).is_err());
    }

    #[test]
    fn test_scheduler_config_is_clamped() {
        let settings = Settings {
            concurrency: 50,
            max_rounds: 0,
            max_active_jobs: 0,
            ..Settings::default()
        };
        let config = settings.scheduler_config();
        assert_eq!(config.concurrency, 10);
        assert_eq!(config.max_rounds, 1);
        assert_eq!(config.max_active_jobs, 1);
    }
}
