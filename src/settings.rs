//! Shared settings for the converter and repair CLIs.
//! Persisted in the platform-specific config directory via `directories::ProjectDirs`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

use crate::contrast::PixelMode;
use crate::convert::ConvertOptions;
use crate::repair::RepairPolicy;

/// Settings persistence errors.
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Cannot determine config directory")]
    NoConfigDir,
    #[error("Failed to access settings file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to serialize settings: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Application settings that can be saved and loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// Pixel mapping for converted images
    pub pixel_mode: PixelMode,
    /// Prefix for converted file names (empty for none)
    pub output_prefix: String,
    /// Output directory for converted files (empty for next to the source)
    pub output_dir: String,
    /// Resolution written when no existing value can be kept
    pub default_resolution: f64,
    /// Smallest plausible resolution
    pub min_resolution: f64,
    /// Largest plausible resolution
    pub max_resolution: f64,
    /// Largest plausible ratio between X and Y resolution
    pub max_aspect: f64,
}

impl Default for AppSettings {
    fn default() -> Self {
        let policy = RepairPolicy::default();
        Self {
            pixel_mode: PixelMode::Stretch,
            output_prefix: String::new(),
            output_dir: String::new(),
            default_resolution: policy.default_resolution,
            min_resolution: policy.min_resolution,
            max_resolution: policy.max_resolution,
            max_aspect: policy.max_aspect,
        }
    }
}

fn env_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring {}={:?}: not a valid value", name, raw);
            None
        }
    }
}

impl AppSettings {
    /// Get the config directory path.
    pub fn config_dir() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "micrograph-tools")
            .map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the settings file path.
    pub fn settings_path() -> Option<PathBuf> {
        Self::config_dir().map(|dir| dir.join("settings.json"))
    }

    /// Load settings from the config file, falling back to defaults.
    pub fn load() -> Self {
        Self::settings_path()
            .map(|path| Self::load_from(&path))
            .unwrap_or_default()
    }

    /// Load settings from `path`, falling back to defaults.
    pub fn load_from(path: &Path) -> Self {
        let mut loaded: Self = fs::read_to_string(path)
            .ok()
            .and_then(|content| match serde_json::from_str(&content) {
                Ok(settings) => Some(settings),
                Err(e) => {
                    warn!("Ignoring unreadable settings file {}: {}", path.display(), e);
                    None
                }
            })
            .unwrap_or_default();
        loaded.backfill();
        loaded
    }

    // Zeroed numbers come from hand-edited or older config files.
    fn backfill(&mut self) {
        let defaults = Self::default();
        if self.default_resolution <= 0.0 {
            self.default_resolution = defaults.default_resolution;
        }
        if self.min_resolution <= 0.0 {
            self.min_resolution = defaults.min_resolution;
        }
        if self.max_resolution <= 0.0 {
            self.max_resolution = defaults.max_resolution;
        }
        if self.max_aspect <= 0.0 {
            self.max_aspect = defaults.max_aspect;
        }
    }

    /// Save settings to the config file.
    pub fn save(&self) -> Result<(), SettingsError> {
        let path = Self::settings_path().ok_or(SettingsError::NoConfigDir)?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), SettingsError> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Override fields from environment variables.
    pub fn apply_env(&mut self) {
        if let Some(mode) = env_var("DM4_PIXEL_MODE") {
            self.pixel_mode = mode;
        }
        if let Ok(prefix) = std::env::var("DM4_OUTPUT_PREFIX") {
            self.output_prefix = prefix;
        }
        if let Some(value) = env_var("RESFIX_DEFAULT_RESOLUTION") {
            self.default_resolution = value;
        }
        if let Some(value) = env_var("RESFIX_MIN_RESOLUTION") {
            self.min_resolution = value;
        }
        if let Some(value) = env_var("RESFIX_MAX_RESOLUTION") {
            self.max_resolution = value;
        }
        if let Some(value) = env_var("RESFIX_MAX_ASPECT") {
            self.max_aspect = value;
        }
    }

    pub fn repair_policy(&self) -> RepairPolicy {
        RepairPolicy {
            default_resolution: self.default_resolution,
            min_resolution: self.min_resolution,
            max_resolution: self.max_resolution,
            max_aspect: self.max_aspect,
        }
    }

    pub fn convert_options(&self) -> ConvertOptions {
        let options = ConvertOptions::default()
            .with_mode(self.pixel_mode)
            .with_prefix(self.output_prefix.clone());
        if self.output_dir.is_empty() {
            options
        } else {
            options.with_destination(&self.output_dir)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let settings = AppSettings {
            pixel_mode: PixelMode::Float,
            output_prefix: "HAADF".to_string(),
            max_aspect: 4.0,
            ..AppSettings::default()
        };
        settings.save_to(&path).unwrap();
        assert_eq!(AppSettings::load_from(&path), settings);
    }

    #[test]
    fn test_backfill_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{"pixel_mode": "linear", "max_resolution": 0}"#).unwrap();

        let loaded = AppSettings::load_from(&path);
        assert_eq!(loaded.pixel_mode, PixelMode::Linear);
        assert_eq!(loaded.max_resolution, RepairPolicy::default().max_resolution);
        assert_eq!(loaded.default_resolution, 1.0);
    }

    #[test]
    fn test_missing_or_corrupt_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            AppSettings::load_from(&dir.path().join("absent.json")),
            AppSettings::default()
        );
        let path = dir.path().join("corrupt.json");
        fs::write(&path, "{ not json").unwrap();
        assert_eq!(AppSettings::load_from(&path), AppSettings::default());
    }

    #[test]
    fn test_env_overrides() {
        // Only this test reads these variables.
        std::env::set_var("DM4_PIXEL_MODE", "median");
        std::env::set_var("DM4_OUTPUT_PREFIX", "BF");
        std::env::set_var("RESFIX_MAX_ASPECT", "4");
        std::env::set_var("RESFIX_MIN_RESOLUTION", "not-a-number");

        let mut settings = AppSettings::default();
        settings.apply_env();

        for name in [
            "DM4_PIXEL_MODE",
            "DM4_OUTPUT_PREFIX",
            "RESFIX_MAX_ASPECT",
            "RESFIX_MIN_RESOLUTION",
        ] {
            std::env::remove_var(name);
        }

        assert_eq!(settings.pixel_mode, PixelMode::Median);
        assert_eq!(settings.output_prefix, "BF");
        assert_eq!(settings.max_aspect, 4.0);
        assert_eq!(settings.min_resolution, AppSettings::default().min_resolution);
    }

    #[test]
    fn test_derived_options() {
        let settings = AppSettings {
            output_dir: "/tmp/tif".to_string(),
            min_resolution: 0.5,
            ..AppSettings::default()
        };
        assert_eq!(
            settings.convert_options().destination,
            Some(PathBuf::from("/tmp/tif"))
        );
        assert_eq!(settings.repair_policy().min_resolution, 0.5);
        assert!(settings.repair_policy().validate().is_ok());
    }
}
