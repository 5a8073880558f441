//! Configuration management for the control core
//!
//! Handles loading, parsing and validating the YAML configuration file.
//! Every section is optional; a missing file yields the defaults.

use crate::controller::CoreOptions;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tracing::info;

/// Upper bound for every engine push window; 0 pushes immediately
const MAX_DEBOUNCE_MS: u64 = 10_000;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub frames: FramesConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Timing of pushes to the rendering engine
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Effect setting push delay (0 = push immediately)
    #[serde(default = "default_settings_debounce_ms")]
    pub settings_debounce_ms: u64,
    #[serde(default = "default_dsp_debounce_ms")]
    pub dsp_debounce_ms: u64,
    #[serde(default = "default_fps_debounce_ms")]
    pub fps_debounce_ms: u64,
    #[serde(default = "default_target_fps")]
    pub default_target_fps: u32,
}

/// Frame distribution to preview renderers
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct FramesConfig {
    /// Wake renderers even when a tick repeats the previous buffer
    #[serde(default)]
    pub notify_unchanged: bool,
}

/// Local preferences database
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PersistenceConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_persistence_debounce_ms")]
    pub debounce_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Also write daily rolling log files to the logs directory
    #[serde(default)]
    pub file: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            settings_debounce_ms: default_settings_debounce_ms(),
            dsp_debounce_ms: default_dsp_debounce_ms(),
            fps_debounce_ms: default_fps_debounce_ms(),
            default_target_fps: default_target_fps(),
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            debounce_ms: default_persistence_debounce_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from file, falling back to defaults if it is missing
    pub async fn load(path: &Path) -> Result<Self> {
        if !fs::try_exists(path).await.unwrap_or(false) {
            info!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: AppConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse YAML config: {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub async fn save(&self, path: &Path) -> Result<()> {
        let yaml = serde_yaml::to_string(self).context("Failed to serialize config to YAML")?;

        fs::write(path, yaml)
            .await
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !(1..=240).contains(&self.engine.default_target_fps) {
            anyhow::bail!(
                "engine.default_target_fps must be between 1 and 240 (got {})",
                self.engine.default_target_fps
            );
        }
        let windows = [
            ("engine.settings_debounce_ms", self.engine.settings_debounce_ms),
            ("engine.dsp_debounce_ms", self.engine.dsp_debounce_ms),
            ("engine.fps_debounce_ms", self.engine.fps_debounce_ms),
        ];
        for (name, value) in windows {
            if value > MAX_DEBOUNCE_MS {
                anyhow::bail!("{} must be at most {} (got {})", name, MAX_DEBOUNCE_MS, value);
            }
        }
        if self.persistence.enabled && self.persistence.debounce_ms > 60_000 {
            anyhow::bail!(
                "persistence.debounce_ms must be at most 60000 (got {})",
                self.persistence.debounce_ms
            );
        }
        let level = self.logging.level.to_lowercase();
        if !["error", "warn", "info", "debug", "trace"].contains(&level.as_str()) {
            anyhow::bail!("Unknown logging.level '{}'", self.logging.level);
        }
        Ok(())
    }

    /// Options for the control core
    pub fn core_options(&self) -> CoreOptions {
        CoreOptions {
            settings_debounce: Duration::from_millis(self.engine.settings_debounce_ms),
            dsp_debounce: Duration::from_millis(self.engine.dsp_debounce_ms),
            fps_debounce: Duration::from_millis(self.engine.fps_debounce_ms),
            target_fps: self.engine.default_target_fps,
            notify_unchanged: self.frames.notify_unchanged,
        }
    }
}

// Default value functions
fn default_settings_debounce_ms() -> u64 { 300 }
fn default_dsp_debounce_ms() -> u64 { 300 }
fn default_fps_debounce_ms() -> u64 { 500 }
fn default_target_fps() -> u32 { 60 }
fn default_persistence_debounce_ms() -> u64 { crate::prefs::DEFAULT_DEBOUNCE_MS }
fn default_log_level() -> String { "info".to_string() }
fn default_true() -> bool { true }
