//! Settings loading and merging logic
//!
//! Handles loading settings from a YAML file and environment overrides.

use std::path::Path;

use anyhow::{Context, Result};

use super::{defaults, schema::RuntimeSettings};

pub const ENV_CONTROLLER_NAME: &str = "RECONCILE_CONTROLLER_NAME";
pub const ENV_RESYNC_SECONDS: &str = "RECONCILE_RESYNC_SECONDS";
pub const ENV_TRACKER_TTL_SECONDS: &str = "RECONCILE_TRACKER_TTL_SECONDS";
pub const ENV_LOG_LEVEL: &str = "RECONCILE_LOG_LEVEL";

/// Settings loader
pub struct SettingsLoader;

impl SettingsLoader {
    /// Load settings with all layers merged, then validate
    ///
    /// Precedence order (highest to lowest):
    /// 1. Environment variable overrides
    /// 2. Settings file, when given and present
    /// 3. Built-in defaults
    pub fn load(path: Option<&Path>) -> Result<RuntimeSettings> {
        let mut settings = Self::load_defaults();

        if let Some(path) = path {
            if path.exists() {
                settings = Self::load_file(path)?;
            } else {
                tracing::debug!(path = %path.display(), "settings file not found, using defaults");
            }
        }

        settings = Self::apply_overrides(settings, |key| std::env::var(key).ok())?;
        settings.validate().context("Invalid runtime settings")?;

        Ok(settings)
    }

    /// Load settings from a file
    ///
    /// Keys missing from the file take their default values.
    pub fn load_file(path: &Path) -> Result<RuntimeSettings> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file: {}", path.display()))?;

        let settings: RuntimeSettings = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse settings file: {}", path.display()))?;

        Ok(settings)
    }

    pub fn load_defaults() -> RuntimeSettings {
        defaults::default_settings()
    }

    /// Apply overrides resolved through `lookup` (the process environment in `load`)
    pub fn apply_overrides(
        mut settings: RuntimeSettings,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<RuntimeSettings> {
        if let Some(name) = lookup(ENV_CONTROLLER_NAME) {
            settings.controller_name = name;
        }

        if let Some(resync) = lookup(ENV_RESYNC_SECONDS) {
            settings.resync_interval_seconds = resync
                .parse()
                .with_context(|| format!("{} must be a number", ENV_RESYNC_SECONDS))?;
        }

        if let Some(ttl) = lookup(ENV_TRACKER_TTL_SECONDS) {
            settings.tracker_ttl_seconds = Some(
                ttl.parse()
                    .with_context(|| format!("{} must be a number", ENV_TRACKER_TTL_SECONDS))?,
            );
        }

        if let Some(level) = lookup(ENV_LOG_LEVEL) {
            settings.logging.level = level;
        }

        Ok(settings)
    }

    /// Save settings to a file
    pub fn save(settings: &RuntimeSettings, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create settings directory: {}", parent.display())
                })?;
            }
        }

        let yaml =
            serde_yaml::to_string(settings).context("Failed to serialize settings to YAML")?;

        std::fs::write(path, yaml)
            .with_context(|| format!("Failed to write settings file: {}", path.display()))?;

        Ok(())
    }
}
