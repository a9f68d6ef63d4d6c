//! Runtime settings
//!
//! Settings come from built-in defaults, an optional YAML file and
//! `RECONCILE_*` environment variables, in increasing precedence.

mod defaults;
pub mod loader;
pub mod schema;

pub use loader::SettingsLoader;
pub use schema::{LoggingSettings, RuntimeSettings};

/// Get a setting value by key (dot notation)
pub fn get_setting(settings: &RuntimeSettings, key: &str) -> anyhow::Result<String> {
    match key {
        "controllerName" => Ok(settings.controller_name.clone()),
        "resyncIntervalSeconds" => Ok(settings.resync_interval_seconds.to_string()),
        "trackerTtlSeconds" => Ok(settings.tracker_ttl().as_secs().to_string()),
        "trackerSweepIntervalSeconds" => Ok(settings.tracker_sweep_interval_seconds.to_string()),
        "logging.level" => Ok(settings.logging.level.clone()),
        "logging.ansi" => Ok(settings.logging.ansi.to_string()),
        "logging.file" => Ok(settings
            .logging
            .file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default()),
        _ => Err(anyhow::anyhow!("Unknown setting: {}", key)),
    }
}

/// Set a setting value by key (dot notation)
pub fn set_setting(settings: &mut RuntimeSettings, key: &str, value: &str) -> anyhow::Result<()> {
    use anyhow::Context;
    match key {
        "controllerName" => {
            settings.controller_name = value.to_string();
        }
        "resyncIntervalSeconds" => {
            settings.resync_interval_seconds = value
                .parse()
                .context("resyncIntervalSeconds must be a number")?;
        }
        "trackerTtlSeconds" => {
            // Empty resets to the resync-derived default
            if value.is_empty() {
                settings.tracker_ttl_seconds = None;
            } else {
                settings.tracker_ttl_seconds = Some(
                    value
                        .parse()
                        .context("trackerTtlSeconds must be a number")?,
                );
            }
        }
        "trackerSweepIntervalSeconds" => {
            settings.tracker_sweep_interval_seconds = value
                .parse()
                .context("trackerSweepIntervalSeconds must be a number")?;
        }
        "logging.level" => {
            settings.logging.level = value.to_string();
        }
        "logging.ansi" => {
            settings.logging.ansi = value
                .parse()
                .context("logging.ansi must be 'true' or 'false'")?;
        }
        "logging.file" => {
            if value.is_empty() {
                settings.logging.file = None;
            } else {
                settings.logging.file = Some(value.into());
            }
        }
        _ => return Err(anyhow::anyhow!("Unknown setting: {}", key)),
    }

    Ok(())
}
