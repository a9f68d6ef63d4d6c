//! Settings schema
//!
//! Defines the structure of the runtime settings file using serde.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root settings structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeSettings {
    /// Name reported on events and stamped on the managed-by label of children
    #[serde(default = "default_controller_name")]
    pub controller_name: String,

    /// Resync interval of the hosting scheduler
    #[serde(default = "default_resync_interval_seconds")]
    pub resync_interval_seconds: u64,

    /// Lifetime of a tracking relationship unless renewed
    /// Defaults to twice the resync interval
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracker_ttl_seconds: Option<u64>,

    /// How often expired tracking relationships are purged
    #[serde(default = "default_tracker_sweep_interval_seconds")]
    pub tracker_sweep_interval_seconds: u64,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LoggingSettings {
    /// Default filter directive, e.g. `info` or `reconcile_runtime=debug`
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Colored output
    #[serde(default = "default_true")]
    pub ansi: bool,

    /// Write logs to this file instead of stderr
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

fn default_controller_name() -> String {
    "reconcile-runtime".to_string()
}

fn default_resync_interval_seconds() -> u64 {
    300
}

fn default_tracker_sweep_interval_seconds() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            controller_name: default_controller_name(),
            resync_interval_seconds: default_resync_interval_seconds(),
            tracker_ttl_seconds: None,
            tracker_sweep_interval_seconds: default_tracker_sweep_interval_seconds(),
            logging: LoggingSettings::default(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            ansi: default_true(),
            file: None,
        }
    }
}

impl RuntimeSettings {
    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_seconds)
    }

    /// Effective tracker TTL
    pub fn tracker_ttl(&self) -> Duration {
        match self.tracker_ttl_seconds {
            Some(secs) => Duration::from_secs(secs),
            None => self.resync_interval() * 2,
        }
    }

    pub fn tracker_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.tracker_sweep_interval_seconds)
    }

    /// Reject settings the runtime cannot operate with
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.controller_name.trim().is_empty() {
            anyhow::bail!("controllerName must not be empty");
        }
        if self.resync_interval_seconds == 0 {
            anyhow::bail!("resyncIntervalSeconds must be greater than zero");
        }
        if self.tracker_sweep_interval_seconds == 0 {
            anyhow::bail!("trackerSweepIntervalSeconds must be greater than zero");
        }
        if let Some(ttl) = self.tracker_ttl_seconds {
            if ttl < self.resync_interval_seconds {
                anyhow::bail!(
                    "trackerTtlSeconds ({}) is shorter than resyncIntervalSeconds ({}); relationships would lapse between resyncs",
                    ttl,
                    self.resync_interval_seconds
                );
            }
        }
        Ok(())
    }
}
