//! Logging initialization

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingSettings;

/// Install the global `tracing` subscriber
///
/// `RUST_LOG` wins over the configured level. Returns false if a subscriber
/// was already installed, which leaves the existing one in place.
pub fn init_logging(settings: &LoggingSettings) -> anyhow::Result<bool> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.level))
        .with_context(|| format!("Invalid log filter: {}", settings.level))?;

    let installed = match &settings.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file: {}", path.display()))?;

            tracing_subscriber::fmt()
                .with_writer(file)
                .with_env_filter(filter)
                .with_ansi(false) // No ANSI codes in log file
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .try_init()
                .is_ok()
        }
        None => tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(filter)
            .with_ansi(settings.ansi)
            .with_target(true)
            .try_init()
            .is_ok(),
    };

    Ok(installed)
}
