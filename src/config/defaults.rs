//! Default settings values

use super::schema::RuntimeSettings;

/// Get the default settings
pub fn default_settings() -> RuntimeSettings {
    RuntimeSettings::default()
}
