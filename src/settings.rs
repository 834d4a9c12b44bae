//! Deployment settings shared between a content build and the runtime.
//!
//! A build writes one settings file next to its catalogs; the runtime reads
//! it back and hands it to [`ResourceSystem::apply_settings`] to install
//! everything in one step.
//!
//! [`ResourceSystem::apply_settings`]: crate::ops::ResourceSystem::apply_settings

use std::fs;
use std::path::Path;

use crate::errors::*;

/// One catalog referenced by the settings.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct CatalogSource {
    pub id: String,
    pub path: String,
}

/// The runtime facing half of a content build: which catalogs to install
/// and how the engine should behave while loading them.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct RuntimeSettings {
    /// Hash of the build that produced these settings, for cache busting.
    #[serde(default)]
    pub settings_hash: String,
    /// The platform the content was built for.
    #[serde(default)]
    pub build_target: String,
    /// Catalogs to install, in order.
    #[serde(default)]
    pub catalogs: Vec<CatalogSource>,
    /// Whether unhandled operation failures are written to the log.
    #[serde(default = "default_log_errors")]
    pub log_errors: bool,
    /// Whether the build was made with diagnostic tooling in mind.
    #[serde(default)]
    pub diagnostics: bool,
}

fn default_log_errors() -> bool {
    true
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        RuntimeSettings {
            settings_hash: String::new(),
            build_target: String::new(),
            catalogs: Vec::new(),
            log_errors: true,
            diagnostics: false,
        }
    }
}

impl RuntimeSettings {
    /// Reads settings from a JSON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let bytes = fs::read(path.as_ref()).map_err(|err| {
            format_err!(
                "Could not read the settings at '{}': {}",
                path.as_ref().display(),
                err
            )
        })?;
        let settings = serde_json::from_slice(&bytes)?;
        Ok(settings)
    }

    /// Writes settings as JSON.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        fs::write(path.as_ref(), json).map_err(|err| {
            format_err!(
                "Could not write the settings at '{}': {}",
                path.as_ref().display(),
                err
            )
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let raw = r#"{"catalogs": [{"id": "main", "path": "data/catalog.json"}]}"#;
        let settings: RuntimeSettings = serde_json::from_str(raw).unwrap();

        assert!(settings.log_errors);
        assert!(!settings.diagnostics);
        assert_eq!(settings.settings_hash, "");
        assert_eq!(settings.catalogs.len(), 1);
        assert_eq!(settings.catalogs[0].id, "main");
        assert_eq!(settings.catalogs[0].path, "data/catalog.json");
    }

    #[test]
    fn log_errors_can_be_switched_off() {
        let raw = r#"{"log_errors": false}"#;
        let settings: RuntimeSettings = serde_json::from_str(raw).unwrap();
        assert!(!settings.log_errors);
        assert!(settings.catalogs.is_empty());
    }
}
