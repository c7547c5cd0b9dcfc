//! YAML settings files
//!
//! [`load_config`] is forgiving: a missing or broken file yields defaults so a
//! fresh install still starts. [`load_config_strict`] is for a file the user
//! named explicitly and reports what went wrong.

use std::path::Path;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Read settings, falling back to `T::default()` on any problem
pub fn load_config<T: DeserializeOwned + Default>(path: &Path) -> T {
    if !path.exists() {
        log::info!("[CONFIG] {:?} not found, using defaults", path);
        return T::default();
    }
    load_config_strict(path).unwrap_or_else(|e| {
        log::warn!("[CONFIG] {:#}; using defaults", e);
        T::default()
    })
}

/// Read settings, failing on a missing file or a parse error
pub fn load_config_strict<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let yaml = std::fs::read_to_string(path).with_context(|| format!("Cannot read {:?}", path))?;
    let config = serde_yaml::from_str(&yaml).with_context(|| format!("Cannot parse {:?}", path))?;
    log::info!("[CONFIG] Loaded {:?}", path);
    Ok(config)
}

/// Write settings as YAML, creating missing parent directories
pub fn save_config<T: Serialize>(config: &T, path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).with_context(|| format!("Cannot create {:?}", dir))?;
    }
    let yaml = serde_yaml::to_string(config).context("Cannot serialize settings")?;
    std::fs::write(path, yaml).with_context(|| format!("Cannot write {:?}", path))?;
    log::info!("[CONFIG] Saved {:?}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FabricationSettings, OutputFileMode, OutputMode};

    #[test]
    fn test_missing_file_gives_defaults() {
        let settings: FabricationSettings =
            load_config(Path::new("/nonexistent/path/config.yaml"));
        assert_eq!(settings, FabricationSettings::default());
    }

    #[test]
    fn test_saved_settings_load_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("drift.yaml");

        let settings = FabricationSettings {
            output_mode: OutputMode::File,
            output_file_mode: OutputFileMode::Macro,
            output_seconds: 30,
            ..FabricationSettings::default()
        };

        save_config(&settings, &path).unwrap();
        let loaded: FabricationSettings = load_config(&path);

        assert_eq!(loaded, settings);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("drift.yaml");
        std::fs::write(&path, "craft_ahead_seconds: 9\noutput_mode: file\n").unwrap();

        let loaded: FabricationSettings = load_config_strict(&path).unwrap();
        assert_eq!(loaded.craft_ahead_seconds, 9);
        assert_eq!(loaded.output_mode, OutputMode::File);
        assert_eq!(loaded.mixer_length_seconds, FabricationSettings::default().mixer_length_seconds);
    }

    #[test]
    fn test_strict_load_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("drift.yaml");
        std::fs::write(&path, "output_mode: [not, a, mode]\n").unwrap();

        assert!(load_config_strict::<FabricationSettings>(&path).is_err());
        let fallback: FabricationSettings = load_config(&path);
        assert_eq!(fallback, FabricationSettings::default());
    }
}
