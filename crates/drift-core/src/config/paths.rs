//! Standard locations for drift configuration and output

use std::path::PathBuf;

/// Get the default drift directory
///
/// Returns: `~/Music/drift`
pub fn default_drift_path() -> PathBuf {
    dirs::audio_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join("Music")))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("drift")
}

/// Get the default path of a config file
///
/// Returns: `~/Music/drift/{filename}`
pub fn default_config_path(filename: &str) -> PathBuf {
    default_drift_path().join(filename)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drift_path_ends_with_drift() {
        assert!(default_drift_path().ends_with("drift"));
    }

    #[test]
    fn test_config_path_includes_filename() {
        assert!(default_config_path("config.yaml").ends_with("config.yaml"));
    }
}
