//! Fabrication configuration
//!
//! - Generic YAML config loading/saving
//! - Standard drift paths under `~/Music/drift`
//! - [`FabricationSettings`]: every option the pipeline recognizes
//!
//! # Usage
//!
//! ```ignore
//! use drift_core::config::{default_config_path, load_config, FabricationSettings};
//!
//! let settings: FabricationSettings = load_config(&default_config_path("config.yaml"));
//! settings.validate()?;
//! ```

mod io;
mod paths;
mod settings;

pub use io::{load_config, load_config_strict, save_config};
pub use paths::{default_config_path, default_drift_path};
pub use settings::{ConfigError, FabricationSettings, OutputFileMode, OutputMode, RehydrateSettings};
