//! Drift Player - endless music fabrication from a catalog
//!
//! Loads the settings and catalog, starts the fabrication manager, and logs
//! progress until the run reaches a terminal state.
//!
//! ## Command line
//!
//! ```text
//! drift-player [CONFIG] [--catalog PATH]
//! ```
//!
//! - `CONFIG`: settings YAML (default `~/Music/drift/config.yaml`)
//! - `--catalog PATH`: catalog YAML (default `~/Music/drift/catalog.yaml`)

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use drift_core::audio::FileWaveformLoader;
use drift_core::config::{default_config_path, default_drift_path, load_config_strict, FabricationSettings};
use drift_core::content::YamlContentProvider;
use drift_core::output::default_sink_factory;
use drift_core::work::{FabricationManager, ManagerEvent, ManagerState};
use drift_core::micros_to_seconds;

/// How often progress is logged while active
const PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

struct Args {
    config_path: PathBuf,
    catalog_path: PathBuf,
}

fn parse_args() -> Result<Args> {
    let mut config_path = None;
    let mut catalog_path = None;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--catalog" => {
                let path = args.next().context("--catalog needs a path")?;
                catalog_path = Some(PathBuf::from(path));
            }
            _ => config_path = Some(PathBuf::from(arg)),
        }
    }
    Ok(Args {
        config_path: config_path.unwrap_or_else(|| default_config_path("config.yaml")),
        catalog_path: catalog_path.unwrap_or_else(|| default_drift_path().join("catalog.yaml")),
    })
}

fn main() -> Result<()> {
    // Initialize logger - set RUST_LOG=debug for verbose output
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args = parse_args()?;
    log::info!("drift-player starting up");

    let settings: FabricationSettings = load_config_strict(&args.config_path)
        .with_context(|| format!("Failed to load settings from {:?}", args.config_path))?;
    settings.validate().context("Invalid settings")?;
    log::info!(
        "Fabricating template '{}' at {}Hz x {} to {:?}",
        settings.input_template_key,
        settings.output_frame_rate,
        settings.output_channels,
        settings.output_mode
    );

    let mut manager = FabricationManager::new();
    let events = manager.subscribe();
    manager
        .start(
            settings,
            &YamlContentProvider::new(&args.catalog_path),
            Arc::new(FileWaveformLoader::new()),
            default_sink_factory(),
        )
        .context("Failed to start fabrication")?;

    let mut last_report = Instant::now();
    let state = loop {
        match events.recv_timeout(PROGRESS_INTERVAL) {
            Ok(ManagerEvent::StateChanged(state)) if state.is_terminal() => break state,
            Ok(_) => {}
            Err(e) if e.is_disconnected() => break manager.state(),
            Err(_) => {}
        }
        if last_report.elapsed() >= PROGRESS_INTERVAL {
            last_report = Instant::now();
            if let Some(progress) = manager.progress() {
                log::info!(
                    "Shipped {:.1}s, crafted {:.1}s ahead, dubbed {:.1}s ahead{}",
                    micros_to_seconds(progress.shipped_to_micros),
                    progress.craft_ahead_seconds(),
                    progress.dub_ahead_seconds(),
                    if manager.is_healthy() { "" } else { " (unhealthy)" }
                );
            }
        }
    };
    manager.join();

    log::info!("Fabrication finished: {}", state);
    if state == ManagerState::Failed {
        anyhow::bail!("fabrication failed");
    }
    Ok(())
}
