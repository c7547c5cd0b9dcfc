//! Rehydration: resume a chain from the snapshot written when Ship stopped
//!
//! A snapshot is only worth restoring when it still holds enough crafted
//! audio past the shipped position; otherwise the run bootstraps a fresh
//! chain and the snapshot is ignored.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::error::{FabricationError, FabricationResult};
use crate::config::FabricationSettings;
use crate::model::{Chain, SegmentState};
use crate::store::SegmentRecord;
use crate::types::{micros_to_seconds, ChainMicros, MICROS_PER_SECOND};

/// Chain, segments and shipped position of a previous run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainSnapshot {
    pub chain: Chain,
    pub segments: Vec<SegmentRecord>,
    pub shipped_to_micros: ChainMicros,
}

impl ChainSnapshot {
    /// End of the last crafted segment
    pub fn crafted_to_micros(&self) -> Option<ChainMicros> {
        self.segments
            .iter()
            .map(|r| &r.segment)
            .filter(|s| s.state.is_crafted())
            .map(|s| s.end_micros())
            .max()
    }

    /// Crafted audio remaining past the shipped position
    pub fn ahead_micros(&self) -> ChainMicros {
        self.crafted_to_micros()
            .map_or(0, |crafted| crafted - self.shipped_to_micros)
    }

    /// Drop unfinished segments and reopen unshipped ones for dubbing
    ///
    /// Audio dubbed but not shipped was lost with the previous pipe, so any
    /// segment ending after the shipped position goes back to `Crafted`.
    pub fn into_resumable(mut self) -> Self {
        if let Some(cut) = self.segments.iter().position(|r| !r.segment.state.is_crafted()) {
            self.segments.truncate(cut);
        }
        for record in &mut self.segments {
            if record.segment.end_micros() > self.shipped_to_micros {
                record.segment.state = SegmentState::Crafted;
            }
        }
        self
    }
}

/// Where a snapshot comes from
pub trait SnapshotSource: Send + Sync {
    /// `Ok(None)` when there is nothing to resume
    fn load_snapshot(&self) -> FabricationResult<Option<ChainSnapshot>>;
}

/// Snapshot stored as a JSON file
pub struct FileSnapshotSource {
    path: PathBuf,
}

impl FileSnapshotSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SnapshotSource for FileSnapshotSource {
    fn load_snapshot(&self) -> FabricationResult<Option<ChainSnapshot>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&self.path).map_err(|e| snapshot_error(&self.path, e))?;
        let snapshot = serde_json::from_str(&contents).map_err(|e| snapshot_error(&self.path, e))?;
        Ok(Some(snapshot))
    }
}

fn snapshot_error(path: &Path, reason: impl std::fmt::Display) -> FabricationError {
    FabricationError::Snapshot {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

/// Write a snapshot as pretty JSON, creating parent directories
pub fn write_snapshot(path: &Path, snapshot: &ChainSnapshot) -> FabricationResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| snapshot_error(path, e))?;
    }
    let json = serde_json::to_string_pretty(snapshot).map_err(|e| snapshot_error(path, e))?;
    std::fs::write(path, json).map_err(|e| snapshot_error(path, e))?;
    log::info!(
        "[FABRICATION] Wrote snapshot of {} segments shipped to {:.1}s to {:?}",
        snapshot.segments.len(),
        micros_to_seconds(snapshot.shipped_to_micros),
        path
    );
    Ok(())
}

/// The snapshot to resume from, if rehydration is enabled and it qualifies
///
/// A snapshot that fails to load is logged and treated as absent.
pub fn select_snapshot(source: &dyn SnapshotSource, settings: &FabricationSettings) -> Option<ChainSnapshot> {
    if !settings.rehydrate.enabled {
        return None;
    }
    let snapshot = match source.load_snapshot() {
        Ok(Some(snapshot)) => snapshot,
        Ok(None) => {
            log::info!("[FABRICATION] No snapshot to rehydrate from");
            return None;
        }
        Err(e) => {
            log::warn!("[FABRICATION] Ignoring snapshot: {}", e);
            return None;
        }
    };

    if snapshot.chain.template_key != settings.input_template_key {
        log::info!(
            "[FABRICATION] Snapshot is of template '{}', not '{}'; starting fresh",
            snapshot.chain.template_key,
            settings.input_template_key
        );
        return None;
    }
    let threshold = settings.rehydrate.ahead_threshold_seconds as ChainMicros * MICROS_PER_SECOND;
    let ahead = snapshot.ahead_micros();
    if ahead < threshold {
        log::info!(
            "[FABRICATION] Snapshot only {:.1}s ahead of shipped (need {}s); starting fresh",
            micros_to_seconds(ahead),
            settings.rehydrate.ahead_threshold_seconds
        );
        return None;
    }
    log::info!(
        "[FABRICATION] Rehydrating {} segments, resuming at {:.1}s",
        snapshot.segments.len(),
        micros_to_seconds(snapshot.shipped_to_micros)
    );
    Some(snapshot.into_resumable())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RehydrateSettings;
    use crate::model::Segment;
    use crate::testing::fixtures;

    fn record(id: u64, state: SegmentState) -> SegmentRecord {
        let mut segment = Segment::planned(id, 1, id as ChainMicros * MICROS_PER_SECOND);
        segment.duration_micros = MICROS_PER_SECOND;
        segment.state = state;
        SegmentRecord {
            segment,
            choices: Vec::new(),
            arrangements: Vec::new(),
            picks: Vec::new(),
        }
    }

    fn snapshot(shipped_seconds: i64) -> ChainSnapshot {
        ChainSnapshot {
            chain: Chain::new(1, fixtures::TEMPLATE_KEY),
            segments: vec![
                record(0, SegmentState::Dubbed),
                record(1, SegmentState::Dubbed),
                record(2, SegmentState::Dubbing),
                record(3, SegmentState::Crafted),
                record(4, SegmentState::Crafting),
            ],
            shipped_to_micros: shipped_seconds * MICROS_PER_SECOND,
        }
    }

    fn settings(threshold: u32) -> FabricationSettings {
        FabricationSettings {
            rehydrate: RehydrateSettings {
                enabled: true,
                snapshot_path: None,
                ahead_threshold_seconds: threshold,
            },
            ..fixtures::settings()
        }
    }

    struct Fixed(Option<ChainSnapshot>);

    impl SnapshotSource for Fixed {
        fn load_snapshot(&self) -> FabricationResult<Option<ChainSnapshot>> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("snapshot.json");
        write_snapshot(&path, &snapshot(1)).unwrap();

        let loaded = FileSnapshotSource::new(&path).load_snapshot().unwrap();
        assert_eq!(loaded, Some(snapshot(1)));
    }

    #[test]
    fn test_missing_file_is_none_and_garbage_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");
        assert_eq!(FileSnapshotSource::new(&path).load_snapshot().unwrap(), None);

        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            FileSnapshotSource::new(&path).load_snapshot(),
            Err(FabricationError::Snapshot { .. })
        ));
    }

    #[test]
    fn test_resumable_reopens_unshipped_segments() {
        let resumed = snapshot(2).into_resumable();
        let states: Vec<SegmentState> = resumed.segments.iter().map(|r| r.segment.state).collect();
        assert_eq!(
            states,
            vec![SegmentState::Dubbed, SegmentState::Dubbed, SegmentState::Crafted, SegmentState::Crafted]
        );
    }

    #[test]
    fn test_threshold_decides_resume() {
        // crafted to 4s, shipped to 1s
        let source = Fixed(Some(snapshot(1)));
        assert!(select_snapshot(&source, &settings(3)).is_some());
        assert!(select_snapshot(&source, &settings(4)).is_none());
    }

    #[test]
    fn test_disabled_or_other_template_starts_fresh() {
        let source = Fixed(Some(snapshot(1)));
        let disabled = FabricationSettings {
            rehydrate: RehydrateSettings::default(),
            ..fixtures::settings()
        };
        assert!(select_snapshot(&source, &disabled).is_none());

        let other = FabricationSettings {
            input_template_key: "other".to_string(),
            ..settings(0)
        };
        assert!(select_snapshot(&source, &other).is_none());
    }
}
