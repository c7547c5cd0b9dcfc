//! Shared state handed to every fabrication stage
//!
//! One [`FabricationContext`] exists per run. It is built when the manager
//! starts, shared as an `Arc` by Craft, Dub and Ship, and dropped on reset.
//! Stages never lock each other: positions are atomics, stage lifecycles
//! are flags, and only the live overrides sit behind mutexes.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use crate::audio::AudioCache;
use crate::config::FabricationSettings;
use crate::model::{Catalog, TemplateConfig};
use crate::store::EntityStore;
use crate::types::{ChainMicros, EntityId};

/// Operator request to steer the next crafted segment
#[derive(Debug, Clone, PartialEq, Default)]
pub enum CraftOverride {
    #[default]
    Ready,
    GotoMacro(EntityId),
    GotoMemes(Vec<String>),
}

impl CraftOverride {
    pub fn is_pending(&self) -> bool {
        !matches!(self, CraftOverride::Ready)
    }
}

/// Identifies a stage in progress and health reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Craft,
    Dub,
    Ship,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Craft, Stage::Dub, Stage::Ship];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Craft => "Craft",
            Stage::Dub => "Dub",
            Stage::Ship => "Ship",
        }
    }
}

/// Atomic position of one stage along the chain
#[derive(Debug, Default)]
struct StagePosition {
    to_micros: AtomicI64,
    /// Millis since context start of the last advance
    advanced_at_millis: AtomicU64,
    finished: AtomicBool,
}

/// How far each stage has got, readable from any thread
#[derive(Debug, Default)]
pub struct StageProgress {
    craft: StagePosition,
    dub: StagePosition,
    ship: StagePosition,
    /// End of the chunk Dub has planned but not yet mixed
    dub_planned_to: AtomicI64,
}

impl StageProgress {
    fn position(&self, stage: Stage) -> &StagePosition {
        match stage {
            Stage::Craft => &self.craft,
            Stage::Dub => &self.dub,
            Stage::Ship => &self.ship,
        }
    }

    pub fn to_micros(&self, stage: Stage) -> ChainMicros {
        self.position(stage).to_micros.load(Ordering::Acquire)
    }

    pub fn crafted_to(&self) -> ChainMicros {
        self.to_micros(Stage::Craft)
    }

    pub fn dubbed_to(&self) -> ChainMicros {
        self.to_micros(Stage::Dub)
    }

    pub fn shipped_to(&self) -> ChainMicros {
        self.to_micros(Stage::Ship)
    }

    pub fn dub_planned_to(&self) -> ChainMicros {
        self.dub_planned_to.load(Ordering::Acquire)
    }

    pub fn set_dub_planned_to(&self, micros: ChainMicros) {
        self.dub_planned_to.store(micros, Ordering::Release);
    }

    /// Millis since context start when the stage last advanced
    pub fn advanced_at_millis(&self, stage: Stage) -> u64 {
        self.position(stage).advanced_at_millis.load(Ordering::Relaxed)
    }

    pub fn is_finished(&self, stage: Stage) -> bool {
        self.position(stage).finished.load(Ordering::Acquire)
    }
}

/// Everything a run shares across stages and threads
pub struct FabricationContext {
    pub settings: FabricationSettings,
    pub template: TemplateConfig,
    pub catalog: Arc<Catalog>,
    pub store: Arc<EntityStore>,
    pub cache: Arc<AudioCache>,
    pub progress: StageProgress,
    pub chain_id: EntityId,
    /// Chain time the run starts shipping from (non-zero after rehydration)
    pub start_at_chain_micros: ChainMicros,
    pending_override: Mutex<CraftOverride>,
    /// Replaces segment intensity in the mix while set
    intensity_override: Mutex<Option<f64>>,
    failed: AtomicBool,
    cancelled: AtomicBool,
    started: Instant,
}

impl FabricationContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: FabricationSettings,
        template: TemplateConfig,
        catalog: Arc<Catalog>,
        store: Arc<EntityStore>,
        cache: Arc<AudioCache>,
        chain_id: EntityId,
        start_at_chain_micros: ChainMicros,
        crafted_to: ChainMicros,
    ) -> Self {
        let progress = StageProgress::default();
        progress.craft.to_micros.store(crafted_to, Ordering::Release);
        progress.dub.to_micros.store(start_at_chain_micros, Ordering::Release);
        progress.ship.to_micros.store(start_at_chain_micros, Ordering::Release);
        progress.dub_planned_to.store(start_at_chain_micros, Ordering::Release);
        Self {
            settings,
            template,
            catalog,
            store,
            cache,
            progress,
            chain_id,
            start_at_chain_micros,
            pending_override: Mutex::new(CraftOverride::Ready),
            intensity_override: Mutex::new(None),
            failed: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            started: Instant::now(),
        }
    }

    pub fn elapsed_millis(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    pub fn elapsed_seconds(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    /// Record a stage reaching a new chain position
    pub fn advance(&self, stage: Stage, to_micros: ChainMicros) {
        let position = self.progress.position(stage);
        position.to_micros.store(to_micros, Ordering::Release);
        position
            .advanced_at_millis
            .store(self.elapsed_millis(), Ordering::Relaxed);
    }

    /// Mark a stage finished; returns `true` the first time only
    pub fn finish_stage(&self, stage: Stage) -> bool {
        let first = !self.progress.position(stage).finished.swap(true, Ordering::AcqRel);
        if first {
            log::info!("[FABRICATION] {} finished", stage.name());
        }
        first
    }

    pub fn is_finished(&self, stage: Stage) -> bool {
        self.progress.is_finished(stage)
    }

    pub fn all_finished(&self) -> bool {
        Stage::ALL.iter().all(|s| self.is_finished(*s))
    }

    /// Record a fatal error and stop every stage
    pub fn fail(&self, stage: Stage, error: &dyn std::fmt::Display) {
        log::error!("[FABRICATION] {} failed: {}", stage.name(), error);
        self.failed.store(true, Ordering::Release);
        self.finish_stage(Stage::Craft);
        self.finish_stage(Stage::Dub);
    }

    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    /// Operator stop: upstream stages finish, Ship drains and follows
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.finish_stage(Stage::Craft);
        self.finish_stage(Stage::Dub);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Request an override; the latest request replaces any pending one
    pub fn request_override(&self, request: CraftOverride) {
        log::info!("[FABRICATION] Override requested: {:?}", request);
        *self
            .pending_override
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = request;
    }

    /// Take the pending override, leaving `Ready` behind
    pub fn take_override(&self) -> CraftOverride {
        std::mem::take(
            &mut *self
                .pending_override
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }

    pub fn has_pending_override(&self) -> bool {
        self.pending_override
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_pending()
    }

    /// Mix at a fixed intensity, or `None` to follow the segments again
    pub fn set_intensity_override(&self, intensity: Option<f64>) {
        log::info!("[FABRICATION] Intensity override: {:?}", intensity);
        *self
            .intensity_override
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = intensity;
    }

    pub fn intensity_override(&self) -> Option<f64> {
        *self
            .intensity_override
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures;

    #[test]
    fn test_override_last_write_wins() {
        let ctx = fixtures::context(fixtures::settings());
        assert!(!ctx.has_pending_override());
        ctx.request_override(CraftOverride::GotoMacro(10));
        ctx.request_override(CraftOverride::GotoMemes(vec!["dark".into()]));
        assert!(ctx.has_pending_override());
        assert_eq!(ctx.take_override(), CraftOverride::GotoMemes(vec!["dark".into()]));
        assert_eq!(ctx.take_override(), CraftOverride::Ready);
    }

    #[test]
    fn test_intensity_override_set_and_clear() {
        let ctx = fixtures::context(fixtures::settings());
        assert_eq!(ctx.intensity_override(), None);
        ctx.set_intensity_override(Some(0.25));
        assert_eq!(ctx.intensity_override(), Some(0.25));
        ctx.set_intensity_override(None);
        assert_eq!(ctx.intensity_override(), None);
    }

    #[test]
    fn test_finish_stage_reports_first_call() {
        let ctx = fixtures::context(fixtures::settings());
        assert!(ctx.finish_stage(Stage::Dub));
        assert!(!ctx.finish_stage(Stage::Dub));
        assert!(!ctx.all_finished());
    }

    #[test]
    fn test_fail_stops_upstream_stages() {
        let ctx = fixtures::context(fixtures::settings());
        ctx.fail(Stage::Craft, &"boom");
        assert!(ctx.is_failed());
        assert!(ctx.is_finished(Stage::Craft));
        assert!(ctx.is_finished(Stage::Dub));
        assert!(!ctx.is_finished(Stage::Ship));
    }
}
