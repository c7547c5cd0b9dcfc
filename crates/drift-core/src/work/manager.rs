//! Fabrication manager: lifecycle, threads and operator controls
//!
//! # Architecture
//!
//! ```text
//! caller ── start() ──► content, audio preload, context
//!                          │
//!        ┌─────────────────┴──────────────────┐
//!        ▼                                    ▼
//!  "fabrication" thread                 "ship" thread
//!   craft cycle ─► dub cycle ─► rtrb ─►  ship cycle ─► OutputSink
//!        │                                    │
//!        └── ShipWork (crossbeam, once) ──────┘
//! ```
//!
//! State changes are broadcast to every [`subscribe`](FabricationManager::subscribe)r.
//! The ship thread settles the terminal state once shipping stops: `Failed`
//! if any stage failed, `Cancelled` after an operator cancel, else `Done`.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, Sender};

use super::context::{CraftOverride, FabricationContext, Stage};
use super::craft_work::CraftWork;
use super::dub_work::DubWork;
use super::error::{FabricationError, FabricationResult};
use super::rehydrate::{select_snapshot, FileSnapshotSource};
use super::ship_work::ShipWork;
use crate::audio::{AudioCache, WaveformLoader};
use crate::config::FabricationSettings;
use crate::content::ContentProvider;
use crate::craft::{default_phases, CraftPhase};
use crate::model::{Catalog, Chain, ChainState, InstrumentAudio, ProgramType};
use crate::output::SinkFactory;
use crate::store::EntityStore;
use crate::types::{micros_to_seconds, ChainMicros, EntityId};

// ═══════════════════════════════════════════════════════════════════════════════
// State and events
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    Standby,
    Starting,
    PreparingAudio,
    PreparedAudio,
    Initializing,
    Active,
    Done,
    Cancelled,
    Failed,
}

impl ManagerState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ManagerState::Done | ManagerState::Cancelled | ManagerState::Failed)
    }
}

impl fmt::Display for ManagerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ManagerState::Standby => "Standby",
            ManagerState::Starting => "Starting",
            ManagerState::PreparingAudio => "PreparingAudio",
            ManagerState::PreparedAudio => "PreparedAudio",
            ManagerState::Initializing => "Initializing",
            ManagerState::Active => "Active",
            ManagerState::Done => "Done",
            ManagerState::Cancelled => "Cancelled",
            ManagerState::Failed => "Failed",
        };
        f.write_str(name)
    }
}

/// Broadcast to subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum ManagerEvent {
    StateChanged(ManagerState),
    AudioLoadProgress { loaded: usize, total: usize },
}

/// Stage positions at one instant
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FabricationProgress {
    pub crafted_to_micros: ChainMicros,
    pub dubbed_to_micros: ChainMicros,
    pub shipped_to_micros: ChainMicros,
}

impl FabricationProgress {
    pub fn craft_ahead_seconds(&self) -> f64 {
        micros_to_seconds(self.crafted_to_micros - self.shipped_to_micros)
    }

    pub fn dub_ahead_seconds(&self) -> f64 {
        micros_to_seconds(self.dubbed_to_micros - self.shipped_to_micros)
    }
}

/// State shared between the manager and its threads
struct ManagerShared {
    state: Mutex<ManagerState>,
    subscribers: Mutex<Vec<Sender<ManagerEvent>>>,
}

impl ManagerShared {
    fn state(&self) -> ManagerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: ManagerState) {
        let previous = std::mem::replace(
            &mut *self.state.lock().unwrap_or_else(PoisonError::into_inner),
            state,
        );
        if previous != state {
            log::info!("[FABRICATION] {} -> {}", previous, state);
            self.broadcast(ManagerEvent::StateChanged(state));
        }
    }

    fn subscribers(&self) -> MutexGuard<'_, Vec<Sender<ManagerEvent>>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Send to every live subscriber, dropping disconnected ones
    fn broadcast(&self, event: ManagerEvent) {
        self.subscribers()
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }

    /// Derive the terminal state from the context flags
    fn settle(&self, ctx: &FabricationContext) {
        let (state, chain_state) = if ctx.is_failed() {
            (ManagerState::Failed, ChainState::Failed)
        } else if ctx.is_cancelled() {
            (ManagerState::Cancelled, ChainState::Complete)
        } else {
            (ManagerState::Done, ChainState::Complete)
        };
        if let Err(e) = ctx.store.update_chain_state(chain_state) {
            log::warn!("[FABRICATION] {}", e);
        }
        self.set_state(state);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Manager
// ═══════════════════════════════════════════════════════════════════════════════

/// Owns one fabrication run at a time
pub struct FabricationManager {
    shared: Arc<ManagerShared>,
    ctx: Option<Arc<FabricationContext>>,
    threads: Vec<JoinHandle<()>>,
}

impl FabricationManager {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(ManagerShared {
                state: Mutex::new(ManagerState::Standby),
                subscribers: Mutex::new(Vec::new()),
            }),
            ctx: None,
            threads: Vec::new(),
        }
    }

    pub fn state(&self) -> ManagerState {
        self.shared.state()
    }

    /// Receive every state change and load progress from now on
    pub fn subscribe(&self) -> Receiver<ManagerEvent> {
        let (sender, receiver) = channel::unbounded();
        self.shared.subscribers().push(sender);
        receiver
    }

    /// The running context, while a run exists
    pub fn context(&self) -> Option<&Arc<FabricationContext>> {
        self.ctx.as_ref()
    }

    /// Start fabricating with the default craft phases
    pub fn start(
        &mut self,
        settings: FabricationSettings,
        content: &dyn ContentProvider,
        loader: Arc<dyn WaveformLoader>,
        sink_factory: SinkFactory,
    ) -> FabricationResult<()> {
        self.start_with_phases(settings, content, loader, sink_factory, default_phases())
    }

    /// Start fabricating with a custom craft phase list
    ///
    /// Runs the preparation steps on the calling thread, then returns once
    /// the stage threads are running. A preparation failure leaves the
    /// manager `Failed`.
    pub fn start_with_phases(
        &mut self,
        settings: FabricationSettings,
        content: &dyn ContentProvider,
        loader: Arc<dyn WaveformLoader>,
        sink_factory: SinkFactory,
        phases: Vec<Box<dyn CraftPhase>>,
    ) -> FabricationResult<()> {
        let state = self.state();
        if state != ManagerState::Standby {
            return Err(FabricationError::InvalidManagerState { action: "start", state });
        }
        let result = self.prepare_and_spawn(settings, content, loader, sink_factory, phases);
        if let Err(e) = &result {
            log::error!("[FABRICATION] Failed to start: {}", e);
            self.shared.set_state(ManagerState::Failed);
        }
        result
    }

    fn prepare_and_spawn(
        &mut self,
        settings: FabricationSettings,
        content: &dyn ContentProvider,
        loader: Arc<dyn WaveformLoader>,
        sink_factory: SinkFactory,
        phases: Vec<Box<dyn CraftPhase>>,
    ) -> FabricationResult<()> {
        self.shared.set_state(ManagerState::Starting);
        settings.validate()?;
        let catalog = Arc::new(content.load_content(&settings.input_template_key)?);
        let template = catalog
            .template(&settings.input_template_key)
            .ok_or_else(|| FabricationError::TemplateNotFound(settings.input_template_key.clone()))?
            .config
            .clone();

        self.shared.set_state(ManagerState::PreparingAudio);
        let cache = Arc::new(AudioCache::new(
            loader,
            settings.waveform_path_prefix.clone(),
            settings.waveform_base_url.clone(),
            settings.audio_format(),
        ));
        self.preload_audio(&catalog, &cache);
        self.shared.set_state(ManagerState::PreparedAudio);

        self.shared.set_state(ManagerState::Initializing);
        let store = Arc::new(EntityStore::new());
        let snapshot = settings
            .rehydrate
            .snapshot_path
            .as_ref()
            .and_then(|path| select_snapshot(&FileSnapshotSource::new(path), &settings));
        let (chain_id, start_at, crafted_to) = match snapshot {
            Some(snapshot) => {
                let start_at = snapshot.shipped_to_micros;
                let crafted_to = snapshot.crafted_to_micros().unwrap_or(start_at);
                let chain_id = snapshot.chain.id;
                store.restore(snapshot.chain, snapshot.segments)?;
                (chain_id, start_at, crafted_to)
            }
            None => {
                let chain = Chain::new(1, settings.input_template_key.clone());
                let chain_id = chain.id;
                store.put_chain(chain);
                (chain_id, 0, 0)
            }
        };
        store.update_chain_state(ChainState::Fabricate)?;

        let ctx = Arc::new(FabricationContext::new(
            settings, template, catalog, store, cache, chain_id, start_at, crafted_to,
        ));
        self.ctx = Some(ctx.clone());
        self.spawn_threads(ctx, sink_factory, phases)?;
        self.shared.set_state(ManagerState::Active);
        Ok(())
    }

    fn preload_audio(&self, catalog: &Catalog, cache: &AudioCache) {
        let audios: Vec<InstrumentAudio> = catalog.audios().cloned().collect();
        let started = Instant::now();
        let shared = &self.shared;
        let loaded = cache.load_with_progress(&audios, |loaded, total| {
            shared.broadcast(ManagerEvent::AudioLoadProgress { loaded, total });
        });
        log::info!(
            "[FABRICATION] Preloaded {} of {} instrument audios in {:?}",
            loaded,
            audios.len(),
            started.elapsed()
        );
    }

    fn spawn_threads(
        &mut self,
        ctx: Arc<FabricationContext>,
        sink_factory: SinkFactory,
        phases: Vec<Box<dyn CraftPhase>>,
    ) -> FabricationResult<()> {
        let (ship_tx, ship_rx) = channel::bounded::<ShipWork>(1);

        let fabrication_ctx = ctx.clone();
        let fabrication = thread::Builder::new()
            .name("fabrication".to_string())
            .spawn(move || fabrication_thread(fabrication_ctx, phases, sink_factory, ship_tx))
            .map_err(|source| FabricationError::Thread {
                name: "fabrication",
                source,
            })?;
        self.threads.push(fabrication);

        let shared = self.shared.clone();
        let ship = thread::Builder::new()
            .name("ship".to_string())
            .spawn(move || ship_thread(ctx, shared, ship_rx));
        match ship {
            Ok(handle) => {
                self.threads.push(handle);
                Ok(())
            }
            Err(source) => {
                if let Some(ctx) = &self.ctx {
                    ctx.fail(Stage::Ship, &source);
                }
                Err(FabricationError::Thread { name: "ship", source })
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Monitoring
    // ═══════════════════════════════════════════════════════════════════════

    pub fn progress(&self) -> Option<FabricationProgress> {
        self.ctx.as_ref().map(|ctx| FabricationProgress {
            crafted_to_micros: ctx.progress.crafted_to(),
            dubbed_to_micros: ctx.progress.dubbed_to(),
            shipped_to_micros: ctx.progress.shipped_to(),
        })
    }

    /// Active, and no running stage has stalled beyond the stale limit
    pub fn is_healthy(&self) -> bool {
        let Some(ctx) = self.ctx.as_ref() else {
            return false;
        };
        if self.state() != ManagerState::Active {
            return false;
        }
        let now = ctx.elapsed_millis();
        let stale_millis = ctx.settings.health_stale_seconds as u64 * 1_000;
        Stage::ALL.iter().all(|stage| {
            if ctx.is_finished(*stage) {
                return true;
            }
            let idle = now.saturating_sub(ctx.progress.advanced_at_millis(*stage));
            if idle > stale_millis {
                log::warn!("[FABRICATION] {} has not advanced in {}ms", stage.name(), idle);
                return false;
            }
            true
        })
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Operator controls
    // ═══════════════════════════════════════════════════════════════════════

    fn active_context(&self, action: &'static str) -> FabricationResult<&Arc<FabricationContext>> {
        let state = self.state();
        match self.ctx.as_ref() {
            Some(ctx) if state == ManagerState::Active => Ok(ctx),
            _ => Err(FabricationError::InvalidManagerState { action, state }),
        }
    }

    /// Go to a macro program from the next crafted segment on
    pub fn do_override_macro(&self, program_id: EntityId) -> FabricationResult<()> {
        let ctx = self.active_context("override macro")?;
        match ctx.catalog.program(program_id) {
            Some(program) if program.program_type == ProgramType::Macro => {
                ctx.request_override(CraftOverride::GotoMacro(program_id));
                Ok(())
            }
            _ => Err(FabricationError::ProgramNotFound(program_id)),
        }
    }

    /// Go to the first macro program carrying every one of the memes
    pub fn do_override_memes(&self, memes: Vec<String>) -> FabricationResult<()> {
        let ctx = self.active_context("override memes")?;
        if ctx.catalog.program_with_memes(ProgramType::Macro, &memes).is_none() {
            return Err(FabricationError::NoProgramWithMemes(ProgramType::Macro, memes));
        }
        ctx.request_override(CraftOverride::GotoMemes(memes));
        Ok(())
    }

    /// Mix at a fixed intensity from the next chunk on; `None` hands
    /// intensity back to the segments
    pub fn set_intensity_override(&self, intensity: Option<f64>) -> FabricationResult<()> {
        let ctx = self.active_context("override intensity")?;
        if let Some(value) = intensity.filter(|v| !(0.0..=1.0).contains(v)) {
            return Err(FabricationError::IntensityOutOfRange(value));
        }
        ctx.set_intensity_override(intensity);
        Ok(())
    }

    /// Stop the run and wait for both threads
    ///
    /// Upstream stages stop at once; Ship drains what was already mixed,
    /// closes its sink and settles the terminal state.
    pub fn finish(&mut self, cancelled: bool) {
        if let Some(ctx) = &self.ctx {
            if cancelled {
                ctx.cancel();
            } else {
                ctx.finish_stage(Stage::Craft);
                ctx.finish_stage(Stage::Dub);
            }
        }
        self.join();
    }

    /// Block until both stage threads have exited
    pub fn join(&mut self) {
        for handle in self.threads.drain(..) {
            let name = handle.thread().name().unwrap_or("worker").to_string();
            if handle.join().is_err() {
                log::error!("[FABRICATION] {} thread panicked", name);
            }
        }
    }

    /// Stop any run, drop its context and return to `Standby`
    pub fn reset(&mut self) {
        if !self.state().is_terminal() {
            self.finish(true);
        }
        self.join();
        if let Some(ctx) = self.ctx.take() {
            ctx.cache.invalidate_all();
        }
        self.shared.set_state(ManagerState::Standby);
    }
}

impl Default for FabricationManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for FabricationManager {
    fn drop(&mut self) {
        if !self.threads.is_empty() {
            self.finish(true);
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Threads
// ═══════════════════════════════════════════════════════════════════════════════

/// Sleep out the rest of a cycle
fn pace(cycle_started: Instant, cycle_millis: u64) {
    let cycle = Duration::from_millis(cycle_millis);
    if let Some(remaining) = cycle.checked_sub(cycle_started.elapsed()) {
        thread::sleep(remaining);
    }
}

fn fabrication_thread(
    ctx: Arc<FabricationContext>,
    phases: Vec<Box<dyn CraftPhase>>,
    sink_factory: SinkFactory,
    ship_tx: Sender<ShipWork>,
) {
    let (producer, consumer) = rtrb::RingBuffer::new(ctx.settings.byte_pipe_capacity());
    let mut dub = match DubWork::new(ctx.clone(), producer) {
        Ok(dub) => dub,
        Err(e) => {
            ctx.fail(Stage::Dub, &e);
            return;
        }
    };
    let ship = ShipWork::new(ctx.clone(), consumer, sink_factory);
    if ship_tx.send(ship).is_err() {
        ctx.fail(Stage::Ship, &"ship thread is gone");
        return;
    }
    let mut craft = CraftWork::new(ctx.clone(), phases);
    log::info!("[FABRICATION] Fabrication thread started");

    while !(ctx.is_finished(Stage::Craft) && ctx.is_finished(Stage::Dub)) {
        let started = Instant::now();
        let shipped_to = ctx.progress.shipped_to();
        if let Err(e) = craft.run_cycle(shipped_to, dub.chunk_from()) {
            ctx.fail(Stage::Craft, &e);
            break;
        }
        if let Err(e) = dub.run_cycle(&craft, shipped_to) {
            ctx.fail(Stage::Dub, &e);
            break;
        }
        pace(started, ctx.settings.cycle_millis);
    }
    log::info!("[FABRICATION] Fabrication thread stopped");
}

fn ship_thread(ctx: Arc<FabricationContext>, shared: Arc<ManagerShared>, ship_rx: Receiver<ShipWork>) {
    if let Ok(mut ship) = ship_rx.recv() {
        log::info!("[FABRICATION] Ship thread started");
        while !ship.is_finished() {
            let started = Instant::now();
            if ship.run_cycle().is_err() {
                break;
            }
            pace(started, ctx.settings.cycle_millis);
        }
        ship.finish();
        log::info!("[FABRICATION] Ship thread stopped");
    } else {
        ctx.finish_stage(Stage::Ship);
    }
    shared.settle(&ctx);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{OutputMode, RehydrateSettings};
    use crate::testing::fixtures;

    const SECOND_BYTES: usize = 32_000;

    fn wait_for_terminal(events: &Receiver<ManagerEvent>) -> ManagerState {
        let deadline = Instant::now() + Duration::from_secs(20);
        while Instant::now() < deadline {
            if let Ok(ManagerEvent::StateChanged(state)) = events.recv_timeout(Duration::from_millis(100)) {
                if state.is_terminal() {
                    return state;
                }
            }
        }
        panic!("no terminal state within 20s");
    }

    fn file_settings(output_seconds: u32) -> FabricationSettings {
        FabricationSettings {
            output_mode: OutputMode::File,
            output_seconds,
            ..fixtures::settings()
        }
    }

    fn start(manager: &mut FabricationManager, settings: FabricationSettings) -> fixtures::Captured {
        let (factory, captured) = fixtures::memory_sink_factory();
        manager
            .start(
                settings,
                &fixtures::catalog(),
                Arc::new(fixtures::SineLoader::default()),
                factory,
            )
            .unwrap();
        captured
    }

    #[test]
    fn test_runs_to_done_after_output_seconds() {
        let mut manager = FabricationManager::new();
        let events = manager.subscribe();
        let captured = start(&mut manager, file_settings(2));

        assert_eq!(wait_for_terminal(&events), ManagerState::Done);
        manager.join();
        assert_eq!(manager.state(), ManagerState::Done);

        let outputs = captured.outputs();
        let shipped: usize = outputs.iter().map(|o| o.bytes.len()).sum();
        assert_eq!(shipped, 2 * SECOND_BYTES);
        assert!(outputs.iter().all(|o| o.finished));
        let chain = manager.context().unwrap().store.read_chain().unwrap();
        assert_eq!(chain.state, ChainState::Complete);
    }

    #[test]
    fn test_reset_returns_to_standby() {
        let mut manager = FabricationManager::new();
        let events = manager.subscribe();
        start(&mut manager, file_settings(1));
        wait_for_terminal(&events);

        manager.reset();
        assert_eq!(events.try_recv(), Ok(ManagerEvent::StateChanged(ManagerState::Standby)));
        assert_eq!(manager.state(), ManagerState::Standby);
        assert!(manager.context().is_none());
        assert!(manager.progress().is_none());
    }

    #[test]
    fn test_preload_reports_progress() {
        let mut manager = FabricationManager::new();
        let events = manager.subscribe();
        start(&mut manager, file_settings(1));
        let mut seen = Vec::new();
        loop {
            match events.recv_timeout(Duration::from_secs(20)) {
                Ok(ManagerEvent::StateChanged(state)) if state.is_terminal() => break,
                Ok(event) => seen.push(event),
                Err(_) => panic!("no terminal state"),
            }
        }
        let total = fixtures::catalog().audio_count();
        assert!(seen.contains(&ManagerEvent::AudioLoadProgress { loaded: total, total }));
        assert_eq!(seen.first(), Some(&ManagerEvent::StateChanged(ManagerState::Starting)));
        assert!(seen.contains(&ManagerEvent::StateChanged(ManagerState::Active)));
    }

    #[test]
    fn test_cancel_settles_cancelled() {
        let mut manager = FabricationManager::new();
        start(&mut manager, file_settings(0));
        assert!(manager.is_healthy());
        manager.finish(true);
        assert_eq!(manager.state(), ManagerState::Cancelled);
        assert!(!manager.is_healthy());
    }

    #[test]
    fn test_overrides_require_active_and_known_programs() {
        let mut manager = FabricationManager::new();
        assert!(matches!(
            manager.do_override_macro(fixtures::DUSK_MACRO),
            Err(FabricationError::InvalidManagerState {
                state: ManagerState::Standby,
                ..
            })
        ));

        start(&mut manager, file_settings(0));
        manager.do_override_macro(fixtures::DUSK_MACRO).unwrap();
        assert!(matches!(
            manager.do_override_macro(fixtures::PULSE_MAIN),
            Err(FabricationError::ProgramNotFound(id)) if id == fixtures::PULSE_MAIN
        ));
        assert!(matches!(
            manager.do_override_memes(vec!["nonexistent".into()]),
            Err(FabricationError::NoProgramWithMemes(ProgramType::Macro, _))
        ));
        manager.do_override_memes(vec!["calm".into()]).unwrap();
        manager.finish(true);
    }

    #[test]
    fn test_intensity_override_requires_active_and_range() {
        let mut manager = FabricationManager::new();
        assert!(matches!(
            manager.set_intensity_override(Some(0.5)),
            Err(FabricationError::InvalidManagerState { .. })
        ));

        start(&mut manager, file_settings(0));
        assert!(matches!(
            manager.set_intensity_override(Some(1.5)),
            Err(FabricationError::IntensityOutOfRange(v)) if v == 1.5
        ));
        manager.set_intensity_override(Some(0.3)).unwrap();
        assert_eq!(manager.context().and_then(|ctx| ctx.intensity_override()), Some(0.3));
        manager.set_intensity_override(None).unwrap();
        assert_eq!(manager.context().and_then(|ctx| ctx.intensity_override()), None);
        manager.finish(true);
    }

    #[test]
    fn test_unknown_template_fails_start() {
        let mut manager = FabricationManager::new();
        let (factory, _) = fixtures::memory_sink_factory();
        let settings = FabricationSettings {
            input_template_key: "missing".to_string(),
            ..fixtures::settings()
        };
        let result = manager.start(
            settings,
            &fixtures::catalog(),
            Arc::new(fixtures::SineLoader::default()),
            factory,
        );
        assert!(result.is_err());
        assert_eq!(manager.state(), ManagerState::Failed);

        // a second start needs a reset first
        let (factory, _) = fixtures::memory_sink_factory();
        assert!(matches!(
            manager.start(
                fixtures::settings(),
                &fixtures::catalog(),
                Arc::new(fixtures::SineLoader::default()),
                factory
            ),
            Err(FabricationError::InvalidManagerState { action: "start", .. })
        ));
    }

    #[test]
    fn test_rehydrates_from_snapshot_of_previous_run() {
        let dir = tempfile::tempdir().unwrap();
        let settings = FabricationSettings {
            rehydrate: RehydrateSettings {
                enabled: true,
                snapshot_path: Some(dir.path().join("snapshot.json")),
                ahead_threshold_seconds: 0,
            },
            ..file_settings(2)
        };

        let mut first = FabricationManager::new();
        let events = first.subscribe();
        start(&mut first, settings.clone());
        assert_eq!(wait_for_terminal(&events), ManagerState::Done);
        first.join();

        let mut second = FabricationManager::new();
        let events = second.subscribe();
        let captured = start(&mut second, settings);
        assert_eq!(second.context().unwrap().start_at_chain_micros, 2_000_000);
        assert_eq!(wait_for_terminal(&events), ManagerState::Done);
        second.join();

        let shipped: usize = captured.outputs().iter().map(|o| o.bytes.len()).sum();
        assert_eq!(shipped, 2 * SECOND_BYTES);
        assert!(second.progress().unwrap().shipped_to_micros >= 4_000_000);
    }
}
