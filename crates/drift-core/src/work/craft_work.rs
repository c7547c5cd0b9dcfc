//! Craft stage: builds segments ahead of Ship
//!
//! Each cycle crafts at most one segment, then maintains the audio cache and
//! collects shipped segments that fell out of the persistence window.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use super::context::{CraftOverride, FabricationContext, Stage};
use super::error::{FabricationError, FabricationResult};
use crate::craft::{CraftPhase, Fabricator};
use crate::model::{InstrumentAudio, Segment, SegmentState};
use crate::types::{micros_to_seconds, ChainMicros};

pub struct CraftWork {
    ctx: Arc<FabricationContext>,
    phases: Vec<Box<dyn CraftPhase>>,
}

impl CraftWork {
    pub fn new(ctx: Arc<FabricationContext>, phases: Vec<Box<dyn CraftPhase>>) -> Self {
        Self { ctx, phases }
    }

    pub fn context(&self) -> &Arc<FabricationContext> {
        &self.ctx
    }

    /// One craft cycle
    ///
    /// A pending override rewrites the chain after the segment being dubbed.
    /// Otherwise the next segment is crafted unless Craft is already at least
    /// `craft_ahead` past Ship and past the chunk Dub has planned.
    pub fn run_cycle(
        &mut self,
        shipped_to: ChainMicros,
        dubbed_to: ChainMicros,
    ) -> FabricationResult<()> {
        if self.is_finished() {
            return Ok(());
        }
        let started = Instant::now();

        let request = self.ctx.take_override();
        if request.is_pending() {
            self.rewrite_after(dubbed_to, request)?;
        } else {
            let at = self.crafted_to();
            let target = (shipped_to + self.ctx.settings.craft_ahead_micros())
                .max(self.ctx.progress.dub_planned_to());
            if self.ctx.store.segment_count() == 0 || at < target {
                self.craft_next(CraftOverride::Ready)?;
            } else {
                log::trace!(
                    "[CRAFT] {:.1}s ahead of ship, target {:.1}s; waiting",
                    micros_to_seconds(at - shipped_to),
                    micros_to_seconds(target)
                );
            }
        }

        self.maintain_cache(shipped_to, dubbed_to);
        self.collect_garbage(shipped_to);
        log::debug!("[CRAFT] Cycle took {:?}", started.elapsed());
        Ok(())
    }

    /// End of the last crafted segment, or the start position when none is
    fn crafted_to(&self) -> ChainMicros {
        self.ctx
            .store
            .read_last_crafted_segment()
            .map_or(self.ctx.start_at_chain_micros, |s| s.end_micros())
    }

    /// Replace everything after the segment being dubbed with one override
    /// segment, cutting the dubbed segment short first
    fn rewrite_after(&mut self, dubbed_to: ChainMicros, request: CraftOverride) -> FabricationResult<()> {
        let store = &self.ctx.store;
        let anchor = store
            .read_segments_spanning(dubbed_to, dubbed_to)
            .into_iter()
            .next()
            .or_else(|| store.read_last_segment());
        if let Some(anchor) = anchor {
            let deleted = store.delete_segments_after(anchor.id);
            log::info!(
                "[CRAFT] Override {:?}: deleted {} segments after Segment[{}]",
                request,
                deleted,
                anchor.id
            );
            self.cut_short(&anchor, dubbed_to)?;
        }
        self.craft_next(request)?;
        Ok(())
    }

    /// End the segment at the first cutoff boundary at or past `dubbed_to`
    ///
    /// Boundaries fall every `cutoff_minimum_bars` bars from the segment
    /// begin. A segment already ending on or before that boundary is left
    /// alone.
    fn cut_short(&self, segment: &Segment, dubbed_to: ChainMicros) -> FabricationResult<()> {
        let bars = self.ctx.template.cutoff_minimum_bars;
        let micros_per_beat = segment.micros_per_beat();
        if bars == 0 || micros_per_beat <= 0.0 || !segment.contains(dubbed_to) {
            return Ok(());
        }
        let beats_per_cut = (segment.beats_per_bar * bars) as f64;
        let dubbed_beats = (dubbed_to - segment.begin_micros) as f64 / micros_per_beat;
        let cut_beats = beats_per_cut * (dubbed_beats / beats_per_cut).ceil();
        let total_beats = (segment.total_bars * segment.beats_per_bar) as f64;
        if cut_beats <= 0.0 || cut_beats >= total_beats {
            return Ok(());
        }

        let duration = (cut_beats * micros_per_beat).round() as ChainMicros;
        let total_bars = (cut_beats / segment.beats_per_bar as f64).round() as u32;
        let (cut, trimmed) = self.ctx.store.cut_segment_short(segment.id, duration, total_bars)?;
        log::info!(
            "[CRAFT] Segment[{}] cut short to {} bars, now ends at {:.3}s; {} picks trimmed",
            cut.id,
            cut.total_bars,
            micros_to_seconds(cut.end_micros()),
            trimmed
        );
        Ok(())
    }

    /// Plan the next segment and run every phase on it
    fn craft_next(&mut self, request: CraftOverride) -> FabricationResult<Segment> {
        let ctx = self.ctx.clone();
        let store = &ctx.store;
        let previous = store.read_last_segment();
        let planned = match &previous {
            Some(last) => Segment::planned(last.id + 1, ctx.chain_id, last.end_micros()),
            None => Segment::planned(0, ctx.chain_id, ctx.start_at_chain_micros),
        };
        let segment = store.create_segment(planned)?;
        let segment = store.update_segment_state(segment.id, SegmentState::Planned, SegmentState::Crafting)?;

        let previous = previous.and_then(|p| store.read_record(p.id));
        let mut fabricator = Fabricator::new(store, &ctx.catalog, segment, previous, request);
        for phase in &mut self.phases {
            if let Err(e) = phase.do_work(&mut fabricator) {
                log::error!(
                    "[CRAFT] Phase '{}' failed on Segment[{}]: {}",
                    phase.name(),
                    fabricator.segment().id,
                    e
                );
                return Err(e);
            }
        }

        let segment = fabricator.into_segment();
        if segment.duration_micros <= 0 {
            return Err(FabricationError::NoDuration(segment.id));
        }
        let segment = store.update_segment_state(segment.id, SegmentState::Crafting, SegmentState::Crafted)?;
        ctx.advance(Stage::Craft, segment.end_micros());
        log::info!(
            "[CRAFT] Segment[{}] {:?} crafted [{:.3}s, {:.3}s)",
            segment.id,
            segment.segment_type,
            micros_to_seconds(segment.begin_micros),
            micros_to_seconds(segment.end_micros())
        );
        Ok(segment)
    }

    /// Keep exactly the audio of the segments in the mix window resident
    fn maintain_cache(&self, shipped_to: ChainMicros, dubbed_to: ChainMicros) {
        let from = shipped_to.min(dubbed_to);
        let to = shipped_to.max(dubbed_to) + self.ctx.settings.mixer_length_micros();
        let store = &self.ctx.store;
        let ids: Vec<_> = store.read_segments_spanning(from, to).iter().map(|s| s.id).collect();
        let audios: BTreeMap<_, InstrumentAudio> = store
            .read_picks(&ids)
            .iter()
            .filter_map(|p| self.ctx.catalog.audio(p.instrument_audio_id))
            .map(|a| (a.id, a.clone()))
            .collect();
        let audios: Vec<InstrumentAudio> = audios.into_values().collect();
        let loaded = self.ctx.cache.load_these_and_forget_the_rest(&audios);
        if loaded > 0 {
            log::debug!("[CRAFT] Cache loaded {} waveforms for the mix window", loaded);
        }
    }

    /// Delete segments that ended before the persistence window
    fn collect_garbage(&self, shipped_to: ChainMicros) {
        let cutoff = shipped_to - self.ctx.settings.persistence_window_micros();
        if cutoff <= self.ctx.start_at_chain_micros {
            return;
        }
        let deleted = self.ctx.store.delete_segments_ending_before(cutoff);
        if deleted > 0 {
            log::debug!(
                "[CRAFT] Collected {} segments ending before {:.1}s",
                deleted,
                micros_to_seconds(cutoff)
            );
        }
    }

    /// Crafted segments covering `[from, to]`, plus one on either side
    ///
    /// Empty unless crafted segments cover the whole range and no override
    /// is waiting to rewrite it.
    pub fn segments_if_ready(&self, from: ChainMicros, to: ChainMicros) -> Vec<Segment> {
        if !self.is_ready() {
            return Vec::new();
        }
        let store = &self.ctx.store;
        let spanning = store.read_segments_spanning(from, to);
        let (Some(first), Some(last)) = (spanning.first(), spanning.last()) else {
            return Vec::new();
        };
        if spanning.iter().any(|s| !s.state.is_crafted()) || first.begin_micros > from || last.end_micros() < to {
            return Vec::new();
        }

        let before = first
            .id
            .checked_sub(1)
            .and_then(|id| store.read_segment(id))
            .filter(|s| s.state.is_crafted());
        let after = store.read_segment(last.id + 1).filter(|s| s.state.is_crafted());
        before.into_iter().chain(spanning).chain(after).collect()
    }

    /// Not ready while an override waits to rewrite the chain
    pub fn is_ready(&self) -> bool {
        !self.ctx.has_pending_override()
    }

    pub fn finish(&self) {
        self.ctx.finish_stage(Stage::Craft);
    }

    pub fn is_finished(&self) -> bool {
        self.ctx.is_finished(Stage::Craft)
    }
}
