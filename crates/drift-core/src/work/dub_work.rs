//! Dub stage: mixes crafted segments into the byte pipe, one chunk per cycle
//!
//! Dub plans a chunk `[chunk_from, chunk_to)` one mixer length long when it
//! is less than `dub_ahead` past Ship, publishes the planned end to Craft,
//! then mixes it once Craft reports every segment under it ready and the
//! pipe has room for the whole chunk.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use super::context::{FabricationContext, Stage};
use super::craft_work::CraftWork;
use super::error::FabricationResult;
use crate::mixer::{ActiveAudio, Mixer, MixerError};
use crate::model::{Segment, SegmentState};
use crate::types::{micros_to_seconds, ChainMicros, EntityId};

pub struct DubWork {
    ctx: Arc<FabricationContext>,
    mixer: Mixer,
    chunk_from: ChainMicros,
    chunk_to: ChainMicros,
    /// Intensity the last chunk ended on; the next chunk ramps from here
    intensity: Option<f64>,
}

impl DubWork {
    pub fn new(ctx: Arc<FabricationContext>, producer: rtrb::Producer<u8>) -> FabricationResult<Self> {
        let mixer = Mixer::new(
            ctx.settings.audio_format(),
            ctx.settings.mixer_length_micros(),
            &ctx.template,
            ctx.cache.clone(),
            producer,
        )?;
        let start = ctx.start_at_chain_micros;
        Ok(Self {
            ctx,
            mixer,
            chunk_from: start,
            chunk_to: start,
            intensity: None,
        })
    }

    pub fn chunk_from(&self) -> ChainMicros {
        self.chunk_from
    }

    pub fn chunk_to(&self) -> ChainMicros {
        self.chunk_to
    }

    /// Intensity the last mixed chunk ended on
    pub fn intensity(&self) -> Option<f64> {
        self.intensity
    }

    /// One dub cycle: plan a chunk if needed, then try to mix it
    pub fn run_cycle(&mut self, craft: &CraftWork, shipped_to: ChainMicros) -> FabricationResult<()> {
        if self.is_finished() {
            return Ok(());
        }
        if craft.is_finished() {
            log::info!("[DUB] Craft has stopped");
            self.finish();
            return Ok(());
        }
        self.plan_frame(shipped_to);
        self.dub_frame(craft)
    }

    fn plan_frame(&mut self, shipped_to: ChainMicros) {
        if self.chunk_to > self.chunk_from {
            return;
        }
        if self.chunk_to >= shipped_to + self.ctx.settings.dub_ahead_micros() {
            log::trace!(
                "[DUB] {:.1}s ahead of ship; waiting",
                micros_to_seconds(self.chunk_to - shipped_to)
            );
            return;
        }
        self.chunk_to = self.chunk_from + self.ctx.settings.mixer_length_micros();
        self.ctx.progress.set_dub_planned_to(self.chunk_to);
    }

    fn dub_frame(&mut self, craft: &CraftWork) -> FabricationResult<()> {
        if self.chunk_to <= self.chunk_from {
            return Ok(());
        }
        let needed = self.mixer.chunk_bytes();
        if self.mixer.free_bytes() < needed {
            log::trace!("[DUB] Pipe has {} of {} bytes free; waiting", self.mixer.free_bytes(), needed);
            return Ok(());
        }
        let segments = craft.segments_if_ready(self.chunk_from, self.chunk_to);
        if segments.is_empty() {
            log::trace!(
                "[DUB] Waiting for segments covering [{:.1}s, {:.1}s)",
                micros_to_seconds(self.chunk_from),
                micros_to_seconds(self.chunk_to)
            );
            return Ok(());
        }

        let started = Instant::now();
        let to_intensity = self.ctx.intensity_override().unwrap_or_else(|| {
            segments
                .iter()
                .find(|s| s.contains(self.chunk_from))
                .or(segments.first())
                .map_or(1.0, |s| s.intensity)
        });
        let from_intensity = self.intensity.unwrap_or(to_intensity);
        let actives: Vec<ActiveAudio> = self
            .active_audios(&segments)
            .into_iter()
            .map(|active| active.with_intensity(&self.ctx.template, from_intensity, to_intensity))
            .collect();
        let count = actives.len();
        self.mixer.set_targets(actives);
        match self.mixer.mix() {
            Ok(_) => {}
            Err(MixerError::BufferFull { .. }) => return Ok(()),
            Err(e) => return Err(e.into()),
        }
        self.intensity = Some(to_intensity);

        self.chunk_from = self.chunk_to;
        self.ctx.advance(Stage::Dub, self.chunk_from);
        self.update_segment_states(&segments)?;
        log::debug!(
            "[DUB] Mixed {} audios to {:.1}s in {:?}",
            count,
            micros_to_seconds(self.chunk_from),
            started.elapsed()
        );
        Ok(())
    }

    /// Resolve every audible pick of the segments against the current chunk
    fn active_audios(&self, segments: &[Segment]) -> Vec<ActiveAudio> {
        let store = &self.ctx.store;
        let catalog = &self.ctx.catalog;
        let mixer_length = self.chunk_to - self.chunk_from;
        let ids: Vec<EntityId> = segments.iter().map(|s| s.id).collect();
        let records: HashMap<EntityId, _> = store
            .read_records(&ids)
            .into_iter()
            .map(|r| (r.segment.id, r))
            .collect();

        let mut actives = Vec::new();
        for pick in store.read_picks(&ids) {
            let Some(record) = records.get(&pick.segment_id) else {
                continue;
            };
            let Some(arrangement) = record.arrangements.iter().find(|a| a.id == pick.arrangement_id) else {
                continue;
            };
            let choice_muted = record
                .choices
                .iter()
                .find(|c| c.id == arrangement.choice_id)
                .is_some_and(|c| c.mute);
            if pick.mute || arrangement.mute || choice_muted {
                continue;
            }

            let Some(instrument) = catalog.instrument(arrangement.instrument_id) else {
                log::warn!(
                    "[DUB] Pick[{}] skipped: Instrument[{}] not in catalog",
                    pick.id,
                    arrangement.instrument_id
                );
                continue;
            };
            let Some(audio) = catalog.audio(pick.instrument_audio_id) else {
                log::warn!(
                    "[DUB] Pick[{}] skipped: InstrumentAudio[{}] not in catalog",
                    pick.id,
                    pick.instrument_audio_id
                );
                continue;
            };

            if let Some(active) = ActiveAudio::compute(
                &pick,
                instrument,
                audio,
                record.segment.begin_micros,
                self.chunk_from,
                mixer_length,
                self.ctx.template.release_millis,
            ) {
                actives.push(active);
            }
        }
        actives
    }

    /// Mark segments Dubbing once mixing reaches them and Dubbed once passed
    fn update_segment_states(&self, segments: &[Segment]) -> FabricationResult<()> {
        let store = &self.ctx.store;
        for segment in segments {
            let mut state = segment.state;
            if state == SegmentState::Crafted && segment.begin_micros < self.chunk_from {
                state = store
                    .update_segment_state(segment.id, SegmentState::Crafted, SegmentState::Dubbing)?
                    .state;
            }
            if state == SegmentState::Dubbing && segment.end_micros() <= self.chunk_from {
                store.update_segment_state(segment.id, SegmentState::Dubbing, SegmentState::Dubbed)?;
            }
        }
        Ok(())
    }

    /// Finish Dub, then Craft
    pub fn finish(&self) {
        self.ctx.finish_stage(Stage::Dub);
        self.ctx.finish_stage(Stage::Craft);
    }

    pub fn is_finished(&self) -> bool {
        self.ctx.is_finished(Stage::Dub)
    }
}
