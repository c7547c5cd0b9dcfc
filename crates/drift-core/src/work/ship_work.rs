//! Ship stage: moves mixed bytes from the pipe to the output sink
//!
//! Two pacing disciplines:
//!
//! - **Playback** (sync): a cycle is skipped while the bytes handed to the
//!   sink are more than `sync_ahead` past what the listener has heard.
//! - **File** (free-running): every available byte ships, split into files
//!   along segment boundaries according to the [`OutputFileSplit`] rule.
//!   Files receive whole PCM chunks; the last partial chunk of a file is
//!   flushed frame-aligned so the file closes exactly on its boundary.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use super::context::{FabricationContext, Stage};
use super::error::FabricationResult;
use super::rehydrate::{write_snapshot, ChainSnapshot};
use crate::config::OutputMode;
use crate::model::Segment;
use crate::output::{OutputFile, OutputFileSplit, OutputSink, SinkFactory, SinkTarget};
use crate::types::{micros_to_seconds, AudioFormat, ChainMicros};

enum ShipMode {
    Playback {
        started: Option<Instant>,
    },
    File {
        split: OutputFileSplit,
        file: Option<OutputFile>,
        next_number: u64,
    },
}

pub struct ShipWork {
    ctx: Arc<FabricationContext>,
    consumer: rtrb::Consumer<u8>,
    factory: SinkFactory,
    sink: Option<Box<dyn OutputSink>>,
    format: AudioFormat,
    mode: ShipMode,
    /// Bytes shipped since `start_at_chain_micros`
    shipped_bytes: u64,
    /// Bytes to ship before finishing (`None` = unbounded)
    output_bytes: Option<u64>,
}

impl ShipWork {
    pub fn new(ctx: Arc<FabricationContext>, consumer: rtrb::Consumer<u8>, factory: SinkFactory) -> Self {
        let format = ctx.settings.audio_format();
        let mode = match ctx.settings.output_mode {
            OutputMode::Playback => ShipMode::Playback { started: None },
            OutputMode::File => ShipMode::File {
                split: OutputFileSplit::from_mode(ctx.settings.output_file_mode, ctx.store.clone()),
                file: None,
                next_number: 0,
            },
        };
        let output_micros = ctx.settings.output_micros();
        let output_bytes = (output_micros > 0).then(|| format.bytes_for_micros(output_micros));
        match output_bytes {
            Some(_) => log::info!(
                "[SHIP] Will ship {:?} output for {}s",
                ctx.settings.output_mode,
                ctx.settings.output_seconds
            ),
            None => log::info!("[SHIP] Will ship {:?} output indefinitely", ctx.settings.output_mode),
        }
        Self {
            ctx,
            consumer,
            factory,
            sink: None,
            format,
            mode,
            shipped_bytes: 0,
            output_bytes,
        }
    }

    /// Chain position of the last byte handed to the sink
    pub fn shipped_to(&self) -> ChainMicros {
        self.ctx.start_at_chain_micros + self.format.micros_for_bytes(self.shipped_bytes)
    }

    pub fn shipped_bytes(&self) -> u64 {
        self.shipped_bytes
    }

    /// One ship cycle
    pub fn run_cycle(&mut self) -> FabricationResult<()> {
        if self.is_finished() {
            return Ok(());
        }
        let available = self.format.floor_to_frame(self.consumer.slots());
        if available == 0 {
            if self.ctx.is_finished(Stage::Dub) {
                log::info!("[SHIP] Dub has stopped and the pipe is drained");
                self.finish();
            }
            return Ok(());
        }

        let result = if matches!(self.mode, ShipMode::Playback { .. }) {
            self.ship_playback(available)
        } else {
            self.ship_file(available)
        };
        if let Err(e) = result {
            self.ctx.fail(Stage::Ship, &e);
            self.finish();
            return Err(e);
        }

        if self.output_bytes.is_some_and(|limit| self.shipped_bytes >= limit) {
            self.complete();
        }
        Ok(())
    }

    /// Bytes still allowed before the output length is reached
    fn output_remaining(&self) -> u64 {
        self.output_bytes
            .map_or(u64::MAX, |limit| limit.saturating_sub(self.shipped_bytes))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Playback
    // ═══════════════════════════════════════════════════════════════════════

    fn ship_playback(&mut self, available: usize) -> FabricationResult<()> {
        if self.sink.is_none() {
            let target = SinkTarget::Playback {
                start_at_chain_micros: self.shipped_to(),
            };
            self.sink = Some((self.factory)(target, self.format)?);
            if let ShipMode::Playback { started } = &mut self.mode {
                *started = Some(Instant::now());
            }
        }

        let target = self.shipped_to();
        let heard = self
            .sink
            .as_ref()
            .and_then(|sink| sink.heard_at_chain_micros())
            .unwrap_or_else(|| self.wall_clock_heard());
        if target - heard > self.ctx.settings.sync_ahead_micros() {
            log::trace!(
                "[SHIP] Ahead by {:.2}s in sync output; skipping",
                micros_to_seconds(target - heard)
            );
            return Ok(());
        }

        // Only what the device buffer can hold counts as shipped
        let writable = self
            .sink
            .as_ref()
            .and_then(|sink| sink.writable_bytes())
            .map_or(u64::MAX, |free| free as u64);
        let bytes = (available as u64)
            .min(self.ctx.settings.ship_cycle_audio_bytes as u64)
            .min(self.output_remaining())
            .min(writable);
        self.ship_bytes(self.format.floor_to_frame(bytes as usize))
    }

    /// Chain position implied by wall-clock time since playback started
    fn wall_clock_heard(&self) -> ChainMicros {
        match &self.mode {
            ShipMode::Playback { started: Some(started) } => {
                self.ctx.start_at_chain_micros + started.elapsed().as_micros() as ChainMicros
            }
            _ => self.ctx.start_at_chain_micros,
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Files
    // ═══════════════════════════════════════════════════════════════════════

    /// Byte offset of a chain position, frame-aligned
    fn bytes_at(&self, micros: ChainMicros) -> u64 {
        self.format.bytes_for_micros(micros - self.ctx.start_at_chain_micros)
    }

    fn ship_file(&mut self, available: usize) -> FabricationResult<()> {
        let draining = self.ctx.is_finished(Stage::Dub);
        // an override may have cut the open file's last segment short
        if let ShipMode::File { file: Some(file), .. } = &mut self.mode {
            if let Some(current) = self.ctx.store.read_segment(file.last_segment().id) {
                file.refresh_last(&current);
            }
        }
        let head = match &self.mode {
            ShipMode::File { file: Some(file), .. } => {
                let end = self.bytes_at(file.to_micros());
                (self.shipped_bytes >= end).then(|| file.to_micros())
            }
            _ => Some(self.shipped_to()),
        };

        // Current file exhausted, or none open yet: extend or roll over
        if let Some(head) = head {
            let Some(segment) = self.ctx.store.read_segment_at_chain_micros(head) else {
                log::trace!("[SHIP] No crafted segment at {:.3}s", micros_to_seconds(head));
                return Ok(());
            };
            self.advance_file(&segment)?;
        }

        let ShipMode::File { file: Some(file), .. } = &self.mode else {
            return Ok(());
        };
        let file_end = file.to_micros();
        let remaining = self.bytes_at(file_end).saturating_sub(self.shipped_bytes);
        let pcm_chunk = self.ctx.settings.pcm_chunk_size_bytes as u64;

        if remaining <= pcm_chunk
            && !draining
            && self.ctx.store.read_segment_at_chain_micros(file_end).is_none()
        {
            log::trace!("[SHIP] Waiting for the segment after {:.3}s", micros_to_seconds(file_end));
            return Ok(());
        }

        let limit = remaining.min(self.output_remaining());
        let mut bytes = (available as u64)
            .min(self.ctx.settings.ship_cycle_audio_bytes as u64)
            .min(limit);
        if bytes < limit && !draining {
            bytes -= bytes % pcm_chunk;
        }
        self.ship_bytes(self.format.floor_to_frame(bytes as usize))
    }

    /// Add the segment to the open file, or close it and start the next one
    fn advance_file(&mut self, segment: &Segment) -> FabricationResult<()> {
        let ShipMode::File { split, file, .. } = &mut self.mode else {
            return Ok(());
        };
        if let Some(open) = file.as_mut() {
            if open.contains(segment.id) {
                return Ok(());
            }
            if split.continues(open.last_segment(), segment) {
                open.add(segment);
                return Ok(());
            }
        }
        self.start_next_file(segment)
    }

    fn start_next_file(&mut self, segment: &Segment) -> FabricationResult<()> {
        self.close_sink()?;
        let ShipMode::File { file, next_number, .. } = &mut self.mode else {
            return Ok(());
        };
        let number = *next_number;
        *next_number += 1;
        let settings = &self.ctx.settings;
        let path = PathBuf::from(format!(
            "{}{}-{:0width$}.wav",
            settings.output_path_prefix,
            settings.input_template_key,
            number,
            width = settings.output_file_number_digits
        ));
        log::info!("[SHIP] Starting output file {:?} at Segment[{}]", path, segment.id);
        *file = Some(OutputFile::new(number, path.clone(), segment));
        self.sink = Some((self.factory)(SinkTarget::File(&path), self.format)?);
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Shared
    // ═══════════════════════════════════════════════════════════════════════

    /// Move exactly `count` bytes from the pipe to the sink
    fn ship_bytes(&mut self, count: usize) -> FabricationResult<()> {
        if count == 0 {
            return Ok(());
        }
        let Some(sink) = self.sink.as_mut() else {
            return Ok(());
        };
        let Ok(chunk) = self.consumer.read_chunk(count) else {
            return Ok(());
        };
        let (first, second) = chunk.as_slices();
        sink.append(first)?;
        if !second.is_empty() {
            sink.append(second)?;
        }
        chunk.commit_all();

        self.shipped_bytes += count as u64;
        let shipped_to = self.shipped_to();
        self.ctx.advance(Stage::Ship, shipped_to);
        log::debug!(
            "[SHIP] Shipped {} bytes, now at {:.2}s",
            count,
            micros_to_seconds(shipped_to)
        );
        Ok(())
    }

    fn close_sink(&mut self) -> FabricationResult<()> {
        if let Some(mut sink) = self.sink.take() {
            sink.finish()?;
        }
        Ok(())
    }

    /// The output length has been reached
    fn complete(&mut self) {
        let shipped = micros_to_seconds(self.shipped_to() - self.ctx.start_at_chain_micros);
        let elapsed = self.ctx.elapsed_seconds().max(f64::EPSILON);
        log::info!(
            "[SHIP] Shipped {:.2}s; overall performance at {:.1}x real-time",
            shipped,
            shipped / elapsed
        );
        self.finish();
    }

    /// Close the sink, then finish Dub and Craft
    ///
    /// Writes a chain snapshot first when rehydration is enabled.
    pub fn finish(&mut self) {
        if !self.ctx.finish_stage(Stage::Ship) {
            return;
        }
        if let Err(e) = self.close_sink() {
            log::error!("[SHIP] Failed to close output: {}", e);
        }
        let rehydrate = &self.ctx.settings.rehydrate;
        if let (true, Some(path)) = (rehydrate.enabled, rehydrate.snapshot_path.as_ref()) {
            match self.ctx.store.read_chain() {
                Some(chain) => {
                    let snapshot = ChainSnapshot {
                        chain,
                        segments: self.ctx.store.snapshot(),
                        shipped_to_micros: self.shipped_to(),
                    };
                    if let Err(e) = write_snapshot(path, &snapshot) {
                        log::error!("[SHIP] {}", e);
                    }
                }
                None => log::warn!("[SHIP] No chain to snapshot"),
            }
        }
        self.ctx.finish_stage(Stage::Dub);
        self.ctx.finish_stage(Stage::Craft);
    }

    pub fn is_finished(&self) -> bool {
        self.ctx.is_finished(Stage::Ship)
    }
}
