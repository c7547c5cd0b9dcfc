//! Audio cache keyed by instrument audio id
//!
//! Residency policy: membership in the current mix window, recomputed by
//! Craft every cycle via [`AudioCache::load_these_and_forget_the_rest`]. The
//! mixer also loads on first use through [`AudioCache::prepare`], so a cache
//! miss never drops a pick.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use basedrop::Shared;
use rayon::prelude::*;

use super::error::{AudioError, AudioResult};
use super::gc::gc_handle;
use super::loader::{WaveformLoader, WaveformRequest};
use super::source::DecodedSource;
use crate::model::InstrumentAudio;
use crate::types::{AudioFormat, EntityId, OUTPUT_BIT_DEPTH};

/// A resident waveform; dropping the last reference defers the free to the
/// collector thread
pub type Waveform = Shared<DecodedSource>;

/// Cache of decoded instrument waveforms in the output format
pub struct AudioCache {
    loader: Arc<dyn WaveformLoader>,
    path_prefix: String,
    base_url: String,
    format: AudioFormat,
    entries: Mutex<HashMap<EntityId, Waveform>>,
}

impl AudioCache {
    pub fn new(
        loader: Arc<dyn WaveformLoader>,
        path_prefix: impl Into<String>,
        base_url: impl Into<String>,
        format: AudioFormat,
    ) -> Self {
        Self {
            loader,
            path_prefix: path_prefix.into(),
            base_url: base_url.into(),
            format,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<EntityId, Waveform>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Decode one waveform without touching the cache
    fn decode(&self, audio: &InstrumentAudio) -> AudioResult<Waveform> {
        if audio.waveform_key.is_empty() {
            return Err(AudioError::NoWaveformKey(audio.id));
        }
        let request = WaveformRequest {
            path_prefix: &self.path_prefix,
            base_url: &self.base_url,
            instrument_id: audio.instrument_id,
            waveform_key: &audio.waveform_key,
            frame_rate: self.format.frame_rate,
            bit_depth: OUTPUT_BIT_DEPTH,
            channels: self.format.channels,
        };
        let decoded = self.loader.load(&request)?;
        let handle = gc_handle().ok_or(AudioError::CollectorUnavailable)?;
        Ok(Shared::new(&handle, decoded))
    }

    /// Get a waveform, loading it on first use
    pub fn prepare(&self, audio: &InstrumentAudio) -> AudioResult<Waveform> {
        if let Some(waveform) = self.entries().get(&audio.id) {
            return Ok(waveform.clone());
        }
        let waveform = self.decode(audio)?;
        self.entries().insert(audio.id, waveform.clone());
        Ok(waveform)
    }

    /// Make the resident set exactly `audios`
    ///
    /// Missing waveforms load in parallel; a waveform that fails to load is
    /// logged and left out. Returns the number newly loaded.
    pub fn load_these_and_forget_the_rest(&self, audios: &[InstrumentAudio]) -> usize {
        self.load_with_progress(audios, |_, _| {})
    }

    /// [`load_these_and_forget_the_rest`](Self::load_these_and_forget_the_rest)
    /// reporting `(done, total)` as each missing waveform finishes
    pub fn load_with_progress<F>(&self, audios: &[InstrumentAudio], progress: F) -> usize
    where
        F: Fn(usize, usize) + Sync,
    {
        let keep: HashSet<EntityId> = audios.iter().map(|a| a.id).collect();
        let missing: Vec<&InstrumentAudio> = {
            let mut entries = self.entries();
            let before = entries.len();
            entries.retain(|id, _| keep.contains(id));
            let evicted = before - entries.len();
            if evicted > 0 {
                log::debug!("[AUDIO] Evicted {} waveforms", evicted);
            }
            let mut seen = HashSet::new();
            audios
                .iter()
                .filter(|a| !entries.contains_key(&a.id) && seen.insert(a.id))
                .collect()
        };

        let total = missing.len();
        if total == 0 {
            return 0;
        }
        let done = AtomicUsize::new(0);
        let loaded: Vec<(EntityId, Waveform)> = missing
            .par_iter()
            .filter_map(|audio| {
                let result = self.decode(audio);
                progress(done.fetch_add(1, Ordering::Relaxed) + 1, total);
                match result {
                    Ok(waveform) => Some((audio.id, waveform)),
                    Err(e) => {
                        log::warn!(
                            "[AUDIO] Failed to load InstrumentAudio[{}] {}: {}",
                            audio.id,
                            audio.name,
                            e
                        );
                        None
                    }
                }
            })
            .collect();

        let count = loaded.len();
        self.entries().extend(loaded);
        log::debug!("[AUDIO] Loaded {} of {} missing waveforms", count, total);
        count
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.entries().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    /// Drop every resident waveform
    pub fn invalidate_all(&self) {
        let mut entries = self.entries();
        log::info!("[AUDIO] Invalidating {} cached waveforms", entries.len());
        entries.clear();
    }
}
