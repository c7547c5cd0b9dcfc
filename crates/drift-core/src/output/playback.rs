//! Real-time playback through cpal
//!
//! ```text
//!   Ship thread                      playback thread (owns the Stream)
//!  ┌─────────────┐   rtrb<f32>     ┌──────────────────────────────┐
//!  │ append(pcm) │ ──────────────► │ cpal output callback         │
//!  └─────────────┘                 │  pop samples, count frames   │
//!         ▲                        └──────────────┬───────────────┘
//!         └──── frames played (AtomicU64) ◄───────┘
//! ```
//!
//! The cpal `Stream` is not `Send` on every host, so it lives on a dedicated
//! thread for its whole life; the sink only holds the ring producer, the
//! played-frames counter and a stop channel.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleRate, Stream, StreamConfig};
use crossbeam::channel::{bounded, Sender};

use super::{OutputError, OutputResult, OutputSink, PLAYBACK_RING_SECONDS};
use crate::types::{AudioFormat, ChainMicros, MICROS_PER_SECOND};

pub struct PlaybackSink {
    producer: rtrb::Producer<f32>,
    frames_played: Arc<AtomicU64>,
    stop_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
    format: AudioFormat,
    start_at_chain_micros: ChainMicros,
}

impl PlaybackSink {
    /// Open the default output device and start the stream
    pub fn start(format: AudioFormat, start_at_chain_micros: ChainMicros) -> OutputResult<Self> {
        let capacity = format.frame_rate as usize * format.channels as usize * PLAYBACK_RING_SECONDS as usize;
        let (producer, consumer) = rtrb::RingBuffer::new(capacity);
        let frames_played = Arc::new(AtomicU64::new(0));
        let (ready_tx, ready_rx) = bounded::<OutputResult<String>>(1);
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let played = frames_played.clone();
        let thread = thread::Builder::new()
            .name("playback".to_string())
            .spawn(move || match open_stream(format, consumer, played) {
                Ok((stream, device_name)) => {
                    let _ = ready_tx.send(Ok(device_name));
                    // Blocks until the sink finishes or is dropped
                    let _ = stop_rx.recv();
                    drop(stream);
                    log::info!("[OUTPUT] Playback stream stopped");
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })
            .map_err(|e| OutputError::Thread(e.to_string()))?;

        let device_name = ready_rx
            .recv()
            .map_err(|e| OutputError::Thread(e.to_string()))??;
        log::info!(
            "[OUTPUT] Playback on '{}': {} channels, {}Hz",
            device_name,
            format.channels,
            format.frame_rate
        );

        Ok(Self {
            producer,
            frames_played,
            stop_tx: Some(stop_tx),
            thread: Some(thread),
            format,
            start_at_chain_micros,
        })
    }
}

/// Build and start the output stream on the calling thread
fn open_stream(
    format: AudioFormat,
    mut consumer: rtrb::Consumer<f32>,
    frames_played: Arc<AtomicU64>,
) -> OutputResult<(Stream, String)> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| OutputError::NoDefaultDevice("no default output device".to_string()))?;
    let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());

    let config = StreamConfig {
        channels: format.channels,
        sample_rate: SampleRate(format.frame_rate),
        buffer_size: BufferSize::Default,
    };
    let channels = format.channels as usize;

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                let mut popped = 0;
                for sample in data.iter_mut() {
                    *sample = match consumer.pop() {
                        Ok(value) => {
                            popped += 1;
                            value
                        }
                        // Underrun: fill with silence
                        Err(_) => 0.0,
                    };
                }
                frames_played.fetch_add((popped / channels) as u64, Ordering::Relaxed);
            },
            move |err| {
                log::error!("[OUTPUT] Playback stream error: {}", err);
            },
            None,
        )
        .map_err(|e| OutputError::StreamBuildError(e.to_string()))?;
    stream
        .play()
        .map_err(|e| OutputError::StreamPlayError(e.to_string()))?;
    Ok((stream, device_name))
}

impl OutputSink for PlaybackSink {
    fn append(&mut self, bytes: &[u8]) -> OutputResult<()> {
        if self.stop_tx.is_none() {
            return Ok(());
        }
        let samples = bytes.len() / 2;
        if samples == 0 {
            return Ok(());
        }
        let Ok(chunk) = self.producer.write_chunk_uninit(samples) else {
            return Err(OutputError::Overrun {
                dropped: samples.saturating_sub(self.producer.slots()),
                offered: samples,
            });
        };
        let values = bytes
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / i16::MAX as f32);
        chunk.fill_from_iter(values);
        Ok(())
    }

    /// Whole frames of free ring space, in PCM bytes
    fn writable_bytes(&self) -> Option<usize> {
        let channels = self.format.channels.max(1) as usize;
        let free_frames = self.producer.slots() / channels;
        Some(free_frames * self.format.frame_size())
    }

    fn heard_at_chain_micros(&self) -> Option<ChainMicros> {
        let frames = self.frames_played.load(Ordering::Relaxed) as i128;
        let heard = frames * MICROS_PER_SECOND as i128 / self.format.frame_rate as i128;
        Some(self.start_at_chain_micros + heard as ChainMicros)
    }

    fn finish(&mut self) -> OutputResult<()> {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            thread
                .join()
                .map_err(|_| OutputError::Thread("playback thread panicked".to_string()))?;
        }
        Ok(())
    }
}

impl Drop for PlaybackSink {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            log::error!("[OUTPUT] {}", e);
        }
    }
}
