//! Common types for Drift
//!
//! Identifiers, the chain-micros clock and the fixed PCM output format shared
//! by every stage of the fabrication pipeline.

use serde::{Deserialize, Serialize};

/// Microseconds in one second of chain time
pub const MICROS_PER_SECOND: i64 = 1_000_000;

/// Microseconds in one millisecond of chain time
pub const MICROS_PER_MILLI: i64 = 1_000;

/// Output sample width in bits (signed, little-endian)
pub const OUTPUT_BIT_DEPTH: u16 = 16;

/// Bytes per output sample (one channel of one frame)
const BYTES_PER_SAMPLE: usize = 2;

/// Identifier of any stored or catalog entity
pub type EntityId = u64;

/// Virtual elapsed microseconds since chain start
///
/// Signed so that offsets relative to a mix chunk may go negative.
pub type ChainMicros = i64;

/// Convert seconds to chain micros, rounding to the nearest microsecond
pub fn seconds_to_micros(seconds: f64) -> ChainMicros {
    (seconds * MICROS_PER_SECOND as f64).round() as ChainMicros
}

/// Convert chain micros to seconds
pub fn micros_to_seconds(micros: ChainMicros) -> f64 {
    micros as f64 / MICROS_PER_SECOND as f64
}

/// PCM format of the mixed output stream
///
/// Output is always interleaved signed 16-bit little-endian; only the frame
/// rate and channel count vary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    /// Frames per second
    pub frame_rate: u32,
    /// Interleaved channels per frame (1 or 2)
    pub channels: u16,
}

impl AudioFormat {
    pub fn new(frame_rate: u32, channels: u16) -> Self {
        Self { frame_rate, channels }
    }

    /// Bytes per frame (all channels)
    pub fn frame_size(&self) -> usize {
        self.channels as usize * BYTES_PER_SAMPLE
    }

    pub fn bytes_per_second(&self) -> u64 {
        self.frame_size() as u64 * self.frame_rate as u64
    }

    pub fn micros_per_byte(&self) -> f64 {
        MICROS_PER_SECOND as f64 / self.bytes_per_second() as f64
    }

    pub fn micros_per_frame(&self) -> f64 {
        MICROS_PER_SECOND as f64 / self.frame_rate as f64
    }

    /// Whole frames covered by a span of chain micros (floor, never negative)
    pub fn frames_for_micros(&self, micros: ChainMicros) -> usize {
        if micros <= 0 {
            return 0;
        }
        (micros as i128 * self.frame_rate as i128 / MICROS_PER_SECOND as i128) as usize
    }

    /// Frame-aligned byte count covered by a span of chain micros
    pub fn bytes_for_micros(&self, micros: ChainMicros) -> u64 {
        (self.frames_for_micros(micros) * self.frame_size()) as u64
    }

    /// Chain micros covered by a byte count (floor)
    pub fn micros_for_bytes(&self, bytes: u64) -> ChainMicros {
        (bytes as i128 * MICROS_PER_SECOND as i128 / self.bytes_per_second() as i128) as ChainMicros
    }

    /// Round a byte count down to a whole number of frames
    pub fn floor_to_frame(&self, bytes: usize) -> usize {
        bytes - bytes % self.frame_size()
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::new(48_000, 2)
    }
}
