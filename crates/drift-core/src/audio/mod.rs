//! Instrument waveform loading and caching
//!
//! - [`WaveformLoader`]: decodes one instrument waveform into the output
//!   frame rate and channel layout
//! - [`AudioCache`]: keeps exactly the waveforms the current mix window
//!   needs resident, handing out [`Waveform`] pointers whose memory is freed
//!   on the background collector thread

mod cache;
mod error;
pub mod gc;
mod loader;
mod source;

pub use cache::{AudioCache, Waveform};
pub use error::{AudioError, AudioResult};
pub use loader::{FileWaveformLoader, WaveformLoader, WaveformRequest};
pub use source::DecodedSource;
