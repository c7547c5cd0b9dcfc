//! Drift Core - endless music fabrication pipeline
//!
//! Segments are crafted ahead of time, dubbed into a continuous PCM stream
//! by a multi-bus mixer, and shipped to a playback device or WAV files.

pub mod audio;
pub mod config;
pub mod content;
pub mod craft;
pub mod mixer;
pub mod model;
pub mod output;
pub mod store;
pub mod types;
pub mod work;

#[cfg(test)]
pub(crate) mod testing;

pub use types::*;
