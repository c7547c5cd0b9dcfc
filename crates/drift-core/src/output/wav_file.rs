//! WAV file sink

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use hound::{SampleFormat, WavSpec, WavWriter};

use super::{OutputError, OutputResult, OutputSink};
use crate::types::{AudioFormat, ChainMicros, OUTPUT_BIT_DEPTH};

/// Writes shipped PCM into a single 16-bit integer WAV file
pub struct WavFileSink {
    path: PathBuf,
    writer: Option<WavWriter<BufWriter<File>>>,
    frames_written: u64,
    format: AudioFormat,
}

impl WavFileSink {
    /// Create the file (and its parent directories) and write the header
    pub fn open(path: &Path, format: AudioFormat) -> OutputResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| OutputError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let spec = WavSpec {
            channels: format.channels,
            sample_rate: format.frame_rate,
            bits_per_sample: OUTPUT_BIT_DEPTH,
            sample_format: SampleFormat::Int,
        };
        let writer = WavWriter::create(path, spec).map_err(|source| OutputError::Wav {
            path: path.to_path_buf(),
            source,
        })?;
        log::info!("[OUTPUT] Opened {:?}", path);
        Ok(Self {
            path: path.to_path_buf(),
            writer: Some(writer),
            frames_written: 0,
            format,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_writing(&self) -> bool {
        self.writer.is_some()
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }
}

impl OutputSink for WavFileSink {
    fn append(&mut self, bytes: &[u8]) -> OutputResult<()> {
        let Some(writer) = self.writer.as_mut() else {
            return Ok(());
        };
        for sample in bytes.chunks_exact(2) {
            writer
                .write_sample(i16::from_le_bytes([sample[0], sample[1]]))
                .map_err(|source| OutputError::Wav {
                    path: self.path.clone(),
                    source,
                })?;
        }
        self.frames_written += (bytes.len() / self.format.frame_size()) as u64;
        Ok(())
    }

    fn heard_at_chain_micros(&self) -> Option<ChainMicros> {
        None
    }

    fn finish(&mut self) -> OutputResult<()> {
        if let Some(writer) = self.writer.take() {
            writer.finalize().map_err(|source| OutputError::Wav {
                path: self.path.clone(),
                source,
            })?;
            log::info!(
                "[OUTPUT] Closed {:?} after {} frames",
                self.path,
                self.frames_written
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_written_file_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("out-0000.wav");
        let format = AudioFormat::new(8_000, 2);

        let mut sink = WavFileSink::open(&path, format).unwrap();
        let samples: [i16; 4] = [100, -100, i16::MAX, i16::MIN];
        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        sink.append(&bytes).unwrap();
        assert_eq!(sink.frames_written(), 2);
        sink.finish().unwrap();
        assert!(!sink.is_writing());

        let mut reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().channels, 2);
        assert_eq!(reader.spec().sample_rate, 8_000);
        let read: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(read, samples);
    }

    #[test]
    fn test_append_after_finish_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = WavFileSink::open(&dir.path().join("a.wav"), AudioFormat::new(8_000, 1)).unwrap();
        sink.finish().unwrap();
        sink.append(&[1, 0]).unwrap();
        sink.finish().unwrap();
        assert_eq!(sink.frames_written(), 0);
    }
}
