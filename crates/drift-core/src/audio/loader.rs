//! Waveform loaders
//!
//! [`FileWaveformLoader`] reads `{path_prefix}/{instrument_id}/{waveform_key}`:
//! WAV through `hound`, everything else (FLAC, OGG, ...) through `symphonia`.
//! The decoded audio is then conformed to the requested layout:
//!
//! 1. Channels are up-mixed by duplication or down-mixed by averaging.
//! 2. The sample rate is converted with a `rubato` sinc resampler when it
//!    differs from the output frame rate.

use std::fs::File;
use std::path::{Path, PathBuf};

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use super::error::{AudioError, AudioResult};
use super::source::DecodedSource;
use crate::types::EntityId;

/// Input frames per resampler pass
const RESAMPLE_CHUNK: usize = 1024;

/// Everything needed to locate and conform one waveform
#[derive(Debug, Clone, Copy)]
pub struct WaveformRequest<'a> {
    pub path_prefix: &'a str,
    pub base_url: &'a str,
    pub instrument_id: EntityId,
    pub waveform_key: &'a str,
    pub frame_rate: u32,
    pub bit_depth: u16,
    pub channels: u16,
}

/// Decodes instrument waveforms for the audio cache
pub trait WaveformLoader: Send + Sync {
    fn load(&self, request: &WaveformRequest<'_>) -> AudioResult<DecodedSource>;
}

/// Loads waveforms from the local file system
#[derive(Debug, Default, Clone, Copy)]
pub struct FileWaveformLoader;

impl FileWaveformLoader {
    pub fn new() -> Self {
        Self
    }

    /// Location of a waveform under the path prefix
    pub fn path_for(request: &WaveformRequest<'_>) -> PathBuf {
        Path::new(request.path_prefix)
            .join(request.instrument_id.to_string())
            .join(request.waveform_key)
    }
}

impl WaveformLoader for FileWaveformLoader {
    fn load(&self, request: &WaveformRequest<'_>) -> AudioResult<DecodedSource> {
        let path = Self::path_for(request);
        let is_wav = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("wav"));

        let (samples, channels, frame_rate) = if is_wav {
            decode_wav(&path)?
        } else {
            decode_with_symphonia(&path)?
        };
        log::debug!(
            "[AUDIO] Decoded {:?}: {} samples, {} channels, {}Hz",
            path,
            samples.len(),
            channels,
            frame_rate
        );

        conform(&samples, channels, frame_rate, request.channels, request.frame_rate)
    }
}

/// Decode a WAV file to interleaved `f32` samples
fn decode_wav(path: &Path) -> AudioResult<(Vec<f32>, u16, u32)> {
    let decode_error = |e: hound::Error| match e {
        hound::Error::IoError(source) => AudioError::Io {
            path: path.to_path_buf(),
            source,
        },
        other => AudioError::Decode {
            path: path.to_path_buf(),
            reason: other.to_string(),
        },
    };

    let mut reader = hound::WavReader::open(path).map_err(decode_error)?;
    let spec = reader.spec();
    let samples = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<Result<Vec<_>, _>>()
            .map_err(decode_error)?,
        hound::SampleFormat::Int => {
            let scale = 1.0 / (1_i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<Result<Vec<_>, _>>()
                .map_err(decode_error)?
        }
    };
    Ok((samples, spec.channels, spec.sample_rate))
}

/// Decode any container/codec symphonia supports to interleaved `f32` samples
fn decode_with_symphonia(path: &Path) -> AudioResult<(Vec<f32>, u16, u32)> {
    let decode_error = |e: SymphoniaError| AudioError::Decode {
        path: path.to_path_buf(),
        reason: e.to_string(),
    };

    let file = File::open(path).map_err(|source| AudioError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let stream = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(extension);
    }

    let detected = symphonia::default::get_probe()
        .format(&hint, stream, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(decode_error)?;
    let mut format = detected.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| AudioError::UnsupportedFormat(format!("no audio track in {:?}", path)))?;
    let track_id = track.id;
    let codec_params = track.codec_params.clone();

    let mut frame_rate = codec_params.sample_rate.unwrap_or(0);
    let mut channels = codec_params.channels.map(|c| c.count() as u16).unwrap_or(0);
    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(decode_error)?;

    let mut samples = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break
            }
            Err(e) => return Err(decode_error(e)),
        };
        if packet.track_id() != track_id {
            continue;
        }
        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                frame_rate = spec.rate;
                channels = spec.channels.count() as u16;
                let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                buffer.copy_interleaved_ref(decoded);
                samples.extend_from_slice(buffer.samples());
            }
            Err(SymphoniaError::DecodeError(reason)) => {
                log::warn!("[AUDIO] Skipping corrupt packet in {:?}: {}", path, reason);
            }
            Err(e) => return Err(decode_error(e)),
        }
    }

    if channels == 0 || frame_rate == 0 {
        return Err(AudioError::UnsupportedFormat(format!(
            "unknown channel layout or rate in {:?}",
            path
        )));
    }
    Ok((samples, channels, frame_rate))
}

/// Convert interleaved samples to the requested channel count and rate
pub(crate) fn conform(
    samples: &[f32],
    channels: u16,
    frame_rate: u32,
    to_channels: u16,
    to_frame_rate: u32,
) -> AudioResult<DecodedSource> {
    if channels == 0 || to_channels == 0 {
        return Err(AudioError::UnsupportedFormat("zero channels".to_string()));
    }
    let planar = remix_channels(samples, channels as usize, to_channels as usize);
    let planar = if frame_rate != to_frame_rate {
        resample(planar, frame_rate, to_frame_rate)?
    } else {
        planar
    };
    Ok(DecodedSource::from_planar(&planar, to_frame_rate))
}

/// De-interleave and map channels: duplicate mono, average down-mixes
fn remix_channels(samples: &[f32], from: usize, to: usize) -> Vec<Vec<f32>> {
    let frames = samples.len() / from;
    let mut planar = vec![Vec::with_capacity(frames); to];
    for frame in samples.chunks_exact(from) {
        if to == 1 && from > 1 {
            planar[0].push(frame.iter().sum::<f32>() / from as f32);
        } else {
            for (channel, out) in planar.iter_mut().enumerate() {
                out.push(frame[channel % from]);
            }
        }
    }
    planar
}

/// Sinc resampling of planar audio
fn resample(planar: Vec<Vec<f32>>, from: u32, to: u32) -> AudioResult<Vec<Vec<f32>>> {
    let frames = planar.first().map(Vec::len).unwrap_or(0);
    if frames == 0 || from == 0 {
        return Ok(planar);
    }
    let channels = planar.len();
    let ratio = to as f64 / from as f64;
    let expected = (frames as f64 * ratio).round() as usize;

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };
    let mut resampler = SincFixedIn::<f32>::new(ratio, 1.0, params, RESAMPLE_CHUNK, channels)
        .map_err(|e| AudioError::Resample(e.to_string()))?;
    let delay = resampler.output_delay();

    let mut output = vec![Vec::with_capacity(expected + delay); channels];

    let mut position = 0;
    while position + RESAMPLE_CHUNK <= frames {
        let chunk: Vec<&[f32]> = planar
            .iter()
            .map(|c| &c[position..position + RESAMPLE_CHUNK])
            .collect();
        let processed = resampler
            .process(&chunk, None)
            .map_err(|e| AudioError::Resample(e.to_string()))?;
        append(&mut output, processed);
        position += RESAMPLE_CHUNK;
    }
    if position < frames {
        let tail: Vec<&[f32]> = planar.iter().map(|c| &c[position..]).collect();
        let processed = resampler
            .process_partial(Some(tail.as_slice()), None)
            .map_err(|e| AudioError::Resample(e.to_string()))?;
        append(&mut output, processed);
    }
    // Flush the filter delay so the end of the waveform is not lost
    while output[0].len() < expected + delay {
        let processed = resampler
            .process_partial(None::<&[Vec<f32>]>, None)
            .map_err(|e| AudioError::Resample(e.to_string()))?;
        if processed.first().map_or(true, Vec::is_empty) {
            break;
        }
        append(&mut output, processed);
    }

    for out in output.iter_mut() {
        out.drain(..delay.min(out.len()));
        out.truncate(expected);
    }
    Ok(output)
}

fn append(output: &mut [Vec<f32>], processed: Vec<Vec<f32>>) {
    for (out, chunk) in output.iter_mut().zip(processed) {
        out.extend_from_slice(&chunk);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_wav(path: &Path, channels: u16, rate: u32, frames: usize) {
        let spec = hound::WavSpec {
            channels,
            sample_rate: rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for frame in 0..frames {
            for channel in 0..channels {
                let value = if channel == 0 { 16_384 } else { -16_384 };
                writer.write_sample(if frame % 2 == 0 { value } else { 0 }).unwrap();
            }
        }
        writer.finalize().unwrap();
    }

    fn request<'a>(prefix: &'a str, channels: u16, frame_rate: u32) -> WaveformRequest<'a> {
        WaveformRequest {
            path_prefix: prefix,
            base_url: "",
            instrument_id: 7,
            waveform_key: "hit.wav",
            frame_rate,
            bit_depth: 16,
            channels,
        }
    }

    #[test]
    fn test_path_layout() {
        let path = FileWaveformLoader::path_for(&request("/waveforms", 2, 48_000));
        assert_eq!(path, PathBuf::from("/waveforms/7/hit.wav"));
    }

    #[test]
    fn test_wav_mono_is_duplicated_to_stereo() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("7")).unwrap();
        write_wav(&dir.path().join("7").join("hit.wav"), 1, 48_000, 100);

        let prefix = dir.path().to_str().unwrap();
        let source = FileWaveformLoader::new().load(&request(prefix, 2, 48_000)).unwrap();
        assert_eq!(source.channels(), 2);
        assert_eq!(source.frame_count(), 100);
        assert!((source.sample(0, 0) - 0.5).abs() < 1e-6);
        assert!((source.sample(0, 1) - 0.5).abs() < 1e-6);
        assert_eq!(source.sample(1, 1), 0.0);
    }

    #[test]
    fn test_stereo_is_averaged_to_mono() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("7")).unwrap();
        write_wav(&dir.path().join("7").join("hit.wav"), 2, 48_000, 10);

        let prefix = dir.path().to_str().unwrap();
        let source = FileWaveformLoader::new().load(&request(prefix, 1, 48_000)).unwrap();
        assert_eq!(source.channels(), 1);
        assert!(source.sample(0, 0).abs() < 1e-6);
    }

    #[test]
    fn test_resample_changes_length_by_ratio() {
        let samples = vec![0.25_f32; 44_100];
        let source = conform(&samples, 1, 44_100, 1, 48_000).unwrap();
        assert_eq!(source.frame_rate(), 48_000);
        let frames = source.frame_count() as i64;
        assert!((frames - 48_000).abs() <= 2, "got {} frames", frames);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result = FileWaveformLoader::new().load(&request("/nonexistent", 2, 48_000));
        assert!(matches!(result, Err(AudioError::Io { .. })));
    }
}
