//! Audio decoding using symphonia
//!
//! Two entry points share one packet loop:
//! - [`decode`]: mono at 22.05 kHz for tempo/key analysis
//! - [`decode_stereo`]: stereo at 44.1 kHz for separation and stem processing
//!
//! Resampling goes through rubato's FFT resampler, with linear interpolation
//! as a last resort if rubato refuses the rate pair.

use crate::error::{MusicrayError, Result};
use crate::types::{AudioBuffer, MonoBuffer};
use rubato::{FftFixedInOut, Resampler};
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, trace};

/// Sample rate for tempo and key analysis
///
/// Tempo and chroma features live well below 11 kHz.
pub const ANALYSIS_SAMPLE_RATE: u32 = 22050;

/// Sample rate for separation input and stem processing
pub const STEM_SAMPLE_RATE: u32 = 44100;

/// Interleaved samples straight out of the decoder
struct RawAudio {
    samples: Vec<f32>,
    channels: usize,
    sample_rate: u32,
}

/// Decode a file to mono at [`ANALYSIS_SAMPLE_RATE`]
pub fn decode(path: &Path) -> Result<MonoBuffer> {
    decode_mono(path, ANALYSIS_SAMPLE_RATE)
}

/// Decode a file to mono at `target_rate`
pub fn decode_mono(path: &Path, target_rate: u32) -> Result<MonoBuffer> {
    let raw = read_interleaved(path)?;
    let mono = to_mono(&raw.samples, raw.channels);
    let samples = resample(&mono, raw.sample_rate, target_rate);

    debug!(
        "Decoded mono {} samples ({:.2}s)",
        samples.len(),
        samples.len() as f64 / target_rate as f64
    );
    Ok(MonoBuffer::new(samples, target_rate))
}

/// Decode a file to stereo at [`STEM_SAMPLE_RATE`]
///
/// Mono sources are duplicated; sources with more than two channels keep
/// only the first two.
pub fn decode_stereo(path: &Path) -> Result<AudioBuffer> {
    let raw = read_interleaved(path)?;
    let buffer = AudioBuffer::from_interleaved(&raw.samples, raw.channels, raw.sample_rate)
        .map_err(|e| MusicrayError::decode_error(path, e.to_string()))?
        .into_stereo();

    let buffer = if raw.sample_rate != STEM_SAMPLE_RATE {
        let channels = buffer
            .channels()
            .iter()
            .map(|ch| resample(ch, raw.sample_rate, STEM_SAMPLE_RATE))
            .collect::<Vec<_>>();
        // Per-channel resampling can disagree by a sample on the tail
        let len = channels.iter().map(Vec::len).min().unwrap_or(0);
        let channels = channels
            .into_iter()
            .map(|mut ch| {
                ch.truncate(len);
                ch
            })
            .collect();
        AudioBuffer::from_channels(channels, STEM_SAMPLE_RATE)
            .map_err(|e| MusicrayError::decode_error(path, e.to_string()))?
    } else {
        buffer
    };

    debug!(
        "Decoded stereo {} samples ({:.2}s)",
        buffer.len(),
        buffer.duration_secs()
    );
    Ok(buffer)
}

/// Run symphonia over the first audio track of `path`
fn read_interleaved(path: &Path) -> Result<RawAudio> {
    if !path.exists() {
        return Err(MusicrayError::FileNotFound(path.to_path_buf()));
    }

    let file = std::fs::File::open(path)
        .map_err(|e| MusicrayError::decode_error(path, format!("Failed to open file: {}", e)))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| MusicrayError::decode_error(path, format!("Failed to probe format: {}", e)))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| MusicrayError::decode_error(path, "No audio tracks found"))?;

    let track_id = track.id;
    let codec_params = track.codec_params.clone();
    let mut sample_rate = codec_params.sample_rate.unwrap_or(STEM_SAMPLE_RATE);
    let mut channels = codec_params.channels.map(|c| c.count()).unwrap_or(2);

    debug!(
        "Decoding: {} @ {}Hz, {} channels",
        path.display(),
        sample_rate,
        channels
    );

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| {
            MusicrayError::decode_error(path, format!("Failed to create decoder: {}", e))
        })?;

    let mut samples: Vec<f32> = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(e) => {
                return Err(MusicrayError::decode_error(
                    path,
                    format!("Failed to read packet: {}", e),
                ));
            }
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                trace!("Skipping corrupted frame: {}", e);
                continue;
            }
            Err(e) => {
                return Err(MusicrayError::decode_error(path, format!("Decode error: {}", e)));
            }
        };

        // The decoded spec is authoritative over container headers
        let spec = *decoded.spec();
        sample_rate = spec.rate;
        channels = spec.channels.count();

        let mut sample_buf = SampleBuffer::<f32>::new(decoded.frames() as u64, spec);
        sample_buf.copy_interleaved_ref(decoded);
        samples.extend_from_slice(sample_buf.samples());
    }

    if channels == 0 || sample_rate == 0 {
        return Err(MusicrayError::decode_error(path, "Stream reports no channels or rate"));
    }

    Ok(RawAudio {
        samples,
        channels,
        sample_rate,
    })
}

/// Convert interleaved multi-channel audio to mono
fn to_mono(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }

    samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// FFT resampling of one channel with rubato
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }

    const CHUNK_SIZE: usize = 1024;

    let mut resampler =
        match FftFixedInOut::<f32>::new(from_rate as usize, to_rate as usize, CHUNK_SIZE, 1) {
            Ok(r) => r,
            Err(e) => {
                debug!("Rubato initialization failed ({}), using fallback", e);
                return resample_linear_fallback(samples, from_rate, to_rate);
            }
        };

    let input_frames = resampler.input_frames_next();
    let output_frames = resampler.output_frames_next();

    let ratio = to_rate as f64 / from_rate as f64;
    let mut output = Vec::with_capacity((samples.len() as f64 * ratio).ceil() as usize);

    let mut pos = 0;
    while pos < samples.len() {
        let end = (pos + input_frames).min(samples.len());
        let mut chunk = samples[pos..end].to_vec();
        chunk.resize(input_frames, 0.0);

        match resampler.process(&[chunk], None) {
            Ok(resampled) => {
                if let Some(channel) = resampled.first() {
                    let valid = if end - pos < input_frames {
                        // Drop output produced from zero padding
                        (((end - pos) as f64 * ratio).ceil() as usize).min(output_frames)
                    } else {
                        output_frames
                    };
                    output.extend_from_slice(&channel[..valid.min(channel.len())]);
                }
            }
            Err(e) => {
                debug!("Rubato processing error ({}), using fallback for remaining", e);
                output.extend(resample_linear_fallback(&samples[pos..], from_rate, to_rate));
                break;
            }
        }

        pos += input_frames;
    }

    output
}

/// Linear interpolation resampler for when rubato cannot be used
fn resample_linear_fallback(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let step = from_rate as f64 / to_rate as f64;
    let output_len = (samples.len() as f64 / step) as usize;

    (0..output_len)
        .map(|i| {
            let src_pos = i as f64 * step;
            let idx = src_pos as usize;
            let frac = (src_pos - idx as f64) as f32;
            if idx + 1 < samples.len() {
                samples[idx] * (1.0 - frac) + samples[idx + 1] * frac
            } else {
                samples[idx.min(samples.len() - 1)]
            }
        })
        .collect()
}
