//! WAV output with hound
//!
//! Everything is written as 32-bit float so post-processed stems keep their
//! exact sample values.

use crate::error::{MusicrayError, Result};
use crate::types::AudioBuffer;
use std::path::Path;
use tracing::debug;

fn wav_spec(buffer: &AudioBuffer) -> hound::WavSpec {
    hound::WavSpec {
        channels: buffer.num_channels() as u16,
        sample_rate: buffer.sample_rate(),
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    }
}

/// Write `buffer` to `path` as interleaved float WAV
pub fn write_wav(path: &Path, buffer: &AudioBuffer) -> Result<()> {
    let hound_err = |e: hound::Error| MusicrayError::OutputError {
        path: path.to_path_buf(),
        reason: format!("Failed to write WAV: {}", e),
    };

    let mut writer = hound::WavWriter::create(path, wav_spec(buffer)).map_err(hound_err)?;
    for sample in buffer.interleaved() {
        writer.write_sample(sample).map_err(hound_err)?;
    }
    writer.finalize().map_err(hound_err)?;

    debug!(
        "Wrote {} frames x {} channels to {}",
        buffer.len(),
        buffer.num_channels(),
        path.display()
    );
    Ok(())
}

/// Overwrite `path` with `buffer` without ever leaving a partial file
///
/// Writes a sibling temp file and renames it over the target.
pub fn replace_wav(path: &Path, buffer: &AudioBuffer) -> Result<()> {
    let temp_path = path.with_extension("wav.tmp");

    if let Err(e) = write_wav(&temp_path, buffer) {
        let _ = std::fs::remove_file(&temp_path);
        return Err(e);
    }

    std::fs::rename(&temp_path, path).map_err(|e| {
        let _ = std::fs::remove_file(&temp_path);
        MusicrayError::OutputError {
            path: path.to_path_buf(),
            reason: format!("Failed to finalize file: {}", e),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_float_wav_is_lossless() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("x.wav");
        let buf = AudioBuffer::stereo(vec![0.123_456_7, -0.9], vec![1e-7, 0.5], 44100).unwrap();
        write_wav(&path, &buf).unwrap();

        let mut reader = hound::WavReader::open(&path).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 2);
        assert_eq!(spec.bits_per_sample, 32);
        assert_eq!(spec.sample_format, hound::SampleFormat::Float);
        let samples: Vec<f32> = reader.samples::<f32>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![0.123_456_7, 1e-7, -0.9, 0.5]);
    }

    #[test]
    fn test_replace_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vocals.wav");
        let first = AudioBuffer::stereo(vec![0.1; 8], vec![0.1; 8], 44100).unwrap();
        write_wav(&path, &first).unwrap();

        let second = AudioBuffer::stereo(vec![0.2; 4], vec![0.3; 4], 44100).unwrap();
        replace_wav(&path, &second).unwrap();

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.duration(), 4);
        assert!(!dir.path().join("vocals.wav.tmp").exists());
    }

    #[test]
    fn test_write_into_missing_dir_fails() {
        let buf = AudioBuffer::stereo(vec![0.0], vec![0.0], 44100).unwrap();
        let err = write_wav(Path::new("/nonexistent/dir/out.wav"), &buf).unwrap_err();
        assert!(matches!(err, MusicrayError::OutputError { .. }));
    }
}
