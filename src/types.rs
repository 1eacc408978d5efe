//! Core data types for musicray
//!
//! These types represent the domain model and flow through the pipeline.

use crate::error::{MusicrayError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

// =============================================================================
// Stems
// =============================================================================

/// One of the four sources produced by the separation engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StemKind {
    Vocals,
    Drums,
    Bass,
    Other,
}

impl StemKind {
    /// All stems in separation-engine output order
    pub const ALL: [StemKind; 4] = [
        StemKind::Vocals,
        StemKind::Drums,
        StemKind::Bass,
        StemKind::Other,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StemKind::Vocals => "vocals",
            StemKind::Drums => "drums",
            StemKind::Bass => "bass",
            StemKind::Other => "other",
        }
    }

    /// File name the separation engine writes for this stem
    pub fn file_name(self) -> String {
        format!("{}.wav", self.as_str())
    }
}

impl fmt::Display for StemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Paths to separated stem files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StemPaths {
    pub vocals: PathBuf,
    pub drums: PathBuf,
    pub bass: PathBuf,
    pub other: PathBuf,
}

impl StemPaths {
    /// Standard layout: `<dir>/vocals.wav`, `<dir>/drums.wav`, ...
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            vocals: dir.join(StemKind::Vocals.file_name()),
            drums: dir.join(StemKind::Drums.file_name()),
            bass: dir.join(StemKind::Bass.file_name()),
            other: dir.join(StemKind::Other.file_name()),
        }
    }

    pub fn get(&self, kind: StemKind) -> &Path {
        match kind {
            StemKind::Vocals => &self.vocals,
            StemKind::Drums => &self.drums,
            StemKind::Bass => &self.bass,
            StemKind::Other => &self.other,
        }
    }

    /// Iterate `(kind, path)` pairs in output order
    pub fn iter(&self) -> impl Iterator<Item = (StemKind, &Path)> + '_ {
        StemKind::ALL.into_iter().map(move |k| (k, self.get(k)))
    }
}

// =============================================================================
// Musical primitives
// =============================================================================

/// The 12 pitch classes in Western music
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PitchClass {
    C,
    Cs, // C#/Db
    D,
    Ds, // D#/Eb
    E,
    F,
    Fs, // F#/Gb
    G,
    Gs, // G#/Ab
    A,
    As, // A#/Bb
    B,
}

impl PitchClass {
    const ORDER: [PitchClass; 12] = [
        PitchClass::C,
        PitchClass::Cs,
        PitchClass::D,
        PitchClass::Ds,
        PitchClass::E,
        PitchClass::F,
        PitchClass::Fs,
        PitchClass::G,
        PitchClass::Gs,
        PitchClass::A,
        PitchClass::As,
        PitchClass::B,
    ];

    /// Convert from numeric index (0 = C, 1 = C#, ..., 11 = B), wrapping
    pub fn from_index(index: usize) -> Self {
        Self::ORDER[index % 12]
    }

    /// Sharp-based note name ("C", "C#", ..., "B")
    pub fn name(self) -> &'static str {
        match self {
            PitchClass::C => "C",
            PitchClass::Cs => "C#",
            PitchClass::D => "D",
            PitchClass::Ds => "D#",
            PitchClass::E => "E",
            PitchClass::F => "F",
            PitchClass::Fs => "F#",
            PitchClass::G => "G",
            PitchClass::Gs => "G#",
            PitchClass::A => "A",
            PitchClass::As => "A#",
            PitchClass::B => "B",
        }
    }
}

/// Major or Minor scale
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mode {
    Major,
    Minor,
}

impl Mode {
    pub fn name(self) -> &'static str {
        match self {
            Mode::Major => "major",
            Mode::Minor => "minor",
        }
    }
}

// =============================================================================
// Analysis results
// =============================================================================

/// Tempo estimate for the original mix
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TempoResult {
    /// Beats per minute, folded into [60, 200]
    pub bpm: f64,
    /// Normalized autocorrelation strength of the chosen period (0.0 - 1.0)
    pub confidence: f64,
}

impl Default for TempoResult {
    fn default() -> Self {
        Self {
            bpm: 120.0,
            confidence: 0.0,
        }
    }
}

/// Musical key estimate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KeyResult {
    pub pitch_class: PitchClass,
    pub mode: Mode,
}

impl KeyResult {
    /// Label such as "A minor" or "F# major"
    pub fn label(&self) -> String {
        format!("{} {}", self.pitch_class.name(), self.mode.name())
    }
}

impl Default for KeyResult {
    fn default() -> Self {
        Self {
            pitch_class: PitchClass::C,
            mode: Mode::Major,
        }
    }
}

/// Tempo, key and duration of the uploaded mix
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MixAnalysis {
    pub tempo: TempoResult,
    pub key: KeyResult,
    pub duration_seconds: f64,
}

impl Default for MixAnalysis {
    fn default() -> Self {
        Self {
            tempo: TempoResult::default(),
            key: KeyResult::default(),
            duration_seconds: 180.0,
        }
    }
}

// =============================================================================
// Audio buffer types
// =============================================================================

/// Decoded mono samples for tempo/key analysis
#[derive(Debug, Clone)]
pub struct MonoBuffer {
    /// Mono samples normalized to [-1.0, 1.0]
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Duration in seconds
    pub duration: f64,
}

impl MonoBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        let duration = if sample_rate > 0 {
            samples.len() as f64 / sample_rate as f64
        } else {
            0.0
        };
        Self {
            samples,
            sample_rate,
            duration,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Planar multichannel sample buffer
///
/// Invariant: at least one channel, all channels share one length, and the
/// sample rate is non-zero. Channels can be rewritten in place but never
/// resized individually.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    channels: Vec<Vec<f32>>,
    sample_rate: u32,
}

impl AudioBuffer {
    /// Build a buffer from planar channels, rejecting ragged input
    pub fn from_channels(channels: Vec<Vec<f32>>, sample_rate: u32) -> Result<Self> {
        if channels.is_empty() {
            return Err(MusicrayError::invalid_buffer("buffer has no channels"));
        }
        if sample_rate == 0 {
            return Err(MusicrayError::invalid_buffer("sample rate is zero"));
        }
        let expected = channels[0].len();
        if let Some((idx, ch)) = channels
            .iter()
            .enumerate()
            .find(|(_, ch)| ch.len() != expected)
        {
            return Err(MusicrayError::invalid_buffer(format!(
                "channel length mismatch: channel 0 has {} samples, channel {} has {}",
                expected,
                idx,
                ch.len()
            )));
        }
        Ok(Self {
            channels,
            sample_rate,
        })
    }

    /// Build a two-channel buffer
    pub fn stereo(left: Vec<f32>, right: Vec<f32>, sample_rate: u32) -> Result<Self> {
        Self::from_channels(vec![left, right], sample_rate)
    }

    /// Build from interleaved frames `[c0, c1, ..., c0, c1, ...]`
    ///
    /// A trailing partial frame is dropped.
    pub fn from_interleaved(samples: &[f32], num_channels: usize, sample_rate: u32) -> Result<Self> {
        if num_channels == 0 {
            return Err(MusicrayError::invalid_buffer("buffer has no channels"));
        }
        let frames = samples.len() / num_channels;
        let mut channels = vec![Vec::with_capacity(frames); num_channels];
        for frame in samples.chunks_exact(num_channels) {
            for (ch, &s) in channels.iter_mut().zip(frame) {
                ch.push(s);
            }
        }
        Self::from_channels(channels, sample_rate)
    }

    /// Normalize to exactly two channels
    ///
    /// Mono is duplicated, anything beyond the first two channels is dropped.
    pub fn into_stereo(mut self) -> Self {
        match self.channels.len() {
            1 => {
                let mono = self.channels[0].clone();
                self.channels.push(mono);
            }
            2 => {}
            _ => self.channels.truncate(2),
        }
        self
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    /// Samples per channel
    pub fn len(&self) -> usize {
        self.channels[0].len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn duration_secs(&self) -> f64 {
        self.len() as f64 / self.sample_rate as f64
    }

    pub fn channels(&self) -> &[Vec<f32>] {
        &self.channels
    }

    pub fn channel(&self, idx: usize) -> Option<&[f32]> {
        self.channels.get(idx).map(Vec::as_slice)
    }

    pub fn channel_mut(&mut self, idx: usize) -> Option<&mut [f32]> {
        self.channels.get_mut(idx).map(Vec::as_mut_slice)
    }

    /// Mutable views of every channel; lengths are fixed
    pub fn channels_mut(&mut self) -> impl Iterator<Item = &mut [f32]> {
        self.channels.iter_mut().map(Vec::as_mut_slice)
    }

    /// Iterate every sample of every channel
    pub fn samples(&self) -> impl Iterator<Item = f32> + '_ {
        self.channels.iter().flat_map(|ch| ch.iter().copied())
    }

    /// Swap in new channel data of identical shape
    pub fn replace_channels(&mut self, channels: Vec<Vec<f32>>) -> Result<()> {
        if channels.len() != self.channels.len()
            || channels.iter().any(|ch| ch.len() != self.len())
        {
            return Err(MusicrayError::invalid_buffer(
                "replacement channels do not match buffer shape",
            ));
        }
        self.channels = channels;
        Ok(())
    }

    /// Root-mean-square over all samples of all channels; `None` when empty
    pub fn rms(&self) -> Option<f64> {
        let count = self.channels.len() * self.len();
        if count == 0 {
            return None;
        }
        let sum_sq: f64 = self.samples().map(|s| (s as f64) * (s as f64)).sum();
        Some((sum_sq / count as f64).sqrt())
    }

    /// Largest absolute sample value (0.0 when empty)
    pub fn peak(&self) -> f32 {
        self.samples().fold(0.0f32, |acc, s| acc.max(s.abs()))
    }

    /// Interleaved frames `[L, R, L, R, ...]`
    pub fn interleaved(&self) -> Vec<f32> {
        let n = self.len();
        let c = self.channels.len();
        let mut out = Vec::with_capacity(n * c);
        for i in 0..n {
            for ch in &self.channels {
                out.push(ch[i]);
            }
        }
        out
    }

    /// Average all channels into one
    pub fn to_mono(&self) -> MonoBuffer {
        let c = self.channels.len() as f32;
        let samples = (0..self.len())
            .map(|i| self.channels.iter().map(|ch| ch[i]).sum::<f32>() / c)
            .collect();
        MonoBuffer::new(samples, self.sample_rate)
    }

    pub fn into_channels(self) -> Vec<Vec<f32>> {
        self.channels
    }
}

// =============================================================================
// Supported formats
// =============================================================================

/// Upload formats accepted by musicray
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    Mp3,
    Wav,
    Flac,
    M4a,
}

impl AudioFormat {
    /// Detect format from file extension
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "mp3" => Some(AudioFormat::Mp3),
            "wav" => Some(AudioFormat::Wav),
            "flac" => Some(AudioFormat::Flac),
            "m4a" => Some(AudioFormat::M4a),
            _ => None,
        }
    }

    /// Detect format from a path's extension
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_length_mismatch_rejected() {
        let err = AudioBuffer::from_channels(vec![vec![0.0; 10], vec![0.0; 9]], 44100).unwrap_err();
        assert!(err.is_stem_fatal());
        assert!(err.to_string().contains("mismatch"));
    }

    #[test]
    fn test_zero_channels_rejected() {
        assert!(AudioBuffer::from_channels(vec![], 44100).is_err());
        assert!(AudioBuffer::from_channels(vec![vec![0.0]], 0).is_err());
    }

    #[test]
    fn test_into_stereo() {
        let mono = AudioBuffer::from_channels(vec![vec![0.1, 0.2]], 44100).unwrap();
        let st = mono.into_stereo();
        assert_eq!(st.num_channels(), 2);
        assert_eq!(st.channel(0), st.channel(1));

        let surround =
            AudioBuffer::from_channels(vec![vec![1.0], vec![2.0], vec![3.0], vec![4.0]], 48000)
                .unwrap();
        let st = surround.into_stereo();
        assert_eq!(st.channels(), &[vec![1.0], vec![2.0]]);
    }

    #[test]
    fn test_interleaved_roundtrip_shape() {
        let buf = AudioBuffer::from_interleaved(&[0.1, 0.2, 0.3, 0.4, 0.5], 2, 44100).unwrap();
        assert_eq!(buf.len(), 2);
        assert_eq!(buf.interleaved(), vec![0.1, 0.2, 0.3, 0.4]);
    }

    #[test]
    fn test_rms_and_peak() {
        let buf = AudioBuffer::stereo(vec![0.5, -0.5], vec![0.5, -1.0], 44100).unwrap();
        assert!((buf.peak() - 1.0).abs() < 1e-6);
        let expected = ((0.25 * 3.0 + 1.0) / 4.0f64).sqrt();
        assert!((buf.rms().unwrap() - expected).abs() < 1e-9);

        let empty = AudioBuffer::stereo(vec![], vec![], 44100).unwrap();
        assert!(empty.rms().is_none());
        assert!(empty.is_empty());
    }

    #[test]
    fn test_replace_channels_shape_checked() {
        let mut buf = AudioBuffer::stereo(vec![0.0; 4], vec![0.0; 4], 44100).unwrap();
        assert!(buf.replace_channels(vec![vec![1.0; 3], vec![1.0; 3]]).is_err());
        assert!(buf.replace_channels(vec![vec![1.0; 4], vec![1.0; 4]]).is_ok());
        assert_eq!(buf.peak(), 1.0);
    }

    #[test]
    fn test_stem_paths_layout() {
        let paths = StemPaths::in_dir(Path::new("/jobs/abc"));
        assert_eq!(paths.get(StemKind::Bass), Path::new("/jobs/abc/bass.wav"));
        let kinds: Vec<_> = paths.iter().map(|(k, _)| k).collect();
        assert_eq!(kinds, StemKind::ALL.to_vec());
    }

    #[test]
    fn test_key_label() {
        let key = KeyResult {
            pitch_class: PitchClass::from_index(6),
            mode: Mode::Minor,
        };
        assert_eq!(key.label(), "F# minor");
        assert_eq!(KeyResult::default().label(), "C major");
    }

    #[test]
    fn test_audio_format_detection() {
        assert_eq!(AudioFormat::from_extension("M4A"), Some(AudioFormat::M4a));
        assert_eq!(AudioFormat::from_extension("ogg"), None);
        assert_eq!(AudioFormat::from_path(Path::new("x/song.FLAC")), Some(AudioFormat::Flac));
    }
}
