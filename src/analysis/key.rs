//! Key estimation from a time-averaged chromagram
//!
//! The tonic is the strongest pitch class. Mode comes from correlating the
//! chroma profile with the Krumhansl-Schmuckler major and minor profiles
//! as given, without rotating them to the tonic.

use super::spectrum::{magnitude_spectrogram, Spectrogram};
use super::traits::KeyEstimator;
use crate::error::{MusicrayError, Result};
use crate::types::{KeyResult, Mode, MonoBuffer, PitchClass};
use tracing::debug;

/// Krumhansl-Schmuckler major key profile, C first
pub const MAJOR_PROFILE: [f64; 12] = [
    6.35, 2.23, 3.48, 2.33, 4.38, 4.09, 2.52, 5.19, 2.39, 3.66, 2.29, 2.88,
];

/// Krumhansl-Schmuckler minor key profile, C first
pub const MINOR_PROFILE: [f64; 12] = [
    6.33, 2.68, 3.52, 5.38, 2.60, 3.53, 2.54, 4.75, 3.98, 2.69, 3.34, 3.17,
];

/// Lowest frequency folded into the chromagram (A0)
const MIN_CHROMA_HZ: f64 = 27.5;

/// Highest frequency folded into the chromagram
const MAX_CHROMA_HZ: f64 = 5000.0;

/// Pitch class of a frequency, rounded to the nearest semitone
fn pitch_class_of(freq: f64) -> usize {
    // A4 = 440 Hz is pitch class 9
    let semitones = (12.0 * (freq / 440.0).log2()).round() as i64;
    (semitones + 9).rem_euclid(12) as usize
}

/// Time-averaged chroma vector
///
/// Each frame's power is folded into 12 pitch classes and scaled so its
/// strongest class is 1. Frames without energy contribute zeros.
pub fn chroma_profile(spec: &Spectrogram) -> [f64; 12] {
    let bins: Vec<(usize, usize)> = (1..spec.frames.first().map_or(0, Vec::len))
        .filter_map(|bin| {
            let freq = spec.bin_frequency(bin);
            (MIN_CHROMA_HZ..=MAX_CHROMA_HZ)
                .contains(&freq)
                .then(|| (bin, pitch_class_of(freq)))
        })
        .collect();

    let mut mean = [0.0f64; 12];
    for frame in &spec.frames {
        let mut chroma = [0.0f64; 12];
        for &(bin, pc) in &bins {
            let mag = frame[bin] as f64;
            chroma[pc] += mag * mag;
        }
        let max = chroma.iter().cloned().fold(0.0, f64::max);
        if max > 0.0 {
            for (m, c) in mean.iter_mut().zip(chroma) {
                *m += c / max;
            }
        }
    }

    let n = spec.num_frames().max(1) as f64;
    mean.iter_mut().for_each(|m| *m /= n);
    mean
}

/// Pearson correlation, `None` when either side has zero variance
fn pearson(x: &[f64; 12], y: &[f64; 12]) -> Option<f64> {
    let mx = x.iter().sum::<f64>() / 12.0;
    let my = y.iter().sum::<f64>() / 12.0;
    let (mut cov, mut vx, mut vy) = (0.0, 0.0, 0.0);
    for (a, b) in x.iter().zip(y) {
        cov += (a - mx) * (b - my);
        vx += (a - mx) * (a - mx);
        vy += (b - my) * (b - my);
    }
    let denom = (vx * vy).sqrt();
    (denom > 0.0 && denom.is_finite()).then(|| cov / denom)
}

fn sum_normalized(v: &[f64; 12]) -> [f64; 12] {
    let total: f64 = v.iter().sum();
    let mut out = *v;
    if total > 0.0 {
        out.iter_mut().for_each(|x| *x /= total);
    }
    out
}

/// Major or minor from a chroma profile
///
/// Falls back to major when either correlation is undefined.
///
/// A flat chroma has zero variance, so both correlations are NaN. A plain
/// `major > minor` comparison would report minor for it; major is chosen
/// deliberately so the result agrees with the "C major" failure default.
pub fn estimate_mode(chroma: &[f64; 12]) -> Mode {
    let chroma = sum_normalized(chroma);
    let major = pearson(&chroma, &sum_normalized(&MAJOR_PROFILE));
    let minor = pearson(&chroma, &sum_normalized(&MINOR_PROFILE));
    match (major, minor) {
        (Some(major), Some(minor)) if minor >= major => Mode::Minor,
        _ => Mode::Major,
    }
}

/// Chromagram + profile-correlation key estimator
#[derive(Debug, Default, Clone, Copy)]
pub struct ChromaKeyEstimator;

impl ChromaKeyEstimator {
    pub fn new() -> Self {
        Self
    }
}

impl KeyEstimator for ChromaKeyEstimator {
    fn estimate(&self, buffer: &MonoBuffer) -> Result<KeyResult> {
        if buffer.is_empty() || buffer.sample_rate == 0 {
            return Err(MusicrayError::analysis("no samples for key estimation"));
        }

        let spec = magnitude_spectrogram(&buffer.samples, buffer.sample_rate);
        let chroma = chroma_profile(&spec);
        if chroma.iter().all(|&c| c <= 0.0) {
            return Err(MusicrayError::analysis("chromagram is empty"));
        }

        // First maximum wins ties
        let mut tonic = 0;
        for (i, &c) in chroma.iter().enumerate() {
            if c > chroma[tonic] {
                tonic = i;
            }
        }

        let key = KeyResult {
            pitch_class: PitchClass::from_index(tonic),
            mode: estimate_mode(&chroma),
        };
        debug!("key: chroma {:.2?} -> {}", chroma, key.label());
        Ok(key)
    }

    fn name(&self) -> &'static str {
        "chroma-profile"
    }
}
