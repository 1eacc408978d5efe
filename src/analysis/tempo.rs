//! Tempo estimation backed by stratum-dsp
//!
//! stratum-dsp runs its own onset detection and period estimation over the
//! mono analysis buffer. The raw tempo is then folded into [60, 200] BPM by
//! doubling or halving.

use super::traits::TempoEstimator;
use crate::error::{MusicrayError, Result};
use crate::types::{MonoBuffer, TempoResult};
use stratum_dsp::{analyze_audio, AnalysisConfig};
use tracing::debug;

/// Reported tempo range
pub const MIN_BPM: f64 = 60.0;
pub const MAX_BPM: f64 = 200.0;

/// Tempo reported when estimation fails
pub const DEFAULT_BPM: f64 = 120.0;

/// Fold a tempo into [`MIN_BPM`, `MAX_BPM`] by octave steps
pub fn fold_bpm(mut bpm: f64) -> f64 {
    if !bpm.is_finite() || bpm <= 0.0 {
        return DEFAULT_BPM;
    }
    while bpm < MIN_BPM {
        bpm *= 2.0;
    }
    while bpm > MAX_BPM {
        bpm /= 2.0;
    }
    bpm
}

/// Tempo estimator using stratum-dsp
#[derive(Debug, Default, Clone, Copy)]
pub struct StratumTempoEstimator;

impl StratumTempoEstimator {
    pub fn new() -> Self {
        Self
    }
}

impl TempoEstimator for StratumTempoEstimator {
    fn estimate(&self, buffer: &MonoBuffer) -> Result<TempoResult> {
        debug!(
            "Analyzing tempo with stratum-dsp ({} samples, {}Hz)",
            buffer.len(),
            buffer.sample_rate
        );

        let result = analyze_audio(&buffer.samples, buffer.sample_rate, AnalysisConfig::default())
            .map_err(|e| MusicrayError::analysis(format!("tempo analysis failed: {}", e)))?;

        let raw_bpm = result.bpm as f64;
        if !raw_bpm.is_finite() || raw_bpm <= 0.0 {
            return Err(MusicrayError::analysis(format!(
                "no tempo found (raw estimate {})",
                raw_bpm
            )));
        }

        let bpm = fold_bpm(raw_bpm);
        let confidence = (result.bpm_confidence as f64).clamp(0.0, 1.0);
        debug!(
            "tempo: {:.1} BPM, folded {:.1}, confidence {:.2}",
            raw_bpm, bpm, confidence
        );

        Ok(TempoResult { bpm, confidence })
    }

    fn name(&self) -> &'static str {
        "stratum-dsp"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: u32 = 22050;

    /// Short decaying noise bursts on every beat
    fn click_track(bpm: f64, seconds: f64) -> MonoBuffer {
        let len = (seconds * SR as f64) as usize;
        let period = 60.0 / bpm * SR as f64;
        let mut samples = vec![0.0f32; len];
        let mut state = 12345u32;
        let mut beat = 0.0;
        while (beat as usize) < len {
            let start = beat as usize;
            for (i, s) in samples[start..].iter_mut().take(400).enumerate() {
                state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                let noise = (state >> 8) as f32 / (1u32 << 24) as f32 - 0.5;
                *s = noise * (-(i as f32) / 80.0).exp();
            }
            beat += period;
        }
        MonoBuffer::new(samples, SR)
    }

    /// Detected tempo matches the target or one of its octaves
    fn is_octave_match(detected: f64, target: f64, tolerance: f64) -> bool {
        [target, target / 2.0, target * 2.0]
            .iter()
            .any(|t| (detected - t).abs() <= tolerance)
    }

    #[test]
    fn test_fold_bpm() {
        assert_eq!(fold_bpm(45.0), 90.0);
        assert_eq!(fold_bpm(240.0), 120.0);
        assert_eq!(fold_bpm(25.0), 100.0);
        assert_eq!(fold_bpm(128.0), 128.0);
        assert_eq!(fold_bpm(200.0), 200.0);
        assert_eq!(fold_bpm(410.0), 102.5);
        assert_eq!(fold_bpm(f64::NAN), DEFAULT_BPM);
        assert_eq!(fold_bpm(0.0), DEFAULT_BPM);
    }

    #[test]
    fn test_click_track_tempo() {
        let result = StratumTempoEstimator.estimate(&click_track(120.0, 15.0)).unwrap();
        assert!(
            is_octave_match(result.bpm, 120.0, 5.0),
            "expected ~120 BPM (or octave), got {:.1}",
            result.bpm
        );
        assert!((0.0..=1.0).contains(&result.confidence));
    }

    #[test]
    fn test_tempo_always_in_range() {
        // Octave errors are tolerated, the folded value must still be in range
        for &bpm in &[90.0, 128.0, 174.0] {
            if let Ok(result) = StratumTempoEstimator.estimate(&click_track(bpm, 15.0)) {
                assert!(
                    (MIN_BPM..=MAX_BPM).contains(&result.bpm),
                    "{} BPM click track folded to {:.1}",
                    bpm,
                    result.bpm
                );
            }
        }
    }

    #[test]
    fn test_silence_and_empty_input_fail() {
        let silent = MonoBuffer::new(vec![0.0; SR as usize * 10], SR);
        assert!(StratumTempoEstimator.estimate(&silent).is_err());

        let empty = MonoBuffer::new(Vec::new(), SR);
        assert!(StratumTempoEstimator.estimate(&empty).is_err());
    }

    #[test]
    fn test_estimator_name() {
        assert_eq!(StratumTempoEstimator::new().name(), "stratum-dsp");
    }
}
