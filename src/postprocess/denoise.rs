//! Hard noise gate for near-silent stems
//!
//! Only stems whose global RMS is below 0.01 are gated. Every sample whose
//! magnitude does not exceed a tenth of that RMS is zeroed. There is no
//! envelope, attack or release: each sample is judged on its own.

use super::{StageOutcome, StemStage};
use crate::error::StageError;
use crate::types::{AudioBuffer, StemKind};
use tracing::trace;

/// Stems at or above this RMS are left untouched
pub const GATE_RMS_CEILING: f64 = 0.01;

/// Gate threshold as a fraction of the stem RMS
pub const GATE_THRESHOLD_RATIO: f64 = 0.1;

#[derive(Debug, Default, Clone, Copy)]
pub struct DenoiseStage;

impl StemStage for DenoiseStage {
    fn name(&self) -> &'static str {
        "denoise"
    }

    fn process(&self, buffer: &mut AudioBuffer, _kind: StemKind) -> Result<StageOutcome, StageError> {
        let Some(rms) = buffer.rms() else {
            return Ok(StageOutcome::Skipped("empty buffer"));
        };
        if !rms.is_finite() {
            return Err(StageError::NonFinite("rms"));
        }
        if rms >= GATE_RMS_CEILING {
            return Ok(StageOutcome::Skipped("signal above gate ceiling"));
        }

        let threshold = rms * GATE_THRESHOLD_RATIO;
        let mut gated = 0usize;
        for ch in buffer.channels_mut() {
            for s in ch.iter_mut() {
                if (s.abs() as f64) <= threshold {
                    *s = 0.0;
                    gated += 1;
                }
            }
        }
        trace!("gate threshold {:.3e}: zeroed {} samples", threshold, gated);

        Ok(StageOutcome::Applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loud_signal_untouched_and_idempotent() {
        let left: Vec<f32> = (0..1000).map(|i| if i % 2 == 0 { 0.2 } else { 0.0001 }).collect();
        let mut buf = AudioBuffer::stereo(left.clone(), left, 44100).unwrap();
        let before = buf.clone();

        let first = DenoiseStage.process(&mut buf, StemKind::Vocals).unwrap();
        assert!(matches!(first, StageOutcome::Skipped(_)));
        assert_eq!(buf, before);

        DenoiseStage.process(&mut buf, StemKind::Vocals).unwrap();
        assert_eq!(buf, before);
    }

    #[test]
    fn test_quiet_signal_gated_per_sample() {
        // RMS ~0.00707, threshold ~0.000707
        let left: Vec<f32> = (0..1000).map(|i| if i % 2 == 0 { 0.01 } else { 0.0005 }).collect();
        let right: Vec<f32> = (0..1000).map(|i| if i % 2 == 0 { -0.01 } else { -0.0009 }).collect();
        let mut buf = AudioBuffer::stereo(left, right, 44100).unwrap();

        let outcome = DenoiseStage.process(&mut buf, StemKind::Bass).unwrap();
        assert_eq!(outcome, StageOutcome::Applied);

        let l = buf.channel(0).unwrap();
        let r = buf.channel(1).unwrap();
        assert_eq!(l[0], 0.01);
        assert_eq!(l[1], 0.0); // below threshold
        assert_eq!(r[0], -0.01);
        assert_eq!(r[1], -0.0009); // above threshold in magnitude
    }

    #[test]
    fn test_empty_and_silent_buffers() {
        let mut empty = AudioBuffer::stereo(vec![], vec![], 44100).unwrap();
        assert!(matches!(
            DenoiseStage.process(&mut empty, StemKind::Other).unwrap(),
            StageOutcome::Skipped(_)
        ));

        let mut zeros = AudioBuffer::stereo(vec![0.0; 64], vec![0.0; 64], 44100).unwrap();
        DenoiseStage.process(&mut zeros, StemKind::Other).unwrap();
        assert_eq!(zeros.peak(), 0.0);
    }
}
