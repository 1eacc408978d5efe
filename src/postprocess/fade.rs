//! Linear edge fades to suppress clicks at stem boundaries

use super::{StageOutcome, StemStage};
use crate::error::StageError;
use crate::types::{AudioBuffer, StemKind};

/// Fade length in seconds at each edge
pub const FADE_SECONDS: f64 = 0.01;

/// Fade length in samples for a sample rate, rounded down
pub fn fade_samples(sample_rate: u32) -> usize {
    (FADE_SECONDS * sample_rate as f64) as usize
}

/// Ramp value `i` of a 0 -> 1 ramp spanning `len` samples, endpoints included
fn ramp_up(i: usize, len: usize) -> f64 {
    if len <= 1 {
        0.0
    } else {
        i as f64 / (len - 1) as f64
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FadeStage;

impl StemStage for FadeStage {
    fn name(&self) -> &'static str {
        "fade"
    }

    fn process(&self, buffer: &mut AudioBuffer, _kind: StemKind) -> Result<StageOutcome, StageError> {
        let fade = fade_samples(buffer.sample_rate());
        if fade == 0 {
            return Ok(StageOutcome::Skipped("fade shorter than one sample"));
        }
        let len = buffer.len();
        if len <= 2 * fade {
            return Ok(StageOutcome::Skipped("buffer shorter than both fades"));
        }

        for ch in buffer.channels_mut() {
            for i in 0..fade {
                ch[i] = (ch[i] as f64 * ramp_up(i, fade)) as f32;
                // Mirror image of the fade-in, ends exactly on zero
                let j = len - fade + i;
                ch[j] = (ch[j] as f64 * ramp_up(fade - 1 - i, fade)) as f32;
            }
        }

        Ok(StageOutcome::Applied)
    }
}
