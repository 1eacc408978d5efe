//! RMS-based loudness normalization with a peak ceiling
//!
//! The target is expressed in LUFS but measured against plain RMS dB with a
//! fixed +23 dB offset. This is an approximation, not BS.1770 loudness.

use super::{StageOutcome, StemStage};
use crate::error::StageError;
use crate::types::{AudioBuffer, StemKind};
use tracing::trace;

/// Default loudness target in (approximate) LUFS
pub const DEFAULT_TARGET_LEVEL_DB: f64 = -14.0;

/// Offset mapping the LUFS target onto RMS dB
pub const LUFS_TO_RMS_DB_OFFSET: f64 = 23.0;

/// Gain is limited to +/- this many dB
pub const MAX_GAIN_DB: f64 = 20.0;

/// Signals quieter than this RMS are left alone
pub const SILENCE_RMS: f64 = 1e-6;

/// Absolute peak ceiling after gain
pub const PEAK_CEILING: f32 = 0.95;

/// Gain stage that brings a stem to the target level
#[derive(Debug, Clone, Copy)]
pub struct LoudnessStage {
    target_level_db: f64,
}

impl LoudnessStage {
    pub fn new(target_level_db: f64) -> Self {
        Self { target_level_db }
    }

    pub fn target_level_db(&self) -> f64 {
        self.target_level_db
    }

    /// Linear gain for a measured RMS, before the peak ceiling
    pub fn gain_for_rms(&self, rms: f64) -> f64 {
        let current_db = 20.0 * rms.log10();
        let target_db = self.target_level_db + LUFS_TO_RMS_DB_OFFSET;
        let gain_db = (target_db - current_db).clamp(-MAX_GAIN_DB, MAX_GAIN_DB);
        10f64.powf(gain_db / 20.0)
    }
}

impl Default for LoudnessStage {
    fn default() -> Self {
        Self::new(DEFAULT_TARGET_LEVEL_DB)
    }
}

impl StemStage for LoudnessStage {
    fn name(&self) -> &'static str {
        "loudness"
    }

    fn process(&self, buffer: &mut AudioBuffer, _kind: StemKind) -> Result<StageOutcome, StageError> {
        let Some(rms) = buffer.rms() else {
            return Ok(StageOutcome::Skipped("empty buffer"));
        };
        if !rms.is_finite() {
            return Err(StageError::NonFinite("rms"));
        }
        if rms < SILENCE_RMS {
            return Ok(StageOutcome::Skipped("signal is silent"));
        }

        let gain = self.gain_for_rms(rms);
        let peak_after_gain = buffer.peak() as f64 * gain;
        if !peak_after_gain.is_finite() {
            return Err(StageError::NonFinite("peak"));
        }

        // Gain first, then pull the whole buffer under the ceiling
        let ceiling = PEAK_CEILING as f64;
        let scale = if peak_after_gain > ceiling {
            gain * (ceiling / peak_after_gain)
        } else {
            gain
        };
        trace!(
            "rms={:.6} gain={:.3} peak_after_gain={:.3} scale={:.3}",
            rms,
            gain,
            peak_after_gain,
            scale
        );

        for ch in buffer.channels_mut() {
            for s in ch.iter_mut() {
                // clamp only absorbs f32 rounding at the ceiling
                *s = ((*s as f64) * scale).clamp(-ceiling, ceiling) as f32;
            }
        }

        Ok(StageOutcome::Applied)
    }
}
