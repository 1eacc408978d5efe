//! Inter-channel delay correction for stereo stems
//!
//! The delay is estimated from the cross-correlation of the first
//! [`CORRELATION_WINDOW`] samples of each channel. Only small offsets
//! (at most [`MAX_CORRECTION_LAG`] samples) are corrected, by circularly
//! rotating the later channel; larger offsets are assumed to be genuine
//! stereo content.

use super::{StageOutcome, StemStage};
use crate::error::StageError;
use crate::types::{AudioBuffer, StemKind};
use tracing::trace;

/// Samples per channel used for delay estimation
pub const CORRELATION_WINDOW: usize = 1000;

/// Largest delay, in samples, that will be corrected
pub const MAX_CORRECTION_LAG: usize = 10;

/// Full cross-correlation of `a` against `v`
///
/// Output index `i` holds `sum_n a[n + k] * v[n]` with `k = i - (v.len() - 1)`,
/// so the result has `a.len() + v.len() - 1` entries.
pub fn cross_correlation(a: &[f32], v: &[f32]) -> Vec<f64> {
    if a.is_empty() || v.is_empty() {
        return Vec::new();
    }
    let na = a.len() as isize;
    let nv = v.len() as isize;

    (-(nv - 1)..na)
        .map(|k| {
            let n_start = (-k).max(0);
            let n_end = nv.min(na - k);
            (n_start..n_end)
                .map(|n| a[(n + k) as usize] as f64 * v[n as usize] as f64)
                .sum()
        })
        .collect()
}

/// Lag in samples at which `a` best matches `v`
///
/// Positive means `a` lags behind `v`. Ties resolve to the earliest index.
pub fn estimate_lag(a: &[f32], v: &[f32]) -> Result<isize, StageError> {
    let corr = cross_correlation(a, v);
    if corr.is_empty() {
        return Err(StageError::Correlation("empty correlation window".to_string()));
    }
    if corr.iter().any(|c| !c.is_finite()) {
        return Err(StageError::Correlation("non-finite correlation".to_string()));
    }

    let mut best = 0;
    for (i, &c) in corr.iter().enumerate() {
        if c > corr[best] {
            best = i;
        }
    }
    Ok(best as isize - (v.len() as isize - 1))
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PhaseAlignStage;

impl StemStage for PhaseAlignStage {
    fn name(&self) -> &'static str {
        "phase_align"
    }

    fn process(&self, buffer: &mut AudioBuffer, _kind: StemKind) -> Result<StageOutcome, StageError> {
        if buffer.num_channels() != 2 {
            return Ok(StageOutcome::Skipped("not a stereo buffer"));
        }
        let window = buffer.len().min(CORRELATION_WINDOW);
        if window == 0 {
            return Ok(StageOutcome::Skipped("empty buffer"));
        }

        let lag = {
            let left = buffer.channel(0).unwrap_or_default();
            let right = buffer.channel(1).unwrap_or_default();
            estimate_lag(&left[..window], &right[..window])?
        };
        trace!("inter-channel lag {} samples", lag);

        if lag == 0 {
            return Ok(StageOutcome::Skipped("channels already aligned"));
        }
        if lag.unsigned_abs() > MAX_CORRECTION_LAG {
            return Ok(StageOutcome::Skipped("lag outside correction window"));
        }

        // Rotate the earlier channel forward so both line up
        let (idx, shift) = if lag > 0 { (1, lag as usize) } else { (0, lag.unsigned_abs()) };
        if let Some(ch) = buffer.channel_mut(idx) {
            let len = ch.len();
            ch.rotate_right(shift % len);
        }

        Ok(StageOutcome::Applied)
    }
}
