//! Zero-phase Butterworth filtering per stem type
//!
//! Coefficients come from the bilinear transform with frequency prewarping,
//! matching the classic `butter` design for orders 1 and 2. Filtering runs
//! forward then backward over an odd-extended signal with steady-state
//! initial conditions, so the output has no group delay and no start-up
//! transient at the edges.
//!
//! | Stem   | Filter    | Cutoff  | Order |
//! |--------|-----------|---------|-------|
//! | vocals | high-pass | 80 Hz   | 2     |
//! | bass   | low-pass  | 8000 Hz | 2     |
//! | drums  | high-pass | 30 Hz   | 1     |
//! | other  | none      | -       | -     |

use super::{StageOutcome, StemStage};
use crate::error::StageError;
use crate::types::{AudioBuffer, StemKind};
use rayon::prelude::*;
use std::f64::consts::{PI, SQRT_2};
use tracing::trace;

/// Filter response type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    HighPass,
    LowPass,
}

/// Filter policy derived from a stem kind
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterSpec {
    pub kind: FilterKind,
    pub cutoff_hz: f64,
    pub order: usize,
}

impl FilterSpec {
    /// Filter policy for a stem, `None` for pass-through stems
    pub fn for_stem(stem: StemKind) -> Option<Self> {
        match stem {
            StemKind::Vocals => Some(Self {
                kind: FilterKind::HighPass,
                cutoff_hz: 80.0,
                order: 2,
            }),
            StemKind::Bass => Some(Self {
                kind: FilterKind::LowPass,
                cutoff_hz: 8000.0,
                order: 2,
            }),
            StemKind::Drums => Some(Self {
                kind: FilterKind::HighPass,
                cutoff_hz: 30.0,
                order: 1,
            }),
            StemKind::Other => None,
        }
    }
}

/// IIR transfer function coefficients, normalized so `a[0] == 1`
#[derive(Debug, Clone, PartialEq)]
pub struct Coefficients {
    pub b: Vec<f64>,
    pub a: Vec<f64>,
}

/// Design a digital Butterworth filter
///
/// The cutoff is normalized against Nyquist and must fall strictly inside
/// (0, 1); anything else is a design failure.
pub fn design_butterworth(spec: &FilterSpec, sample_rate: u32) -> Result<Coefficients, StageError> {
    if sample_rate == 0 {
        return Err(StageError::FilterDesign("sample rate is zero".to_string()));
    }

    let nyquist = sample_rate as f64 / 2.0;
    let wn = spec.cutoff_hz / nyquist;
    if !wn.is_finite() || wn <= 0.0 || wn >= 1.0 {
        return Err(StageError::FilterDesign(format!(
            "normalized cutoff {:.4} ({} Hz at {} Hz) must be in (0, 1)",
            wn, spec.cutoff_hz, sample_rate
        )));
    }

    // Prewarped analog cutoff
    let k = (PI * wn / 2.0).tan();

    let coeffs = match (spec.order, spec.kind) {
        (1, kind) => {
            let norm = 1.0 / (1.0 + k);
            let a1 = (k - 1.0) * norm;
            let b = match kind {
                FilterKind::LowPass => vec![k * norm, k * norm],
                FilterKind::HighPass => vec![norm, -norm],
            };
            Coefficients { b, a: vec![1.0, a1] }
        }
        (2, kind) => {
            let k2 = k * k;
            let norm = 1.0 / (1.0 + SQRT_2 * k + k2);
            let a1 = 2.0 * (k2 - 1.0) * norm;
            let a2 = (1.0 - SQRT_2 * k + k2) * norm;
            let b = match kind {
                FilterKind::LowPass => vec![k2 * norm, 2.0 * k2 * norm, k2 * norm],
                FilterKind::HighPass => vec![norm, -2.0 * norm, norm],
            };
            Coefficients {
                b,
                a: vec![1.0, a1, a2],
            }
        }
        (order, _) => {
            return Err(StageError::FilterDesign(format!(
                "unsupported filter order {}",
                order
            )))
        }
    };

    Ok(coeffs)
}

/// Forward-backward (zero-phase) filtering of one channel
///
/// The signal is odd-extended by `3 * max(len(a), len(b))` samples at both
/// ends; inputs not longer than that padding are rejected.
pub fn filtfilt(coeffs: &Coefficients, samples: &[f32]) -> Result<Vec<f32>, StageError> {
    let padlen = 3 * coeffs.a.len().max(coeffs.b.len());
    if samples.len() <= padlen {
        return Err(StageError::FilterApply(format!(
            "input length {} must exceed padding length {}",
            samples.len(),
            padlen
        )));
    }

    let extended = odd_extend(samples, padlen);
    let zi = lfilter_zi(coeffs)?;

    // Forward pass
    let x0 = extended[0];
    let init: Vec<f64> = zi.iter().map(|z| z * x0).collect();
    let mut y = lfilter(coeffs, &extended, &init);

    // Backward pass
    y.reverse();
    let y0 = y[0];
    let init: Vec<f64> = zi.iter().map(|z| z * y0).collect();
    let mut y = lfilter(coeffs, &y, &init);
    y.reverse();

    let out: Vec<f32> = y[padlen..y.len() - padlen].iter().map(|&v| v as f32).collect();
    if out.iter().any(|v| !v.is_finite()) {
        return Err(StageError::NonFinite("filter output"));
    }
    Ok(out)
}

/// Point-reflect `padlen` samples around each end
fn odd_extend(samples: &[f32], padlen: usize) -> Vec<f64> {
    let n = samples.len();
    let first = samples[0] as f64;
    let last = samples[n - 1] as f64;

    let mut ext = Vec::with_capacity(n + 2 * padlen);
    ext.extend((1..=padlen).rev().map(|i| 2.0 * first - samples[i] as f64));
    ext.extend(samples.iter().map(|&s| s as f64));
    ext.extend((1..=padlen).map(|i| 2.0 * last - samples[n - 1 - i] as f64));
    ext
}

/// Direct form II transposed IIR filter with initial state `zi`
fn lfilter(coeffs: &Coefficients, x: &[f64], zi: &[f64]) -> Vec<f64> {
    let b = &coeffs.b;
    let a = &coeffs.a;
    let n = a.len().max(b.len());
    let coef = |v: &[f64], i: usize| v.get(i).copied().unwrap_or(0.0);

    let mut z = zi.to_vec();
    z.resize(n - 1, 0.0);

    let mut y = Vec::with_capacity(x.len());
    for &xn in x {
        let yn = coef(b, 0) * xn + z.first().copied().unwrap_or(0.0);
        for i in 0..n.saturating_sub(2) {
            z[i] = coef(b, i + 1) * xn + z[i + 1] - coef(a, i + 1) * yn;
        }
        if n >= 2 {
            z[n - 2] = coef(b, n - 1) * xn - coef(a, n - 1) * yn;
        }
        y.push(yn);
    }
    y
}

/// Steady-state initial conditions for a unit step input
///
/// Solves `(I - A^T) zi = b[1:] - a[1:] * b[0]` where `A` is the companion
/// matrix of the denominator.
fn lfilter_zi(coeffs: &Coefficients) -> Result<Vec<f64>, StageError> {
    let n = coeffs.a.len().max(coeffs.b.len());
    if n < 2 {
        return Ok(Vec::new());
    }
    let m = n - 1;
    let coef = |v: &[f64], i: usize| v.get(i).copied().unwrap_or(0.0);
    let a0 = coef(&coeffs.a, 0);
    if a0 == 0.0 {
        return Err(StageError::FilterDesign("leading denominator coefficient is zero".into()));
    }
    let a: Vec<f64> = (0..n).map(|i| coef(&coeffs.a, i) / a0).collect();
    let b: Vec<f64> = (0..n).map(|i| coef(&coeffs.b, i) / a0).collect();

    // I - companion(a)^T
    let mut matrix = vec![vec![0.0; m]; m];
    for (i, row) in matrix.iter_mut().enumerate() {
        row[i] += 1.0;
        row[0] += a[i + 1];
        if i + 1 < m {
            row[i + 1] -= 1.0;
        }
    }
    let rhs: Vec<f64> = (0..m).map(|i| b[i + 1] - a[i + 1] * b[0]).collect();

    solve_linear(matrix, rhs)
        .ok_or_else(|| StageError::FilterDesign("singular initial-condition system".into()))
}

/// Gaussian elimination with partial pivoting
fn solve_linear(mut m: Vec<Vec<f64>>, mut rhs: Vec<f64>) -> Option<Vec<f64>> {
    let n = rhs.len();
    for col in 0..n {
        let pivot = (col..n).max_by(|&i, &j| m[i][col].abs().total_cmp(&m[j][col].abs()))?;
        if m[pivot][col].abs() < 1e-12 {
            return None;
        }
        m.swap(col, pivot);
        rhs.swap(col, pivot);
        for row in col + 1..n {
            let factor = m[row][col] / m[col][col];
            for k in col..n {
                m[row][k] -= factor * m[col][k];
            }
            rhs[row] -= factor * rhs[col];
        }
    }

    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| m[row][k] * x[k]).sum();
        x[row] = (rhs[row] - tail) / m[row][row];
    }
    Some(x)
}

/// High-pass / low-pass shaping by stem kind
#[derive(Debug, Default, Clone, Copy)]
pub struct FilterStage;

impl StemStage for FilterStage {
    fn name(&self) -> &'static str {
        "filter"
    }

    fn process(&self, buffer: &mut AudioBuffer, kind: StemKind) -> Result<StageOutcome, StageError> {
        let Some(spec) = FilterSpec::for_stem(kind) else {
            return Ok(StageOutcome::Skipped("no filter policy for stem"));
        };
        if buffer.is_empty() {
            return Ok(StageOutcome::Skipped("empty buffer"));
        }

        let coeffs = design_butterworth(&spec, buffer.sample_rate())?;
        trace!("{} filter coefficients: b={:?} a={:?}", kind, coeffs.b, coeffs.a);

        let filtered = buffer
            .channels()
            .par_iter()
            .map(|ch| filtfilt(&coeffs, ch))
            .collect::<Result<Vec<_>, _>>()?;

        buffer
            .replace_channels(filtered)
            .map_err(|e| StageError::FilterApply(e.to_string()))?;
        Ok(StageOutcome::Applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f64, sample_rate: u32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * PI * freq * i as f64 / sample_rate as f64).sin() as f32)
            .collect()
    }

    fn rms(x: &[f32]) -> f64 {
        (x.iter().map(|&v| (v as f64).powi(2)).sum::<f64>() / x.len() as f64).sqrt()
    }

    #[test]
    fn test_policy_table() {
        let vocals = FilterSpec::for_stem(StemKind::Vocals).unwrap();
        assert_eq!(vocals.kind, FilterKind::HighPass);
        assert_eq!(vocals.cutoff_hz, 80.0);
        assert_eq!(vocals.order, 2);

        let bass = FilterSpec::for_stem(StemKind::Bass).unwrap();
        assert_eq!(bass.kind, FilterKind::LowPass);
        assert_eq!(bass.cutoff_hz, 8000.0);

        let drums = FilterSpec::for_stem(StemKind::Drums).unwrap();
        assert_eq!(drums.order, 1);
        assert_eq!(drums.cutoff_hz, 30.0);

        assert!(FilterSpec::for_stem(StemKind::Other).is_none());
    }

    #[test]
    fn test_butterworth_unity_gain_in_passband() {
        // Low-pass DC gain = sum(b) / sum(a) = 1
        let lp = design_butterworth(&FilterSpec::for_stem(StemKind::Bass).unwrap(), 44100).unwrap();
        let dc = lp.b.iter().sum::<f64>() / lp.a.iter().sum::<f64>();
        assert!((dc - 1.0).abs() < 1e-9);

        // High-pass gain at Nyquist (z = -1) = 1
        let hp = design_butterworth(&FilterSpec::for_stem(StemKind::Vocals).unwrap(), 44100).unwrap();
        let alt = |v: &[f64]| v.iter().enumerate().map(|(i, c)| if i % 2 == 0 { *c } else { -c }).sum::<f64>();
        assert!((alt(&hp.b) / alt(&hp.a) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_cutoff_at_or_above_nyquist_fails() {
        let spec = FilterSpec::for_stem(StemKind::Bass).unwrap();
        assert!(matches!(design_butterworth(&spec, 16000), Err(StageError::FilterDesign(_))));
        assert!(design_butterworth(&spec, 0).is_err());
    }

    #[test]
    fn test_lfilter_zi_gives_step_steady_state() {
        let c = design_butterworth(&FilterSpec::for_stem(StemKind::Bass).unwrap(), 44100).unwrap();
        let zi = lfilter_zi(&c).unwrap();
        let y = lfilter(&c, &[1.0; 16], &zi);
        for v in y {
            assert!((v - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_filtfilt_is_zero_phase() {
        let c = design_butterworth(&FilterSpec::for_stem(StemKind::Bass).unwrap(), 44100).unwrap();
        let x = sine(440.0, 44100, 8192);
        let y = filtfilt(&c, &x).unwrap();
        // Passband sine comes back in phase with the input
        let corr: f64 = x.iter().zip(&y).map(|(&a, &b)| a as f64 * b as f64).sum();
        let norm = (x.iter().map(|&a| (a as f64).powi(2)).sum::<f64>()
            * y.iter().map(|&b| (b as f64).powi(2)).sum::<f64>())
        .sqrt();
        assert!(corr / norm > 0.999);
    }

    #[test]
    fn test_highpass_removes_low_frequency() {
        let c = design_butterworth(&FilterSpec::for_stem(StemKind::Vocals).unwrap(), 44100).unwrap();
        let x = sine(20.0, 44100, 44100);
        let y = filtfilt(&c, &x).unwrap();
        let mid = &y[4410..y.len() - 4410];
        assert!(rms(mid) < 0.01 * rms(&x), "20 Hz leaked: {}", rms(mid));
    }

    #[test]
    fn test_short_input_rejected() {
        let c = design_butterworth(&FilterSpec::for_stem(StemKind::Vocals).unwrap(), 44100).unwrap();
        assert!(matches!(filtfilt(&c, &[0.1; 9]), Err(StageError::FilterApply(_))));
        assert!(filtfilt(&c, &[0.1; 10]).is_ok());
        assert!(filtfilt(&c, &[]).is_err());
    }

    #[test]
    fn test_stage_passes_other_through() {
        let mut buf = AudioBuffer::stereo(sine(50.0, 44100, 1000), sine(50.0, 44100, 1000), 44100).unwrap();
        let before = buf.clone();
        let outcome = FilterStage.process(&mut buf, StemKind::Other).unwrap();
        assert!(matches!(outcome, StageOutcome::Skipped(_)));
        assert_eq!(buf, before);
    }

    #[test]
    fn test_empty_buffer_is_skipped_not_failed() {
        for kind in [StemKind::Vocals, StemKind::Drums, StemKind::Bass] {
            let mut buf = AudioBuffer::stereo(vec![], vec![], 44100).unwrap();
            let outcome = FilterStage.process(&mut buf, kind).unwrap();
            assert_eq!(outcome, StageOutcome::Skipped("empty buffer"));
            assert!(buf.is_empty());
        }
    }

    #[test]
    fn test_stage_error_leaves_buffer_untouched() {
        let mut buf = AudioBuffer::stereo(vec![0.5; 100], vec![0.5; 100], 8000).unwrap();
        let before = buf.clone();
        assert!(FilterStage.process(&mut buf, StemKind::Bass).is_err());
        assert_eq!(buf, before);
    }
}
