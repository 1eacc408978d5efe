//! Short-time Fourier transform shared by tempo and key estimation
//!
//! - **N_FFT = 2048**: ~93 ms frames at 22.05 kHz, ~10.8 Hz bin spacing
//! - **HOP = 512**: 75% overlap, ~23 ms onset resolution
//! - **Hann window** to limit leakage between neighbouring pitch bins

use rustfft::{num_complex::Complex, FftPlanner};

/// FFT size in samples
pub const N_FFT: usize = 2048;

/// Step between consecutive frames
pub const HOP_LENGTH: usize = 512;

/// Positive-frequency bins per frame, DC and Nyquist included
pub const NUM_FREQ_BINS: usize = N_FFT / 2 + 1;

/// Magnitude spectrogram of a mono signal, `[frame][bin]`
#[derive(Debug, Clone)]
pub struct Spectrogram {
    pub frames: Vec<Vec<f32>>,
    pub sample_rate: u32,
}

impl Spectrogram {
    pub fn num_frames(&self) -> usize {
        self.frames.len()
    }

    /// Centre frequency of `bin` in Hz
    pub fn bin_frequency(&self, bin: usize) -> f64 {
        bin as f64 * self.sample_rate as f64 / N_FFT as f64
    }
}

/// Magnitude STFT of `samples`
///
/// Frames start every [`HOP_LENGTH`] samples; the last partial frame is
/// zero-padded. Signals shorter than one frame yield a single padded frame,
/// empty signals yield none.
pub fn magnitude_spectrogram(samples: &[f32], sample_rate: u32) -> Spectrogram {
    if samples.is_empty() {
        return Spectrogram {
            frames: Vec::new(),
            sample_rate,
        };
    }

    let mut planner = FftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(N_FFT);
    let window = hann_window(N_FFT);

    let num_frames = samples.len().saturating_sub(N_FFT) / HOP_LENGTH + 1;
    let mut frames = Vec::with_capacity(num_frames);
    let mut buffer = vec![Complex::new(0.0f32, 0.0); N_FFT];

    for frame_idx in 0..num_frames {
        let start = frame_idx * HOP_LENGTH;
        for (i, (slot, &w)) in buffer.iter_mut().zip(&window).enumerate() {
            let s = samples.get(start + i).copied().unwrap_or(0.0);
            *slot = Complex::new(s * w, 0.0);
        }

        fft.process(&mut buffer);
        frames.push(buffer[..NUM_FREQ_BINS].iter().map(|c| c.norm()).collect());
    }

    Spectrogram {
        frames,
        sample_rate,
    }
}

fn hann_window(size: usize) -> Vec<f32> {
    use std::f32::consts::PI;
    (0..size)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / size as f32).cos()))
        .collect()
}
