//! Stem post-processing
//!
//! Each separated stem runs through a fixed chain of stages:
//!
//! ```text
//! Filter -> Loudness -> Denoise -> Phase alignment -> Fade
//! ```
//!
//! A stage either transforms the buffer, reports that it had nothing to do,
//! or fails. A failing stage leaves the buffer untouched; the processor logs
//! the failure and hands the same buffer to the next stage, so every stem
//! always comes out as a valid buffer.

pub mod denoise;
pub mod fade;
pub mod filter;
pub mod job;
pub mod loudness;
pub mod phase;

use crate::error::StageError;
use crate::types::{AudioBuffer, StemKind};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub use denoise::DenoiseStage;
pub use fade::FadeStage;
pub use filter::FilterStage;
pub use job::{postprocess_stems, PostprocessSummary, StemJob, StemReport, StemStatus};
pub use loudness::LoudnessStage;
pub use phase::PhaseAlignStage;

/// What a stage did to the buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    /// Buffer was transformed
    Applied,
    /// Nothing to do for this input
    Skipped(&'static str),
}

/// One step of the per-stem chain
pub trait StemStage: Send + Sync {
    /// Stage name for logs and reports
    fn name(&self) -> &'static str;

    /// Transform `buffer` in place
    ///
    /// On `Err` the buffer must be left exactly as it was passed in.
    fn process(&self, buffer: &mut AudioBuffer, kind: StemKind) -> Result<StageOutcome, StageError>;
}

/// Result of one stage, as recorded in the job report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: String,
    pub status: StageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Applied,
    Skipped,
    /// Stage failed and the buffer was passed through
    Degraded,
}

/// A stem buffer after the full chain, with per-stage records
#[derive(Debug, Clone)]
pub struct ProcessedBuffer {
    pub buffer: AudioBuffer,
    pub stages: Vec<StageRecord>,
}

impl ProcessedBuffer {
    /// Number of stages that failed and were skipped
    pub fn degraded_count(&self) -> usize {
        self.stages
            .iter()
            .filter(|r| r.status == StageStatus::Degraded)
            .count()
    }
}

/// Runs the stage chain over one stem at a time
///
/// Holds no per-stem state, so one processor can be shared across threads.
pub struct StemProcessor {
    stages: Vec<Box<dyn StemStage>>,
}

impl StemProcessor {
    /// Standard chain with a custom loudness target
    pub fn new(target_level_db: f64) -> Self {
        Self::with_stages(vec![
            Box::new(FilterStage),
            Box::new(LoudnessStage::new(target_level_db)),
            Box::new(DenoiseStage),
            Box::new(PhaseAlignStage),
            Box::new(FadeStage),
        ])
    }

    /// Arbitrary chain, run in the given order
    pub fn with_stages(stages: Vec<Box<dyn StemStage>>) -> Self {
        Self { stages }
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run every stage in order, degrading past failures
    ///
    /// The buffer is normalized to stereo first: mono is duplicated and
    /// channels beyond the second are dropped.
    pub fn process(&self, buffer: AudioBuffer, kind: StemKind) -> ProcessedBuffer {
        let mut buffer = buffer.into_stereo();
        let mut records = Vec::with_capacity(self.stages.len());
        for stage in &self.stages {
            let record = run_stage(stage.as_ref(), &mut buffer, kind);
            records.push(record);
        }
        ProcessedBuffer {
            buffer,
            stages: records,
        }
    }
}

impl Default for StemProcessor {
    fn default() -> Self {
        Self::new(loudness::DEFAULT_TARGET_LEVEL_DB)
    }
}

/// Run one stage and turn its result into a report record
fn run_stage(stage: &dyn StemStage, buffer: &mut AudioBuffer, kind: StemKind) -> StageRecord {
    match stage.process(buffer, kind) {
        Ok(StageOutcome::Applied) => {
            debug!("{}: {} applied", kind, stage.name());
            StageRecord {
                stage: stage.name().to_string(),
                status: StageStatus::Applied,
                detail: None,
            }
        }
        Ok(StageOutcome::Skipped(reason)) => {
            debug!("{}: {} skipped ({})", kind, stage.name(), reason);
            StageRecord {
                stage: stage.name().to_string(),
                status: StageStatus::Skipped,
                detail: Some(reason.to_string()),
            }
        }
        Err(e) => {
            warn!("{}: {} failed, passing buffer through: {}", kind, stage.name(), e);
            StageRecord {
                stage: stage.name().to_string(),
                status: StageStatus::Degraded,
                detail: Some(e.to_string()),
            }
        }
    }
}

/// Run a single stage, returning the input unchanged if it fails
fn apply_single(stage: &dyn StemStage, mut buffer: AudioBuffer, kind: StemKind) -> AudioBuffer {
    run_stage(stage, &mut buffer, kind);
    buffer
}

/// Frequency shaping for `kind`; unchanged on failure or for `other`
pub fn apply_filtering(buffer: AudioBuffer, kind: StemKind) -> AudioBuffer {
    apply_single(&FilterStage, buffer, kind)
}

/// Scale to `target_level_db` (approximate LUFS) with a 0.95 peak ceiling
pub fn normalize_loudness(buffer: AudioBuffer, target_level_db: f64) -> AudioBuffer {
    apply_single(&LoudnessStage::new(target_level_db), buffer, StemKind::Other)
}

/// Hard gate for near-silent buffers
pub fn gentle_denoise(buffer: AudioBuffer) -> AudioBuffer {
    apply_single(&DenoiseStage, buffer, StemKind::Other)
}

/// Correct small inter-channel delays on stereo buffers
pub fn align_phase(buffer: AudioBuffer) -> AudioBuffer {
    apply_single(&PhaseAlignStage, buffer, StemKind::Other)
}

/// 10 ms linear fade at both ends
///
/// Takes no separate sample rate argument: the fade length is
/// `fade_samples(buffer.sample_rate())`, so it always matches the rate the
/// samples were decoded at.
pub fn apply_fades(buffer: AudioBuffer) -> AudioBuffer {
    apply_single(&FadeStage, buffer, StemKind::Other)
}

/// Full default chain for one stem
pub fn process_stem(buffer: AudioBuffer, kind: StemKind) -> AudioBuffer {
    StemProcessor::default().process(buffer, kind).buffer
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn sine(freq: f64, amp: f64, sample_rate: u32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (amp * (2.0 * PI * freq * i as f64 / sample_rate as f64).sin()) as f32)
            .collect()
    }

    /// Always fails, and records that it ran
    struct FailingStage(Arc<AtomicUsize>);

    impl StemStage for FailingStage {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn process(&self, _: &mut AudioBuffer, _: StemKind) -> Result<StageOutcome, StageError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(StageError::Correlation("boom".into()))
        }
    }

    #[test]
    fn test_default_chain_order() {
        assert_eq!(
            StemProcessor::default().stage_names(),
            vec!["filter", "loudness", "denoise", "phase_align", "fade"]
        );
    }

    #[test]
    fn test_failure_does_not_abort_chain() {
        let calls = Arc::new(AtomicUsize::new(0));
        let processor = StemProcessor::with_stages(vec![
            Box::new(FailingStage(calls.clone())),
            Box::new(FadeStage),
            Box::new(FailingStage(calls.clone())),
        ]);
        let buf = AudioBuffer::stereo(vec![0.5; 2000], vec![0.5; 2000], 44100).unwrap();
        let out = processor.process(buf, StemKind::Vocals);

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(out.degraded_count(), 2);
        assert_eq!(out.stages[1].status, StageStatus::Applied);
        assert_eq!(out.buffer.channel(0).unwrap()[0], 0.0);
    }

    #[test]
    fn test_zero_length_buffer_passes_through() {
        for kind in StemKind::ALL {
            let buf = AudioBuffer::stereo(vec![], vec![], 44100).unwrap();
            let out = StemProcessor::default().process(buf, kind);
            assert!(out.buffer.is_empty());
            assert_eq!(out.buffer.num_channels(), 2);
            assert!(out.stages.iter().all(|r| r.status == StageStatus::Skipped));
            assert_eq!(out.degraded_count(), 0, "{} degraded on empty input", kind);
        }
    }

    #[test]
    fn test_mono_input_comes_out_stereo() {
        let buf = AudioBuffer::from_channels(vec![sine(440.0, 0.3, 44100, 5000)], 44100).unwrap();
        let out = StemProcessor::default().process(buf, StemKind::Vocals);
        assert_eq!(out.buffer.num_channels(), 2);
        assert_eq!(out.buffer.channel(0), out.buffer.channel(1));
        assert_eq!(out.stages[3].stage, "phase_align");
        assert_ne!(
            out.stages[3].detail.as_deref(),
            Some("not a stereo buffer")
        );

        let surround = AudioBuffer::from_channels(vec![vec![0.1; 3000]; 6], 44100).unwrap();
        assert_eq!(process_stem(surround, StemKind::Other).num_channels(), 2);
    }

    #[test]
    fn test_vocals_sine_end_to_end() {
        let sr = 44100;
        let len = sr as usize * 5;
        // 440 Hz tone plus a 30 Hz rumble of equal amplitude
        let tone = sine(440.0, 0.25, sr, len);
        let rumble = sine(30.0, 0.25, sr, len);
        let mix: Vec<f32> = tone.iter().zip(&rumble).map(|(a, b)| a + b).collect();
        let buf = AudioBuffer::stereo(mix.clone(), mix, sr).unwrap();

        // Same chain without the fade, to compare the edges against
        let unfaded = StemProcessor::with_stages(vec![
            Box::new(FilterStage),
            Box::new(LoudnessStage::new(loudness::DEFAULT_TARGET_LEVEL_DB)),
            Box::new(DenoiseStage),
            Box::new(PhaseAlignStage),
        ])
        .process(buf.clone(), StemKind::Vocals)
        .buffer;

        let out = process_stem(buf, StemKind::Vocals);
        assert!(out.peak() <= loudness::PEAK_CEILING);

        let fade = fade::fade_samples(sr);
        assert_eq!(fade, 441);
        for (ch, pre) in out.channels().iter().zip(unfaded.channels()) {
            assert_eq!(ch.len(), len);
            assert_eq!(ch[0], 0.0);
            assert_eq!(ch[len - 1], 0.0);
            assert_eq!(&ch[fade..len - fade], &pre[fade..len - fade]);

            // Linear gain 0 -> 1 over the first 441 samples, 1 -> 0 over the last
            for i in 0..fade {
                let gain = i as f64 / (fade - 1) as f64;
                assert_eq!(ch[i], (pre[i] as f64 * gain) as f32, "fade-in sample {}", i);
                let j = len - 1 - i;
                assert_eq!(ch[j], (pre[j] as f64 * gain) as f32, "fade-out sample {}", j);
            }

            // Envelope rises through the fade-in and falls through the fade-out
            let window_peak = |w: &[f32]| w.iter().fold(0.0f32, |m, s| m.max(s.abs()));
            let head: Vec<f32> = ch[..fade].chunks(fade / 3).map(window_peak).collect();
            let tail: Vec<f32> = ch[len - fade..].chunks(fade / 3).map(window_peak).collect();
            assert!(head.windows(2).all(|w| w[0] <= w[1]), "fade-in envelope {:?}", head);
            assert!(tail.windows(2).all(|w| w[0] >= w[1]), "fade-out envelope {:?}", tail);
        }

        // Project onto 30 Hz and 440 Hz over the steady middle section
        let ch = out.channel(0).unwrap();
        let mid = &ch[sr as usize..4 * sr as usize];
        let amplitude = |freq: f64| {
            let (mut re, mut im) = (0.0, 0.0);
            for (i, &s) in mid.iter().enumerate() {
                let w = 2.0 * PI * freq * i as f64 / sr as f64;
                re += s as f64 * w.cos();
                im += s as f64 * w.sin();
            }
            2.0 * (re * re + im * im).sqrt() / mid.len() as f64
        };
        let low = amplitude(30.0);
        let high = amplitude(440.0);
        assert!(low < 0.05 * high, "30 Hz survived: {} vs {}", low, high);
    }

    #[test]
    fn test_single_stage_wrappers() {
        let buf = AudioBuffer::stereo(vec![0.5; 100], vec![0.5; 100], 8000).unwrap();
        // Bass low-pass at 8 kHz cannot be designed at 8 kHz: input comes back unchanged
        assert_eq!(apply_filtering(buf.clone(), StemKind::Bass), buf);

        let loud = normalize_loudness(buf.clone(), -14.0);
        assert!(loud.peak() <= loudness::PEAK_CEILING);

        let mono = AudioBuffer::from_channels(vec![vec![0.1; 10]], 44100).unwrap();
        assert_eq!(align_phase(mono.clone()), mono);

        assert_eq!(gentle_denoise(buf.clone()), buf);

        let faded = apply_fades(AudioBuffer::stereo(vec![1.0; 400], vec![1.0; 400], 8000).unwrap());
        assert_eq!(faded.channel(0).unwrap()[0], 0.0);
    }
}
