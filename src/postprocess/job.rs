//! Per-stem job lifecycle and the multi-stem parallel run
//!
//! A [`StemJob`] owns one decoded stem. It is created when the stem file is
//! decoded, consumed by [`StemJob::run`], and its processed buffer is written
//! back over the original file. Stems share nothing, so all four run on the
//! rayon pool at once.

use super::{ProcessedBuffer, StageStatus, StemProcessor};
use crate::audio;
use crate::error::{MusicrayError, Result};
use crate::types::{AudioBuffer, StemKind, StemPaths};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};

/// One stem buffer waiting to be processed
#[derive(Debug, Clone)]
pub struct StemJob {
    kind: StemKind,
    buffer: AudioBuffer,
}

impl StemJob {
    /// Wrap an existing buffer, normalizing it to stereo
    pub fn new(kind: StemKind, buffer: AudioBuffer) -> Self {
        Self {
            kind,
            buffer: buffer.into_stereo(),
        }
    }

    /// Build from raw planar channels; ragged channels are rejected
    pub fn from_channels(kind: StemKind, channels: Vec<Vec<f32>>, sample_rate: u32) -> Result<Self> {
        let buffer = AudioBuffer::from_channels(channels, sample_rate)?;
        Ok(Self::new(kind, buffer))
    }

    /// Decode the stem file at `path`
    pub fn load(kind: StemKind, path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(MusicrayError::StemMissing {
                kind,
                path: path.to_path_buf(),
            });
        }
        let buffer = audio::decode_stereo(path)?;
        debug!("{}: loaded {:.2}s from {}", kind, buffer.duration_secs(), path.display());
        Ok(Self::new(kind, buffer))
    }

    pub fn kind(&self) -> StemKind {
        self.kind
    }

    pub fn buffer(&self) -> &AudioBuffer {
        &self.buffer
    }

    /// Run the stage chain, consuming the job
    pub fn run(self, processor: &StemProcessor) -> ProcessedBuffer {
        processor.process(self.buffer, self.kind)
    }
}

/// Final state of one stem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StemStatus {
    /// Every stage applied or skipped by design
    Processed,
    /// At least one stage failed and was passed through
    Degraded,
    /// The stem could not be loaded or written
    Failed,
}

/// Per-stem entry of the job report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StemReport {
    pub stem: StemKind,
    pub status: StemStatus,
    pub stages_applied: Vec<String>,
    /// Stages skipped by design or degraded after a failure
    pub stages_skipped: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StemReport {
    fn from_processed(kind: StemKind, processed: &ProcessedBuffer) -> Self {
        let mut applied = Vec::new();
        let mut skipped = Vec::new();
        for record in &processed.stages {
            match record.status {
                StageStatus::Applied => applied.push(record.stage.clone()),
                StageStatus::Skipped | StageStatus::Degraded => skipped.push(record.stage.clone()),
            }
        }
        let status = if processed.degraded_count() > 0 {
            StemStatus::Degraded
        } else {
            StemStatus::Processed
        };
        Self {
            stem: kind,
            status,
            stages_applied: applied,
            stages_skipped: skipped,
            error: None,
        }
    }

    fn failed(kind: StemKind, error: &MusicrayError) -> Self {
        Self {
            stem: kind,
            status: StemStatus::Failed,
            stages_applied: Vec::new(),
            stages_skipped: Vec::new(),
            error: Some(error.to_string()),
        }
    }
}

/// Outcome of post-processing all four stems
#[derive(Debug, Clone)]
pub struct PostprocessSummary {
    /// One report per stem, in separation-engine order
    pub reports: Vec<StemReport>,
}

impl PostprocessSummary {
    pub fn succeeded(&self) -> usize {
        self.reports
            .iter()
            .filter(|r| r.status != StemStatus::Failed)
            .count()
    }

    pub fn failed(&self) -> usize {
        self.reports.len() - self.succeeded()
    }
}

/// Load, process and overwrite one stem file
fn process_stem_file(kind: StemKind, path: &Path, processor: &StemProcessor) -> Result<StemReport> {
    let start = Instant::now();
    let job = StemJob::load(kind, path)?;
    let processed = job.run(processor);
    audio::replace_wav(path, &processed.buffer)?;

    debug!("{}: processed in {:.2}s", kind, start.elapsed().as_secs_f64());
    Ok(StemReport::from_processed(kind, &processed))
}

/// Post-process every stem in `paths` in parallel, rewriting files in place
///
/// A stem that cannot be decoded is reported as failed while the others
/// continue. Output failures abort the run, as does losing all four stems.
pub fn postprocess_stems(paths: &StemPaths, processor: &StemProcessor) -> Result<PostprocessSummary> {
    let results: Vec<(StemKind, Result<StemReport>)> = StemKind::ALL
        .par_iter()
        .map(|&kind| (kind, process_stem_file(kind, paths.get(kind), processor)))
        .collect();

    let mut reports = Vec::with_capacity(results.len());
    for (kind, result) in results {
        match result {
            Ok(report) => reports.push(report),
            Err(e) if e.is_stem_fatal() => {
                warn!("{}: dropping stem: {}", kind, e);
                reports.push(StemReport::failed(kind, &e));
            }
            Err(e) => return Err(e),
        }
    }

    let summary = PostprocessSummary { reports };
    if summary.succeeded() == 0 {
        return Err(MusicrayError::NoStemsProduced {
            reason: "every stem failed to load".to_string(),
        });
    }

    info!(
        "Post-processed {} stems ({} failed)",
        summary.succeeded(),
        summary.failed()
    );
    Ok(summary)
}
