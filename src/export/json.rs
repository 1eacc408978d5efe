//! JSON job report

use crate::error::{MusicrayError, Result};
use crate::postprocess::StemReport;
use crate::types::{MixAnalysis, StemPaths};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use tracing::info;

/// File name of the report inside a job directory
pub const REPORT_FILE: &str = "report.json";

/// Everything a client needs after a job finishes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobReport {
    pub job_id: String,
    /// Stem file paths
    pub stems: StemsJson,
    /// Tempo, truncated to whole beats per minute
    pub bpm: u32,
    /// Key label such as "A minor"
    pub key: String,
    /// Duration of the original mix, one decimal
    pub duration_sec: f64,
    /// RFC 3339 completion time
    pub processed_at: String,
    pub stem_outcomes: Vec<StemReport>,
    /// musicray version that produced the report
    pub generator_version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StemsJson {
    pub vocals: String,
    pub drums: String,
    pub bass: String,
    pub other: String,
}

impl From<&StemPaths> for StemsJson {
    fn from(paths: &StemPaths) -> Self {
        Self {
            vocals: paths.vocals.to_string_lossy().to_string(),
            drums: paths.drums.to_string_lossy().to_string(),
            bass: paths.bass.to_string_lossy().to_string(),
            other: paths.other.to_string_lossy().to_string(),
        }
    }
}

impl JobReport {
    pub fn new(
        job_id: impl Into<String>,
        stems: &StemPaths,
        analysis: &MixAnalysis,
        stem_outcomes: Vec<StemReport>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            stems: stems.into(),
            bpm: analysis.tempo.bpm.max(0.0) as u32,
            key: analysis.key.label(),
            duration_sec: (analysis.duration_seconds * 10.0).round() / 10.0,
            processed_at: chrono::Utc::now().to_rfc3339(),
            stem_outcomes,
            generator_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Write a report to `output_path`
///
/// Uses atomic write pattern: writes to a temp file first, then renames.
/// This prevents a half-written report if the write is interrupted.
pub fn write_report(report: &JobReport, output_path: &Path) -> Result<()> {
    let temp_path = output_path.with_extension("json.tmp");

    let file = File::create(&temp_path).map_err(|e| MusicrayError::OutputError {
        path: output_path.to_path_buf(),
        reason: format!("Failed to create temp file: {}", e),
    })?;

    serde_json::to_writer_pretty(BufWriter::new(file), report).map_err(|e| {
        let _ = std::fs::remove_file(&temp_path);
        MusicrayError::OutputError {
            path: output_path.to_path_buf(),
            reason: e.to_string(),
        }
    })?;

    std::fs::rename(&temp_path, output_path).map_err(|e| {
        let _ = std::fs::remove_file(&temp_path);
        MusicrayError::OutputError {
            path: output_path.to_path_buf(),
            reason: format!("Failed to finalize file: {}", e),
        }
    })?;

    info!("Wrote report for job {} to {}", report.job_id, output_path.display());
    Ok(())
}

/// Load a previously written report
pub fn read_report(path: &Path) -> Result<JobReport> {
    if !path.exists() {
        return Err(MusicrayError::FileNotFound(path.to_path_buf()));
    }
    let file = File::open(path)?;
    serde_json::from_reader(BufReader::new(file)).map_err(|e| {
        MusicrayError::ConfigError(format!("Malformed report {}: {}", path.display(), e))
    })
}
