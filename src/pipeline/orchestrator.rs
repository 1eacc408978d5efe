//! Pipeline orchestration
//!
//! One job, start to finish:
//!
//! 1. Validate the upload (exists, supported extension, size limit)
//! 2. Create `<storage>/<job_id>` and convert the input to stereo 44.1 kHz WAV
//! 3. Separate stems with the configured engine
//! 4. Post-process the four stems in parallel while a scoped thread analyses
//!    the original mix
//! 5. Enforce the duration limit and write `report.json`
//!
//! Any pipeline-fatal error after step 2 removes the job directory.

use crate::analysis::{self, DemucsConfig, DemucsSeparator, StemSeparator};
use crate::audio;
use crate::config::{Limits, Settings};
use crate::error::{MusicrayError, Result};
use crate::export::{self, JobReport};
use crate::postprocess::{postprocess_stems, PostprocessSummary, StemProcessor};
use crate::types::{AudioFormat, MixAnalysis, StemPaths};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Name of the converted separation input inside a job directory
pub const CONVERTED_INPUT: &str = "input_converted.wav";

/// Run a full job with the Demucs separator
pub fn run(settings: &Settings) -> Result<JobReport> {
    configure_thread_pool(settings.threads)?;

    let separator = DemucsSeparator::new(DemucsConfig::from_settings(settings));
    if !separator.is_available() {
        warn!(
            "'{}' cannot import demucs; separation will likely fail",
            settings.separator_cmd
        );
    }
    run_with(settings, &separator)
}

/// Run a full job with any separation backend
pub fn run_with(settings: &Settings, separator: &dyn StemSeparator) -> Result<JobReport> {
    let pipeline_start = Instant::now();

    let format = validate_input(&settings.input, &settings.limits)?;
    debug!("Input format: {:?}", format);

    let job_id = Uuid::new_v4().to_string();
    let job = JobDir::create(&settings.output, &job_id)?;
    info!("Started job {} for {}", job_id, settings.input.display());

    let spinner = progress_spinner(settings.show_progress);

    // Phase 1: conversion
    spinner.set_message("Converting input");
    let (wav_path, input_duration) = convert_to_wav(&settings.input, job.path())?;

    // Phase 2: separation
    spinner.set_message(format!("Separating stems with {}", separator.name()));
    let separation_start = Instant::now();
    let stems = separator.separate(&wav_path, job.path())?;
    info!(
        "Separation completed in {:.2}s",
        separation_start.elapsed().as_secs_f64()
    );

    // Phase 3: post-processing alongside mix analysis
    spinner.set_message("Post-processing stems");
    let processor = StemProcessor::new(settings.target_level_db);
    let (analysis, summary) = thread::scope(|s| {
        let analysis_handle = s.spawn(|| {
            if settings.skip_analysis {
                MixAnalysis {
                    duration_seconds: input_duration,
                    ..MixAnalysis::default()
                }
            } else {
                analysis::analyze_mix(&settings.input)
            }
        });

        let summary = postprocess_stems(&stems, &processor);
        let analysis = analysis_handle.join().unwrap_or_else(|_| {
            error!("Analysis thread panicked, using defaults");
            MixAnalysis::default()
        });
        (analysis, summary)
    });
    let summary = summary?;

    // Phase 4: limits and report
    check_duration(analysis.duration_seconds, &settings.limits)?;

    let report = JobReport::new(&job_id, &stems, &analysis, summary.reports);
    export::write_report(&report, &job.path().join(export::REPORT_FILE))?;

    spinner.finish_and_clear();
    let job_path = job.keep();
    info!(
        "Job {} done in {:.2}s: {} BPM, {}, {:.1}s -> {}",
        job_id,
        pipeline_start.elapsed().as_secs_f64(),
        report.bpm,
        report.key,
        report.duration_sec,
        job_path.display()
    );

    Ok(report)
}

/// Post-process an existing directory of stems in place
pub fn run_postprocess_only(dir: &Path, settings: &Settings) -> Result<PostprocessSummary> {
    if !dir.is_dir() {
        return Err(MusicrayError::FileNotFound(dir.to_path_buf()));
    }
    configure_thread_pool(settings.threads)?;

    let processor = StemProcessor::new(settings.target_level_db);
    postprocess_stems(&StemPaths::in_dir(dir), &processor)
}

/// Remove a job directory from storage
pub fn delete_job(storage: &Path, job_id: &str) -> Result<()> {
    let is_plain_name = !job_id.is_empty()
        && job_id != "."
        && job_id != ".."
        && !job_id.contains(['/', '\\']);
    if !is_plain_name {
        return Err(MusicrayError::ConfigError(format!("Invalid job id '{}'", job_id)));
    }

    let dir = storage.join(job_id);
    if !dir.is_dir() {
        return Err(MusicrayError::FileNotFound(dir));
    }
    std::fs::remove_dir_all(&dir).map_err(|e| MusicrayError::output_error(&dir, e))?;
    info!("Deleted job {}", job_id);
    Ok(())
}

/// Reject uploads that are missing, of an unknown type, or too large
pub fn validate_input(path: &Path, limits: &Limits) -> Result<AudioFormat> {
    if !path.is_file() {
        return Err(MusicrayError::FileNotFound(path.to_path_buf()));
    }

    let format = AudioFormat::from_path(path).ok_or_else(|| MusicrayError::UnsupportedFormat {
        path: path.to_path_buf(),
        format: path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("none")
            .to_string(),
    })?;

    let size = std::fs::metadata(path)?.len();
    if size > limits.max_file_size_bytes() {
        return Err(MusicrayError::FileTooLarge {
            size_mb: size as f64 / (1024.0 * 1024.0),
            max_mb: limits.max_file_size_mb,
        });
    }

    Ok(format)
}

fn check_duration(duration_secs: f64, limits: &Limits) -> Result<()> {
    if duration_secs > limits.max_duration_secs() {
        return Err(MusicrayError::TooLong {
            minutes: duration_secs / 60.0,
            max_minutes: limits.max_duration_minutes,
        });
    }
    Ok(())
}

/// Decode the upload to stereo 44.1 kHz and write it as float WAV
///
/// Returns the WAV path and the input duration in seconds.
///
/// An upload that cannot be decoded ends the job, so stem-level decode
/// failures are raised to [`MusicrayError::InputDecodeError`] here.
pub fn convert_to_wav(input: &Path, job_dir: &Path) -> Result<(PathBuf, f64)> {
    let buffer = audio::decode_stereo(input).map_err(|e| match e {
        MusicrayError::DecodeError { path, reason } => MusicrayError::InputDecodeError { path, reason },
        MusicrayError::InvalidBuffer { reason } => MusicrayError::InputDecodeError {
            path: input.to_path_buf(),
            reason,
        },
        other => other,
    })?;
    let wav_path = job_dir.join(CONVERTED_INPUT);
    audio::write_wav(&wav_path, &buffer)?;
    debug!(
        "Converted {} -> {} ({:.1}s)",
        input.display(),
        wav_path.display(),
        buffer.duration_secs()
    );
    Ok((wav_path, buffer.duration_secs()))
}

/// Job directory that deletes itself unless the job succeeds
struct JobDir {
    path: PathBuf,
    keep: bool,
}

impl JobDir {
    fn create(storage: &Path, job_id: &str) -> Result<Self> {
        let path = storage.join(job_id);
        std::fs::create_dir_all(&path).map_err(|e| MusicrayError::output_error(&path, e))?;
        Ok(Self { path, keep: false })
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn keep(mut self) -> PathBuf {
        self.keep = true;
        self.path.clone()
    }
}

impl Drop for JobDir {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        debug!("Removing failed job directory {}", self.path.display());
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            warn!("Could not remove {}: {}", self.path.display(), e);
        }
    }
}

fn progress_spinner(enabled: bool) -> ProgressBar {
    if !enabled {
        return ProgressBar::hidden();
    }
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.enable_steady_tick(Duration::from_millis(120));
    spinner
}

/// Configure the Rayon thread pool
fn configure_thread_pool(num_threads: usize) -> Result<()> {
    match rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .build_global()
    {
        Ok(()) => {
            debug!("Configured thread pool with {} threads", num_threads);
        }
        Err(e) => {
            // If the pool is already initialized (e.g., in tests), that's OK
            if e.to_string().contains("already been initialized") {
                debug!("Thread pool already initialized, using existing pool");
            } else {
                return Err(MusicrayError::ConfigError(format!(
                    "Failed to configure thread pool: {}",
                    e
                )));
            }
        }
    }
    Ok(())
}
