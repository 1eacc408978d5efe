//! Analysis trait abstractions
//!
//! These traits define the interface for swappable analysis backends, so the
//! pipeline can run with the in-crate DSP estimators and an external
//! separation process, or with test doubles.

use crate::error::Result;
use crate::types::{KeyResult, MonoBuffer, StemPaths, TempoResult};
use std::path::Path;

/// Tempo estimation backend
pub trait TempoEstimator: Send + Sync {
    /// Estimate tempo from mono samples
    fn estimate(&self, buffer: &MonoBuffer) -> Result<TempoResult>;

    /// Get the name of this estimator (for logging)
    fn name(&self) -> &'static str;
}

/// Musical key estimation backend
pub trait KeyEstimator: Send + Sync {
    /// Estimate the key from mono samples
    fn estimate(&self, buffer: &MonoBuffer) -> Result<KeyResult>;

    /// Get the name of this estimator (for logging)
    fn name(&self) -> &'static str;
}

/// Stem separation backend
pub trait StemSeparator: Send + Sync {
    /// Separate audio into stems (vocals, drums, bass, other)
    ///
    /// # Arguments
    /// * `input_path` - Stereo 44.1 kHz WAV to separate
    /// * `output_dir` - Directory to write `vocals.wav`, `drums.wav`, ...
    ///
    /// # Returns
    /// Paths to the generated stem files
    fn separate(&self, input_path: &Path, output_dir: &Path) -> Result<StemPaths>;

    /// Check if the separator can run at all (engine installed, etc.)
    fn is_available(&self) -> bool;

    /// Get the name of this separator (for logging)
    fn name(&self) -> &'static str;
}
