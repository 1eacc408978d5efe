//! Unified error types for musicray
//!
//! Error strategy:
//! - Stage errors (filter design, correlation, ...): degrade, log, pass the buffer through
//! - Stem errors (decode, malformed buffer): drop that stem, siblings continue
//! - Analysis errors: fall back to default tempo/key values
//! - Pipeline errors (input rejected, separation failed, nothing produced): abort the job
//!
//! Stage errors live in [`StageError`] and never escape the stem processor.

use crate::types::StemKind;
use std::path::PathBuf;
use thiserror::Error;

/// Supported input formats for helpful error messages
pub const SUPPORTED_FORMATS: &str = "MP3, WAV, FLAC, M4A";

/// Top-level error type for musicray operations
#[derive(Debug, Error)]
pub enum MusicrayError {
    // =========================================================================
    // Stem-fatal errors - drop this stem, keep processing the others
    // =========================================================================
    #[error("Failed to decode audio file '{path}': {reason}\n  Supported formats: {SUPPORTED_FORMATS}")]
    DecodeError { path: PathBuf, reason: String },

    #[error("Invalid audio buffer: {reason}")]
    InvalidBuffer { reason: String },

    #[error("Stem '{kind}' missing at '{path}'")]
    StemMissing { kind: StemKind, path: PathBuf },

    // =========================================================================
    // Analysis errors - replaced by default tempo/key values
    // =========================================================================
    #[error("Analysis failed: {reason}")]
    AnalysisError { reason: String },

    // =========================================================================
    // Pipeline-fatal errors - abort the whole job
    // =========================================================================
    #[error("Unsupported audio format for '{path}': {format}\n  Supported formats: {SUPPORTED_FORMATS}")]
    UnsupportedFormat { path: PathBuf, format: String },

    #[error("Uploaded file '{path}' could not be decoded: {reason}\n  Supported formats: {SUPPORTED_FORMATS}")]
    InputDecodeError { path: PathBuf, reason: String },

    #[error("File too large ({size_mb:.1} MB). Maximum allowed is {max_mb} MB")]
    FileTooLarge { size_mb: f64, max_mb: u64 },

    #[error("Track too long ({minutes:.1} minutes). Maximum allowed is {max_minutes} minutes")]
    TooLong { minutes: f64, max_minutes: u64 },

    #[error("File not found: '{0}'\n  Tip: Check the path exists and is accessible")]
    FileNotFound(PathBuf),

    #[error("Stem separation failed: {reason}\n  Tip: Check that demucs is installed (pip install demucs) and the --separator command is correct")]
    SeparationFailed { reason: String },

    #[error("Stem separation exceeded the {secs}s time limit")]
    SeparationTimeout { secs: u64 },

    #[error("No stems could be produced: {reason}")]
    NoStemsProduced { reason: String },

    #[error("Cannot write output to '{path}': {reason}\n  Tip: Check write permissions for the output directory")]
    OutputError { path: PathBuf, reason: String },

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for musicray operations
pub type Result<T> = std::result::Result<T, MusicrayError>;

impl MusicrayError {
    /// Returns true if this error only invalidates a single stem
    pub fn is_stem_fatal(&self) -> bool {
        matches!(
            self,
            MusicrayError::DecodeError { .. }
                | MusicrayError::InvalidBuffer { .. }
                | MusicrayError::StemMissing { .. }
        )
    }

    /// Returns true if this error must abort the whole job
    pub fn is_pipeline_fatal(&self) -> bool {
        !self.is_stem_fatal() && !matches!(self, MusicrayError::AnalysisError { .. })
    }

    pub fn analysis(reason: impl Into<String>) -> Self {
        MusicrayError::AnalysisError {
            reason: reason.into(),
        }
    }

    /// Create a decode error with context about the issue
    pub fn decode_error(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        MusicrayError::DecodeError {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid-buffer error
    pub fn invalid_buffer(reason: impl Into<String>) -> Self {
        MusicrayError::InvalidBuffer {
            reason: reason.into(),
        }
    }

    /// Create an output error, checking for common issues
    pub fn output_error(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        let path = path.into();
        let reason = match err.kind() {
            std::io::ErrorKind::PermissionDenied => {
                format!("Permission denied. Check that you have write access to {}", path.display())
            }
            std::io::ErrorKind::NotFound => {
                format!(
                    "Directory does not exist: {}",
                    path.parent().map(|p| p.display().to_string()).unwrap_or_default()
                )
            }
            _ => err.to_string(),
        };
        MusicrayError::OutputError { path, reason }
    }
}

/// Reasons a single post-processing stage could not run
///
/// Never surfaced to callers: the stem processor logs it and passes the
/// buffer through unchanged.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StageError {
    #[error("filter design failed: {0}")]
    FilterDesign(String),

    #[error("filter application failed: {0}")]
    FilterApply(String),

    #[error("non-finite value produced ({0})")]
    NonFinite(&'static str),

    #[error("cross-correlation failed: {0}")]
    Correlation(String),
}
