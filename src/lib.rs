//! musicray - Stem Separation & Post-Processing
//!
//! Takes an uploaded track, separates it into vocals, drums, bass and other,
//! cleans each stem up, and reports tempo, key and duration of the mix.
//!
//! # Architecture
//!
//! - `config`: CLI argument parsing, runtime settings and upload limits
//! - `audio`: decoding with symphonia, float WAV output with hound
//! - `postprocess`: the per-stem DSP chain
//!   (filter -> loudness -> denoise -> phase alignment -> fade)
//! - `analysis`: tempo/key estimation and the stem separation backend
//! - `pipeline`: job orchestration from upload to report
//! - `export`: JSON job report
//!
//! # Example
//!
//! ```no_run
//! use musicray::{postprocess, types::{AudioBuffer, StemKind}};
//!
//! let buffer = AudioBuffer::stereo(vec![0.1; 44100], vec![0.1; 44100], 44100)?;
//! let cleaned = postprocess::process_stem(buffer, StemKind::Vocals);
//! assert!(cleaned.peak() <= 0.95);
//! # Ok::<(), musicray::MusicrayError>(())
//! ```

pub mod analysis;
pub mod audio;
pub mod config;
pub mod error;
pub mod export;
pub mod pipeline;
pub mod postprocess;
pub mod types;

// Re-export key types at crate root
pub use error::{MusicrayError, Result};
pub use types::{AudioBuffer, MixAnalysis, StemKind, StemPaths};
