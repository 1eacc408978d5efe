//! Audio analysis modules
//!
//! Traits for analysis backends plus their implementations: stratum-dsp
//! tempo, in-crate chroma-profile key, and the Demucs separator.
//! The trait abstraction allows swapping backends without changing pipeline code.

pub mod key;
pub mod spectrum;
pub mod stems;
pub mod tempo;
pub mod traits;

pub use key::ChromaKeyEstimator;
pub use stems::{DemucsConfig, DemucsSeparator};
pub use tempo::StratumTempoEstimator;
pub use traits::{KeyEstimator, StemSeparator, TempoEstimator};

use crate::audio;
use crate::types::{KeyResult, MixAnalysis, MonoBuffer, TempoResult};
use std::path::Path;
use tracing::{debug, warn};

/// Tempo, key and duration of a decoded mix
///
/// Estimator failures are replaced by their defaults (120 BPM, C major).
pub fn analyze_buffer(
    buffer: &MonoBuffer,
    tempo: &dyn TempoEstimator,
    key: &dyn KeyEstimator,
) -> MixAnalysis {
    let tempo_result = tempo.estimate(buffer).unwrap_or_else(|e| {
        warn!("{} failed, using 120 BPM: {}", tempo.name(), e);
        TempoResult::default()
    });
    let key_result = key.estimate(buffer).unwrap_or_else(|e| {
        warn!("{} failed, using C major: {}", key.name(), e);
        KeyResult::default()
    });

    MixAnalysis {
        tempo: tempo_result,
        key: key_result,
        duration_seconds: buffer.duration,
    }
}

/// Decode `path` at the analysis rate and estimate tempo, key and duration
///
/// A file that cannot be decoded yields the full default analysis
/// (120 BPM, C major, 180 s).
pub fn analyze_mix(path: &Path) -> MixAnalysis {
    match audio::decode(path) {
        Ok(buffer) => {
            let analysis = analyze_buffer(&buffer, &StratumTempoEstimator, &ChromaKeyEstimator);
            debug!(
                "Analysis of {}: {:.1} BPM, {}, {:.1}s",
                path.display(),
                analysis.tempo.bpm,
                analysis.key.label(),
                analysis.duration_seconds
            );
            analysis
        }
        Err(e) => {
            warn!("Analysis of {} failed, using defaults: {}", path.display(), e);
            MixAnalysis::default()
        }
    }
}
