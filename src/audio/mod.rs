//! Audio file I/O

pub mod decoder;
pub mod writer;

pub use decoder::{decode, decode_mono, decode_stereo, ANALYSIS_SAMPLE_RATE, STEM_SAMPLE_RATE};
pub use writer::{replace_wav, write_wav};
