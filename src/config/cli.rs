//! CLI argument parsing and configuration

use super::settings::Device;
use clap::Parser;
use std::path::PathBuf;

/// musicray - stem separation and post-processing for uploaded tracks
///
/// Separates a track into vocals, drums, bass and other, cleans each stem
/// up (filtering, loudness, gating, phase alignment, fades), and writes a
/// JSON report with tempo, key and duration of the original mix.
#[derive(Parser, Debug)]
#[command(name = "musicray")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Input audio file (mp3, wav, flac, m4a)
    #[arg(
        short,
        long,
        value_name = "FILE",
        required_unless_present = "postprocess_only"
    )]
    pub input: Option<PathBuf>,

    /// Storage root; each job is written to <OUTPUT>/<job id>
    #[arg(short, long, value_name = "DIR", default_value = "storage")]
    pub output: PathBuf,

    /// Only post-process an existing directory of vocals/drums/bass/other.wav
    #[arg(long, value_name = "DIR", conflicts_with = "input")]
    pub postprocess_only: Option<PathBuf>,

    /// Python interpreter used to run the separation engine
    #[arg(long, value_name = "CMD", default_value = "python")]
    pub separator: String,

    /// Separation model name
    #[arg(long, value_name = "NAME", default_value = "htdemucs")]
    pub model: String,

    /// Separation device (defaults to $MUSICRAY_DEVICE, then cpu)
    #[arg(long, value_enum)]
    pub device: Option<Device>,

    /// Abort separation after this many seconds
    #[arg(long, value_name = "SECS", default_value_t = 1800)]
    pub timeout_secs: u64,

    /// Use cloud limits and high-quality separation (also set by $CLOUD_PROVIDER / $RUNPOD_POD_ID)
    #[arg(long, default_value = "false")]
    pub cloud: bool,

    /// Loudness target for every stem, in approximate LUFS
    #[arg(long, value_name = "DB", default_value_t = -14.0, allow_negative_numbers = true)]
    pub target_level: f64,

    /// Number of worker threads (defaults to CPU count - 1)
    #[arg(short = 'j', long, value_name = "N")]
    pub threads: Option<usize>,

    /// Skip tempo/key analysis and report default values
    #[arg(long, default_value = "false")]
    pub skip_analysis: bool,

    /// Verbose output (can be repeated: -v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (errors only, no spinner)
    #[arg(short, long, default_value = "false")]
    pub quiet: bool,
}

impl Cli {
    /// Default log filter for the verbosity flags
    pub fn log_filter(&self) -> &'static str {
        if self.quiet {
            return "error";
        }
        match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}
