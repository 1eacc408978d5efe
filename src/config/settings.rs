//! Runtime configuration settings

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Compute device handed to the separation engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Device {
    #[default]
    Cpu,
    Cuda,
}

impl Device {
    pub fn as_str(self) -> &'static str {
        match self {
            Device::Cpu => "cpu",
            Device::Cuda => "cuda",
        }
    }

    /// Parse a device name as found in the environment
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "cpu" => Some(Device::Cpu),
            "cuda" | "gpu" => Some(Device::Cuda),
            _ => None,
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Upload limits for a deployment profile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_file_size_mb: u64,
    pub max_duration_minutes: u64,
}

impl Limits {
    /// Local machine: 100 MB, 10 minutes
    pub fn local() -> Self {
        Self {
            max_file_size_mb: 100,
            max_duration_minutes: 10,
        }
    }

    /// Cloud GPU worker: 500 MB, 20 minutes
    pub fn cloud() -> Self {
        Self {
            max_file_size_mb: 500,
            max_duration_minutes: 20,
        }
    }

    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb * 1024 * 1024
    }

    pub fn max_duration_secs(&self) -> f64 {
        self.max_duration_minutes as f64 * 60.0
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self::local()
    }
}

/// True when the process runs on a known cloud worker
pub fn cloud_from_env() -> bool {
    std::env::var_os("CLOUD_PROVIDER").is_some() || std::env::var_os("RUNPOD_POD_ID").is_some()
}

/// Runtime settings for one job
#[derive(Debug, Clone)]
pub struct Settings {
    /// Uploaded audio file
    pub input: PathBuf,
    /// Storage root; each job gets `<output>/<job_id>`
    pub output: PathBuf,
    /// Post-process an existing stem directory instead of running a job
    pub postprocess_only: Option<PathBuf>,
    /// Interpreter used to launch the separation engine
    pub separator_cmd: String,
    /// Separation model name
    pub model: String,
    pub device: Device,
    /// Upper bound on one separation run
    pub separation_timeout: Duration,
    /// Cloud profile: larger limits, high-quality separation
    pub cloud: bool,
    pub limits: Limits,
    /// Loudness target in approximate LUFS
    pub target_level_db: f64,
    /// Number of worker threads
    pub threads: usize,
    /// Skip tempo/key analysis and report defaults
    pub skip_analysis: bool,
    /// Show progress spinner
    pub show_progress: bool,
}

impl Settings {
    /// Create settings from CLI arguments
    pub fn from_cli(cli: &super::cli::Cli) -> Self {
        let cloud = cli.cloud || cloud_from_env();
        let device = cli
            .device
            .or_else(|| {
                std::env::var("MUSICRAY_DEVICE")
                    .ok()
                    .and_then(|d| Device::from_name(&d))
            })
            .unwrap_or_default();

        Self {
            input: cli.input.clone().unwrap_or_default(),
            output: cli.output.clone(),
            postprocess_only: cli.postprocess_only.clone(),
            separator_cmd: cli.separator.clone(),
            model: cli.model.clone(),
            device,
            separation_timeout: Duration::from_secs(cli.timeout_secs),
            cloud,
            limits: if cloud { Limits::cloud() } else { Limits::local() },
            target_level_db: cli.target_level,
            threads: cli.threads.unwrap_or_else(default_threads),
            skip_analysis: cli.skip_analysis,
            show_progress: !cli.quiet,
        }
    }
}

/// All cores but one, never fewer than one
fn default_threads() -> usize {
    num_cpus::get().saturating_sub(1).max(1)
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            input: PathBuf::new(),
            output: PathBuf::from("storage"),
            postprocess_only: None,
            separator_cmd: "python".to_string(),
            model: "htdemucs".to_string(),
            device: Device::Cpu,
            separation_timeout: Duration::from_secs(1800),
            cloud: false,
            limits: Limits::local(),
            target_level_db: crate::postprocess::loudness::DEFAULT_TARGET_LEVEL_DB,
            threads: default_threads(),
            skip_analysis: false,
            show_progress: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profiles() {
        assert_eq!(Limits::local().max_file_size_bytes(), 100 * 1024 * 1024);
        assert_eq!(Limits::cloud().max_duration_secs(), 1200.0);
        assert_eq!(Limits::default(), Limits::local());
    }

    #[test]
    fn test_device_names() {
        assert_eq!(Device::from_name(" CUDA "), Some(Device::Cuda));
        assert_eq!(Device::from_name("cpu"), Some(Device::Cpu));
        assert_eq!(Device::from_name("tpu"), None);
        assert_eq!(Device::Cuda.to_string(), "cuda");
    }
}
