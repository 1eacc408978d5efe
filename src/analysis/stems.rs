//! Stem separation through an external Demucs process
//!
//! The engine runs as `<python> -m demucs.separate` and writes its stems to
//! `<out>/<model>/<input stem>/`. They are copied into the job directory and
//! the engine's output tree is removed afterwards.

use super::traits::StemSeparator;
use crate::config::{Device, Settings};
use crate::error::{MusicrayError, Result};
use crate::types::{StemKind, StemPaths};
use crossbeam_channel::{bounded, RecvTimeoutError};
use std::ffi::OsString;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Engine output directory inside the job directory
const ENGINE_OUTPUT_DIR: &str = "demucs_output";

/// Demucs invocation parameters
#[derive(Debug, Clone)]
pub struct DemucsConfig {
    /// Python interpreter with demucs installed
    pub python: String,
    pub model: String,
    pub device: Device,
    /// More shifts and larger segments, for GPU and cloud workers
    pub high_quality: bool,
    pub timeout: Duration,
}

impl DemucsConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            python: settings.separator_cmd.clone(),
            model: settings.model.clone(),
            device: settings.device,
            high_quality: settings.device == Device::Cuda || settings.cloud,
            timeout: settings.separation_timeout,
        }
    }

    /// Quality flags: `--shifts`, `--overlap`, `--segment`
    fn quality_args(&self) -> [&'static str; 6] {
        if self.high_quality {
            ["--shifts", "5", "--overlap", "0.25", "--segment", "8"]
        } else {
            ["--shifts", "1", "--overlap", "0.1", "--segment", "4"]
        }
    }

    /// Full argument list after the interpreter
    pub fn args(&self, wav: &Path, out_dir: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "-m".into(),
            "demucs.separate".into(),
            "--name".into(),
            self.model.clone().into(),
            "--device".into(),
            self.device.as_str().into(),
            "--out".into(),
            out_dir.as_os_str().to_owned(),
        ];
        args.extend(self.quality_args().iter().map(OsString::from));
        args.push(wav.as_os_str().to_owned());
        args
    }
}

impl Default for DemucsConfig {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

/// [`StemSeparator`] backed by the Demucs command line
pub struct DemucsSeparator {
    config: DemucsConfig,
}

impl DemucsSeparator {
    pub fn new(config: DemucsConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DemucsConfig {
        &self.config
    }

    /// Run the engine to completion or until the timeout fires
    fn run_engine(&self, wav: &Path, out_dir: &Path) -> Result<()> {
        let args = self.config.args(wav, out_dir);
        debug!("Running {} {:?}", self.config.python, args);

        let mut child = Command::new(&self.config.python)
            .env("PYTHONUNBUFFERED", "1")
            .args(&args)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| MusicrayError::SeparationFailed {
                reason: format!("Failed to launch '{}': {}", self.config.python, e),
            })?;

        let mut stderr = child.stderr.take().ok_or_else(|| MusicrayError::SeparationFailed {
            reason: "engine stderr not captured".to_string(),
        })?;

        // stderr closes when the engine exits, which makes the reader a watcher
        let (done_tx, done_rx) = bounded::<String>(1);
        let reader = thread::spawn(move || {
            let mut text = String::new();
            let _ = stderr.read_to_string(&mut text);
            let _ = done_tx.send(text);
        });

        let start = Instant::now();
        let stderr_text = match done_rx.recv_timeout(self.config.timeout) {
            Ok(text) => text,
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "Separation exceeded {}s, killing engine",
                    self.config.timeout.as_secs()
                );
                let _ = child.kill();
                let _ = child.wait();
                let _ = reader.join();
                return Err(MusicrayError::SeparationTimeout {
                    secs: self.config.timeout.as_secs(),
                });
            }
            Err(RecvTimeoutError::Disconnected) => String::new(),
        };
        let _ = reader.join();

        let status = child.wait().map_err(|e| MusicrayError::SeparationFailed {
            reason: format!("Failed to wait for engine: {}", e),
        })?;
        if !status.success() {
            return Err(MusicrayError::SeparationFailed {
                reason: format!("engine exited with {}: {}", status, stderr_text.trim()),
            });
        }

        info!("Separation finished in {:.1}s", start.elapsed().as_secs_f64());
        Ok(())
    }
}

impl StemSeparator for DemucsSeparator {
    fn separate(&self, input_path: &Path, output_dir: &Path) -> Result<StemPaths> {
        let engine_out = output_dir.join(ENGINE_OUTPUT_DIR);
        std::fs::create_dir_all(&engine_out)
            .map_err(|e| MusicrayError::output_error(&engine_out, e))?;

        let result = self
            .run_engine(input_path, &engine_out)
            .and_then(|()| collect_stems(&engine_out, &self.config.model, input_path, output_dir));

        if let Err(e) = std::fs::remove_dir_all(&engine_out) {
            warn!("Could not remove {}: {}", engine_out.display(), e);
        }
        result
    }

    fn is_available(&self) -> bool {
        Command::new(&self.config.python)
            .args(["-c", "import demucs"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    fn name(&self) -> &'static str {
        "demucs"
    }
}

/// Copy `<engine_out>/<model>/<input stem>/*.wav` into `output_dir`
fn collect_stems(engine_out: &Path, model: &str, input: &Path, output_dir: &Path) -> Result<StemPaths> {
    let track_name = input.file_stem().unwrap_or_default();
    let source_dir: PathBuf = engine_out.join(model).join(track_name);
    if !source_dir.is_dir() {
        return Err(MusicrayError::SeparationFailed {
            reason: format!("engine output directory not found: {}", source_dir.display()),
        });
    }

    let paths = StemPaths::in_dir(output_dir);
    for kind in StemKind::ALL {
        let src = source_dir.join(kind.file_name());
        if !src.is_file() {
            return Err(MusicrayError::SeparationFailed {
                reason: format!("engine did not produce {}", kind.file_name()),
            });
        }
        let dst = paths.get(kind);
        std::fs::copy(&src, dst).map_err(|e| MusicrayError::output_error(dst, e))?;
    }
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quality_by_device() {
        let mut config = DemucsConfig::default();
        let args = config.args(Path::new("/j/input_converted.wav"), Path::new("/j/demucs_output"));
        let args: Vec<String> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(
            args,
            [
                "-m", "demucs.separate", "--name", "htdemucs", "--device", "cpu", "--out",
                "/j/demucs_output", "--shifts", "1", "--overlap", "0.1", "--segment", "4",
                "/j/input_converted.wav",
            ]
        );

        config.high_quality = true;
        let args = config.args(Path::new("x.wav"), Path::new("out"));
        assert!(args.windows(2).any(|w| w[0] == "--shifts" && w[1] == "5"));
        assert!(args.windows(2).any(|w| w[0] == "--segment" && w[1] == "8"));
    }

    #[test]
    fn test_cloud_or_cuda_selects_high_quality() {
        let settings = Settings {
            cloud: true,
            ..Settings::default()
        };
        assert!(DemucsConfig::from_settings(&settings).high_quality);
        let settings = Settings {
            device: Device::Cuda,
            ..Settings::default()
        };
        assert!(DemucsConfig::from_settings(&settings).high_quality);
        assert!(!DemucsConfig::default().high_quality);
    }

    #[cfg(unix)]
    mod process {
        use super::*;
        use std::os::unix::fs::PermissionsExt;
        use tempfile::TempDir;

        /// Executable shell script standing in for the interpreter
        fn script(dir: &Path, body: &str) -> String {
            let path = dir.join("fake-python");
            std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path.to_string_lossy().into_owned()
        }

        fn separator(python: String, timeout: Duration) -> DemucsSeparator {
            DemucsSeparator::new(DemucsConfig {
                python,
                timeout,
                ..DemucsConfig::default()
            })
        }

        #[test]
        fn test_stems_collected_and_temp_removed() {
            let dir = TempDir::new().unwrap();
            let python = script(
                dir.path(),
                r#"while [ $# -gt 0 ]; do
  case "$1" in --out) shift; out="$1";; esac
  last="$1"; shift
done
name=$(basename "$last" .wav)
mkdir -p "$out/htdemucs/$name"
for s in vocals drums bass other; do cp "$last" "$out/htdemucs/$name/$s.wav"; done"#,
            );
            let wav = dir.path().join("input_converted.wav");
            std::fs::write(&wav, b"RIFF").unwrap();

            let paths = separator(python, Duration::from_secs(30))
                .separate(&wav, dir.path())
                .unwrap();
            for (_, path) in paths.iter() {
                assert!(path.is_file());
            }
            assert!(!dir.path().join(ENGINE_OUTPUT_DIR).exists());
        }

        #[test]
        fn test_nonzero_exit_reports_stderr() {
            let dir = TempDir::new().unwrap();
            let python = script(dir.path(), "echo 'No module named demucs' >&2\nexit 3");
            let err = separator(python, Duration::from_secs(30))
                .separate(&dir.path().join("a.wav"), dir.path())
                .unwrap_err();
            match err {
                MusicrayError::SeparationFailed { reason } => {
                    assert!(reason.contains("No module named demucs"), "{}", reason)
                }
                other => panic!("unexpected error: {}", other),
            }
        }

        #[test]
        fn test_missing_stem_fails() {
            let dir = TempDir::new().unwrap();
            let python = script(
                dir.path(),
                r#"while [ $# -gt 0 ]; do
  case "$1" in --out) shift; out="$1";; esac
  shift
done
mkdir -p "$out/htdemucs/a"
touch "$out/htdemucs/a/vocals.wav""#,
            );
            let err = separator(python, Duration::from_secs(30))
                .separate(&dir.path().join("a.wav"), dir.path())
                .unwrap_err();
            assert!(err.to_string().contains("drums.wav"), "{}", err);
        }

        #[test]
        fn test_timeout_kills_engine() {
            let dir = TempDir::new().unwrap();
            let python = script(dir.path(), "exec sleep 30");
            let start = Instant::now();
            let err = separator(python, Duration::from_millis(300))
                .separate(&dir.path().join("a.wav"), dir.path())
                .unwrap_err();
            assert!(matches!(err, MusicrayError::SeparationTimeout { .. }));
            assert!(start.elapsed() < Duration::from_secs(10));
        }

        #[test]
        fn test_missing_interpreter() {
            let dir = TempDir::new().unwrap();
            let sep = separator("/nonexistent/python".into(), Duration::from_secs(1));
            assert!(!sep.is_available());
            assert!(matches!(
                sep.separate(&dir.path().join("a.wav"), dir.path()),
                Err(MusicrayError::SeparationFailed { .. })
            ));
        }
    }
}
