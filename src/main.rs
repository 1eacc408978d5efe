//! musicray CLI entry point

use clap::Parser;
use musicray::config::{Cli, Settings};
use musicray::pipeline;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(&cli);

    let settings = Settings::from_cli(&cli);

    if let Err(e) = validate_inputs(&cli) {
        eprintln!("Error: {}", e);
        return ExitCode::FAILURE;
    }

    if let Some(dir) = &settings.postprocess_only {
        return match pipeline::run_postprocess_only(dir, &settings) {
            Ok(summary) => {
                for report in &summary.reports {
                    println!(
                        "{:<7} {:?}  applied: [{}]",
                        report.stem.as_str(),
                        report.status,
                        report.stages_applied.join(", ")
                    );
                }
                if summary.failed() > 0 {
                    ExitCode::from(1)
                } else {
                    ExitCode::SUCCESS
                }
            }
            Err(e) => {
                eprintln!("Fatal error: {}", e);
                ExitCode::FAILURE
            }
        };
    }

    match pipeline::run(&settings) {
        Ok(report) => match serde_json::to_string_pretty(&report) {
            Ok(json) => {
                println!("{}", json);
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("Fatal error: {}", e);
                ExitCode::FAILURE
            }
        },
        Err(e) => {
            eprintln!("Fatal error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(cli: &Cli) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_filter())),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn validate_inputs(cli: &Cli) -> Result<(), String> {
    if let Some(input) = &cli.input {
        if !input.exists() {
            return Err(format!(
                "Input file does not exist: {}\n\n  Tip: Check the path is correct and accessible.\n  Example:\n    musicray -i ./track.mp3 -o ./storage",
                input.display()
            ));
        }
    }

    if let Some(dir) = &cli.postprocess_only {
        if !dir.is_dir() {
            return Err(format!(
                "Stem directory does not exist: {}\n\n  Tip: Point --postprocess-only at a directory holding vocals.wav, drums.wav, bass.wav and other.wav.",
                dir.display()
            ));
        }
    }

    // The storage root itself is created on demand, its parent must exist
    if let Some(parent) = cli.output.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            return Err(format!(
                "Output parent directory does not exist: {}\n\n  Tip: The storage directory will be created automatically,\n  but its parent directory must exist.\n  Example: mkdir -p {}",
                parent.display(),
                parent.display()
            ));
        }
    }

    Ok(())
}
