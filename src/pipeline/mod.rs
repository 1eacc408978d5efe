//! Job orchestration

pub mod orchestrator;

pub use orchestrator::{
    convert_to_wav, delete_job, run, run_postprocess_only, run_with, validate_input,
    CONVERTED_INPUT,
};
