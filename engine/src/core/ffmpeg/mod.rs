//! FFmpeg Integration Module
//!
//! The media engine gateway: every thumbnail, transcode and probe operation
//! reaches ffmpeg/ffprobe through the [`MediaEngine`] trait.
//!
//! - [`FFmpegEngine`] runs the real binaries as child processes and kills the
//!   child when the caller's cancellation token fires.
//! - Argument vectors are assembled by the builders in `args`.
//! - Probe output is parsed strictly: a missing field is an error, never a
//!   partially filled [`MediaDetails`].

mod args;
mod detection;
mod probe;
mod runner;

#[cfg(test)]
pub(crate) mod fake;

pub use args::{thumbnail_args, transcode_args, EncoderChoice, ParseEncoderError};
pub use detection::*;
pub use probe::{parse_probe_output, MediaDetails, ProbeError};
pub use runner::{EngineOutcome, EngineStatus, FFmpegEngine, MediaEngine};

/// FFmpeg-related error types
#[derive(Debug, thiserror::Error)]
pub enum FFmpegError {
    #[error("FFmpeg not found. Please install FFmpeg or configure its path in settings.")]
    NotFound,

    #[error("FFmpeg execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Invalid input file: {0}")]
    InvalidInput(String),

    #[error("FFprobe error: {0}")]
    Probe(#[from] ProbeError),

    #[error("Process error: {0}")]
    ProcessError(#[from] std::io::Error),

    #[error("Invocation cancelled")]
    Cancelled,
}

pub type FFmpegResult<T> = Result<T, FFmpegError>;
