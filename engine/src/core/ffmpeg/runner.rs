//! FFmpeg Runner Module
//!
//! Executes ffmpeg/ffprobe as child processes on behalf of task bodies.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{parse_probe_output, FFmpegError, FFmpegInfo, FFmpegResult, MediaDetails, ProbeError};
use crate::core::configure_tokio_command;

/// Exit code ffmpeg reports when it stopped because of a signal
const CANCEL_EXIT_CODE: i32 = 255;

/// Bytes of stderr kept for diagnostics
const LOG_TAIL_BYTES: usize = 4096;

/// How an engine invocation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    Success,
    Cancelled,
    Failed,
}

/// Result of one engine invocation
#[derive(Debug, Clone)]
pub struct EngineOutcome {
    /// Classified status
    pub status: EngineStatus,
    /// Raw process exit code, if the process exited normally
    pub raw_code: Option<i32>,
    /// Tail of the engine's log output
    pub log: String,
}

impl EngineOutcome {
    pub fn success(log: impl Into<String>) -> Self {
        Self {
            status: EngineStatus::Success,
            raw_code: Some(0),
            log: log.into(),
        }
    }

    pub fn cancelled() -> Self {
        Self {
            status: EngineStatus::Cancelled,
            raw_code: None,
            log: String::new(),
        }
    }

    pub fn failed(raw_code: Option<i32>, log: impl Into<String>) -> Self {
        Self {
            status: EngineStatus::Failed,
            raw_code,
            log: log.into(),
        }
    }

    /// Classify a finished process by its exit code.
    pub fn from_exit_code(code: Option<i32>, log: String) -> Self {
        match code {
            Some(0) => Self::success(log),
            Some(CANCEL_EXIT_CODE) => Self {
                status: EngineStatus::Cancelled,
                raw_code: code,
                log,
            },
            other => Self::failed(other, log),
        }
    }
}

/// The media engine collaborator.
///
/// Both operations must return promptly once `cancel` fires.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Run the engine with an argument vector.
    async fn run(&self, args: Vec<String>, cancel: CancellationToken) -> EngineOutcome;

    /// Extract duration, dimensions and frame rate of a media file.
    async fn probe(&self, input: &Path, cancel: CancellationToken) -> FFmpegResult<MediaDetails>;
}

/// Engine backed by system ffmpeg/ffprobe binaries
#[derive(Clone)]
pub struct FFmpegEngine {
    info: Arc<FFmpegInfo>,
}

impl FFmpegEngine {
    /// Create a new engine from a detected FFmpeg installation
    pub fn new(info: FFmpegInfo) -> Self {
        Self {
            info: Arc::new(info),
        }
    }

    /// Get the FFmpeg info
    pub fn info(&self) -> &FFmpegInfo {
        &self.info
    }
}

#[async_trait]
impl MediaEngine for FFmpegEngine {
    async fn run(&self, args: Vec<String>, cancel: CancellationToken) -> EngineOutcome {
        let mut cmd = tokio::process::Command::new(&self.info.ffmpeg_path);
        cmd.args(&args);
        configure_tokio_command(&mut cmd);
        cmd.stdout(Stdio::null());

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => return EngineOutcome::failed(None, format!("Failed to spawn ffmpeg: {e}")),
        };

        let stderr = child.stderr.take();
        let log_reader = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(mut stderr) = stderr {
                let _ = stderr.read_to_end(&mut buf).await;
            }
            log_tail(&String::from_utf8_lossy(&buf), LOG_TAIL_BYTES)
        });

        tokio::select! {
            status = child.wait() => {
                let log = log_reader.await.unwrap_or_default();
                match status {
                    Ok(status) => EngineOutcome::from_exit_code(status.code(), log),
                    Err(e) => EngineOutcome::failed(None, format!("Failed to wait for ffmpeg: {e}")),
                }
            }
            _ = cancel.cancelled() => {
                debug!("Cancellation requested, killing ffmpeg (pid {:?})", child.id());
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill ffmpeg: {}", e);
                }
                log_reader.abort();
                EngineOutcome::cancelled()
            }
        }
    }

    async fn probe(&self, input: &Path, cancel: CancellationToken) -> FFmpegResult<MediaDetails> {
        if !input.exists() {
            return Err(FFmpegError::InvalidInput(format!(
                "Input file does not exist: {}",
                input.display()
            )));
        }

        let mut cmd = tokio::process::Command::new(&self.info.ffprobe_path);
        cmd.args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(input);
        configure_tokio_command(&mut cmd);

        let child = cmd.spawn().map_err(FFmpegError::ProcessError)?;

        // Dropping the pending future drops the child, which kills it.
        let output = tokio::select! {
            output = child.wait_with_output() => output.map_err(FFmpegError::ProcessError)?,
            _ = cancel.cancelled() => return Err(FFmpegError::Cancelled),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProbeError::Failed(log_tail(&stderr, LOG_TAIL_BYTES)).into());
        }

        Ok(parse_probe_output(&String::from_utf8_lossy(&output.stdout))?)
    }
}

/// Keep at most the last `max` bytes of a log, cut on a char boundary.
fn log_tail(log: &str, max: usize) -> String {
    if log.len() <= max {
        return log.to_string();
    }
    let mut start = log.len() - max;
    while !log.is_char_boundary(start) {
        start += 1;
    }
    log[start..].to_string()
}
