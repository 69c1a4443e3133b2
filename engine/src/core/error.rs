//! Core Error Definitions
//!
//! Defines error types used throughout the engine.

use thiserror::Error;

use super::{AccessKey, VideoId};
use crate::core::access::AccessError;
use crate::core::ffmpeg::{FFmpegError, ProbeError};

/// Core engine error types
#[derive(Error, Debug)]
pub enum CoreError {
    // =========================================================================
    // Access Errors
    // =========================================================================
    #[error("Access grant is stale: {0}")]
    StaleAccess(AccessKey),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("No access grant stored for key: {0}")]
    AccessMissing(AccessKey),

    // =========================================================================
    // Engine Errors
    // =========================================================================
    #[error("Engine not available: {0}")]
    EngineNotFound(String),

    #[error("Engine failed with code {code:?}")]
    EngineFailure { code: Option<i32>, log: String },

    #[error("Engine invocation cancelled")]
    EngineCancelled,

    #[error("Probe incomplete: missing {0}")]
    ProbeIncomplete(String),

    #[error("Probe failed: {0}")]
    ProbeFailed(String),

    // =========================================================================
    // Model Errors
    // =========================================================================
    #[error("Video not found: {0}")]
    VideoNotFound(VideoId),

    #[error("Library scan failed: {0}")]
    LibraryScanFailed(String),

    // =========================================================================
    // General Errors
    // =========================================================================
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Core engine result type
pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    /// Whether this error means the attempt was cancelled rather than failed
    pub fn is_cancellation(&self) -> bool {
        matches!(self, CoreError::EngineCancelled)
    }
}

impl From<AccessError> for CoreError {
    fn from(err: AccessError) -> Self {
        match err {
            AccessError::Stale(key) => CoreError::StaleAccess(key),
            AccessError::Missing(key) => CoreError::AccessMissing(key),
            AccessError::Denied(msg) => CoreError::AccessDenied(msg),
            AccessError::Io(e) => CoreError::IoError(e),
            AccessError::Store(msg) => CoreError::Internal(msg),
        }
    }
}

impl From<FFmpegError> for CoreError {
    fn from(err: FFmpegError) -> Self {
        match err {
            FFmpegError::NotFound => CoreError::EngineNotFound(err.to_string()),
            FFmpegError::Cancelled => CoreError::EngineCancelled,
            FFmpegError::Probe(ProbeError::Incomplete(field)) => CoreError::ProbeIncomplete(field),
            FFmpegError::Probe(e) => CoreError::ProbeFailed(e.to_string()),
            FFmpegError::ProcessError(e) => CoreError::IoError(e),
            other => CoreError::Internal(other.to_string()),
        }
    }
}
