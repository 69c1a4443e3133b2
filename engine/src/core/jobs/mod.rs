//! Task System Module
//!
//! Background execution of thumbnail, transcode and probe tasks: the
//! deduplicating registry, the gated scheduler and the task bodies.

mod registry;
mod scheduler;
mod tasks;

pub use registry::{TaskRegistry, TaskTicket};
pub use scheduler::Scheduler;
pub use tasks::{ProbeJob, TaskRunner, ThumbnailJob, TranscodeJob};

pub use crate::core::ffmpeg::EncoderChoice;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::VideoId;

// =============================================================================
// Task Types
// =============================================================================

/// Task kind enumeration
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskKind {
    /// Extract a square thumbnail frame
    Thumbnail,
    /// Produce an MP4 proxy
    Transcode,
    /// Read duration, dimensions and frame rate
    Probe,
}

impl TaskKind {
    /// Namespace prefix of task ids of this kind
    pub fn namespace(&self) -> &'static str {
        match self {
            TaskKind::Thumbnail => "Thumbnail",
            TaskKind::Transcode => "MP4VideoConversion",
            TaskKind::Probe => "Probe",
        }
    }
}

/// Deterministic task identifier.
///
/// Composed of kind, video id and an optional variant, so the same logical
/// operation on the same video always maps to the same id. Deduplication in
/// the registry relies on this.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(kind: TaskKind, video_id: VideoId, variant: Option<&str>) -> Self {
        Self(format!(
            "{}-{}{}",
            kind.namespace(),
            video_id,
            variant.unwrap_or_default()
        ))
    }

    pub fn thumbnail(video_id: VideoId) -> Self {
        Self::new(TaskKind::Thumbnail, video_id, None)
    }

    pub fn transcode(video_id: VideoId, encoder: EncoderChoice) -> Self {
        Self::new(TaskKind::Transcode, video_id, Some(encoder.task_variant()))
    }

    pub fn probe(video_id: VideoId) -> Self {
        Self::new(TaskKind::Probe, video_id, None)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outcome of a submission
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Submission {
    /// Registered and handed to the scheduler
    Accepted,
    /// A task with the same id is already in flight; the request was dropped
    Duplicate,
}

impl Submission {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Submission::Accepted)
    }
}
