//! Video entity models.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::ffmpeg::MediaDetails;
use crate::core::jobs::TaskId;
use crate::core::{AccessKey, VideoId};

// =============================================================================
// Loading Result
// =============================================================================

/// State of one trackable operation on a video
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum LoadingResult {
    /// Nothing attempted, or the last artifact was removed / attempt cancelled
    #[default]
    New,
    /// An attempt is registered under this task id
    Loading(TaskId),
    /// Artifact is available at this path
    Success(PathBuf),
    /// The attempt ran and failed, or could not be scheduled
    Failed,
}

impl LoadingResult {
    /// Output path, only available on success
    pub fn value(&self) -> Option<&Path> {
        match self {
            LoadingResult::Success(path) => Some(path),
            _ => None,
        }
    }

    /// Task that owns a pending state
    pub fn task_id(&self) -> Option<&TaskId> {
        match self {
            LoadingResult::Loading(id) => Some(id),
            _ => None,
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, LoadingResult::Loading(_))
    }

    pub fn is_new(&self) -> bool {
        matches!(self, LoadingResult::New)
    }
}

/// Which state field of a video an operation drives
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VideoField {
    Thumbnail,
    Converted,
}

// =============================================================================
// Video Item
// =============================================================================

/// Where a video's source file lives
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceLocation {
    /// File name inside the granted directory
    pub file_name: String,
    /// Key of the access grant covering that directory
    pub access_key: AccessKey,
}

impl SourceLocation {
    /// File name without its extension
    pub fn stem(&self) -> &str {
        Path::new(&self.file_name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(&self.file_name)
    }
}

/// A source video and everything derived from it
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoItem {
    id: VideoId,
    pub source: SourceLocation,
    pub display_name: String,
    pub thumbnail_state: LoadingResult,
    pub converted_state: LoadingResult,
    pub media_details: Option<MediaDetails>,
}

impl VideoItem {
    /// Creates a new item with a fresh id and nothing derived yet
    pub fn new(source: SourceLocation, display_name: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            source,
            display_name: display_name.into(),
            thumbnail_state: LoadingResult::New,
            converted_state: LoadingResult::New,
            media_details: None,
        }
    }

    pub fn id(&self) -> VideoId {
        self.id
    }

    pub fn state(&self, field: VideoField) -> &LoadingResult {
        match field {
            VideoField::Thumbnail => &self.thumbnail_state,
            VideoField::Converted => &self.converted_state,
        }
    }

    fn state_mut(&mut self, field: VideoField) -> &mut LoadingResult {
        match field {
            VideoField::Thumbnail => &mut self.thumbnail_state,
            VideoField::Converted => &mut self.converted_state,
        }
    }

    /// Apply an update, returning the resulting change or `None` for a no-op.
    pub(crate) fn apply(&mut self, update: VideoUpdate) -> Option<VideoChange> {
        match update {
            VideoUpdate::SetState { field, state } => {
                let slot = self.state_mut(field);
                if *slot == state {
                    return None;
                }
                *slot = state.clone();
                Some(VideoChange::State { field, state })
            }
            VideoUpdate::ResetIfLoading { field, task_id } => {
                let slot = self.state_mut(field);
                if slot.task_id() != Some(&task_id) {
                    return None;
                }
                *slot = LoadingResult::New;
                Some(VideoChange::State {
                    field,
                    state: LoadingResult::New,
                })
            }
            VideoUpdate::SetMediaDetails(details) => {
                self.media_details = Some(details.clone());
                Some(VideoChange::MediaDetails(details))
            }
        }
    }
}

// =============================================================================
// Updates and Events
// =============================================================================

/// A mutation routed to the store's serial context
#[derive(Clone, Debug, PartialEq)]
pub enum VideoUpdate {
    /// Replace a state field
    SetState {
        field: VideoField,
        state: LoadingResult,
    },
    /// Reset a state field to `New` only if it still shows this task
    ResetIfLoading { field: VideoField, task_id: TaskId },
    /// Replace media details as one unit
    SetMediaDetails(MediaDetails),
}

/// What changed on a video
#[derive(Clone, Debug, PartialEq)]
pub enum VideoChange {
    Added,
    State {
        field: VideoField,
        state: LoadingResult,
    },
    MediaDetails(MediaDetails),
}

/// Change notification published to observers
#[derive(Clone, Debug, PartialEq)]
pub struct VideoEvent {
    pub video_id: VideoId,
    pub change: VideoChange,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::jobs::TaskKind;

    fn item() -> VideoItem {
        VideoItem::new(
            SourceLocation {
                file_name: "00001.MTS".to_string(),
                access_key: "directoryBookmark_STREAM".to_string(),
            },
            "00001.MTS",
        )
    }

    #[test]
    fn test_new_item_starts_clean() {
        let video = item();
        assert!(video.thumbnail_state.is_new());
        assert!(video.converted_state.is_new());
        assert!(video.media_details.is_none());
        assert_eq!(video.source.stem(), "00001");
        assert_ne!(video.id(), item().id());
    }

    #[test]
    fn test_set_state_reports_changes_only() {
        let mut video = item();
        let tid = TaskId::new(TaskKind::Thumbnail, video.id(), None);
        let loading = LoadingResult::Loading(tid.clone());

        let change = video.apply(VideoUpdate::SetState {
            field: VideoField::Thumbnail,
            state: loading.clone(),
        });
        assert_eq!(
            change,
            Some(VideoChange::State {
                field: VideoField::Thumbnail,
                state: loading.clone()
            })
        );
        assert_eq!(video.thumbnail_state.task_id(), Some(&tid));
        assert!(video.converted_state.is_new());

        let repeat = video.apply(VideoUpdate::SetState {
            field: VideoField::Thumbnail,
            state: loading,
        });
        assert!(repeat.is_none());
    }

    #[test]
    fn test_reset_if_loading_matches_task() {
        let mut video = item();
        let tid = TaskId::new(TaskKind::Thumbnail, video.id(), None);
        let other = TaskId::new(TaskKind::Probe, video.id(), None);
        video.thumbnail_state = LoadingResult::Loading(tid.clone());

        assert!(video
            .apply(VideoUpdate::ResetIfLoading {
                field: VideoField::Thumbnail,
                task_id: other,
            })
            .is_none());
        assert!(video.thumbnail_state.is_loading());

        assert!(video
            .apply(VideoUpdate::ResetIfLoading {
                field: VideoField::Thumbnail,
                task_id: tid,
            })
            .is_some());
        assert!(video.thumbnail_state.is_new());
    }

    #[test]
    fn test_success_value() {
        let state = LoadingResult::Success(PathBuf::from("/tmp/thumbnail_00001.jpg"));
        assert_eq!(state.value(), Some(Path::new("/tmp/thumbnail_00001.jpg")));
        assert!(LoadingResult::Failed.value().is_none());
    }

    #[test]
    fn test_loading_result_serialization() {
        let json = serde_json::to_value(LoadingResult::Success(PathBuf::from("/tmp/a.mp4"))).unwrap();
        assert_eq!(json["type"], "success");
        assert_eq!(json["value"], "/tmp/a.mp4");
        let json = serde_json::to_value(LoadingResult::New).unwrap();
        assert_eq!(json["type"], "new");
    }
}
