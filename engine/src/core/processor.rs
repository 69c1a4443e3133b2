//! Video Processor Module
//!
//! Inbound facade for callers (CLI, UI glue). Builds task ids and payloads,
//! publishes `Loading` through the registry and owns teardown.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::core::access::AccessManager;
use crate::core::ffmpeg::MediaEngine;
use crate::core::jobs::{
    EncoderChoice, ProbeJob, Scheduler, Submission, TaskId, TaskRegistry, TaskRunner,
    ThumbnailJob, TranscodeJob,
};
use crate::core::settings::EngineSettings;
use crate::core::videos::{LoadingResult, VideoField, VideoItem, VideoStore, VideoUpdate};
use crate::core::{short_id, CoreResult, VideoId};

/// Entry point for requesting, cancelling and cleaning up video work.
///
/// Cancels every in-flight task when dropped.
pub struct VideoProcessor {
    registry: Arc<TaskRegistry>,
    runner: TaskRunner,
    store: VideoStore,
    access: AccessManager,
    settings: EngineSettings,
}

impl VideoProcessor {
    /// Create a processor on the current tokio runtime
    pub fn new(
        engine: Arc<dyn MediaEngine>,
        access: AccessManager,
        settings: EngineSettings,
    ) -> CoreResult<Self> {
        let scheduler = Scheduler::new(settings.processing.max_concurrent_invocations)?;
        let registry = Arc::new(TaskRegistry::new(scheduler));
        let store = VideoStore::spawn();
        let runner = TaskRunner::new(
            Arc::clone(&registry),
            engine,
            access.clone(),
            store.clone(),
        );

        info!(
            "Video processor ready (gate capacity {}, output {})",
            registry.scheduler().capacity(),
            settings.processing.output_dir.display()
        );

        Ok(Self {
            registry,
            runner,
            store,
            access,
            settings,
        })
    }

    pub fn store(&self) -> &VideoStore {
        &self.store
    }

    pub fn access(&self) -> &AccessManager {
        &self.access
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Add items to the store, returning their ids in order
    pub fn add_videos(&self, items: impl IntoIterator<Item = VideoItem>) -> Vec<VideoId> {
        items
            .into_iter()
            .map(|item| {
                let id = item.id();
                self.store.insert(item);
                id
            })
            .collect()
    }

    // =========================================================================
    // Requests
    // =========================================================================

    /// Request a thumbnail for `video_id`
    pub async fn request_thumbnail(&self, video_id: VideoId) -> CoreResult<Submission> {
        let item = self.store.snapshot(video_id).await?;
        let task_id = TaskId::thumbnail(video_id);
        let output = self.output_path("thumbnail", &item, "jpg");

        if let Err(e) = self.prepare_output_dir() {
            self.fail_setup(&task_id, video_id, VideoField::Thumbnail, &e);
            return Err(e);
        }

        let job = ThumbnailJob {
            video_id,
            source: item.source,
            output,
            settings: self.settings.thumbnail.clone(),
        };
        let runner = self.runner.clone();
        let store = self.store.clone();
        let loading = task_id.clone();
        Ok(self.registry.submit(task_id, move |ticket| {
            store.update(
                video_id,
                VideoUpdate::SetState {
                    field: VideoField::Thumbnail,
                    state: LoadingResult::Loading(loading),
                },
            );
            runner.run_thumbnail(ticket, job)
        }))
    }

    /// Request an MP4 conversion with `encoder`.
    ///
    /// Queues a probe first when the item has no media details yet.
    pub async fn request_transcode(
        &self,
        video_id: VideoId,
        encoder: EncoderChoice,
    ) -> CoreResult<Submission> {
        let item = self.store.snapshot(video_id).await?;
        let task_id = TaskId::transcode(video_id, encoder);
        let output = self.output_path("converted", &item, "mp4");

        if let Err(e) = self.prepare_output_dir() {
            self.fail_setup(&task_id, video_id, VideoField::Converted, &e);
            return Err(e);
        }

        if item.media_details.is_none() {
            self.submit_probe(&item);
        }

        let job = TranscodeJob {
            video_id,
            source: item.source,
            output,
            encoder,
        };
        let runner = self.runner.clone();
        let store = self.store.clone();
        let loading = task_id.clone();
        Ok(self.registry.submit(task_id, move |ticket| {
            store.update(
                video_id,
                VideoUpdate::SetState {
                    field: VideoField::Converted,
                    state: LoadingResult::Loading(loading),
                },
            );
            runner.run_transcode(ticket, job)
        }))
    }

    /// Request a metadata probe for `video_id`
    pub async fn request_probe(&self, video_id: VideoId) -> CoreResult<Submission> {
        let item = self.store.snapshot(video_id).await?;
        Ok(self.submit_probe(&item))
    }

    fn submit_probe(&self, item: &VideoItem) -> Submission {
        let job = ProbeJob {
            video_id: item.id(),
            source: item.source.clone(),
        };
        let runner = self.runner.clone();
        self.registry
            .submit(TaskId::probe(item.id()), move |ticket| runner.run_probe(ticket, job))
    }

    // =========================================================================
    // Registry
    // =========================================================================

    pub fn cancel(&self, task_id: &TaskId) -> bool {
        self.registry.cancel(task_id)
    }

    pub fn cancel_all(&self) -> usize {
        self.registry.cancel_all()
    }

    pub fn exists(&self, task_id: &TaskId) -> bool {
        self.registry.exists(task_id)
    }

    /// Wait until `task_id` is no longer in flight. Its result, if any, is
    /// visible to store reads made afterwards.
    pub async fn wait_for_task(&self, task_id: &TaskId) {
        self.registry.wait_absent(task_id).await
    }

    // =========================================================================
    // Cleanup
    // =========================================================================

    /// Remove the artifact or cancel the attempt behind `state`.
    ///
    /// Always yields `New`. A failed file removal is logged and ignored.
    pub fn delete_output(&self, state: &LoadingResult) -> LoadingResult {
        match state {
            LoadingResult::Success(path) => remove_artifact(path),
            LoadingResult::Loading(task_id) => {
                self.registry.cancel(task_id);
            }
            LoadingResult::New | LoadingResult::Failed => {}
        }
        LoadingResult::New
    }

    pub async fn delete_thumbnail(&self, video_id: VideoId) -> CoreResult<()> {
        self.delete_field(video_id, VideoField::Thumbnail).await
    }

    pub async fn delete_converted(&self, video_id: VideoId) -> CoreResult<()> {
        self.delete_field(video_id, VideoField::Converted).await
    }

    async fn delete_field(&self, video_id: VideoId, field: VideoField) -> CoreResult<()> {
        let item = self.store.snapshot(video_id).await?;
        let state = self.delete_output(item.state(field));
        self.store
            .update(video_id, VideoUpdate::SetState { field, state });
        Ok(())
    }

    /// Reset a `Loading` thumbnail whose task is no longer registered.
    ///
    /// Returns whether a reset was queued.
    pub async fn reconcile_thumbnail(&self, video_id: VideoId) -> CoreResult<bool> {
        self.reconcile(video_id, VideoField::Thumbnail).await
    }

    pub async fn reconcile_converted(&self, video_id: VideoId) -> CoreResult<bool> {
        self.reconcile(video_id, VideoField::Converted).await
    }

    async fn reconcile(&self, video_id: VideoId, field: VideoField) -> CoreResult<bool> {
        let item = self.store.snapshot(video_id).await?;
        let Some(task_id) = item.state(field).task_id() else {
            return Ok(false);
        };

        let store = &self.store;
        let reset = self.registry.when_absent(task_id, || {
            store.update(
                video_id,
                VideoUpdate::ResetIfLoading {
                    field,
                    task_id: task_id.clone(),
                },
            )
        });
        if reset {
            debug!("Reset orphaned {:?} state of {}", field, video_id);
        }
        Ok(reset)
    }

    /// Reconcile the thumbnail and request one if none exists
    pub async fn ensure_thumbnail(&self, video_id: VideoId) -> CoreResult<Option<Submission>> {
        self.reconcile_thumbnail(video_id).await?;
        let item = self.store.snapshot(video_id).await?;
        if item.thumbnail_state.is_new() {
            return self.request_thumbnail(video_id).await.map(Some);
        }
        Ok(None)
    }

    /// Cancel a pending thumbnail and return it to `New`
    pub async fn release_thumbnail(&self, video_id: VideoId) -> CoreResult<()> {
        let item = self.store.snapshot(video_id).await?;
        if let LoadingResult::Loading(task_id) = &item.thumbnail_state {
            self.registry.cancel(task_id);
            self.store.update(
                video_id,
                VideoUpdate::ResetIfLoading {
                    field: VideoField::Thumbnail,
                    task_id: task_id.clone(),
                },
            );
        }
        Ok(())
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn output_path(&self, prefix: &str, item: &VideoItem, extension: &str) -> PathBuf {
        self.settings.processing.output_dir.join(format!(
            "{}_{}_{}.{}",
            prefix,
            item.source.stem(),
            short_id(&item.id()),
            extension
        ))
    }

    fn prepare_output_dir(&self) -> CoreResult<()> {
        std::fs::create_dir_all(&self.settings.processing.output_dir)?;
        Ok(())
    }

    /// Mark a field `Failed` unless another attempt already owns it.
    fn fail_setup(
        &self,
        task_id: &TaskId,
        video_id: VideoId,
        field: VideoField,
        err: &crate::core::CoreError,
    ) {
        warn!("Task {} could not be scheduled: {}", task_id, err);
        let store = &self.store;
        self.registry.when_absent(task_id, || {
            store.update(
                video_id,
                VideoUpdate::SetState {
                    field,
                    state: LoadingResult::Failed,
                },
            )
        });
    }
}

impl Drop for VideoProcessor {
    fn drop(&mut self) {
        self.registry.cancel_all();
    }
}

fn remove_artifact(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!("Deleted {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to delete {}: {}", path.display(), e),
    }
}
