//! Task bodies.
//!
//! Each body waits for a gate permit, checks for cancellation, enters the
//! source directory's access scope, invokes the engine and reports the
//! classified result through the registry, which forwards it to the store.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::{EncoderChoice, TaskId, TaskRegistry, TaskTicket};
use crate::core::access::{AccessError, AccessManager, ScopedAccess};
use crate::core::ffmpeg::{
    thumbnail_args, transcode_args, EngineStatus, MediaDetails, MediaEngine,
};
use crate::core::settings::ThumbnailSettings;
use crate::core::videos::{LoadingResult, SourceLocation, VideoField, VideoStore, VideoUpdate};
use crate::core::{CoreError, CoreResult, VideoId};

// =============================================================================
// Job Payloads
// =============================================================================

/// Thumbnail extraction request
#[derive(Clone, Debug)]
pub struct ThumbnailJob {
    pub video_id: VideoId,
    pub source: SourceLocation,
    pub output: PathBuf,
    pub settings: ThumbnailSettings,
}

/// MP4 conversion request
#[derive(Clone, Debug)]
pub struct TranscodeJob {
    pub video_id: VideoId,
    pub source: SourceLocation,
    pub output: PathBuf,
    pub encoder: EncoderChoice,
}

/// Metadata probe request
#[derive(Clone, Debug)]
pub struct ProbeJob {
    pub video_id: VideoId,
    pub source: SourceLocation,
}

// =============================================================================
// Task Runner
// =============================================================================

/// Shared dependencies of every task body
#[derive(Clone)]
pub struct TaskRunner {
    registry: Arc<TaskRegistry>,
    engine: Arc<dyn MediaEngine>,
    access: AccessManager,
    store: VideoStore,
}

impl TaskRunner {
    pub fn new(
        registry: Arc<TaskRegistry>,
        engine: Arc<dyn MediaEngine>,
        access: AccessManager,
        store: VideoStore,
    ) -> Self {
        Self {
            registry,
            engine,
            access,
            store,
        }
    }

    /// Body of a thumbnail task
    pub async fn run_thumbnail(self, ticket: TaskTicket, job: ThumbnailJob) {
        let output = job.output.clone();
        let settings = job.settings;
        self.run_artifact(
            ticket,
            job.video_id,
            VideoField::Thumbnail,
            job.source,
            job.output,
            move |input| async move { thumbnail_args(&input, &output, &settings) },
        )
        .await;
    }

    /// Body of a transcode task.
    ///
    /// Waits for an in-flight probe of the same video before queueing for the
    /// gate, then reads the frame rate from the item. Waiting after taking a
    /// permit would deadlock a single-permit gate.
    pub async fn run_transcode(self, ticket: TaskTicket, job: TranscodeJob) {
        let probe = TaskId::probe(job.video_id);
        tokio::select! {
            _ = self.registry.wait_absent(&probe) => {}
            _ = ticket.token().cancelled() => {}
        }

        let store = self.store.clone();
        let video_id = job.video_id;
        let output = job.output.clone();
        let encoder = job.encoder;
        self.run_artifact(
            ticket,
            job.video_id,
            VideoField::Converted,
            job.source,
            job.output,
            move |input| async move {
                let frame_rate = match store.snapshot(video_id).await {
                    Ok(item) => item.media_details.map(|d| d.frame_rate),
                    Err(e) => {
                        warn!("No media details for {}: {}", video_id, e);
                        None
                    }
                };
                if frame_rate.is_none() {
                    debug!("Transcoding {} without an explicit frame rate", video_id);
                }
                transcode_args(&input, &output, encoder, frame_rate.as_deref())
            },
        )
        .await;
    }

    /// Body of a probe task. Failures leave existing details untouched.
    pub async fn run_probe(self, ticket: TaskTicket, job: ProbeJob) {
        let _permit = match self.registry.scheduler().acquire().await {
            Ok(permit) => permit,
            Err(e) => {
                error!("Task {} could not start: {}", ticket.task_id(), e);
                self.registry.finish(&ticket, || {});
                return;
            }
        };

        let result = self.probe_attempt(&ticket, &job.source).await;
        let store = &self.store;
        self.registry.finish(&ticket, || {
            if let Ok(details) = &result {
                store.update(job.video_id, VideoUpdate::SetMediaDetails(details.clone()));
            }
        });

        match result {
            Ok(details) => info!(
                "Probed {}: {}x{} @ {} ({:.2}s)",
                job.source.file_name,
                details.width,
                details.height,
                details.frame_rate,
                details.duration_seconds
            ),
            Err(e) if e.is_cancellation() => {
                info!("Task {} cancelled", ticket.task_id())
            }
            Err(e) => warn!("Probe of {} failed: {}", job.source.file_name, e),
        }
    }

    async fn probe_attempt(
        &self,
        ticket: &TaskTicket,
        source: &SourceLocation,
    ) -> CoreResult<MediaDetails> {
        if ticket.is_cancelled() {
            return Err(CoreError::EngineCancelled);
        }
        let scope = self.enter_scope(&source.access_key)?;
        let details = self
            .engine
            .probe(&scope.resolve(&source.file_name), ticket.token().clone())
            .await?;
        if ticket.is_cancelled() {
            return Err(CoreError::EngineCancelled);
        }
        Ok(details)
    }

    async fn run_artifact<B, Fut>(
        self,
        ticket: TaskTicket,
        video_id: VideoId,
        field: VideoField,
        source: SourceLocation,
        output: PathBuf,
        build_args: B,
    ) where
        B: FnOnce(PathBuf) -> Fut,
        Fut: Future<Output = Vec<String>>,
    {
        let (permit, result) = match self.registry.scheduler().acquire().await {
            Ok(permit) => {
                let result = self
                    .artifact_attempt(&ticket, &source, output, build_args)
                    .await;
                (Some(permit), result)
            }
            Err(e) => (None, Err(e)),
        };
        let state = classify(&ticket, &source, result).await;

        let store = &self.store;
        self.registry.finish(&ticket, || {
            store.update(video_id, VideoUpdate::SetState { field, state })
        });
        drop(permit);
    }

    async fn artifact_attempt<B, Fut>(
        &self,
        ticket: &TaskTicket,
        source: &SourceLocation,
        output: PathBuf,
        build_args: B,
    ) -> CoreResult<PathBuf>
    where
        B: FnOnce(PathBuf) -> Fut,
        Fut: Future<Output = Vec<String>>,
    {
        if ticket.is_cancelled() {
            return Err(CoreError::EngineCancelled);
        }

        let scope = self.enter_scope(&source.access_key)?;
        let args = build_args(scope.resolve(&source.file_name)).await;
        debug!("Task {} invoking engine: {:?}", ticket.task_id(), args);

        let outcome = self.engine.run(args, ticket.token().clone()).await;
        drop(scope);

        match outcome.status {
            EngineStatus::Success if ticket.is_cancelled() => {
                discard_output(&output).await;
                Err(CoreError::EngineCancelled)
            }
            EngineStatus::Success => {
                if tokio::fs::try_exists(&output).await.unwrap_or(false) {
                    Ok(output)
                } else {
                    Err(CoreError::EngineFailure {
                        code: outcome.raw_code,
                        log: format!("engine reported success but {} is missing", output.display()),
                    })
                }
            }
            // ffmpeg leaves truncated files behind when killed or failing
            EngineStatus::Cancelled => {
                discard_output(&output).await;
                Err(CoreError::EngineCancelled)
            }
            EngineStatus::Failed => {
                discard_output(&output).await;
                Err(CoreError::EngineFailure {
                    code: outcome.raw_code,
                    log: outcome.log,
                })
            }
        }
    }

    /// Resolve the access scope, dropping the grant when it went stale.
    fn enter_scope(&self, key: &str) -> CoreResult<ScopedAccess> {
        self.access.acquire(key).map_err(|e| {
            if let AccessError::Stale(stale) = &e {
                self.access.invalidate(stale);
            }
            CoreError::from(e)
        })
    }
}

/// Map an attempt result onto the state reported for the video.
async fn classify(
    ticket: &TaskTicket,
    source: &SourceLocation,
    result: CoreResult<PathBuf>,
) -> LoadingResult {
    match result {
        Ok(path) if ticket.is_cancelled() => {
            discard_output(&path).await;
            info!("Task {} cancelled", ticket.task_id());
            LoadingResult::New
        }
        Ok(path) => {
            info!("Task {} produced {}", ticket.task_id(), path.display());
            LoadingResult::Success(path)
        }
        Err(e) if e.is_cancellation() || ticket.is_cancelled() => {
            info!("Task {} cancelled", ticket.task_id());
            LoadingResult::New
        }
        Err(CoreError::EngineFailure { code, log }) => {
            error!(
                "Task {} failed on {} (exit code {:?}):\n{}",
                ticket.task_id(),
                source.file_name,
                code,
                log
            );
            LoadingResult::Failed
        }
        Err(e) => {
            error!("Task {} failed on {}: {}", ticket.task_id(), source.file_name, e);
            LoadingResult::Failed
        }
    }
}

async fn discard_output(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("Removed partial output {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
    }
}
