//! End-to-end Scenario Tests
//!
//! Drive the processor through the registry, scheduler, task bodies and
//! store with a scripted engine, checking the state sequences observers see.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::broadcast;

use crate::core::access::{AccessManager, MemoryBookmarkStore};
use crate::core::ffmpeg::fake::{FakeEngine, PROBE_WITHOUT_WIDTH};
use crate::core::jobs::{EncoderChoice, Submission, TaskId};
use crate::core::processor::VideoProcessor;
use crate::core::settings::EngineSettings;
use crate::core::videos::{
    LoadingResult, SourceLocation, VideoChange, VideoEvent, VideoField, VideoItem,
};
use crate::core::VideoId;

const KEY: &str = "directoryBookmark_PRIVATE";

struct Harness {
    dir: TempDir,
    engine: Arc<FakeEngine>,
    processor: VideoProcessor,
    video: VideoId,
}

impl Harness {
    fn new(engine: FakeEngine) -> Self {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("PRIVATE");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::write(src.join("00017.MTS"), b"mts").unwrap();

        let access = AccessManager::new(Arc::new(MemoryBookmarkStore::new()));
        access.grant(KEY, &src).unwrap();

        let mut settings = EngineSettings::default();
        settings.processing.output_dir = dir.path().join("out");

        let engine = Arc::new(engine);
        let processor = VideoProcessor::new(engine.clone(), access, settings).unwrap();
        let video = processor.add_videos([VideoItem::new(
            SourceLocation {
                file_name: "00017.MTS".to_string(),
                access_key: KEY.to_string(),
            },
            "00017",
        )])[0];

        Self {
            dir,
            engine,
            processor,
            video,
        }
    }

    fn source_dir(&self) -> PathBuf {
        self.dir.path().join("PRIVATE")
    }

    async fn item(&self) -> VideoItem {
        self.processor.store().snapshot(self.video).await.unwrap()
    }

    async fn settle(&self, field: VideoField) -> LoadingResult {
        self.processor
            .store()
            .wait_for(self.video, |item| !item.state(field).is_loading())
            .await
            .unwrap()
            .state(field)
            .clone()
    }
}

/// Collect state changes of `field` until one satisfies `last`
async fn collect_states(
    events: &mut broadcast::Receiver<VideoEvent>,
    field: VideoField,
    last: impl Fn(&LoadingResult) -> bool,
) -> Vec<LoadingResult> {
    let mut seen = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out waiting for state change")
            .unwrap();
        if let VideoChange::State { field: f, state } = event.change {
            if f != field {
                continue;
            }
            let done = last(&state);
            seen.push(state);
            if done {
                return seen;
            }
        }
    }
}

#[tokio::test]
async fn test_scenario_fresh_thumbnail_succeeds() {
    let h = Harness::new(FakeEngine::held());
    let mut events = h.processor.store().subscribe();
    let tid = TaskId::thumbnail(h.video);

    assert!(h.item().await.thumbnail_state.is_new());
    assert_eq!(
        h.processor.request_thumbnail(h.video).await.unwrap(),
        Submission::Accepted
    );
    assert!(h.processor.exists(&tid));

    h.engine.wait_for_runs(1).await;
    assert!(h.processor.exists(&tid));
    h.engine.release();

    let states = collect_states(&mut events, VideoField::Thumbnail, |s| {
        !s.is_loading()
    })
    .await;
    assert_eq!(states.len(), 2);
    assert_eq!(states[0], LoadingResult::Loading(tid.clone()));
    let path = states[1].value().unwrap().to_path_buf();
    assert!(path.exists());
    assert!(!h.processor.exists(&tid));
}

#[tokio::test]
async fn test_scenario_cancel_before_checkpoint() {
    let h = Harness::new(FakeEngine::immediate());
    let mut events = h.processor.store().subscribe();
    let tid = TaskId::thumbnail(h.video);

    // Current-thread runtime: the body cannot run before the next await
    h.processor.request_thumbnail(h.video).await.unwrap();
    assert!(h.processor.cancel(&tid));

    let states = collect_states(&mut events, VideoField::Thumbnail, |s| {
        !s.is_loading()
    })
    .await;
    assert_eq!(
        states,
        vec![LoadingResult::Loading(tid.clone()), LoadingResult::New]
    );
    assert_eq!(h.engine.run_count(), 0);
    assert!(!h.processor.exists(&tid));
    assert!(!h.dir.path().join("out").read_dir().unwrap().any(|_| true));
}

#[tokio::test]
async fn test_scenario_rapid_requests_run_once() {
    let h = Harness::new(FakeEngine::held());

    assert!(h.processor.request_thumbnail(h.video).await.unwrap().is_accepted());
    assert_eq!(
        h.processor.request_thumbnail(h.video).await.unwrap(),
        Submission::Duplicate
    );

    h.engine.wait_for_runs(1).await;
    h.engine.release();
    assert!(matches!(
        h.settle(VideoField::Thumbnail).await,
        LoadingResult::Success(_)
    ));
    assert_eq!(h.engine.run_count(), 1);
}

#[tokio::test]
async fn test_scenario_incomplete_probe_transcodes_without_rate() {
    let h = Harness::new(FakeEngine::immediate().with_probe_json(PROBE_WITHOUT_WIDTH));

    h.processor
        .request_transcode(h.video, EncoderChoice::Copy)
        .await
        .unwrap();

    let state = h.settle(VideoField::Converted).await;
    let path = state.value().unwrap();
    assert!(path.exists());
    assert!(path.to_string_lossy().ends_with(".mp4"));

    assert_eq!(h.engine.probe_count(), 1);
    assert!(h.item().await.media_details.is_none());
    let args = &h.engine.runs()[0];
    assert!(!args.contains(&"-r".to_string()));
    assert!(args.contains(&"copy".to_string()));
}

#[tokio::test]
async fn test_scenario_stale_grant_fails_and_is_removed() {
    let h = Harness::new(FakeEngine::immediate());
    std::fs::remove_dir_all(h.source_dir()).unwrap();

    h.processor
        .request_transcode(h.video, EncoderChoice::Libx264)
        .await
        .unwrap();

    assert_eq!(h.settle(VideoField::Converted).await, LoadingResult::Failed);
    assert_eq!(h.engine.run_count(), 0);
    assert!(h.processor.access().grant_for(KEY).unwrap().is_none());
}

#[tokio::test]
async fn test_probe_lands_before_queued_transcode() {
    let h = Harness::new(FakeEngine::immediate());

    h.processor
        .request_transcode(h.video, EncoderChoice::Copy)
        .await
        .unwrap();
    h.settle(VideoField::Converted).await;

    let details = h.item().await.media_details.unwrap();
    assert_eq!(details.width, 1920);
    let args = &h.engine.runs()[0];
    let rate = args.iter().position(|a| a == "-r").unwrap();
    assert_eq!(args[rate + 1], "30000/1001");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_media_details_land_before_transcode_on_worker_pool() {
    for _ in 0..50 {
        let h = Harness::new(FakeEngine::immediate());

        h.processor
            .request_transcode(h.video, EncoderChoice::Copy)
            .await
            .unwrap();
        assert!(matches!(
            h.settle(VideoField::Converted).await,
            LoadingResult::Success(_)
        ));

        assert!(h.item().await.media_details.is_some());
        let args = &h.engine.runs()[0];
        let rate = args.iter().position(|a| a == "-r").unwrap();
        assert_eq!(args[rate + 1], "30000/1001");
    }
}

#[tokio::test]
async fn test_cancel_mid_run_leaves_no_partial_file() {
    let h = Harness::new(FakeEngine::held().writing_partial());
    let tid = TaskId::thumbnail(h.video);

    h.processor.request_thumbnail(h.video).await.unwrap();
    h.engine.wait_for_runs(1).await;
    assert!(h.processor.cancel(&tid));

    assert_eq!(h.settle(VideoField::Thumbnail).await, LoadingResult::New);
    assert!(!h.dir.path().join("out").read_dir().unwrap().any(|_| true));
}

#[tokio::test]
async fn test_cancel_during_engine_call_yields_new() {
    let h = Harness::new(FakeEngine::held());
    let tid = TaskId::thumbnail(h.video);

    h.processor.request_thumbnail(h.video).await.unwrap();
    h.engine.wait_for_runs(1).await;
    assert!(h.processor.cancel(&tid));

    assert_eq!(h.settle(VideoField::Thumbnail).await, LoadingResult::New);
    assert!(!h.processor.exists(&tid));
}

#[tokio::test]
async fn test_cancel_all_stops_every_field() {
    let h = Harness::new(FakeEngine::held());

    h.processor.request_thumbnail(h.video).await.unwrap();
    h.processor
        .request_transcode(h.video, EncoderChoice::Copy)
        .await
        .unwrap();
    h.engine.wait_for_runs(1).await;

    // thumbnail, probe and transcode
    assert_eq!(h.processor.cancel_all(), 3);
    assert_eq!(h.settle(VideoField::Thumbnail).await, LoadingResult::New);
    assert_eq!(h.settle(VideoField::Converted).await, LoadingResult::New);
    assert_eq!(h.engine.run_count(), 1);
}

#[tokio::test]
async fn test_delete_then_request_again() {
    let h = Harness::new(FakeEngine::immediate());

    h.processor.request_thumbnail(h.video).await.unwrap();
    let first = h.settle(VideoField::Thumbnail).await;
    let path = first.value().unwrap().to_path_buf();
    assert!(path.exists());

    h.processor.delete_thumbnail(h.video).await.unwrap();
    assert!(!path.exists());
    let item = h
        .processor
        .store()
        .wait_for(h.video, |i| i.thumbnail_state.is_new())
        .await
        .unwrap();
    assert!(item.thumbnail_state.is_new());

    h.processor.request_thumbnail(h.video).await.unwrap();
    assert_eq!(h.settle(VideoField::Thumbnail).await, first);
    assert!(path.exists());
    assert_eq!(h.engine.run_count(), 2);
}

#[tokio::test]
async fn test_delete_while_loading_cancels() {
    let h = Harness::new(FakeEngine::held());
    let tid = TaskId::thumbnail(h.video);

    h.processor.request_thumbnail(h.video).await.unwrap();
    h.engine.wait_for_runs(1).await;
    h.processor.delete_thumbnail(h.video).await.unwrap();

    assert!(!h.processor.exists(&tid));
    assert_eq!(h.settle(VideoField::Thumbnail).await, LoadingResult::New);
}

#[tokio::test]
async fn test_release_then_ensure_requests_again() {
    let h = Harness::new(FakeEngine::held());

    h.processor.request_thumbnail(h.video).await.unwrap();
    h.processor.release_thumbnail(h.video).await.unwrap();
    assert_eq!(h.settle(VideoField::Thumbnail).await, LoadingResult::New);

    let submitted = h.processor.ensure_thumbnail(h.video).await.unwrap();
    assert_eq!(submitted, Some(Submission::Accepted));
    h.engine.wait_for_runs(1).await;
    h.engine.release();
    assert!(matches!(
        h.settle(VideoField::Thumbnail).await,
        LoadingResult::Success(_)
    ));
}

#[tokio::test]
async fn test_failed_engine_reports_failed_not_new() {
    let h = Harness::new(FakeEngine::failing(1));

    h.processor.request_thumbnail(h.video).await.unwrap();
    assert_eq!(h.settle(VideoField::Thumbnail).await, LoadingResult::Failed);

    // Failed is terminal until requested again
    assert!(!h.processor.reconcile_thumbnail(h.video).await.unwrap());
}
