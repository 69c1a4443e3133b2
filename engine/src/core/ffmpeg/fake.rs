//! Scriptable in-process engine for tests.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::{watch, Semaphore};
use tokio_util::sync::CancellationToken;

use super::{parse_probe_output, EngineOutcome, FFmpegError, FFmpegResult, MediaDetails, MediaEngine};

pub(crate) const COMPLETE_PROBE: &str = r#"{
    "format": {"duration": "12.5"},
    "streams": [
        {"codec_type": "video", "width": 1920, "height": 1080, "avg_frame_rate": "30000/1001"},
        {"codec_type": "audio", "codec_name": "ac3"}
    ]
}"#;

pub(crate) const PROBE_WITHOUT_WIDTH: &str = r#"{
    "format": {"duration": "12.5"},
    "streams": [
        {"codec_type": "video", "height": 1080, "avg_frame_rate": "30000/1001"}
    ]
}"#;

/// Fake engine.
///
/// `run` records the argv, optionally parks until [`FakeEngine::release`] is
/// called, then writes the file named by the last argument and succeeds (or
/// fails with the configured code). With [`FakeEngine::writing_partial`] the
/// file is written before parking or failing, the way ffmpeg leaves a
/// truncated output behind.
pub(crate) struct FakeEngine {
    runs: Mutex<Vec<Vec<String>>>,
    probes: Mutex<Vec<PathBuf>>,
    started: watch::Sender<usize>,
    release: Option<Semaphore>,
    fail_code: Option<i32>,
    write_early: bool,
    probe_json: String,
}

impl FakeEngine {
    /// Engine that completes every run immediately
    pub(crate) fn immediate() -> Self {
        Self::build(None, None, COMPLETE_PROBE)
    }

    /// Engine whose runs park until released
    pub(crate) fn held() -> Self {
        Self::build(Some(Semaphore::new(0)), None, COMPLETE_PROBE)
    }

    /// Engine whose runs exit with a non-zero code
    pub(crate) fn failing(code: i32) -> Self {
        Self::build(None, Some(code), COMPLETE_PROBE)
    }

    pub(crate) fn writing_partial(mut self) -> Self {
        self.write_early = true;
        self
    }

    pub(crate) fn with_probe_json(mut self, json: &str) -> Self {
        self.probe_json = json.to_string();
        self
    }

    fn build(release: Option<Semaphore>, fail_code: Option<i32>, probe_json: &str) -> Self {
        let (started, _) = watch::channel(0);
        Self {
            runs: Mutex::new(Vec::new()),
            probes: Mutex::new(Vec::new()),
            started,
            release,
            fail_code,
            write_early: false,
            probe_json: probe_json.to_string(),
        }
    }

    /// Let one parked run continue
    pub(crate) fn release(&self) {
        if let Some(gate) = &self.release {
            gate.add_permits(1);
        }
    }

    pub(crate) fn run_count(&self) -> usize {
        self.runs.lock().unwrap().len()
    }

    pub(crate) fn probe_count(&self) -> usize {
        self.probes.lock().unwrap().len()
    }

    pub(crate) fn runs(&self) -> Vec<Vec<String>> {
        self.runs.lock().unwrap().clone()
    }

    /// Wait until at least `n` runs have started
    pub(crate) async fn wait_for_runs(&self, n: usize) {
        let mut rx = self.started.subscribe();
        let _ = rx.wait_for(|count| *count >= n).await;
    }
}

#[async_trait]
impl MediaEngine for FakeEngine {
    async fn run(&self, args: Vec<String>, cancel: CancellationToken) -> EngineOutcome {
        let output = args.last().map(PathBuf::from);
        self.runs.lock().unwrap().push(args);
        if self.write_early {
            if let Some(path) = &output {
                let _ = tokio::fs::write(path, b"partial").await;
            }
        }
        self.started.send_modify(|count| *count += 1);

        if let Some(gate) = &self.release {
            tokio::select! {
                permit = gate.acquire() => {
                    if let Ok(permit) = permit {
                        permit.forget();
                    }
                }
                _ = cancel.cancelled() => return EngineOutcome::cancelled(),
            }
        }

        if let Some(code) = self.fail_code {
            return EngineOutcome::failed(Some(code), "fake engine failure");
        }

        if let Some(path) = output {
            if let Err(e) = tokio::fs::write(&path, b"fake output").await {
                return EngineOutcome::failed(Some(1), e.to_string());
            }
        }
        EngineOutcome::success("")
    }

    async fn probe(&self, input: &Path, cancel: CancellationToken) -> FFmpegResult<MediaDetails> {
        if cancel.is_cancelled() {
            return Err(FFmpegError::Cancelled);
        }
        self.probes.lock().unwrap().push(input.to_path_buf());
        Ok(parse_probe_output(&self.probe_json)?)
    }
}
