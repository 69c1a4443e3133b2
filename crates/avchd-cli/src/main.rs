//! AVCHD Converter CLI
//!
//! Headless driver for the engine. Scans a directory of clips and produces
//! thumbnails, MP4 proxies or media details, printing the items as JSON.

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use anyhow::{Context, Result};
use avchd_engine::core::ffmpeg::detect_ffmpeg;
use avchd_engine::core::library::scan_directory;
use avchd_engine::{
    AccessManager, EncoderChoice, EngineSettings, FFmpegEngine, FileBookmarkStore,
    SettingsManager, TaskId, VideoItem, VideoProcessor,
};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::{info, warn};

static LOG_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

#[derive(Parser)]
#[command(name = "avchd-cli", version, about = "AVCHD thumbnail and proxy generator")]
struct Cli {
    /// Directory holding settings.json and the access grant store
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    /// Where thumbnails and proxies are written
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,

    /// Maximum simultaneous ffmpeg invocations
    #[arg(long, short = 'j', global = true)]
    jobs: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the clips in a directory
    Scan { dir: PathBuf },
    /// Generate a thumbnail for every clip
    Thumbnails { dir: PathBuf },
    /// Convert every clip to MP4
    Convert {
        dir: PathBuf,
        /// Video codec, defaults to the configured encoder
        #[arg(long, value_enum)]
        encoder: Option<EncoderArg>,
    },
    /// Read duration, dimensions and frame rate of every clip
    Probe { dir: PathBuf },
    /// Print the effective settings
    Settings,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum EncoderArg {
    /// Remux the source video stream
    Copy,
    /// Re-encode with x264
    Libx264,
}

impl From<EncoderArg> for EncoderChoice {
    fn from(arg: EncoderArg) -> Self {
        match arg {
            EncoderArg::Copy => EncoderChoice::Copy,
            EncoderArg::Libx264 => EncoderChoice::Libx264,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Report {
    directory: PathBuf,
    videos: Vec<VideoItem>,
}

fn init_logging(config_dir: &Path) {
    let log_dir = config_dir.join("logs");
    let _ = std::fs::create_dir_all(&log_dir);

    let file_appender = tracing_appender::rolling::daily(&log_dir, "avchd-cli.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    use tracing_subscriber::prelude::*;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    // JSON goes to stdout, so logs stay on stderr
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(cfg!(debug_assertions));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false);

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer);

    let _ = tracing::subscriber::set_global_default(subscriber);
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_dir = cli
        .config_dir
        .clone()
        .unwrap_or_else(SettingsManager::default_dir);
    init_logging(&config_dir);

    let mut settings = SettingsManager::new(&config_dir).load();
    if let Some(output_dir) = &cli.output_dir {
        settings.processing.output_dir = output_dir.clone();
    }
    if let Some(jobs) = cli.jobs {
        settings.processing.max_concurrent_invocations = jobs;
    }
    settings.normalize();

    match cli.command {
        Command::Settings => print_json(&settings),
        Command::Scan { dir } => {
            let access = AccessManager::new(Arc::new(FileBookmarkStore::new(&config_dir)));
            let videos = scan_directory(&dir, &access, &settings.library)
                .with_context(|| format!("Failed to scan {}", dir.display()))?;
            print_json(&Report {
                directory: dir,
                videos,
            })
        }
        Command::Thumbnails { dir } => {
            run_batch(&config_dir, settings, &dir, Batch::Thumbnails).await
        }
        Command::Convert { dir, encoder } => {
            let encoder = encoder
                .map(EncoderChoice::from)
                .unwrap_or(settings.transcode.default_encoder);
            run_batch(&config_dir, settings, &dir, Batch::Convert(encoder)).await
        }
        Command::Probe { dir } => run_batch(&config_dir, settings, &dir, Batch::Probe).await,
    }
}

#[derive(Clone, Copy)]
enum Batch {
    Thumbnails,
    Convert(EncoderChoice),
    Probe,
}

async fn run_batch(
    config_dir: &Path,
    settings: EngineSettings,
    dir: &Path,
    batch: Batch,
) -> Result<()> {
    let info = detect_ffmpeg(&settings.ffmpeg).context("ffmpeg is not available")?;
    info!(
        "Processing {} with {} concurrent invocations",
        dir.display(),
        settings.processing.max_concurrent_invocations
    );

    let access = AccessManager::new(Arc::new(FileBookmarkStore::new(config_dir)));
    let items = scan_directory(dir, &access, &settings.library)
        .with_context(|| format!("Failed to scan {}", dir.display()))?;

    let processor = Arc::new(VideoProcessor::new(
        Arc::new(FFmpegEngine::new(info)),
        access,
        settings,
    )?);
    let ids = processor.add_videos(items);

    let interrupt = {
        let processor = Arc::clone(&processor);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling {} tasks", processor.cancel_all());
            }
        })
    };

    for id in &ids {
        match batch {
            Batch::Thumbnails => processor.request_thumbnail(*id).await?,
            Batch::Convert(encoder) => processor.request_transcode(*id, encoder).await?,
            Batch::Probe => processor.request_probe(*id).await?,
        };
    }

    let store = processor.store();
    for id in &ids {
        match batch {
            Batch::Thumbnails => {
                store
                    .wait_for(*id, |item| !item.thumbnail_state.is_loading())
                    .await?;
            }
            Batch::Convert(_) => {
                store
                    .wait_for(*id, |item| !item.converted_state.is_loading())
                    .await?;
            }
            Batch::Probe => processor.wait_for_task(&TaskId::probe(*id)).await,
        }
    }
    interrupt.abort();

    print_json(&Report {
        directory: dir.to_path_buf(),
        videos: store.list().await?,
    })
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
