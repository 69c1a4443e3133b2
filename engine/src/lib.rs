//! AVCHD Converter Engine
//!
//! Task-execution core behind the AVCHD converter: scans a picked directory
//! for `.MTS` clips, derives thumbnails, MP4 proxies and media details through
//! ffmpeg/ffprobe, and publishes every state change to observers.
//!
//! The entry point is [`core::processor::VideoProcessor`]. Everything it
//! mutates lives in [`core::videos::VideoStore`], whose serial actor task is
//! the only place entity fields are ever written.

pub mod core;

pub use crate::core::{
    access::{AccessManager, BookmarkStore, FileBookmarkStore, MemoryBookmarkStore},
    ffmpeg::{FFmpegEngine, MediaEngine},
    jobs::{EncoderChoice, Submission, TaskId, TaskKind},
    processor::VideoProcessor,
    settings::{EngineSettings, SettingsManager},
    videos::{LoadingResult, MediaDetails, VideoEvent, VideoItem, VideoStore},
    CoreError, CoreResult,
};
