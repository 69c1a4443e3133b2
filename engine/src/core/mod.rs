//! AVCHD Converter Core
//!
//! Handles task orchestration for thumbnail, transcode and probe operations,
//! the video entity model, directory access grants and engine invocation.

pub mod access;
pub mod ffmpeg;
pub mod jobs;
pub mod library;
pub mod processor;
pub mod settings;
pub mod videos;

mod process;
pub use process::configure_tokio_command;

// Re-export common types
mod types;
pub use types::*;

mod error;
pub use error::*;

#[cfg(test)]
mod tests_scenarios;
