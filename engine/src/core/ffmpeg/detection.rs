//! FFmpeg Detection Module
//!
//! Locates ffmpeg/ffprobe binaries: explicit paths from settings first, then
//! common install locations, then the system `PATH`.

use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, info};

use super::{FFmpegError, FFmpegResult};
use crate::core::settings::FFmpegSettings;

/// Information about a detected FFmpeg installation
#[derive(Debug, Clone)]
pub struct FFmpegInfo {
    /// Path to ffmpeg binary
    pub ffmpeg_path: PathBuf,
    /// Path to ffprobe binary
    pub ffprobe_path: PathBuf,
    /// FFmpeg version string
    pub version: String,
}

/// Detect FFmpeg honouring the configured overrides.
pub fn detect_ffmpeg(settings: &FFmpegSettings) -> FFmpegResult<FFmpegInfo> {
    let ffmpeg_path = match &settings.ffmpeg_path {
        Some(path) if path.exists() => path.clone(),
        Some(path) => {
            return Err(FFmpegError::InvalidInput(format!(
                "Configured ffmpeg path does not exist: {}",
                path.display()
            )))
        }
        None => which_binary("ffmpeg")?,
    };

    let ffprobe_path = match &settings.ffprobe_path {
        Some(path) if path.exists() => path.clone(),
        Some(path) => {
            return Err(FFmpegError::InvalidInput(format!(
                "Configured ffprobe path does not exist: {}",
                path.display()
            )))
        }
        None => which_binary("ffprobe")?,
    };

    let version = get_ffmpeg_version(&ffmpeg_path)?;
    info!("Using FFmpeg {} at {}", version, ffmpeg_path.display());

    Ok(FFmpegInfo {
        ffmpeg_path,
        ffprobe_path,
        version,
    })
}

/// Detect FFmpeg from the system only
pub fn detect_system_ffmpeg() -> FFmpegResult<FFmpegInfo> {
    detect_ffmpeg(&FFmpegSettings::default())
}

/// Find a binary in common locations or the system PATH
fn which_binary(name: &str) -> FFmpegResult<PathBuf> {
    let binary_name = if cfg!(target_os = "windows") {
        format!("{name}.exe")
    } else {
        name.to_string()
    };

    for dir in get_common_ffmpeg_paths() {
        let candidate = dir.join(&binary_name);
        if candidate.exists() {
            debug!("Found {} at {}", name, candidate.display());
            return Ok(candidate);
        }
    }

    let locator = if cfg!(target_os = "windows") {
        "where"
    } else {
        "which"
    };

    let output = Command::new(locator)
        .arg(name)
        .output()
        .map_err(|_| FFmpegError::NotFound)?;

    if output.status.success() {
        let path_str = String::from_utf8_lossy(&output.stdout);
        if let Some(first_line) = path_str.lines().next() {
            let trimmed = first_line.trim();
            if !trimmed.is_empty() {
                return Ok(PathBuf::from(trimmed));
            }
        }
    }

    Err(FFmpegError::NotFound)
}

/// Get common FFmpeg installation paths for the current platform
fn get_common_ffmpeg_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    #[cfg(target_os = "windows")]
    {
        paths.push(PathBuf::from(r"C:\ffmpeg\bin"));
        paths.push(PathBuf::from(r"C:\Program Files\ffmpeg\bin"));

        if let Ok(programdata) = std::env::var("ProgramData") {
            paths.push(PathBuf::from(programdata).join("chocolatey").join("bin"));
        }
    }

    #[cfg(target_os = "macos")]
    {
        // Homebrew and MacPorts
        paths.push(PathBuf::from("/opt/homebrew/bin"));
        paths.push(PathBuf::from("/usr/local/bin"));
        paths.push(PathBuf::from("/opt/local/bin"));
    }

    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        paths.push(PathBuf::from("/usr/bin"));
        paths.push(PathBuf::from("/usr/local/bin"));
        paths.push(PathBuf::from("/snap/bin"));
    }

    paths
}

/// Get FFmpeg version string
fn get_ffmpeg_version(ffmpeg_path: &Path) -> FFmpegResult<String> {
    let output = Command::new(ffmpeg_path)
        .arg("-version")
        .output()
        .map_err(FFmpegError::ProcessError)?;

    if !output.status.success() {
        return Err(FFmpegError::ExecutionFailed(
            "Failed to get FFmpeg version".to_string(),
        ));
    }

    Ok(parse_version_line(&String::from_utf8_lossy(&output.stdout)))
}

/// Extract the version from `ffmpeg -version` output.
///
/// Falls back to the whole first line when it does not follow the usual
/// "ffmpeg version X ..." shape.
fn parse_version_line(output: &str) -> String {
    let first_line = output.lines().next().unwrap_or_default();
    first_line
        .strip_prefix("ffmpeg version ")
        .and_then(|rest| rest.split_whitespace().next())
        .unwrap_or(first_line)
        .to_string()
}
