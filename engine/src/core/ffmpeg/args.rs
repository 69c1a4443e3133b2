//! Engine command builders.
//!
//! Produces ffmpeg argument vectors for the thumbnail and transcode
//! operations. Arguments are passed to the child process directly, so no
//! shell quoting is applied; filtergraph commas inside expressions are still
//! escaped for ffmpeg's own parser.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::settings::ThumbnailSettings;

/// Video codec selection for the MP4 proxy
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncoderChoice {
    /// Pass the source video stream through untouched
    #[default]
    Copy,
    /// Re-encode with x264
    Libx264,
}

impl EncoderChoice {
    /// Value passed to `-c:v`
    pub fn codec_arg(&self) -> &'static str {
        match self {
            EncoderChoice::Copy => "copy",
            EncoderChoice::Libx264 => "libx264",
        }
    }

    /// Suffix used when composing task ids, so each encoder dedups separately
    pub fn task_variant(&self) -> &'static str {
        match self {
            EncoderChoice::Copy => "Default",
            EncoderChoice::Libx264 => "libx264",
        }
    }
}

impl fmt::Display for EncoderChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.codec_arg())
    }
}

/// Unrecognised encoder name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown encoder '{0}', expected 'copy' or 'libx264'")]
pub struct ParseEncoderError(pub String);

impl FromStr for EncoderChoice {
    type Err = ParseEncoderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "copy" | "default" => Ok(EncoderChoice::Copy),
            "libx264" | "x264" | "h264" => Ok(EncoderChoice::Libx264),
            _ => Err(ParseEncoderError(s.trim().to_string())),
        }
    }
}

/// Build the single-frame thumbnail command.
///
/// Seeks before `-i` for fast input seeking, drops audio, scales so the
/// shorter side covers the target square and center-crops to it.
pub fn thumbnail_args(input: &Path, output: &Path, settings: &ThumbnailSettings) -> Vec<String> {
    let size = settings.size;
    let scale = format!("max({size}/iw\\,{size}/ih)");

    vec![
        "-y".to_string(),
        "-ss".to_string(),
        settings.seek_offset.clone(),
        "-i".to_string(),
        input.to_string_lossy().to_string(),
        "-frames:v".to_string(),
        "1".to_string(),
        "-an".to_string(),
        "-vf".to_string(),
        format!("scale=iw*{scale}:ih*{scale},crop={size}:{size}"),
        "-q:v".to_string(),
        settings.quality.to_string(),
        output.to_string_lossy().to_string(),
    ]
}

/// Build the MP4 proxy command.
///
/// Audio is always passed through. `frame_rate` pins the output rate when the
/// source has been probed.
pub fn transcode_args(
    input: &Path,
    output: &Path,
    encoder: EncoderChoice,
    frame_rate: Option<&str>,
) -> Vec<String> {
    let mut args = vec![
        "-y".to_string(),
        "-i".to_string(),
        input.to_string_lossy().to_string(),
        "-c:v".to_string(),
        encoder.codec_arg().to_string(),
        "-c:a".to_string(),
        "copy".to_string(),
        "-f".to_string(),
        "mp4".to_string(),
    ];

    if let Some(rate) = frame_rate {
        args.push("-r".to_string());
        args.push(rate.to_string());
    }

    args.push(output.to_string_lossy().to_string());
    args
}
