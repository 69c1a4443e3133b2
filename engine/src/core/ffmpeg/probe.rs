//! FFprobe output parsing.

use serde::{Deserialize, Serialize};

/// Media details extracted by a probe
///
/// Either every field is known or the probe failed; there is no partially
/// populated form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaDetails {
    /// Container duration in seconds
    pub duration_seconds: f64,
    /// Width of the first video stream in pixels
    pub width: u32,
    /// Height of the first video stream in pixels
    pub height: u32,
    /// Average frame rate as reported by ffprobe (e.g. "30000/1001")
    pub frame_rate: String,
}

/// Probe failures
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("ffprobe exited unsuccessfully: {0}")]
    Failed(String),

    #[error("failed to parse ffprobe output: {0}")]
    Parse(String),

    #[error("required field missing: {0}")]
    Incomplete(String),
}

/// Parse `ffprobe -print_format json -show_format -show_streams` output.
///
/// Requires the container duration plus width, height and `avg_frame_rate`
/// of the first video stream.
pub fn parse_probe_output(json_str: &str) -> Result<MediaDetails, ProbeError> {
    let json: serde_json::Value =
        serde_json::from_str(json_str).map_err(|e| ProbeError::Parse(e.to_string()))?;

    let duration_seconds = json
        .get("format")
        .and_then(|f| f.get("duration"))
        .and_then(|d| match d {
            serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
            other => other.as_f64(),
        })
        .ok_or_else(|| ProbeError::Incomplete("duration".to_string()))?;

    let video = json
        .get("streams")
        .and_then(|s| s.as_array())
        .and_then(|streams| {
            streams
                .iter()
                .find(|s| s.get("codec_type").and_then(|c| c.as_str()) == Some("video"))
        })
        .ok_or_else(|| ProbeError::Incomplete("video stream".to_string()))?;

    let width = dimension(video, "width")?;
    let height = dimension(video, "height")?;

    let frame_rate = video
        .get("avg_frame_rate")
        .and_then(|f| f.as_str())
        .map(str::trim)
        .filter(|rate| is_known_rate(rate))
        .ok_or_else(|| ProbeError::Incomplete("avg_frame_rate".to_string()))?
        .to_string();

    Ok(MediaDetails {
        duration_seconds,
        width,
        height,
        frame_rate,
    })
}

fn dimension(stream: &serde_json::Value, key: &str) -> Result<u32, ProbeError> {
    stream
        .get(key)
        .and_then(|v| v.as_u64())
        .filter(|v| *v > 0)
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| ProbeError::Incomplete(key.to_string()))
}

// ffprobe reports "0/0" when the rate cannot be determined
fn is_known_rate(rate: &str) -> bool {
    if rate.is_empty() {
        return false;
    }
    match rate.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.parse().unwrap_or(0.0);
            let den: f64 = den.parse().unwrap_or(0.0);
            num > 0.0 && den > 0.0
        }
        None => rate.parse::<f64>().map(|r| r > 0.0).unwrap_or(false),
    }
}
