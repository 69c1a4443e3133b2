//! Settings Persistence System
//!
//! Provides persistent engine settings with:
//! - Atomic file writes (temp file + rename)
//! - Schema validation with defaults
//! - Migration support for schema changes
//!
//! Storage location: {config_dir}/avchd-converter/settings.json

use serde::{Deserialize, Serialize};
use std::fs;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::core::ffmpeg::EncoderChoice;
use crate::core::{CoreError, CoreResult};

/// Settings schema version for migration support
pub const SETTINGS_VERSION: u32 = 1;

/// Settings file name
pub const SETTINGS_FILE: &str = "settings.json";

/// Lock file name (advisory lock to prevent concurrent writers)
pub const SETTINGS_LOCK_FILE: &str = "settings.json.lock";

/// Application directory name under the platform config/data dirs
pub const APP_DIR_NAME: &str = "avchd-converter";

/// Engine settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EngineSettings {
    /// Schema version for migrations
    #[serde(default = "default_version")]
    pub version: u32,

    /// Task execution settings
    #[serde(default)]
    pub processing: ProcessingSettings,

    /// Thumbnail extraction settings
    #[serde(default)]
    pub thumbnail: ThumbnailSettings,

    /// MP4 proxy settings
    #[serde(default)]
    pub transcode: TranscodeSettings,

    /// Engine binary overrides
    #[serde(default)]
    pub ffmpeg: FFmpegSettings,

    /// Directory scan settings
    #[serde(default)]
    pub library: LibrarySettings,
}

fn default_version() -> u32 {
    SETTINGS_VERSION
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            version: SETTINGS_VERSION,
            processing: ProcessingSettings::default(),
            thumbnail: ThumbnailSettings::default(),
            transcode: TranscodeSettings::default(),
            ffmpeg: FFmpegSettings::default(),
            library: LibrarySettings::default(),
        }
    }
}

impl EngineSettings {
    /// Normalizes and clamps settings so persisted state is always valid.
    ///
    /// Corrects bad values instead of failing, so a hand-edited file never
    /// stops the engine from starting.
    pub fn normalize(&mut self) {
        self.version = SETTINGS_VERSION;

        self.processing.max_concurrent_invocations =
            self.processing.max_concurrent_invocations.clamp(1, 16);

        self.thumbnail.size = self.thumbnail.size.clamp(16, 1024);
        self.thumbnail.quality = self.thumbnail.quality.clamp(1, 31);
        if !is_valid_offset(&self.thumbnail.seek_offset) {
            warn!(
                "Invalid thumbnail seek offset '{}', using default",
                self.thumbnail.seek_offset
            );
            self.thumbnail.seek_offset = default_seek_offset();
        }

        let mut extensions: Vec<String> = self
            .library
            .extensions
            .iter()
            .map(|e| e.trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|e| !e.is_empty())
            .collect();
        extensions.sort();
        extensions.dedup();
        if extensions.is_empty() {
            extensions = default_extensions();
        }
        self.library.extensions = extensions;
    }
}

/// Task execution settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingSettings {
    /// Engine invocations allowed to run at once
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_invocations: usize,

    /// Directory receiving thumbnails and proxies
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

fn default_max_concurrent() -> usize {
    1
}

fn default_output_dir() -> PathBuf {
    std::env::temp_dir().join(APP_DIR_NAME)
}

impl Default for ProcessingSettings {
    fn default() -> Self {
        Self {
            max_concurrent_invocations: default_max_concurrent(),
            output_dir: default_output_dir(),
        }
    }
}

/// Thumbnail extraction settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ThumbnailSettings {
    /// Position of the extracted frame (`HH:MM:SS` or seconds)
    #[serde(default = "default_seek_offset")]
    pub seek_offset: String,

    /// Edge length of the square thumbnail in pixels
    #[serde(default = "default_thumbnail_size")]
    pub size: u32,

    /// JPEG quality (1 = best, 31 = worst)
    #[serde(default = "default_thumbnail_quality")]
    pub quality: u8,
}

fn default_seek_offset() -> String {
    "00:00:01".to_string()
}

fn default_thumbnail_size() -> u32 {
    100
}

fn default_thumbnail_quality() -> u8 {
    4
}

impl Default for ThumbnailSettings {
    fn default() -> Self {
        Self {
            seek_offset: default_seek_offset(),
            size: default_thumbnail_size(),
            quality: default_thumbnail_quality(),
        }
    }
}

/// MP4 proxy settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TranscodeSettings {
    /// Encoder used when the caller does not choose one
    #[serde(default)]
    pub default_encoder: EncoderChoice,
}

/// Engine binary overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FFmpegSettings {
    #[serde(default)]
    pub ffmpeg_path: Option<PathBuf>,

    #[serde(default)]
    pub ffprobe_path: Option<PathBuf>,
}

/// Directory scan settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LibrarySettings {
    /// File extensions (without dot, lowercase) picked up by a scan
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
}

fn default_extensions() -> Vec<String> {
    vec!["mts".to_string()]
}

impl Default for LibrarySettings {
    fn default() -> Self {
        Self {
            extensions: default_extensions(),
        }
    }
}

fn is_valid_offset(offset: &str) -> bool {
    let offset = offset.trim();
    if offset.is_empty() {
        return false;
    }
    if let Ok(secs) = offset.parse::<f64>() {
        return secs.is_finite() && secs >= 0.0;
    }
    let parts: Vec<&str> = offset.split(':').collect();
    parts.len() == 3
        && parts[..2]
            .iter()
            .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
        && parts[2].parse::<f64>().map(|s| s >= 0.0).unwrap_or(false)
}

/// Settings manager for loading, saving, and resetting settings
pub struct SettingsManager {
    settings_path: PathBuf,
}

impl SettingsManager {
    /// Create a new settings manager with the given config directory
    pub fn new(config_dir: &Path) -> Self {
        Self {
            settings_path: config_dir.join(SETTINGS_FILE),
        }
    }

    /// Platform config directory for the application
    pub fn default_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR_NAME)
    }

    fn lock_path(&self) -> PathBuf {
        self.settings_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(SETTINGS_LOCK_FILE)
    }

    fn with_lock<T>(&self, exclusive: bool, op: impl FnOnce() -> CoreResult<T>) -> CoreResult<T> {
        // Ensure parent directory exists so the lock file can be created.
        if let Some(parent) = self.settings_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let lock_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(self.lock_path())?;

        if exclusive {
            fs2::FileExt::lock_exclusive(&lock_file)?;
        } else {
            fs2::FileExt::lock_shared(&lock_file)?;
        }

        let result = op();

        if let Err(e) = fs2::FileExt::unlock(&lock_file) {
            warn!("Failed to unlock settings lock file: {}", e);
        }

        result
    }

    /// Get the settings file path
    pub fn settings_path(&self) -> &Path {
        &self.settings_path
    }

    /// Load settings from disk, returning defaults if the file doesn't exist
    pub fn load(&self) -> EngineSettings {
        let result = self.with_lock(false, || {
            if !self.settings_path.exists() {
                info!("Settings file not found, using defaults");
                return Ok(EngineSettings::default());
            }

            let content = fs::read_to_string(&self.settings_path)?;
            let mut settings = serde_json::from_str::<EngineSettings>(&content)?;

            if settings.version < SETTINGS_VERSION {
                info!(
                    "Migrating settings from version {} to {}",
                    settings.version, SETTINGS_VERSION
                );
                settings.version = SETTINGS_VERSION;
            }

            settings.normalize();
            Ok(settings)
        });

        match result {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Failed to load settings, using defaults: {}", e);
                EngineSettings::default()
            }
        }
    }

    /// Save settings to disk using atomic write (temp file + rename)
    pub fn save(&self, settings: &EngineSettings) -> CoreResult<EngineSettings> {
        self.with_lock(true, || {
            let mut normalized = settings.clone();
            normalized.normalize();

            let content = serde_json::to_string_pretty(&normalized)?;

            let temp_path = self.settings_path.with_extension("json.tmp");
            let mut file = fs::File::create(&temp_path)?;
            file.write_all(content.as_bytes())?;
            file.sync_all()?;

            if cfg!(windows) && self.settings_path.exists() {
                // Windows: rename does not overwrite
                fs::remove_file(&self.settings_path)?;
            }
            fs::rename(&temp_path, &self.settings_path).map_err(|e| {
                CoreError::Internal(format!("Failed to finalize settings file: {}", e))
            })?;

            info!("Settings saved to {:?}", self.settings_path);
            Ok(normalized)
        })
    }

    /// Reset settings to defaults and delete the settings file
    pub fn reset(&self) -> CoreResult<EngineSettings> {
        self.with_lock(true, || {
            if self.settings_path.exists() {
                fs::remove_file(&self.settings_path)?;
                info!("Settings file deleted");
            }
            Ok(EngineSettings::default())
        })
    }
}
