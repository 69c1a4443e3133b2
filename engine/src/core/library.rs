//! Library scan.
//!
//! Turns a user-picked directory into video items, recording the access grant
//! that later task bodies resolve.

use std::path::Path;

use tracing::{debug, info};

use crate::core::access::AccessManager;
use crate::core::settings::LibrarySettings;
use crate::core::videos::{SourceLocation, VideoItem};
use crate::core::{AccessKey, CoreError, CoreResult};

/// Key under which the grant for `dir` is stored
pub fn access_key_for(dir: &Path) -> AccessKey {
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| dir.to_string_lossy().to_string());
    format!("directoryBookmark_{}", name)
}

/// List the matching video files in `dir`, sorted by file name.
///
/// Hidden files, subdirectories and files with other extensions are skipped.
pub fn scan_directory(
    dir: &Path,
    access: &AccessManager,
    settings: &LibrarySettings,
) -> CoreResult<Vec<VideoItem>> {
    let key = access_key_for(dir);
    access.grant(&key, dir)?;

    let entries = std::fs::read_dir(dir)
        .map_err(|e| CoreError::LibraryScanFailed(format!("{}: {}", dir.display(), e)))?;

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') {
            continue;
        }
        if !entry.file_type()?.is_file() {
            continue;
        }
        if !has_video_extension(&name, &settings.extensions) {
            debug!("Skipping {}", name);
            continue;
        }
        names.push(name);
    }
    names.sort();

    info!("Found {} videos in {}", names.len(), dir.display());

    Ok(names
        .into_iter()
        .map(|file_name| {
            let source = SourceLocation {
                file_name,
                access_key: key.clone(),
            };
            let display_name = source.stem().to_string();
            VideoItem::new(source, display_name)
        })
        .collect())
}

fn has_video_extension(name: &str, extensions: &[String]) -> bool {
    Path::new(name)
        .extension()
        .map(|ext| {
            let ext = ext.to_string_lossy();
            extensions.iter().any(|e| e.eq_ignore_ascii_case(&ext))
        })
        .unwrap_or(false)
}
