//! Output image discovery.
//!
//! The server writes results to its own output folder; nothing on the event
//! channel names the file. The newest PNG carrying the workflow's filename
//! prefix that appeared after submission is taken as the result.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::debug;

use crate::DiffusionError;

/// Newest `*.png` in `dir` whose file name starts with `prefix`.
///
/// An empty prefix matches every PNG. Returns `None` if nothing matches or
/// the folder cannot be read.
pub fn latest_output_image(dir: &Path, prefix: &str) -> Option<PathBuf> {
    newest(matching_images(dir, prefix))
}

/// Matching images present before a job was submitted.
///
/// The server never names the file it saved, and with job-event completion
/// the job may be reported done before the image is written. Taking a
/// snapshot before submitting lets the result be told apart from images of
/// earlier runs.
#[derive(Debug, Clone)]
pub struct OutputSnapshot {
    dir: PathBuf,
    prefix: String,
    taken_at: SystemTime,
    existing: HashSet<PathBuf>,
}

impl OutputSnapshot {
    pub fn take(dir: &Path, prefix: &str) -> Self {
        let taken_at = SystemTime::now();
        let existing = matching_images(dir, prefix)
            .into_iter()
            .map(|(_, path)| path)
            .collect();
        Self {
            dir: dir.to_path_buf(),
            prefix: prefix.to_string(),
            taken_at,
            existing,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Newest matching image that is new since the snapshot or was
    /// rewritten after it.
    pub fn fresh_image(&self) -> Option<PathBuf> {
        newest(
            matching_images(&self.dir, &self.prefix)
                .into_iter()
                .filter(|(modified, path)| !self.existing.contains(path) || *modified > self.taken_at),
        )
    }
}

fn matching_images(dir: &Path, prefix: &str) -> Vec<(SystemTime, PathBuf)> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!("Cannot read output folder {}: {}", dir.display(), e);
            return Vec::new();
        }
    };

    let mut images = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        let is_png = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("png"));
        let matches_prefix = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with(prefix));
        if !is_png || !matches_prefix {
            continue;
        }

        let Ok(modified) = entry.metadata().and_then(|meta| meta.modified()) else {
            continue;
        };
        images.push((modified, path));
    }
    images
}

fn newest(images: impl IntoIterator<Item = (SystemTime, PathBuf)>) -> Option<PathBuf> {
    let mut latest: Option<(SystemTime, PathBuf)> = None;
    for (modified, path) in images {
        if latest.as_ref().is_none_or(|(newest, _)| modified > *newest) {
            latest = Some((modified, path));
        }
    }
    latest.map(|(_, path)| path)
}

/// Decode an output image into RGBA.
pub fn load_output_image(path: &Path) -> Result<image::RgbaImage, DiffusionError> {
    let bytes = fs::read(path)?;
    Ok(image::load_from_memory(&bytes)?.to_rgba8())
}

/// First free path among `base_dir/base_name`, `base_dir/base_name_001`, ...
pub fn unique_asset_name<F>(base_dir: &Path, base_name: &str, exists: F) -> PathBuf
where
    F: Fn(&Path) -> bool,
{
    let mut candidate = base_dir.join(base_name);
    let mut counter = 0u32;
    while exists(&candidate) {
        counter += 1;
        candidate = base_dir.join(format!("{base_name}_{counter:03}"));
    }
    candidate
}
