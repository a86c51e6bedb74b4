//! Standalone-mode project discovery.
//!
//! Each immediate subdirectory of the root that contains a `Photos/`
//! directory with at least one supported image is one project. Empty
//! candidates are skipped.

use std::path::{Path, PathBuf};

use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::QueueError;

pub const SUPPORTED_IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "tif", "tiff", "dng"];

#[derive(Debug, Clone)]
pub struct ProjectFolder {
    pub name: String,
    pub path: PathBuf,
    pub photo_count: usize,
}

pub struct ProjectScanner {
    root: PathBuf,
}

impl ProjectScanner {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn scan(&self) -> Result<Vec<ProjectFolder>, QueueError> {
        if !self.root.is_dir() {
            return Err(QueueError::InvalidRoot(self.root.clone()));
        }

        let mut projects = Vec::new();

        for entry in WalkDir::new(&self.root).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| QueueError::ScanFailed {
                path: self.root.clone(),
                source: e,
            })?;
            let path = entry.path();

            if !path.is_dir() {
                continue;
            }

            let photos_dir = path.join("Photos");
            if !photos_dir.is_dir() {
                debug!("skipping {}: no Photos directory", path.display());
                continue;
            }

            let photo_count = count_photos(&photos_dir)?;
            if photo_count == 0 {
                debug!("skipping {}: no supported images", path.display());
                continue;
            }

            let name = entry.file_name().to_string_lossy().to_string();
            debug!("found project {} ({} photos)", name, photo_count);
            projects.push(ProjectFolder {
                name,
                path: path.to_path_buf(),
                photo_count,
            });
        }

        projects.sort_by(|a, b| a.name.cmp(&b.name));

        info!(
            "Scanned {} projects in {}",
            projects.len(),
            self.root.display()
        );
        Ok(projects)
    }
}

fn count_photos(photos_dir: &Path) -> Result<usize, QueueError> {
    let mut count = 0;
    for entry in WalkDir::new(photos_dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|e| QueueError::ScanFailed {
            path: photos_dir.to_path_buf(),
            source: e,
        })?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            let ext = ext.to_ascii_lowercase();
            if SUPPORTED_IMAGE_EXTENSIONS.contains(&ext.as_str()) {
                count += 1;
            }
        }
    }
    Ok(count)
}
