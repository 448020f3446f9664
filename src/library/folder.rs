/// Folder-backed photo library
///
/// Treats every image file below a root folder as one asset. Decoding and
/// resizing are CPU-bound, so they run on tokio's blocking pool.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use image::{imageops::FilterType, DynamicImage};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::task;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::{AssetSource, Permission, PermissionRequest, TargetSize};
use crate::cache::Tier;
use crate::error::{Error, Result};
use crate::state::data::AssetRef;

/// Supported image file extensions
const IMAGE_EXTENSIONS: [&str; 8] = ["jpg", "jpeg", "png", "gif", "webp", "bmp", "tif", "tiff"];

/// A library made of the image files under one folder
#[derive(Debug, Clone)]
pub struct FolderLibrary {
    root: PathBuf,
}

impl FolderLibrary {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The user's pictures folder, falling back to the home directory
    pub fn default_root() -> Option<PathBuf> {
        dirs::picture_dir().or_else(dirs::home_dir)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn is_readable(&self) -> bool {
        self.root.is_dir() && std::fs::read_dir(&self.root).is_ok()
    }
}

#[async_trait]
impl AssetSource for FolderLibrary {
    async fn check_permission(&self) -> Permission {
        if self.is_readable() {
            Permission::Authorized
        } else {
            Permission::Denied
        }
    }

    async fn request_permission(&self) -> PermissionRequest {
        // A folder cannot be prompted for; access is whatever the OS allows
        if self.is_readable() {
            PermissionRequest::Granted
        } else {
            PermissionRequest::Denied
        }
    }

    async fn list_image_assets(&self) -> Result<Vec<AssetRef>> {
        let root = self.root.clone();
        task::spawn_blocking(move || scan_folder(&root))
            .await
            .map_err(|e| Error::Infrastructure(format!("Task join error: {}", e)))?
    }

    async fn fetch_image(&self, asset: &AssetRef, size: TargetSize) -> Result<Option<DynamicImage>> {
        let path = PathBuf::from(asset.id.as_str());
        task::spawn_blocking(move || Ok(load_resized(&path, size)))
            .await
            .map_err(|e| Error::Infrastructure(format!("Task join error: {}", e)))?
    }
}

/// Walk the folder tree and collect image files, newest first
fn scan_folder(root: &Path) -> Result<Vec<AssetRef>> {
    if !root.is_dir() {
        return Err(Error::Infrastructure(format!(
            "Library folder not found: {}",
            root.display()
        )));
    }

    debug!(root = %root.display(), "Scanning library folder");

    let mut assets: Vec<AssetRef> = WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|entry| entry.file_type().is_file() && is_image_file(entry.path()))
        .map(|entry| {
            let created_at = entry
                .metadata()
                .ok()
                .and_then(|m| m.created().or_else(|_| m.modified()).ok())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            AssetRef::new(
                entry.path().to_string_lossy().to_string(),
                DateTime::<Utc>::from(created_at),
            )
        })
        .collect();

    assets.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));

    info!(root = %root.display(), count = assets.len(), "Library scan complete");
    Ok(assets)
}

/// Check if a path is an image file by extension
fn is_image_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| {
            let ext = ext.to_string_lossy().to_lowercase();
            IMAGE_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// Decode an image and scale it so its long edge fits the tier size.
/// Returns None if the file is gone or cannot be decoded.
fn load_resized(path: &Path, size: TargetSize) -> Option<DynamicImage> {
    let img = match image::open(path) {
        Ok(img) => img,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to decode image");
            return None;
        }
    };

    let target = size.long_edge_px;
    if img.width() <= target && img.height() <= target {
        // Never upscale
        return Some(img);
    }

    // Thumbnails favour speed, larger tiers favour quality
    let filter = match size.tier {
        Tier::Thumbnail => FilterType::Triangle,
        Tier::Medium | Tier::High => FilterType::Lanczos3,
    };

    Some(img.resize(target, target, filter))
}
