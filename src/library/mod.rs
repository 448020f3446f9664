/// Photo library access
///
/// This module handles:
/// - The `AssetSource` seam the session pulls photos through
/// - The permission gate in front of the library
/// - A folder-backed library for desktop use (folder.rs)
/// - An in-memory library that records every fetch (memory.rs)

pub mod folder;
pub mod memory;

use async_trait::async_trait;
use image::DynamicImage;

use crate::cache::Tier;
use crate::error::Result;
use crate::state::data::AssetRef;

pub use folder::FolderLibrary;
pub use memory::MemoryLibrary;

/// Library authorization status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Authorized,
    /// The user granted access to a subset of photos
    Limited,
    Denied,
    NotDetermined,
}

impl Permission {
    /// Whether photos can be listed and fetched
    pub fn is_granted(&self) -> bool {
        matches!(self, Permission::Authorized | Permission::Limited)
    }
}

/// Answer to an explicit permission prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionRequest {
    Granted,
    Denied,
}

/// Requested output size for a fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetSize {
    pub tier: Tier,
    /// The image is scaled so its long edge fits this many pixels
    pub long_edge_px: u32,
}

/// A photo library the session can browse.
///
/// `fetch_image` returning `Ok(None)` means the library has no image
/// for that asset; the caller shows a placeholder.
#[async_trait]
pub trait AssetSource: Send + Sync {
    /// Current authorization status
    async fn check_permission(&self) -> Permission;

    /// Prompt for access
    async fn request_permission(&self) -> PermissionRequest;

    /// All image assets, newest first
    async fn list_image_assets(&self) -> Result<Vec<AssetRef>>;

    /// Fetch and decode one asset at the requested size
    async fn fetch_image(&self, asset: &AssetRef, size: TargetSize) -> Result<Option<DynamicImage>>;
}
