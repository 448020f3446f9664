/// In-memory photo library
///
/// Serves solid-colour images for a fixed list of assets. Every fetch is
/// recorded, which makes it the library of choice for tests and demos that
/// need to see exactly what the session asked for.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use image::DynamicImage;
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use super::{AssetSource, Permission, PermissionRequest, TargetSize};
use crate::cache::Tier;
use crate::error::{Error, Result};
use crate::state::data::{AssetId, AssetRef};

pub struct MemoryLibrary {
    assets: Vec<AssetRef>,
    permission: Mutex<Permission>,
    grant_on_request: bool,
    fetch_delay: Duration,
    missing: HashSet<AssetId>,
    listing_error: Option<String>,
    fetches: Mutex<Vec<(AssetId, Tier)>>,
}

impl MemoryLibrary {
    /// A library of `count` photos named `photo-0`, `photo-1`, ... newest first
    pub fn with_count(count: usize) -> Self {
        let now = Utc::now();
        let assets = (0..count)
            .map(|i| AssetRef::new(format!("photo-{}", i), now - ChronoDuration::minutes(i as i64)))
            .collect();
        Self::new(assets)
    }

    pub fn new(assets: Vec<AssetRef>) -> Self {
        Self {
            assets,
            permission: Mutex::new(Permission::Authorized),
            grant_on_request: true,
            fetch_delay: Duration::ZERO,
            missing: HashSet::new(),
            listing_error: None,
            fetches: Mutex::new(Vec::new()),
        }
    }

    /// Every fetch sleeps this long before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = delay;
        self
    }

    /// Start in `permission`; a prompt grants access only if `grant_on_request`
    pub fn with_permission(mut self, permission: Permission, grant_on_request: bool) -> Self {
        self.permission = Mutex::new(permission);
        self.grant_on_request = grant_on_request;
        self
    }

    /// These assets have no image
    pub fn with_missing(mut self, ids: impl IntoIterator<Item = AssetId>) -> Self {
        self.missing = ids.into_iter().collect();
        self
    }

    /// Listing fails with an infrastructure error
    pub fn with_listing_error(mut self, message: impl Into<String>) -> Self {
        self.listing_error = Some(message.into());
        self
    }

    pub fn assets(&self) -> &[AssetRef] {
        &self.assets
    }

    /// Every fetch handed to the library so far
    pub fn fetches(&self) -> Vec<(AssetId, Tier)> {
        self.fetches.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Fetches of one asset at one tier
    pub fn fetch_count_for(&self, id: &AssetId, tier: Tier) -> usize {
        self.fetches
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|(a, t)| a == id && *t == tier)
            .count()
    }
}

#[async_trait]
impl AssetSource for MemoryLibrary {
    async fn check_permission(&self) -> Permission {
        *self.permission.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn request_permission(&self) -> PermissionRequest {
        let mut permission = self.permission.lock().unwrap_or_else(|e| e.into_inner());
        if self.grant_on_request {
            *permission = Permission::Authorized;
            PermissionRequest::Granted
        } else {
            *permission = Permission::Denied;
            PermissionRequest::Denied
        }
    }

    async fn list_image_assets(&self) -> Result<Vec<AssetRef>> {
        match &self.listing_error {
            Some(message) => Err(Error::Infrastructure(message.clone())),
            None => Ok(self.assets.clone()),
        }
    }

    async fn fetch_image(&self, asset: &AssetRef, size: TargetSize) -> Result<Option<DynamicImage>> {
        self.fetches
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((asset.id.clone(), size.tier));

        if !self.fetch_delay.is_zero() {
            tokio::time::sleep(self.fetch_delay).await;
        }

        if self.missing.contains(&asset.id) {
            return Ok(None);
        }
        Ok(Some(DynamicImage::new_rgb8(2, 2)))
    }
}
