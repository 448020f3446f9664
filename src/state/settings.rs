/// Session tunables
///
/// These values control batch size, cache ceilings, prefetch depth and
/// per-tier resolutions. They are serialized to JSON so a settings file
/// can override any subset of them.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// All tunables for a swipe session
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct SessionSettings {
    // ========== Batch ==========

    /// Photos sampled per batch (fewer if the library is smaller)
    pub batch_size: usize,

    // ========== Cache ==========

    /// Maximum number of cached images, counted across all tiers
    pub cache_size_limit: usize,

    /// Assets kept warm beyond the visible stack
    pub max_prefetched_photos: usize,

    /// Maximum simultaneous best-effort prefetch fetches
    pub prefetch_concurrency: usize,

    /// A fetch taking longer than this is treated as unavailable
    pub fetch_timeout_ms: u64,

    // ========== Tiers ==========

    /// Long-edge size of the thumbnail tier
    pub thumbnail_px: u32,
    /// Long-edge size of the medium tier
    pub medium_px: u32,
    /// Long-edge size of the high tier
    pub high_px: u32,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            batch_size: 10,
            cache_size_limit: 15,
            max_prefetched_photos: 5,
            prefetch_concurrency: 2,
            fetch_timeout_ms: 10_000,
            thumbnail_px: 600,
            medium_px: 1500,
            high_px: 2400,
        }
    }
}

impl SessionSettings {
    /// Fetch timeout as a Duration
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    /// Convert to JSON string for storage
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse from JSON string; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let settings: Self = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Save settings to a JSON file, creating the parent directory
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// Where the settings file lives by default:
    /// - Linux: ~/.config/photo-swipe/settings.json
    /// - macOS: ~/Library/Application Support/photo-swipe/settings.json
    /// - Windows: %APPDATA%\photo-swipe\settings.json
    pub fn default_path() -> Option<PathBuf> {
        let mut path = dirs::config_dir().or_else(dirs::home_dir)?;
        path.push("photo-swipe");
        path.push("settings.json");
        Some(path)
    }

    /// Reject settings the session cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::Settings("batch_size must be at least 1".into()));
        }
        if self.cache_size_limit == 0 {
            return Err(Error::Settings("cache_size_limit must be at least 1".into()));
        }
        if self.prefetch_concurrency == 0 {
            return Err(Error::Settings("prefetch_concurrency must be at least 1".into()));
        }
        if self.fetch_timeout_ms == 0 {
            return Err(Error::Settings("fetch_timeout_ms must be positive".into()));
        }
        if !(self.thumbnail_px < self.medium_px && self.medium_px < self.high_px) {
            return Err(Error::Settings(format!(
                "tier sizes must increase: {} < {} < {}",
                self.thumbnail_px, self.medium_px, self.high_px
            )));
        }
        Ok(())
    }
}
