/// Image caching module
///
/// This module handles:
/// - Resolution tiers and decoded images (tier.rs)
/// - The bounded, keep-set aware tiered cache (store.rs)
/// - Deduplicated background fetching into the cache (loader.rs)

pub mod tier;
pub mod store;
pub mod loader;

pub use loader::{FetchPriority, ImageLoader, PendingFetch};
pub use store::{CacheStats, TieredImageCache};
pub use tier::{DecodedImage, Tier};
