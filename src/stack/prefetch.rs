/// Prefetch scheduling
///
/// Keeps a rolling window of upcoming assets warm at thumbnail tier so the
/// stack never waits on a cold fetch. The asset directly behind the visible
/// stack is additionally promoted to medium tier once its thumbnail lands,
/// ready for the moment it slides into view.

use tracing::debug;

use super::batch::Batch;
use super::VISIBLE_STACK_SIZE;
use crate::cache::{FetchPriority, ImageLoader, PendingFetch, Tier};
use crate::state::data::AssetRef;

pub struct PrefetchScheduler {
    loader: ImageLoader,
    max_prefetched: usize,
}

impl PrefetchScheduler {
    pub fn new(loader: ImageLoader, max_prefetched: usize) -> Self {
        Self {
            loader,
            max_prefetched,
        }
    }

    /// Assets at `[cursor + 3, cursor + 3 + max_prefetched)`
    pub fn window<'a>(&self, batch: &'a Batch, cursor: usize) -> &'a [AssetRef] {
        batch.window(cursor + VISIBLE_STACK_SIZE, self.max_prefetched)
    }

    /// Warm the window for `cursor`. Repeated calls with the same cursor
    /// start no new fetches: anything cached or in flight is skipped.
    /// Returns the number of library fetches this call started.
    pub fn refresh(&self, batch: &Batch, cursor: usize) -> usize {
        let cache = self.loader.cache();
        let window = self.window(batch, cursor);
        cache.set_prefetch_window(window.iter().map(|a| a.id.clone()));

        let mut started = 0;
        for (offset, asset) in window.iter().enumerate() {
            let cached = Tier::ALL.iter().any(|t| cache.contains(&asset.id, *t));

            if !cached && !cache.is_in_flight(&asset.id) {
                let pending = self.loader.request(asset, Tier::Thumbnail, FetchPriority::Prefetch);
                started += pending.started_fetch() as usize;
                if offset == 0 {
                    self.promote_after(asset, pending);
                }
                continue;
            }

            if offset == 0
                && !cache.contains(&asset.id, Tier::Medium)
                && !cache.contains(&asset.id, Tier::High)
                && !cache.is_tier_in_flight(&asset.id, Tier::Medium)
            {
                if cache.contains(&asset.id, Tier::Thumbnail) {
                    let pending = self.loader.request(asset, Tier::Medium, FetchPriority::Prefetch);
                    started += pending.started_fetch() as usize;
                } else {
                    // Thumbnail still on its way; join it
                    let pending = self.loader.request(asset, Tier::Thumbnail, FetchPriority::Prefetch);
                    started += pending.started_fetch() as usize;
                    self.promote_after(asset, pending);
                }
            }
        }

        if started > 0 {
            debug!(cursor, window = window.len(), started, "Prefetch refresh");
        }
        started
    }

    /// Once `thumbnail` arrives, fetch the medium tier, unless the batch
    /// changed or the asset left the window in the meantime.
    fn promote_after(&self, asset: &AssetRef, thumbnail: PendingFetch) {
        let loader = self.loader.clone();
        let asset = asset.clone();
        let generation = loader.cache().generation();

        tokio::spawn(async move {
            if thumbnail.wait().await.is_err() {
                return;
            }
            let cache = loader.cache();
            if cache.generation() != generation || !cache.is_relevant(&asset.id) {
                return;
            }
            loader.request(&asset, Tier::Medium, FetchPriority::Prefetch);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::TieredImageCache;
    use crate::library::MemoryLibrary;
    use crate::state::settings::SessionSettings;
    use std::sync::Arc;
    use std::time::Duration;

    fn scheduler(library: Arc<MemoryLibrary>, limit: usize) -> PrefetchScheduler {
        let settings = SessionSettings::default();
        let cache = Arc::new(TieredImageCache::new(limit));
        let loader = ImageLoader::new(cache, library, Arc::new(settings.clone()));
        PrefetchScheduler::new(loader, settings.max_prefetched_photos)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    #[tokio::test]
    async fn test_window_starts_behind_visible_stack() {
        let library = Arc::new(MemoryLibrary::with_count(20));
        let batch = Batch::from_assets(library.assets().to_vec());
        let prefetch = scheduler(Arc::clone(&library), 15);

        let window = prefetch.window(&batch, 2);
        assert_eq!(window.len(), 5);
        assert_eq!(window[0].id, batch.get(5).unwrap().id);

        // Near the end the window is clipped
        assert_eq!(prefetch.window(&batch, 14).len(), 3);
        assert!(prefetch.window(&batch, 17).is_empty());
    }

    #[tokio::test]
    async fn test_refresh_warms_thumbnails_and_promotes_next() {
        let library = Arc::new(MemoryLibrary::with_count(10));
        let batch = Batch::from_assets(library.assets().to_vec());
        let prefetch = scheduler(Arc::clone(&library), 15);

        let started = prefetch.refresh(&batch, 0);
        assert_eq!(started, 5);
        settle().await;

        let cache = prefetch.loader.cache();
        for index in 3..8 {
            let id = &batch.get(index).unwrap().id;
            assert!(cache.contains(id, Tier::Thumbnail), "index {} not warmed", index);
            assert_eq!(library.fetch_count_for(id, Tier::Thumbnail), 1);
        }
        assert!(cache.contains(&batch.get(3).unwrap().id, Tier::Medium));
        assert!(!cache.contains(&batch.get(4).unwrap().id, Tier::Medium));
        assert_eq!(library.fetch_count(), 6);
    }

    #[tokio::test]
    async fn test_refresh_is_idempotent() {
        let library = Arc::new(MemoryLibrary::with_count(10).with_delay(Duration::from_millis(20)));
        let batch = Batch::from_assets(library.assets().to_vec());
        let prefetch = scheduler(Arc::clone(&library), 15);

        assert_eq!(prefetch.refresh(&batch, 0), 5);
        // Still in flight
        assert_eq!(prefetch.refresh(&batch, 0), 0);
        settle().await;
        let after_first = library.fetch_count();

        // Everything cached
        assert_eq!(prefetch.refresh(&batch, 0), 0);
        settle().await;
        assert_eq!(library.fetch_count(), after_first);
        assert_eq!(after_first, 6);
    }

    #[tokio::test]
    async fn test_abandoned_asset_is_not_promoted() {
        let library = Arc::new(MemoryLibrary::with_count(10).with_delay(Duration::from_millis(20)));
        let batch = Batch::from_assets(library.assets().to_vec());
        let prefetch = scheduler(Arc::clone(&library), 15);

        prefetch.refresh(&batch, 0);
        // Jump far ahead before index 3's thumbnail lands
        prefetch.loader.cache().set_prefetch_window(std::iter::empty());
        settle().await;

        let id = &batch.get(3).unwrap().id;
        assert_eq!(library.fetch_count_for(id, Tier::Medium), 0);
    }
}
