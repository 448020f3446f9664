/// Image fetch pipeline
///
/// Turns "I need asset X at tier T" into at most one library call:
/// cached images return at once, duplicate requests join the fetch already
/// in flight, and new fetches run as background tasks that publish their
/// result through the cache whether or not anyone is still waiting.
///
/// Visible cards fetch unthrottled. Prefetch fetches first take a permit
/// from a small semaphore so they can never crowd out a visible card.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Semaphore};
use tracing::{debug, warn};

use super::store::{FetchResult, FetchSlot, FetchTicket, TieredImageCache};
use super::tier::{DecodedImage, Tier};
use crate::error::{Error, Result};
use crate::library::{AssetSource, TargetSize};
use crate::state::data::AssetRef;
use crate::state::settings::SessionSettings;

/// Who a fetch is for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPriority {
    /// A card in the visible stack
    Visible,
    /// Best-effort warm-up ahead of the stack
    Prefetch,
}

/// A request that may still be running
pub struct PendingFetch {
    asset: AssetRef,
    tier: Tier,
    state: PendingState,
}

enum PendingState {
    Ready(DecodedImage),
    Waiting {
        receiver: broadcast::Receiver<FetchResult>,
        started: bool,
    },
}

impl PendingFetch {
    /// True if this request handed a new fetch to the library
    pub fn started_fetch(&self) -> bool {
        matches!(self.state, PendingState::Waiting { started: true, .. })
    }

    /// True if the image was already cached
    pub fn is_ready(&self) -> bool {
        matches!(self.state, PendingState::Ready(_))
    }

    /// Wait for the image. Dropping a `PendingFetch` without waiting
    /// does not cancel the fetch.
    pub async fn wait(self) -> Result<DecodedImage> {
        let result = match self.state {
            PendingState::Ready(image) => return Ok(image),
            PendingState::Waiting { mut receiver, .. } => receiver.recv().await,
        };

        match result {
            Ok(Some(image)) => Ok(image),
            // Closed means the cache dropped the fetch without answering
            Ok(None) | Err(_) => Err(Error::FetchUnavailable {
                asset: self.asset.id,
                tier: self.tier,
            }),
        }
    }
}

/// Deduplicating, priority-aware loader over a photo library
#[derive(Clone)]
pub struct ImageLoader {
    cache: Arc<TieredImageCache>,
    source: Arc<dyn AssetSource>,
    settings: Arc<SessionSettings>,
    prefetch_permits: Arc<Semaphore>,
}

impl ImageLoader {
    pub fn new(
        cache: Arc<TieredImageCache>,
        source: Arc<dyn AssetSource>,
        settings: Arc<SessionSettings>,
    ) -> Self {
        let prefetch_permits = Arc::new(Semaphore::new(settings.prefetch_concurrency));
        Self {
            cache,
            source,
            settings,
            prefetch_permits,
        }
    }

    pub fn cache(&self) -> &Arc<TieredImageCache> {
        &self.cache
    }

    pub fn source(&self) -> &Arc<dyn AssetSource> {
        &self.source
    }

    /// Register interest in an asset at a tier, starting a background fetch
    /// if nobody has one running. Must be called from within a tokio runtime.
    pub fn request(&self, asset: &AssetRef, tier: Tier, priority: FetchPriority) -> PendingFetch {
        let state = match self.cache.begin_fetch(&asset.id, tier) {
            FetchSlot::Cached(image) => PendingState::Ready(image),
            FetchSlot::Joined(receiver) => {
                if priority == FetchPriority::Visible {
                    // Whoever started it may still be queued behind prefetch work
                    self.cache.expedite(&asset.id, tier);
                }
                PendingState::Waiting {
                    receiver,
                    started: false,
                }
            }
            FetchSlot::Started { ticket, receiver } => {
                self.spawn_fetch(asset.clone(), ticket, priority);
                PendingState::Waiting {
                    receiver,
                    started: true,
                }
            }
        };

        PendingFetch {
            asset: asset.clone(),
            tier,
            state,
        }
    }

    /// Request and wait
    pub async fn load(&self, asset: &AssetRef, tier: Tier, priority: FetchPriority) -> Result<DecodedImage> {
        self.request(asset, tier, priority).wait().await
    }

    fn spawn_fetch(&self, asset: AssetRef, ticket: FetchTicket, priority: FetchPriority) {
        let cache = Arc::clone(&self.cache);
        let source = Arc::clone(&self.source);
        let permits = Arc::clone(&self.prefetch_permits);
        let timeout = self.settings.fetch_timeout();
        let size = TargetSize {
            tier: ticket.tier,
            long_edge_px: ticket.tier.target_size(&self.settings),
        };

        debug!(asset = %asset.id, tier = %ticket.tier, ?priority, "Starting fetch");

        tokio::spawn(async move {
            // Only prefetches queue for a permit, and only until a visible
            // card joins the fetch. The semaphore is never closed.
            let _permit = match priority {
                FetchPriority::Prefetch => {
                    let urgent = Arc::clone(&ticket.urgent);
                    tokio::select! {
                        permit = permits.acquire_owned() => permit.ok(),
                        _ = urgent.notified() => {
                            debug!(asset = %asset.id, tier = %ticket.tier, "Prefetch promoted to visible");
                            None
                        }
                    }
                }
                FetchPriority::Visible => None,
            };

            // The library call runs in its own task so a panicking source
            // still resolves every waiter
            let fetch_asset = asset.clone();
            let fetch = tokio::spawn(async move {
                fetch_with_timeout(source.as_ref(), &fetch_asset, size, timeout).await
            });
            let result = match fetch.await {
                Ok(result) => result,
                Err(e) => {
                    warn!(asset = %asset.id, tier = %ticket.tier, error = %e, "Fetch task failed");
                    None
                }
            };
            cache.finish_fetch(ticket, result);
        });
    }
}

/// One library call, bounded by `timeout`. Every failure becomes `None`.
async fn fetch_with_timeout(
    source: &dyn AssetSource,
    asset: &AssetRef,
    size: TargetSize,
    timeout: Duration,
) -> Option<DecodedImage> {
    match tokio::time::timeout(timeout, source.fetch_image(asset, size)).await {
        Ok(Ok(Some(image))) => Some(DecodedImage::new(size.tier, image)),
        Ok(Ok(None)) => {
            warn!(asset = %asset.id, tier = %size.tier, "Library returned no image");
            None
        }
        Ok(Err(e)) => {
            warn!(asset = %asset.id, tier = %size.tier, error = %e, "Fetch failed");
            None
        }
        Err(_) => {
            warn!(
                asset = %asset.id,
                tier = %size.tier,
                timeout_ms = timeout.as_millis() as u64,
                "Fetch timed out"
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::{Permission, PermissionRequest};
    use async_trait::async_trait;
    use chrono::Utc;
    use image::DynamicImage;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Library whose fetches take `delay` and can be told to fail
    struct SlowLibrary {
        delay: Duration,
        calls: AtomicUsize,
        missing: bool,
        panics: bool,
    }

    impl SlowLibrary {
        fn new(delay: Duration) -> Self {
            Self {
                delay,
                calls: AtomicUsize::new(0),
                missing: false,
                panics: false,
            }
        }
    }

    #[async_trait]
    impl AssetSource for SlowLibrary {
        async fn check_permission(&self) -> Permission {
            Permission::Authorized
        }

        async fn request_permission(&self) -> PermissionRequest {
            PermissionRequest::Granted
        }

        async fn list_image_assets(&self) -> Result<Vec<AssetRef>> {
            Ok(Vec::new())
        }

        async fn fetch_image(&self, _asset: &AssetRef, _size: TargetSize) -> Result<Option<DynamicImage>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.panics {
                panic!("decoder blew up");
            }
            if self.missing {
                Ok(None)
            } else {
                Ok(Some(DynamicImage::new_rgb8(4, 4)))
            }
        }
    }

    fn loader_with(library: Arc<SlowLibrary>, settings: SessionSettings) -> ImageLoader {
        let cache = Arc::new(TieredImageCache::new(settings.cache_size_limit));
        ImageLoader::new(cache, library, Arc::new(settings))
    }

    #[tokio::test]
    async fn test_concurrent_loads_fetch_once() {
        let library = Arc::new(SlowLibrary::new(Duration::from_millis(30)));
        let loader = loader_with(Arc::clone(&library), SessionSettings::default());
        let asset = AssetRef::new("a", Utc::now());

        let (first, second) = tokio::join!(
            loader.load(&asset, Tier::High, FetchPriority::Visible),
            loader.load(&asset, Tier::High, FetchPriority::Visible),
        );

        assert_eq!(first.unwrap().tier(), Tier::High);
        assert_eq!(second.unwrap().tier(), Tier::High);
        assert_eq!(library.calls.load(Ordering::SeqCst), 1);
        assert!(loader.cache().contains(&asset.id, Tier::High));
    }

    #[tokio::test]
    async fn test_cached_request_is_ready() {
        let library = Arc::new(SlowLibrary::new(Duration::from_millis(1)));
        let loader = loader_with(Arc::clone(&library), SessionSettings::default());
        let asset = AssetRef::new("a", Utc::now());

        loader.load(&asset, Tier::Medium, FetchPriority::Visible).await.unwrap();
        let again = loader.request(&asset, Tier::Medium, FetchPriority::Visible);

        assert!(again.is_ready());
        assert!(!again.started_fetch());
        assert_eq!(library.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_image_is_unavailable() {
        let mut library = SlowLibrary::new(Duration::from_millis(1));
        library.missing = true;
        let library = Arc::new(library);
        let loader = loader_with(Arc::clone(&library), SessionSettings::default());
        let asset = AssetRef::new("gone", Utc::now());

        let result = loader.load(&asset, Tier::High, FetchPriority::Visible).await;

        assert!(matches!(result, Err(Error::FetchUnavailable { tier: Tier::High, .. })));
        assert!(!loader.cache().is_in_flight(&asset.id));
    }

    #[tokio::test]
    async fn test_timeout_is_unavailable() {
        let library = Arc::new(SlowLibrary::new(Duration::from_millis(500)));
        let mut settings = SessionSettings::default();
        settings.fetch_timeout_ms = 20;
        let loader = loader_with(library, settings);
        let asset = AssetRef::new("slow", Utc::now());

        let result = loader.load(&asset, Tier::Thumbnail, FetchPriority::Prefetch).await;

        assert!(matches!(result, Err(Error::FetchUnavailable { .. })));
        assert!(!loader.cache().is_in_flight(&asset.id));
    }

    #[tokio::test]
    async fn test_dropped_request_still_caches() {
        let library = Arc::new(SlowLibrary::new(Duration::from_millis(10)));
        let loader = loader_with(Arc::clone(&library), SessionSettings::default());
        let asset = AssetRef::new("a", Utc::now());

        let pending = loader.request(&asset, Tier::Thumbnail, FetchPriority::Prefetch);
        assert!(pending.started_fetch());
        drop(pending);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(loader.cache().contains(&asset.id, Tier::Thumbnail));
    }

    #[tokio::test]
    async fn test_panicking_source_is_unavailable() {
        let mut library = SlowLibrary::new(Duration::from_millis(1));
        library.panics = true;
        let library = Arc::new(library);
        let loader = loader_with(Arc::clone(&library), SessionSettings::default());
        let asset = AssetRef::new("cursed", Utc::now());

        let result = tokio::time::timeout(
            Duration::from_secs(2),
            loader.load(&asset, Tier::High, FetchPriority::Visible),
        )
        .await
        .expect("waiters must be released");
        assert!(matches!(result, Err(Error::FetchUnavailable { .. })));
        assert!(!loader.cache().is_in_flight(&asset.id));

        // A later request starts over instead of joining a dead fetch
        let retry = loader.request(&asset, Tier::High, FetchPriority::Visible);
        assert!(retry.started_fetch());
        let retried = tokio::time::timeout(Duration::from_secs(2), retry.wait())
            .await
            .expect("retry must resolve");
        assert!(retried.is_err());
        assert_eq!(library.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_visible_join_skips_prefetch_queue() {
        use crate::library::MemoryLibrary;

        let library = Arc::new(MemoryLibrary::with_count(6).with_delay(Duration::from_millis(50)));
        let mut settings = SessionSettings::default();
        settings.prefetch_concurrency = 1;
        let cache = Arc::new(TieredImageCache::new(settings.cache_size_limit));
        let loader = ImageLoader::new(cache, Arc::clone(&library) as Arc<dyn AssetSource>, Arc::new(settings));
        let assets = library.assets().to_vec();

        for asset in &assets[..4] {
            loader.request(asset, Tier::Thumbnail, FetchPriority::Prefetch);
        }
        let queued = loader.request(&assets[5], Tier::Medium, FetchPriority::Prefetch);
        assert!(queued.started_fetch());

        // The card became visible while its medium tier sat in the queue
        let started = std::time::Instant::now();
        let image = loader
            .load(&assets[5], Tier::Medium, FetchPriority::Visible)
            .await
            .unwrap();
        assert_eq!(image.tier(), Tier::Medium);
        assert!(started.elapsed() < Duration::from_millis(150));

        let order = library.fetches();
        let position = order
            .iter()
            .position(|(id, tier)| *id == assets[5].id && *tier == Tier::Medium)
            .unwrap();
        assert!(position <= 1, "medium fetched at {} in {:?}", position, order);
        assert_eq!(library.fetch_count_for(&assets[5].id, Tier::Medium), 1);
    }
}
