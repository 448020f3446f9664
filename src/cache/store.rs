/// In-memory tiered image cache with keep-set aware LRU eviction.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tokio::sync::{broadcast, Notify};
use tracing::{debug, trace};

use super::tier::{DecodedImage, Tier};
use crate::state::data::AssetId;

/// Result broadcast to everyone waiting on one fetch
pub(crate) type FetchResult = Option<DecodedImage>;

/// Last use of an asset, shared by all of its tiers
#[derive(Debug, Clone, Copy)]
struct Access {
    at: Instant,
    /// Strictly increasing; orders accesses that share an Instant
    tick: u64,
}

/// An outstanding fetch for one (asset, tier)
struct InFlight {
    sender: broadcast::Sender<FetchResult>,
    generation: u64,
    /// Wakes a throttled fetch that a visible card now depends on
    urgent: Arc<Notify>,
}

/// Assets that eviction must not touch
#[derive(Debug, Default)]
struct KeepSet {
    /// Cards in the visible stack; protected at every tier
    visible: HashSet<AssetId>,
    /// Scheduled prefetch window; protects thumbnails only
    prefetch: HashSet<AssetId>,
    /// Assets the UI is drawing right now; protects thumbnails only
    rendering: HashSet<AssetId>,
}

impl KeepSet {
    fn protects_thumbnail(&self, id: &AssetId) -> bool {
        self.visible.contains(id) || self.prefetch.contains(id) || self.rendering.contains(id)
    }

    fn clear(&mut self) {
        self.visible.clear();
        self.prefetch.clear();
        self.rendering.clear();
    }
}

/// Counters for monitoring cache behaviour
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    /// Requests that joined a fetch already in flight
    pub coalesced: u64,
    /// Fetches actually handed to the library
    pub fetches_started: u64,
    /// Completions dropped because the batch changed underneath them
    pub stale_discarded: u64,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<(AssetId, Tier), DecodedImage>,
    last_access: HashMap<AssetId, Access>,
    keep: KeepSet,
    in_flight: HashMap<(AssetId, Tier), InFlight>,
    generation: u64,
    clock: u64,
    stats: CacheStats,
}

impl CacheState {
    fn touch(&mut self, id: &AssetId) {
        self.clock += 1;
        self.last_access.insert(
            id.clone(),
            Access {
                at: Instant::now(),
                tick: self.clock,
            },
        );
    }

    fn tick_of(&self, id: &AssetId) -> u64 {
        self.last_access.get(id).map(|a| a.tick).unwrap_or(0)
    }
}

/// Handed to whoever must perform a fetch; returned through
/// [`TieredImageCache::finish_fetch`] when the library answers.
pub(crate) struct FetchTicket {
    pub(crate) asset: AssetId,
    pub(crate) tier: Tier,
    pub(crate) generation: u64,
    /// Signalled by [`TieredImageCache::expedite`]
    pub(crate) urgent: Arc<Notify>,
    sender: broadcast::Sender<FetchResult>,
}

/// Outcome of registering interest in an (asset, tier)
pub(crate) enum FetchSlot {
    /// Already cached
    Cached(DecodedImage),
    /// Someone else is fetching it; wait on the receiver
    Joined(broadcast::Receiver<FetchResult>),
    /// Caller must fetch it and call `finish_fetch`
    Started {
        ticket: FetchTicket,
        receiver: broadcast::Receiver<FetchResult>,
    },
}

/// Decoded images at three tiers, keyed by asset.
///
/// The entry count across all tiers is bounded by `limit`; eviction sheds
/// cheap tiers first and never touches cards in the visible stack. All
/// mutation goes through one lock, which is the owner context fetch
/// completions re-enter to publish their results.
pub struct TieredImageCache {
    state: Mutex<CacheState>,
    limit: usize,
    /// (asset, tier) of every fetch result that made it into the cache
    landed: broadcast::Sender<(AssetId, Tier)>,
}

impl TieredImageCache {
    pub fn new(limit: usize) -> Self {
        let (landed, _) = broadcast::channel(64);
        Self {
            state: Mutex::new(CacheState::default()),
            limit,
            landed,
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        // A panic while holding the lock cannot leave the maps half-updated
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Get a cached image, refreshing the asset's last access
    pub fn get(&self, id: &AssetId, tier: Tier) -> Option<DecodedImage> {
        let mut state = self.lock();
        match state.entries.get(&(id.clone(), tier)).cloned() {
            Some(image) => {
                state.touch(id);
                state.stats.hits += 1;
                Some(image)
            }
            None => {
                state.stats.misses += 1;
                None
            }
        }
    }

    /// Best cached image strictly below `tier`, if any
    pub fn get_lower(&self, id: &AssetId, tier: Tier) -> Option<DecodedImage> {
        let mut state = self.lock();
        let found = tier
            .lower()
            .find_map(|lower| state.entries.get(&(id.clone(), lower)).cloned());
        if found.is_some() {
            state.touch(id);
        }
        found
    }

    /// Presence check that does not count as an access
    pub fn contains(&self, id: &AssetId, tier: Tier) -> bool {
        self.lock().entries.contains_key(&(id.clone(), tier))
    }

    /// Insert an image and evict if the ceiling is exceeded
    pub fn put(&self, id: &AssetId, tier: Tier, image: DecodedImage) {
        let mut state = self.lock();
        self.insert_locked(&mut state, id, tier, image);
    }

    fn insert_locked(&self, state: &mut CacheState, id: &AssetId, tier: Tier, image: DecodedImage) {
        state.entries.insert((id.clone(), tier), image);
        state.touch(id);
        trace!(asset = %id, tier = %tier, entries = state.entries.len(), "Cached image");
        self.evict_locked(state);
    }

    /// Evict until the entry count is back at the limit, or only
    /// protected entries remain. Returns the number of entries removed.
    pub fn evict_if_needed(&self) -> usize {
        let mut state = self.lock();
        self.evict_locked(&mut state)
    }

    fn evict_locked(&self, state: &mut CacheState) -> usize {
        if state.entries.len() <= self.limit {
            return 0;
        }

        let mut evicted: usize = 0;
        for tier in Tier::ALL {
            if state.entries.len() <= self.limit {
                break;
            }

            let mut candidates: Vec<(u64, AssetId)> = state
                .entries
                .keys()
                .filter(|(id, t)| {
                    *t == tier
                        && match tier {
                            Tier::Thumbnail => !state.keep.protects_thumbnail(id),
                            Tier::Medium | Tier::High => !state.keep.visible.contains(id),
                        }
                })
                .map(|(id, _)| (state.tick_of(id), id.clone()))
                .collect();
            candidates.sort();

            for (_, id) in candidates {
                if state.entries.len() <= self.limit {
                    break;
                }
                state.entries.remove(&(id.clone(), tier));
                if !Tier::ALL.iter().any(|t| state.entries.contains_key(&(id.clone(), *t))) {
                    state.last_access.remove(&id);
                }
                evicted += 1;
                trace!(asset = %id, tier = %tier, "Evicted image");
            }
        }

        state.stats.evictions += evicted as u64;
        if evicted > 0 {
            debug!(
                evicted,
                remaining = state.entries.len(),
                limit = self.limit,
                "Cache eviction pass"
            );
        }
        evicted
    }

    /// Replace the set of assets in the visible stack
    pub fn set_visible(&self, ids: impl IntoIterator<Item = AssetId>) {
        self.lock().keep.visible = ids.into_iter().collect();
    }

    /// Replace the set of assets in the scheduled prefetch window
    pub fn set_prefetch_window(&self, ids: impl IntoIterator<Item = AssetId>) {
        self.lock().keep.prefetch = ids.into_iter().collect();
    }

    /// Protect an asset the UI is currently drawing
    pub fn mark_rendering(&self, id: &AssetId) {
        self.lock().keep.rendering.insert(id.clone());
    }

    pub fn clear_rendering(&self, id: &AssetId) {
        self.lock().keep.rendering.remove(id);
    }

    /// Whether the asset is one of the visible cards
    pub fn is_visible(&self, id: &AssetId) -> bool {
        self.lock().keep.visible.contains(id)
    }

    /// Whether the asset is in the visible stack or prefetch window
    pub fn is_relevant(&self, id: &AssetId) -> bool {
        let state = self.lock();
        state.keep.visible.contains(id) || state.keep.prefetch.contains(id)
    }

    /// Whether any tier of this asset is being fetched
    pub fn is_in_flight(&self, id: &AssetId) -> bool {
        self.lock().in_flight.keys().any(|(asset, _)| asset == id)
    }

    /// Whether this exact (asset, tier) is being fetched
    pub fn is_tier_in_flight(&self, id: &AssetId, tier: Tier) -> bool {
        self.lock().in_flight.contains_key(&(id.clone(), tier))
    }

    /// Mark an (asset, tier) as in flight unless it is cached or already
    /// being fetched. The cache check and the in-flight registration happen
    /// under one lock, so two callers can never both get `Started`.
    pub(crate) fn begin_fetch(&self, id: &AssetId, tier: Tier) -> FetchSlot {
        let mut state = self.lock();
        let key = (id.clone(), tier);

        if let Some(image) = state.entries.get(&key).cloned() {
            state.touch(id);
            state.stats.hits += 1;
            return FetchSlot::Cached(image);
        }

        if let Some(in_flight) = state.in_flight.get(&key) {
            let receiver = in_flight.sender.subscribe();
            state.stats.coalesced += 1;
            debug!(asset = %id, tier = %tier, "Joining in-flight fetch");
            return FetchSlot::Joined(receiver);
        }

        let (sender, receiver) = broadcast::channel(4);
        let generation = state.generation;
        let urgent = Arc::new(Notify::new());
        state.in_flight.insert(
            key,
            InFlight {
                sender: sender.clone(),
                generation,
                urgent: Arc::clone(&urgent),
            },
        );
        state.stats.misses += 1;
        state.stats.fetches_started += 1;

        FetchSlot::Started {
            ticket: FetchTicket {
                asset: id.clone(),
                tier,
                generation,
                urgent,
                sender,
            },
            receiver,
        }
    }

    /// Tell the fetch in flight for (asset, tier), if any, to stop waiting
    /// behind throttled prefetch work. Returns false if nothing is in flight.
    pub(crate) fn expedite(&self, id: &AssetId, tier: Tier) -> bool {
        let state = self.lock();
        match state.in_flight.get(&(id.clone(), tier)) {
            Some(in_flight) => {
                // Stores a permit if the task is not waiting yet
                in_flight.urgent.notify_one();
                true
            }
            None => false,
        }
    }

    /// Publish the result of a fetch: cache it (if it belongs to the current
    /// generation), clear the in-flight mark and wake every waiter.
    pub(crate) fn finish_fetch(&self, ticket: FetchTicket, result: FetchResult) {
        let mut state = self.lock();
        let key = (ticket.asset.clone(), ticket.tier);

        if ticket.generation != state.generation {
            state.stats.stale_discarded += 1;
            debug!(
                asset = %ticket.asset,
                tier = %ticket.tier,
                generation = ticket.generation,
                current = state.generation,
                "Discarding fetch from a previous batch"
            );
            let _ = ticket.sender.send(None);
            return;
        }

        if state
            .in_flight
            .get(&key)
            .map(|f| f.generation == ticket.generation)
            .unwrap_or(false)
        {
            state.in_flight.remove(&key);
        }

        if let Some(image) = &result {
            let relevant = state.keep.visible.contains(&ticket.asset)
                || state.keep.prefetch.contains(&ticket.asset);
            if !relevant {
                // Cached anyway; the keep-set makes it the first thing to go
                debug!(asset = %ticket.asset, tier = %ticket.tier, "Fetched asset left the window");
            }
            self.insert_locked(&mut state, &ticket.asset, ticket.tier, image.clone());
            let _ = self.landed.send((ticket.asset.clone(), ticket.tier));
        }

        // Ignore send errors (no waiters is OK)
        let _ = ticket.sender.send(result);
    }

    /// Stream of fetch results as they are cached. Entries from before the
    /// call are not replayed.
    pub fn subscribe_landed(&self) -> broadcast::Receiver<(AssetId, Tier)> {
        self.landed.subscribe()
    }

    /// Drop every entry, in-flight mark and keep-set, and start a new
    /// generation. Returns the new generation.
    pub fn reset(&self) -> u64 {
        let mut state = self.lock();
        state.entries.clear();
        state.last_access.clear();
        state.in_flight.clear();
        state.keep.clear();
        state.generation += 1;
        debug!(generation = state.generation, "Cache reset");
        state.generation
    }

    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    /// Total entries across all tiers
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries at one tier
    pub fn tier_len(&self, tier: Tier) -> usize {
        self.lock().entries.keys().filter(|(_, t)| *t == tier).count()
    }

    /// When the asset was last read or written, at any tier
    pub fn last_access(&self, id: &AssetId) -> Option<Instant> {
        self.lock().last_access.get(id).map(|a| a.at)
    }

    pub fn stats(&self) -> CacheStats {
        self.lock().stats.clone()
    }
}
