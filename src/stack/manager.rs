/// Visible card stack
///
/// Owns the batch, the cursor and the up-to-three visible cards. The stack
/// is always the contiguous window `batch[cursor..cursor + 3]`; every swipe
/// re-derives it from the batch instead of patching the old one.

use std::sync::Arc;
use tracing::{debug, info, warn};

use super::batch::Batch;
use super::prefetch::PrefetchScheduler;
use super::VISIBLE_STACK_SIZE;
use crate::cache::{FetchPriority, ImageLoader, TieredImageCache};
use crate::error::{Error, Result};
use crate::state::data::{AssetRef, CardImage, StackCard, SwipeDirection};

/// What a swipe did to the stack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceOutcome {
    /// Moved to the next card; `last_photo` is set when the new top card is the final one
    Advanced { cursor: usize, last_photo: bool },
    /// The final card was swiped; the stack is now empty
    BatchComplete,
}

/// Read-only view handed to listeners whenever the stack changes
#[derive(Debug, Clone, Default)]
pub struct StackView {
    pub cursor: usize,
    pub batch_len: usize,
    pub visible_stack: Vec<StackCard>,
    pub is_preparing_stack: bool,
}

impl StackView {
    /// "{cursor + 1} of {batch length}", clamped once the batch is done
    pub fn progress(&self) -> String {
        format!("{} of {}", (self.cursor + 1).min(self.batch_len), self.batch_len)
    }
}

/// Called after every stack mutation
pub type StackListener = Arc<dyn Fn(&StackView) + Send + Sync>;

pub struct StackManager {
    loader: ImageLoader,
    prefetch: PrefetchScheduler,
    batch: Batch,
    cursor: usize,
    visible_stack: Vec<StackCard>,
    is_preparing_stack: bool,
    listener: Option<StackListener>,
}

impl StackManager {
    pub fn new(loader: ImageLoader, max_prefetched: usize) -> Self {
        let prefetch = PrefetchScheduler::new(loader.clone(), max_prefetched);
        Self {
            loader,
            prefetch,
            batch: Batch::default(),
            cursor: 0,
            visible_stack: Vec::new(),
            is_preparing_stack: false,
            listener: None,
        }
    }

    pub fn set_listener(&mut self, listener: StackListener) {
        self.listener = Some(listener);
    }

    pub fn batch(&self) -> &Batch {
        &self.batch
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn visible_stack(&self) -> &[StackCard] {
        &self.visible_stack
    }

    pub fn is_preparing_stack(&self) -> bool {
        self.is_preparing_stack
    }

    pub fn has_more_photos(&self) -> bool {
        self.cursor < self.batch.len()
    }

    pub fn cache(&self) -> &Arc<TieredImageCache> {
        self.loader.cache()
    }

    pub fn prefetch(&self) -> &PrefetchScheduler {
        &self.prefetch
    }

    pub fn view(&self) -> StackView {
        StackView {
            cursor: self.cursor,
            batch_len: self.batch.len(),
            visible_stack: self.visible_stack.clone(),
            is_preparing_stack: self.is_preparing_stack,
        }
    }

    fn notify(&self) {
        if let Some(listener) = &self.listener {
            listener(&self.view());
        }
    }

    fn set_preparing(&mut self, preparing: bool) {
        self.is_preparing_stack = preparing;
        self.notify();
    }

    /// Swap in a fully built stack in one assignment
    fn publish(&mut self, stack: Vec<StackCard>) {
        self.cache()
            .set_visible(stack.iter().map(|card| card.asset.id.clone()));
        self.visible_stack = stack;
    }

    /// How many cards the stack should hold at the current cursor
    fn target_len(&self) -> usize {
        VISIBLE_STACK_SIZE.min(self.batch.len().saturating_sub(self.cursor))
    }

    /// Assets the stack will show at the current cursor
    fn target_assets(&self) -> &[AssetRef] {
        self.batch.window(self.cursor, VISIBLE_STACK_SIZE)
    }

    /// Replace the batch and rewind to its first card. The stack stays
    /// empty until `prime_initial_stack`.
    pub fn load_batch(&mut self, batch: Batch) {
        info!(size = batch.len(), "Loaded new batch");
        self.batch = batch;
        self.cursor = 0;
        self.visible_stack = Vec::new();
        self.notify();
    }

    /// Drop the batch, the stack and every cached image. Fetches still
    /// running finish into a stale generation and are discarded.
    pub fn reset(&mut self) {
        let generation = self.cache().reset();
        debug!(generation, "Stack reset");
        self.batch = Batch::default();
        self.cursor = 0;
        self.visible_stack = Vec::new();
        self.is_preparing_stack = false;
        self.notify();
    }

    /// Load the first cards one after another, top card first, then
    /// start warming the prefetch window.
    pub async fn prime_initial_stack(&mut self) {
        self.set_preparing(true);
        let targets: Vec<AssetRef> = self.target_assets().to_vec();
        self.cache().set_visible(targets.iter().map(|a| a.id.clone()));

        self.visible_stack = Vec::with_capacity(targets.len());
        for index in self.cursor..self.cursor + targets.len() {
            if let Some(card) = self.load_card(index).await {
                self.visible_stack.push(card);
                self.notify();
            }
        }

        self.set_preparing(false);
        self.prefetch.refresh(&self.batch, self.cursor);
        debug!(cards = self.visible_stack.len(), cursor = self.cursor, "Stack primed");
    }

    /// Resolve the card for `batch[index]`, wanting high tier on top and
    /// medium behind it.
    ///
    /// 1. Wanted tier cached: use it.
    /// 2. A lower tier cached: show that now and upgrade in the background.
    /// 3. Already being fetched: wait for that fetch.
    /// 4. Otherwise fetch it and wait.
    ///
    /// A failed fetch yields a placeholder card. Returns `None` only when
    /// `index` is outside the batch or behind the cursor.
    pub async fn load_card(&self, index: usize) -> Option<StackCard> {
        let asset = self.batch.get(index)?.clone();
        let position = index.checked_sub(self.cursor)?;
        let tier = StackCard::desired_tier(position);
        let cache = self.cache();

        let image = if let Some(image) = cache.get(&asset.id, tier) {
            CardImage::Ready(image)
        } else if let Some(lower) = cache.get_lower(&asset.id, tier) {
            debug!(asset = %asset.id, shown = %lower.tier(), wanted = %tier, "Showing lower tier while upgrading");
            self.loader.request(&asset, tier, FetchPriority::Visible);
            CardImage::Ready(lower)
        } else {
            match self.loader.load(&asset, tier, FetchPriority::Visible).await {
                Ok(image) => CardImage::Ready(image),
                Err(e) => {
                    warn!(asset = %asset.id, tier = %tier, error = %e, "Showing placeholder");
                    CardImage::Placeholder
                }
            }
        };

        Some(StackCard {
            asset,
            image,
            position,
        })
    }

    /// Swipe the top card away and slide the rest forward.
    ///
    /// Swiping the last card empties the stack and completes the batch.
    /// Otherwise the new stack is built off to the side (cards that stay
    /// visible are reused, the new back card is loaded) and published in
    /// one assignment, then the prefetch window moves and the cache is
    /// trimmed around the new visible set.
    pub async fn advance(&mut self, direction: SwipeDirection) -> Result<AdvanceOutcome> {
        let top = self
            .visible_stack
            .first()
            .map(|card| card.asset.id.clone())
            .ok_or_else(|| Error::InvalidState("no card to swipe".into()))?;

        info!(
            asset = %top,
            decision = direction.decision(),
            cursor = self.cursor,
            "Swiped card"
        );

        if self.cursor + 1 >= self.batch.len() {
            self.cursor = self.batch.len();
            self.visible_stack = Vec::new();
            self.cache().set_visible(std::iter::empty());
            self.cache().set_prefetch_window(std::iter::empty());
            self.notify();
            info!(size = self.batch.len(), "Batch complete");
            return Ok(AdvanceOutcome::BatchComplete);
        }

        self.set_preparing(true);
        self.cursor += 1;

        let targets: Vec<AssetRef> = self.target_assets().to_vec();
        self.cache().set_visible(targets.iter().map(|a| a.id.clone()));

        let mut stack = Vec::with_capacity(targets.len());
        for (position, asset) in targets.iter().enumerate() {
            let reused = self
                .visible_stack
                .get(position + 1)
                .filter(|card| card.asset.id == asset.id);

            let card = match reused {
                Some(card) => StackCard {
                    asset: card.asset.clone(),
                    image: self.upgrade_image(&card.asset, &card.image, position),
                    position,
                },
                None => match self.load_card(self.cursor + position).await {
                    Some(card) => card,
                    None => break,
                },
            };
            stack.push(card);
        }

        debug_assert_eq!(stack.len(), self.target_len());
        self.publish(stack);
        self.set_preparing(false);

        self.prefetch.refresh(&self.batch, self.cursor);
        self.cache().evict_if_needed();

        Ok(AdvanceOutcome::Advanced {
            cursor: self.cursor,
            last_photo: self.cursor + 1 == self.batch.len(),
        })
    }

    /// Pick up background upgrades that have landed in the cache since the
    /// cards were built. Returns the number of cards that changed.
    pub fn refresh_visible_images(&mut self) -> usize {
        let mut changed = 0;
        let mut stack = self.visible_stack.clone();
        for card in stack.iter_mut() {
            let wanted = StackCard::desired_tier(card.position);
            if card.image.tier().map_or(false, |t| t >= wanted) {
                continue;
            }
            if let Some(image) = self.cache().get(&card.asset.id, wanted) {
                card.image = CardImage::Ready(image);
                changed += 1;
            }
        }

        if changed > 0 {
            self.visible_stack = stack;
            self.notify();
        }
        changed
    }

    /// Image for a card that moved to `position`: the best cached tier up
    /// to what the position wants, with a background fetch queued if that
    /// is still short of it.
    fn upgrade_image(&self, asset: &AssetRef, current: &CardImage, position: usize) -> CardImage {
        let wanted = StackCard::desired_tier(position);
        let shown = current.tier();
        if shown.map_or(false, |t| t >= wanted) {
            return current.clone();
        }

        let cache = self.cache();
        if let Some(image) = cache.get(&asset.id, wanted) {
            return CardImage::Ready(image);
        }

        self.loader.request(asset, wanted, FetchPriority::Visible);
        match cache.get_lower(&asset.id, wanted) {
            Some(image) if Some(image.tier()) > shown => CardImage::Ready(image),
            _ => current.clone(),
        }
    }
}
