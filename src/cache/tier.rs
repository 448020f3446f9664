/// Cache tiers
///
/// Every photo can be held at three resolutions:
/// - Tier 1: thumbnail (≈600px) for cards waiting in the prefetch window
/// - Tier 2: medium (≈1500px) for background cards
/// - Tier 3: high (≈2400px) for the top, interactive card

use image::DynamicImage;
use std::fmt;
use std::sync::Arc;

use crate::state::settings::SessionSettings;

/// Resolution tier, ordered by cost (thumbnail is cheapest)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Tier {
    Thumbnail,
    Medium,
    High,
}

impl Tier {
    /// All tiers, cheapest first
    pub const ALL: [Tier; 3] = [Tier::Thumbnail, Tier::Medium, Tier::High];

    /// Long-edge target size in pixels for this tier
    pub fn target_size(&self, settings: &SessionSettings) -> u32 {
        match self {
            Tier::Thumbnail => settings.thumbnail_px,
            Tier::Medium => settings.medium_px,
            Tier::High => settings.high_px,
        }
    }

    /// Tiers cheaper than this one, best first
    pub fn lower(&self) -> impl Iterator<Item = Tier> {
        let this = *self;
        Tier::ALL.into_iter().rev().filter(move |t| *t < this)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Tier::Thumbnail => "thumbnail",
            Tier::Medium => "medium",
            Tier::High => "high",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A decoded image together with the tier it was fetched at.
/// Cloning is cheap (the pixels are shared).
#[derive(Clone)]
pub struct DecodedImage {
    tier: Tier,
    image: Arc<DynamicImage>,
}

impl DecodedImage {
    pub fn new(tier: Tier, image: DynamicImage) -> Self {
        Self {
            tier,
            image: Arc::new(image),
        }
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

impl fmt::Debug for DecodedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodedImage")
            .field("tier", &self.tier)
            .field("width", &self.width())
            .field("height", &self.height())
            .finish()
    }
}
