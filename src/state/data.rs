/// Shared data structures for the session state
///
/// These structs represent the data model that flows between
/// the photo library, the image cache and the card stack.

use chrono::{DateTime, Utc};
use std::fmt;

use crate::cache::{DecodedImage, Tier};

/// Opaque identifier of one library photo
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AssetId(String);

impl AssetId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Represents a single photo in the library
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AssetRef {
    /// Library-unique identifier
    pub id: AssetId,
    /// When the photo was created (libraries list newest first)
    pub created_at: DateTime<Utc>,
}

impl AssetRef {
    pub fn new(id: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: AssetId::new(id),
            created_at,
        }
    }
}

/// Which way the user swiped the top card
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwipeDirection {
    /// Archive
    Left,
    /// Keep
    Right,
}

impl SwipeDirection {
    /// The triage decision this swipe stands for
    pub fn decision(&self) -> &'static str {
        match self {
            SwipeDirection::Left => "archive",
            SwipeDirection::Right => "keep",
        }
    }
}

/// What a card currently shows
#[derive(Debug, Clone)]
pub enum CardImage {
    /// A decoded image at some tier
    Ready(DecodedImage),
    /// Nothing could be fetched; the UI draws a placeholder with a spinner
    Placeholder,
}

impl CardImage {
    /// Tier of the shown image, `None` for a placeholder
    pub fn tier(&self) -> Option<Tier> {
        match self {
            CardImage::Ready(image) => Some(image.tier()),
            CardImage::Placeholder => None,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self, CardImage::Placeholder)
    }
}

/// One card of the visible stack
#[derive(Debug, Clone)]
pub struct StackCard {
    /// The photo on this card
    pub asset: AssetRef,
    /// Image (or placeholder) currently shown
    pub image: CardImage,
    /// 0 = topmost, interactive card; 1 and 2 are background cards
    pub position: usize,
}

impl StackCard {
    /// Resolution tier a card wants at this stack position
    pub fn desired_tier(position: usize) -> Tier {
        if position == 0 {
            Tier::High
        } else {
            Tier::Medium
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_desired_tier_by_position() {
        assert_eq!(StackCard::desired_tier(0), Tier::High);
        assert_eq!(StackCard::desired_tier(1), Tier::Medium);
        assert_eq!(StackCard::desired_tier(2), Tier::Medium);
    }

    #[test]
    fn test_swipe_decisions() {
        assert_eq!(SwipeDirection::Left.decision(), "archive");
        assert_eq!(SwipeDirection::Right.decision(), "keep");
    }
}
