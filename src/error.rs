/// Error types for photo-swipe
///
/// Session-level failures (permission, enumeration) escalate to the
/// session state; per-card fetch failures are absorbed as placeholders.

use thiserror::Error;

use crate::cache::Tier;
use crate::state::data::AssetId;

/// Main error type for photo-swipe
#[derive(Error, Debug)]
pub enum Error {
    /// User declined photo library access
    #[error("Photo library access denied")]
    PermissionDenied,

    /// The library returned no image for this asset at this tier
    #[error("Image unavailable: {asset} ({tier})")]
    FetchUnavailable { asset: AssetId, tier: Tier },

    /// Unexpected failure talking to the photo library
    #[error("Library error: {0}")]
    Infrastructure(String),

    /// A swipe arrived while the previous one was still resolving
    #[error("A swipe is already being processed")]
    AdvanceInProgress,

    /// Command not valid in the current session state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Settings failed validation
    #[error("Settings error: {0}")]
    Settings(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Settings (de)serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience Result type using the crate Error
pub type Result<T> = std::result::Result<T, Error>;
