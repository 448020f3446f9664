/// photo-swipe: prefetching card-stack cache for swipe-to-triage photo review
///
/// - `library`: where photos come from (the `AssetSource` seam)
/// - `cache`: tiered image cache and the fetch loader in front of it
/// - `stack`: batch sampling, prefetch window and the visible three-card stack
/// - `state`: shared data, settings and the session state machine

pub mod cache;
pub mod error;
pub mod library;
pub mod stack;
pub mod state;

pub use error::{Error, Result};
pub use state::session::{SessionEvent, SessionSnapshot, SessionState, SwipeSession};
