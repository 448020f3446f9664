/// Card stack module
///
/// This module handles:
/// - Drawing a random batch from the library (batch.rs)
/// - Warming upcoming photos ahead of the stack (prefetch.rs)
/// - The visible three-card stack and swipe handling (manager.rs)

pub mod batch;
pub mod prefetch;
pub mod manager;

pub use batch::Batch;
pub use manager::{AdvanceOutcome, StackListener, StackManager, StackView};
pub use prefetch::PrefetchScheduler;

/// Cards shown at once: the interactive top card and two behind it
pub const VISIBLE_STACK_SIZE: usize = 3;
