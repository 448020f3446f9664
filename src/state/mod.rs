/// State management module
///
/// This module handles all session state, including:
/// - Shared data structures (data.rs)
/// - Session tunables and their JSON form (settings.rs)
/// - The swipe session state machine and its observable snapshot (session.rs)

pub mod data;
pub mod settings;
pub mod session;
