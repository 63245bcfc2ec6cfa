//! Chat-level services built on the chat store.
//!
//! The manager owns the per-chat locking; nothing below it knows about
//! concurrent updates to the same chat.

pub mod locks;
pub mod manager;

pub use manager::{ChainManager, ChainStats, ChatGuard};
