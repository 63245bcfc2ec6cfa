//! Chat-keyed chain storage.
//!
//! [`ChatStore`] keeps a bounded number of chain records in memory and
//! writes them through a [`ChainBackend`] when they are evicted or flushed.

pub mod backend;
pub mod cache;
pub mod memory;

pub use backend::ChainBackend;
pub use cache::ChatStore;
pub use memory::MemoryBackend;
