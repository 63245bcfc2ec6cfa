//! Chain manager: the per-chat façade the bot talks to.
//!
//! Hydrates [`Chain`]s from the [`ChatStore`], serializes every
//! read-modify-write for a chat behind a per-chat lock, and exposes the
//! learn / generate / reset / migrate operations.

use std::sync::Arc;

use markovbot_types::chat::ChatId;
use markovbot_types::config::StoreConfig;
use markovbot_types::error::StoreError;
use tracing::{debug, info, warn};

use crate::chain::{Chain, CharFilter, is_allowed_char};
use crate::service::locks::{KeyGuard, KeyedLocks};
use crate::store::{ChainBackend, ChatStore};

/// Exclusive access to one chat's chain.
pub type ChatGuard<'a> = KeyGuard<'a, ChatId>;

/// Size summary of one chat's chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct ChainStats {
    /// Distinct tokens.
    pub words: usize,
    /// Distinct (token, successor) pairs, end of message included.
    pub transitions: usize,
    /// Sum of all transition counts.
    pub observations: u64,
}

/// Per-chat chain operations over a bounded chat store.
pub struct ChainManager<B: ChainBackend> {
    store: ChatStore<B>,
    locks: KeyedLocks<ChatId>,
    char_filter: CharFilter,
    max_message_tokens: usize,
}

impl<B: ChainBackend> ChainManager<B> {
    pub fn new(store: ChatStore<B>, config: &StoreConfig) -> Self {
        Self {
            store,
            locks: KeyedLocks::new(),
            char_filter: is_allowed_char,
            max_message_tokens: config.max_message_tokens,
        }
    }

    /// Open a store over `backend` (checking it is usable) and wrap it.
    pub async fn open(backend: B, config: &StoreConfig) -> Result<Self, StoreError> {
        let store = ChatStore::open(backend, config).await?;
        Ok(Self::new(store, config))
    }

    /// Use `filter` instead of [`is_allowed_char`] for chains handed out by
    /// this manager.
    pub fn with_char_filter(mut self, filter: CharFilter) -> Self {
        self.char_filter = filter;
        self
    }

    pub fn store(&self) -> &ChatStore<B> {
        &self.store
    }

    /// Default token limit for [`ChainManager::generate_for_chat`].
    pub fn max_message_tokens(&self) -> usize {
        self.max_message_tokens
    }

    /// Wait for exclusive access to `chat_id`.
    ///
    /// Hold the guard across a [`ChainManager::get_chain_for_chat`] /
    /// [`ChainManager::save_chain_for_chat`] pair so no concurrent update to
    /// the same chat is lost. Other chats are unaffected.
    pub async fn lock_chat(&self, chat_id: ChatId) -> ChatGuard<'_> {
        self.locks.lock(chat_id).await
    }

    /// Hydrate the chain for `chat_id`.
    ///
    /// Unknown chats get an empty chain. A stored record that could not be
    /// parsed is logged and treated as empty; the next save replaces it.
    pub async fn get_chain_for_chat(&self, chat_id: ChatId) -> Result<Chain, StoreError> {
        let chain = match self.store.read(chat_id).await {
            Ok(record) => Chain::from_record(Arc::unwrap_or_clone(record)),
            Err(StoreError::Corrupt { reason, .. }) => {
                warn!(%chat_id, %reason, "stored chain unreadable, starting from an empty chain");
                Chain::new()
            }
            Err(err) => return Err(err),
        };
        Ok(chain.with_char_filter(self.char_filter))
    }

    /// Store `chain` as the current chain of `chat_id`.
    pub async fn save_chain_for_chat(&self, chat_id: ChatId, chain: &Chain) -> Result<(), StoreError> {
        self.store.write(chat_id, chain.to_record());
        Ok(())
    }

    /// Locked read-modify-write of one chat's chain.
    pub async fn update_chain<T, F>(&self, chat_id: ChatId, update: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Chain) -> T,
    {
        let _guard = self.lock_chat(chat_id).await;
        let mut chain = self.get_chain_for_chat(chat_id).await?;
        let out = update(&mut chain);
        self.save_chain_for_chat(chat_id, &chain).await?;
        Ok(out)
    }

    /// Learn the transitions of one message. Blank messages are ignored
    /// without touching the store.
    pub async fn learn_message(&self, chat_id: ChatId, text: &str) -> Result<(), StoreError> {
        if text.trim().is_empty() {
            return Ok(());
        }
        self.update_chain(chat_id, |chain| chain.add_message(text)).await?;
        debug!(%chat_id, "learned message");
        Ok(())
    }

    /// Generate a message for `chat_id`, at most `max_tokens` tokens long
    /// (the configured default when `None`).
    pub async fn generate_for_chat(
        &self,
        chat_id: ChatId,
        max_tokens: Option<usize>,
    ) -> Result<String, StoreError> {
        let limit = max_tokens.unwrap_or(self.max_message_tokens);
        let _guard = self.lock_chat(chat_id).await;
        let chain = self.get_chain_for_chat(chat_id).await?;
        Ok(chain.generate_message(limit))
    }

    /// Replace the chain of `chat_id` with an empty one.
    pub async fn reset_chat(&self, chat_id: ChatId) -> Result<(), StoreError> {
        let _guard = self.lock_chat(chat_id).await;
        let chain = Chain::new().with_char_filter(self.char_filter);
        self.save_chain_for_chat(chat_id, &chain).await?;
        info!(%chat_id, "chain reset");
        Ok(())
    }

    /// Copy the chain of `from` over the chain of `to`, as happens when a
    /// group is upgraded and changes id. `from` keeps its chain.
    pub async fn migrate_chat(&self, from: ChatId, to: ChatId) -> Result<(), StoreError> {
        if from == to {
            return Ok(());
        }
        // Fixed lock order so two opposite migrations cannot deadlock.
        let (first, second) = if from < to { (from, to) } else { (to, from) };
        let _first = self.lock_chat(first).await;
        let _second = self.lock_chat(second).await;

        let chain = self.get_chain_for_chat(from).await?;
        self.save_chain_for_chat(to, &chain).await?;
        info!(%from, %to, words = chain.words().len(), "chain migrated");
        Ok(())
    }

    /// Word, transition and observation counts for `chat_id`.
    pub async fn chain_stats(&self, chat_id: ChatId) -> Result<ChainStats, StoreError> {
        let _guard = self.lock_chat(chat_id).await;
        let record = self.get_chain_for_chat(chat_id).await?.to_record();
        Ok(ChainStats {
            words: record.words.len(),
            transitions: record.transitions.values().map(|s| s.len()).sum(),
            observations: record.transitions.values().flat_map(|s| s.values()).sum(),
        })
    }

    /// Every chat that has a stored or resident chain.
    pub async fn list_chats(&self) -> Result<Vec<ChatId>, StoreError> {
        self.store.known_chats().await
    }

    /// Persist every resident chain. Call once on shutdown.
    pub async fn flush_all(&self) -> Result<usize, StoreError> {
        self.store.flush_all().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use markovbot_types::chain::{ChainRecord, SENTINEL};

    use crate::chain::EMPTY_CHAIN_PLACEHOLDER;
    use crate::store::MemoryBackend;

    fn config(capacity: usize) -> StoreConfig {
        StoreConfig {
            cache_capacity: capacity,
            ..StoreConfig::default()
        }
    }

    fn manager(backend: MemoryBackend, capacity: usize) -> ChainManager<MemoryBackend> {
        ChainManager::new(ChatStore::new(backend, &config(capacity)), &config(capacity))
    }

    #[tokio::test]
    async fn unknown_chat_gets_empty_chain() {
        let manager = manager(MemoryBackend::new(), 10);
        let chain = manager.get_chain_for_chat(ChatId(5)).await.unwrap();
        assert!(chain.is_empty());
        assert_eq!(
            manager.generate_for_chat(ChatId(5), None).await.unwrap(),
            EMPTY_CHAIN_PLACEHOLDER
        );
    }

    #[tokio::test]
    async fn learn_then_generate() {
        let manager = manager(MemoryBackend::new(), 10);
        manager.learn_message(ChatId(1), "hello world").await.unwrap();

        let chain = manager.get_chain_for_chat(ChatId(1)).await.unwrap();
        assert_eq!(chain.usage_count("hello", "world"), Some(1));
        assert_eq!(chain.usage_count("world", SENTINEL), Some(1));

        let text = manager.generate_for_chat(ChatId(1), Some(1)).await.unwrap();
        assert!(text == "hello" || text == "world", "got {text:?}");
    }

    #[tokio::test]
    async fn blank_message_does_not_touch_store() {
        let manager = manager(MemoryBackend::new(), 10);
        manager.learn_message(ChatId(1), "   \n").await.unwrap();
        assert!(manager.store().is_empty());
    }

    #[tokio::test]
    async fn concurrent_learns_are_not_lost() {
        let backend = MemoryBackend::new().with_delay(Duration::from_millis(2));
        let manager = Arc::new(manager(backend, 10));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let manager = Arc::clone(&manager);
            handles.push(tokio::spawn(async move {
                manager.learn_message(ChatId(9), "x y").await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let chain = manager.get_chain_for_chat(ChatId(9)).await.unwrap();
        assert_eq!(chain.usage_count("x", "y"), Some(10));
        assert_eq!(chain.usage_count("y", SENTINEL), Some(10));
    }

    #[tokio::test]
    async fn corrupt_record_falls_back_to_empty_chain() {
        let backend = MemoryBackend::new();
        let mut seeded = Chain::new();
        seeded.add_message("old words");
        backend.insert(ChatId(4), seeded.to_record());
        backend.mark_corrupt(ChatId(4));

        let manager = manager(backend, 10);
        assert!(manager.get_chain_for_chat(ChatId(4)).await.unwrap().is_empty());

        manager.learn_message(ChatId(4), "new words").await.unwrap();
        let chain = manager.get_chain_for_chat(ChatId(4)).await.unwrap();
        assert_eq!(chain.usage_count("new", "words"), Some(1));
    }

    #[tokio::test]
    async fn reset_clears_chain() {
        let manager = manager(MemoryBackend::new(), 10);
        manager.learn_message(ChatId(2), "a b c").await.unwrap();
        manager.reset_chat(ChatId(2)).await.unwrap();
        assert!(manager.get_chain_for_chat(ChatId(2)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn migrate_copies_chain_and_keeps_source() {
        let manager = manager(MemoryBackend::new(), 10);
        manager.learn_message(ChatId(-100), "a b").await.unwrap();
        manager.learn_message(ChatId(-200), "stale").await.unwrap();

        manager.migrate_chat(ChatId(-100), ChatId(-200)).await.unwrap();

        let to = manager.get_chain_for_chat(ChatId(-200)).await.unwrap();
        assert_eq!(to.usage_count("a", "b"), Some(1));
        assert_eq!(to.usage_count("stale", SENTINEL), None);
        let from = manager.get_chain_for_chat(ChatId(-100)).await.unwrap();
        assert_eq!(from.usage_count("a", "b"), Some(1));
    }

    #[tokio::test]
    async fn migrate_to_self_is_noop() {
        let manager = manager(MemoryBackend::new(), 10);
        manager.learn_message(ChatId(1), "a b").await.unwrap();
        manager.migrate_chat(ChatId(1), ChatId(1)).await.unwrap();
        let chain = manager.get_chain_for_chat(ChatId(1)).await.unwrap();
        assert_eq!(chain.usage_count("a", "b"), Some(1));
    }

    #[tokio::test]
    async fn evicted_chain_survives_reload() {
        let manager = manager(MemoryBackend::new(), 2);
        for id in 1..=3 {
            manager.learn_message(ChatId(id), "p q").await.unwrap();
        }
        manager.store().settle().await;

        assert!(!manager.store().is_resident(ChatId(1)));
        assert!(manager.store().backend().stored(ChatId(1)).is_some());

        manager.learn_message(ChatId(1), "p q").await.unwrap();
        let chain = manager.get_chain_for_chat(ChatId(1)).await.unwrap();
        assert_eq!(chain.usage_count("p", "q"), Some(2));
    }

    #[tokio::test]
    async fn stats_and_listing() {
        let backend = MemoryBackend::new();
        backend.insert(ChatId(7), ChainRecord::default());
        let manager = manager(backend, 10);
        manager.learn_message(ChatId(3), "a b a").await.unwrap();

        let stats = manager.chain_stats(ChatId(3)).await.unwrap();
        assert_eq!(
            stats,
            ChainStats {
                words: 2,
                transitions: 3,
                observations: 3,
            }
        );
        assert_eq!(manager.list_chats().await.unwrap(), vec![ChatId(3), ChatId(7)]);
    }

    #[tokio::test]
    async fn flush_persists_everything() {
        let manager = manager(MemoryBackend::new(), 10);
        manager.learn_message(ChatId(1), "one").await.unwrap();
        manager.learn_message(ChatId(2), "two").await.unwrap();

        assert_eq!(manager.flush_all().await.unwrap(), 2);
        assert!(manager.store().is_empty());
        let stored = manager.store().backend().stored(ChatId(2)).unwrap();
        assert_eq!(stored.words, vec!["two".to_string()]);
    }

    #[tokio::test]
    async fn custom_char_filter_applies_to_learning() {
        fn ascii_only(c: char) -> bool {
            c.is_ascii_alphanumeric()
        }
        let manager = manager(MemoryBackend::new(), 10).with_char_filter(ascii_only);
        manager.learn_message(ChatId(1), "héllo wörld!").await.unwrap();
        let chain = manager.get_chain_for_chat(ChatId(1)).await.unwrap();
        assert_eq!(chain.usage_count("hllo", "wrld"), Some(1));
    }
}
