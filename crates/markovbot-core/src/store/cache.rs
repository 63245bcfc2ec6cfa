//! Bounded chat cache sitting in front of a [`ChainBackend`].
//!
//! At most `capacity` chain records stay resident. Entries are kept in
//! insertion order and evicted from the head: reading or rewriting a resident
//! chat does not move it, so a chat that was loaded early is evicted first
//! even if it was just used. Evicted records are written to the backend
//! before they leave memory.
//!
//! Eviction runs in background tasks tracked by a [`TaskTracker`], so
//! [`ChatStore::settle`] and [`ChatStore::flush_all`] can wait for them.
//! A single async eviction lock serializes eviction passes and flushes, and
//! a second one keeps overlapping `settle` calls from reopening the tracker
//! under each other.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use markovbot_types::chain::ChainRecord;
use markovbot_types::chat::ChatId;
use markovbot_types::config::StoreConfig;
use markovbot_types::error::StoreError;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::backend::ChainBackend;

/// A resident record and the revision it was stored at.
#[derive(Debug)]
struct CacheEntry {
    record: Arc<ChainRecord>,
    revision: u64,
}

/// Insertion-ordered resident set.
///
/// `order` and `entries` always hold the same ids.
#[derive(Debug, Default)]
struct CacheState {
    order: VecDeque<ChatId>,
    entries: HashMap<ChatId, CacheEntry>,
    next_revision: u64,
    evictions_since_reclaim: u32,
}

impl CacheState {
    fn bump_revision(&mut self) -> u64 {
        self.next_revision += 1;
        self.next_revision
    }

    /// Replace a resident record in place or append a new one at the tail.
    fn upsert(&mut self, chat_id: ChatId, record: Arc<ChainRecord>) {
        let revision = self.bump_revision();
        match self.entries.get_mut(&chat_id) {
            Some(entry) => {
                entry.record = record;
                entry.revision = revision;
            }
            None => {
                self.order.push_back(chat_id);
                self.entries.insert(chat_id, CacheEntry { record, revision });
            }
        }
    }

    fn snapshot(&self, chat_id: ChatId) -> Option<(Arc<ChainRecord>, u64)> {
        self.entries
            .get(&chat_id)
            .map(|entry| (Arc::clone(&entry.record), entry.revision))
    }

    /// Drop `chat_id` if it is still at `revision`.
    ///
    /// Returns false when the record was rewritten after the snapshot was
    /// taken; that newer record still has to be persisted.
    fn remove_if_unchanged(&mut self, chat_id: ChatId, revision: u64) -> bool {
        match self.entries.get(&chat_id) {
            Some(entry) if entry.revision == revision => {}
            _ => return false,
        }
        self.entries.remove(&chat_id);
        if self.order.front() == Some(&chat_id) {
            self.order.pop_front();
        } else {
            self.order.retain(|id| *id != chat_id);
        }
        true
    }

    /// Move `chat_id` to the tail so the next pass tries other chats first.
    fn requeue(&mut self, chat_id: ChatId) {
        if let Some(pos) = self.order.iter().position(|id| *id == chat_id) {
            self.order.remove(pos);
            self.order.push_back(chat_id);
        }
    }
}

struct StoreInner<B> {
    backend: B,
    capacity: usize,
    io_timeout: Duration,
    reclaim_after: u32,
    state: Mutex<CacheState>,
    eviction_lock: tokio::sync::Mutex<()>,
    settle_lock: tokio::sync::Mutex<()>,
    eviction_scheduled: AtomicBool,
    evictions: AtomicU64,
    tracker: TaskTracker,
}

/// Bounded, insertion-ordered cache of chain records keyed by chat.
///
/// Cloning is cheap and yields a handle to the same cache.
pub struct ChatStore<B: ChainBackend> {
    inner: Arc<StoreInner<B>>,
}

impl<B: ChainBackend> Clone for ChatStore<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: ChainBackend> ChatStore<B> {
    /// Create a store over `backend` using the capacity and timeouts in
    /// `config`. A capacity of zero is treated as one.
    pub fn new(backend: B, config: &StoreConfig) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                backend,
                capacity: config.cache_capacity.max(1),
                io_timeout: config.io_timeout(),
                reclaim_after: config.reclaim_after_evictions,
                state: Mutex::new(CacheState::default()),
                eviction_lock: tokio::sync::Mutex::new(()),
                settle_lock: tokio::sync::Mutex::new(()),
                eviction_scheduled: AtomicBool::new(false),
                evictions: AtomicU64::new(0),
                tracker: TaskTracker::new(),
            }),
        }
    }

    /// Create a store and check that its backend is usable.
    pub async fn open(backend: B, config: &StoreConfig) -> Result<Self, StoreError> {
        let store = Self::new(backend, config);
        store.inner.bounded(store.inner.backend.ensure_ready()).await?;
        Ok(store)
    }

    /// Access the persistence backend.
    pub fn backend(&self) -> &B {
        &self.inner.backend
    }

    /// Maximum number of resident records.
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Load the record for `chat_id`, from memory if resident, otherwise
    /// from the backend (after which it becomes resident).
    pub async fn read(&self, chat_id: ChatId) -> Result<Arc<ChainRecord>, StoreError> {
        if let Some((record, _)) = self.inner.state().snapshot(chat_id) {
            debug!(%chat_id, "chat store hit");
            return Ok(record);
        }

        debug!(%chat_id, "chat store miss, loading from backend");
        let loaded = Arc::new(self.inner.bounded(self.inner.backend.read(chat_id)).await?);

        let record = {
            let mut state = self.inner.state();
            match state.snapshot(chat_id) {
                // Someone else loaded or wrote it while we were reading.
                Some((resident, _)) => resident,
                None => {
                    state.upsert(chat_id, Arc::clone(&loaded));
                    loaded
                }
            }
        };

        self.schedule_eviction();
        Ok(record)
    }

    /// Store `record` for `chat_id`. A resident chat keeps its position.
    pub fn write(&self, chat_id: ChatId, record: ChainRecord) {
        self.inner.state().upsert(chat_id, Arc::new(record));
        debug!(%chat_id, "chat store write");
        self.schedule_eviction();
    }

    /// Persist and drop every resident record.
    ///
    /// Waits for scheduled evictions first. Records that fail to persist stay
    /// resident and are reported in [`StoreError::Flush`].
    pub async fn flush_all(&self) -> Result<usize, StoreError> {
        self.settle().await;
        let _pass = self.inner.eviction_lock.lock().await;

        let total = self.len();
        info!("Saving all chats ({total} resident)");

        let mut saved = 0;
        let mut failed: Vec<ChatId> = Vec::new();

        loop {
            let next = {
                let state = self.inner.state();
                state.order.iter().copied().find(|id| !failed.contains(id))
            };
            let Some(chat_id) = next else { break };

            match self.inner.persist_resident(chat_id).await {
                Ok(true) => {
                    saved += 1;
                    info!(%chat_id, "Saved chat ({saved} of {total})");
                }
                Ok(false) => {}
                Err(err) => {
                    error!(%chat_id, "failed to save chat during flush: {err}");
                    failed.push(chat_id);
                }
            }
        }

        if failed.is_empty() {
            info!("Saved all chats");
            Ok(saved)
        } else {
            Err(StoreError::Flush { failed })
        }
    }

    /// Wait until every scheduled eviction task has finished.
    pub async fn settle(&self) {
        let _settling = self.inner.settle_lock.lock().await;
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
        self.inner.tracker.reopen();
    }

    /// Run an eviction pass now, returning how many chats were evicted.
    pub async fn evict_now(&self) -> Result<usize, StoreError> {
        self.inner.evict_overflow().await
    }

    /// Every chat with a stored or resident record, sorted.
    pub async fn known_chats(&self) -> Result<Vec<ChatId>, StoreError> {
        let mut ids = self.inner.bounded(self.inner.backend.list_chats()).await?;
        ids.extend(self.resident_ids());
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    /// Number of resident records.
    pub fn len(&self) -> usize {
        self.inner.state().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_resident(&self, chat_id: ChatId) -> bool {
        self.inner.state().entries.contains_key(&chat_id)
    }

    /// Resident chat ids from next-to-evict to most recently inserted.
    pub fn resident_ids(&self) -> Vec<ChatId> {
        self.inner.state().order.iter().copied().collect()
    }

    /// Total evictions since the store was created.
    pub fn eviction_count(&self) -> u64 {
        self.inner.evictions.load(Ordering::SeqCst)
    }

    /// Spawn an eviction pass if the cache is over capacity and none is
    /// already waiting to run.
    fn schedule_eviction(&self) {
        if !self.inner.over_capacity() || self.inner.eviction_scheduled.swap(true, Ordering::AcqRel) {
            return;
        }

        let inner = Arc::clone(&self.inner);
        self.inner.tracker.spawn(async move {
            inner.eviction_scheduled.store(false, Ordering::Release);
            if let Err(err) = inner.evict_overflow().await {
                warn!("cache eviction incomplete, will retry on next access: {err}");
            }
        });
    }
}

impl<B: ChainBackend> StoreInner<B> {
    fn state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().expect("chat store lock poisoned")
    }

    fn over_capacity(&self) -> bool {
        self.state().order.len() > self.capacity
    }

    /// Run a backend call under the store's I/O timeout.
    async fn bounded<T>(
        &self,
        op: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        match tokio::time::timeout(self.io_timeout, op).await {
            Ok(result) => result,
            Err(_) => {
                warn!(timeout = ?self.io_timeout, "storage operation timed out");
                Err(StoreError::Timeout(self.io_timeout))
            }
        }
    }

    /// Write the resident record for `chat_id` to the backend and drop it.
    ///
    /// Rewrites that land while the write is in flight are persisted too
    /// before the entry is dropped. Returns `Ok(false)` if the chat was not
    /// resident.
    async fn persist_resident(&self, chat_id: ChatId) -> Result<bool, StoreError> {
        loop {
            let Some((record, revision)) = self.state().snapshot(chat_id) else {
                return Ok(false);
            };

            self.bounded(self.backend.write(chat_id, &record)).await?;

            if self.state().remove_if_unchanged(chat_id, revision) {
                self.note_eviction();
                return Ok(true);
            }
            debug!(%chat_id, "chat rewritten during eviction, persisting again");
        }
    }

    /// Evict from the head until the cache is back within capacity.
    ///
    /// On a failed write the chat is moved to the tail, kept resident, and
    /// the pass stops.
    async fn evict_overflow(&self) -> Result<usize, StoreError> {
        let _pass = self.eviction_lock.lock().await;
        let mut evicted = 0;

        loop {
            let head = {
                let state = self.state();
                if state.order.len() <= self.capacity {
                    break;
                }
                state.order.front().copied()
            };
            let Some(chat_id) = head else { break };

            debug!(%chat_id, "evicting chat");
            match self.persist_resident(chat_id).await {
                Ok(true) => evicted += 1,
                Ok(false) => {}
                Err(err) => {
                    error!(%chat_id, "failed to persist evicted chat: {err}");
                    self.state().requeue(chat_id);
                    return Err(err);
                }
            }
        }

        if evicted > 0 {
            debug!("evicted {evicted} chat(s)");
        }
        Ok(evicted)
    }

    /// Count an eviction and occasionally give spare capacity back.
    fn note_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::SeqCst);
        if self.reclaim_after == 0 {
            return;
        }

        let mut state = self.state();
        state.evictions_since_reclaim += 1;
        if state.evictions_since_reclaim >= self.reclaim_after {
            state.order.shrink_to_fit();
            state.entries.shrink_to_fit();
            state.evictions_since_reclaim = 0;
            debug!("reclaimed chat cache memory");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryBackend;

    fn config(capacity: usize) -> StoreConfig {
        StoreConfig {
            cache_capacity: capacity,
            io_timeout_ms: 1_000,
            ..StoreConfig::default()
        }
    }

    fn record(words: &[&str]) -> ChainRecord {
        let mut record = ChainRecord::new();
        for word in words {
            record.words.push(word.to_string());
            record
                .transitions
                .entry(word.to_string())
                .or_default()
                .insert(String::new(), 1);
        }
        record
    }

    #[tokio::test]
    async fn read_miss_loads_from_backend_and_caches() {
        let backend = MemoryBackend::new();
        backend.insert(ChatId(1), record(&["hello"]));
        let store = ChatStore::new(backend, &config(10));

        let first = store.read(ChatId(1)).await.unwrap();
        assert_eq!(first.words, vec!["hello"]);
        assert!(store.is_resident(ChatId(1)));

        let second = store.read(ChatId(1)).await.unwrap();
        assert_eq!(*second, *first);
        assert_eq!(store.backend().read_count(), 1);
    }

    #[tokio::test]
    async fn read_of_unknown_chat_creates_empty_record() {
        let store = ChatStore::new(MemoryBackend::new(), &config(10));
        let loaded = store.read(ChatId(9)).await.unwrap();
        assert!(loaded.is_empty());
        assert_eq!(store.backend().stored(ChatId(9)), Some(ChainRecord::new()));
    }

    #[tokio::test]
    async fn write_replaces_in_place_without_reordering() {
        let store = ChatStore::new(MemoryBackend::new(), &config(10));
        store.write(ChatId(1), record(&["a"]));
        store.write(ChatId(2), record(&["b"]));
        store.write(ChatId(1), record(&["c"]));

        assert_eq!(store.resident_ids(), vec![ChatId(1), ChatId(2)]);
        assert_eq!(store.read(ChatId(1)).await.unwrap().words, vec!["c"]);
    }

    #[tokio::test]
    async fn overflow_evicts_exactly_the_earliest_inserted_chat() {
        let store = ChatStore::new(MemoryBackend::new(), &config(3));
        store.write(ChatId(1), record(&["one"]));
        store.read(ChatId(2)).await.unwrap();
        store.write(ChatId(3), record(&["three"]));
        // Touching chat 1 does not protect it.
        store.write(ChatId(1), record(&["uno"]));
        store.write(ChatId(4), record(&["four"]));
        store.settle().await;

        assert_eq!(store.eviction_count(), 1);
        assert_eq!(store.len(), 3);
        assert!(!store.is_resident(ChatId(1)));
        assert_eq!(store.resident_ids(), vec![ChatId(2), ChatId(3), ChatId(4)]);
        assert_eq!(store.backend().stored(ChatId(1)), Some(record(&["uno"])));

        // Reloading an evicted chat is transparent.
        let reloaded = store.read(ChatId(1)).await.unwrap();
        assert_eq!(*reloaded, record(&["uno"]));
    }

    #[tokio::test]
    async fn failed_eviction_keeps_data_resident_and_retries() {
        let store = ChatStore::new(MemoryBackend::new(), &config(1));
        store.write(ChatId(1), record(&["keep"]));
        store.backend().set_fail_writes(true);
        store.write(ChatId(2), record(&["me"]));
        store.settle().await;

        assert_eq!(store.len(), 2);
        assert!(store.is_resident(ChatId(1)));
        assert_eq!(store.backend().stored(ChatId(1)), None);
        // The failed chat moved to the tail.
        assert_eq!(store.resident_ids(), vec![ChatId(2), ChatId(1)]);

        store.backend().set_fail_writes(false);
        assert_eq!(store.evict_now().await.unwrap(), 1);
        assert_eq!(store.resident_ids(), vec![ChatId(1)]);
        assert_eq!(store.backend().stored(ChatId(2)), Some(record(&["me"])));
    }

    #[tokio::test]
    async fn flush_all_persists_everything() {
        let store = ChatStore::new(MemoryBackend::new(), &config(10));
        for id in 1..=4 {
            store.write(ChatId(id), record(&["w"]));
        }

        assert_eq!(store.flush_all().await.unwrap(), 4);
        assert!(store.is_empty());
        for id in 1..=4 {
            assert_eq!(store.backend().stored(ChatId(id)), Some(record(&["w"])));
        }
    }

    #[tokio::test]
    async fn flush_all_reports_failures_and_keeps_entries() {
        let store = ChatStore::new(MemoryBackend::new(), &config(10));
        store.write(ChatId(1), record(&["x"]));
        store.write(ChatId(2), record(&["y"]));
        store.backend().set_fail_writes(true);

        let err = store.flush_all().await.unwrap_err();
        match err {
            StoreError::Flush { failed } => assert_eq!(failed, vec![ChatId(1), ChatId(2)]),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(store.len(), 2);

        store.backend().set_fail_writes(false);
        assert_eq!(store.flush_all().await.unwrap(), 2);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn known_chats_merges_stored_and_resident() {
        let backend = MemoryBackend::new();
        backend.insert(ChatId(3), record(&["s"]));
        let store = ChatStore::new(backend, &config(10));
        store.write(ChatId(-8), record(&["r"]));
        store.write(ChatId(3), record(&["t"]));

        assert_eq!(store.known_chats().await.unwrap(), vec![ChatId(-8), ChatId(3)]);
    }

    #[tokio::test]
    async fn slow_backend_read_times_out() {
        let backend = MemoryBackend::new().with_delay(Duration::from_millis(300));
        let config = StoreConfig {
            io_timeout_ms: 20,
            ..StoreConfig::default()
        };
        let store = ChatStore::new(backend, &config);

        let err = store.read(ChatId(5)).await.unwrap_err();
        assert!(matches!(err, StoreError::Timeout(_)));
        assert!(!store.is_resident(ChatId(5)));
    }

    #[tokio::test]
    async fn rewrite_during_eviction_is_not_lost() {
        let backend = MemoryBackend::new().with_delay(Duration::from_millis(50));
        let store = ChatStore::new(backend, &config(1));
        store.write(ChatId(1), record(&["old"]));
        store.write(ChatId(2), record(&["other"]));

        // Eviction of chat 1 is now in flight; rewrite it meanwhile.
        tokio::time::sleep(Duration::from_millis(10)).await;
        store.write(ChatId(1), record(&["new"]));
        store.settle().await;
        store.flush_all().await.unwrap();

        assert_eq!(store.backend().stored(ChatId(1)), Some(record(&["new"])));
        assert_eq!(store.backend().stored(ChatId(2)), Some(record(&["other"])));
    }

    #[tokio::test]
    async fn write_timeout_during_eviction_keeps_chat_until_flush() {
        let config = StoreConfig {
            cache_capacity: 1,
            io_timeout_ms: 30,
            ..StoreConfig::default()
        };
        let store = ChatStore::new(MemoryBackend::new(), &config);
        store.backend().set_write_delay(Duration::from_millis(300));
        store.write(ChatId(1), record(&["first"]));
        store.write(ChatId(2), record(&["second"]));
        store.settle().await;

        assert_eq!(store.len(), 2);
        assert!(store.is_resident(ChatId(1)));
        assert_eq!(store.backend().stored(ChatId(1)), None);
        assert_eq!(store.eviction_count(), 0);

        let err = store.flush_all().await.unwrap_err();
        assert!(matches!(err, StoreError::Flush { ref failed } if failed.len() == 2));
        assert_eq!(store.len(), 2);

        store.backend().set_write_delay(Duration::ZERO);
        assert_eq!(store.flush_all().await.unwrap(), 2);
        assert!(store.is_empty());
        assert_eq!(store.backend().stored(ChatId(1)), Some(record(&["first"])));
        assert_eq!(store.backend().stored(ChatId(2)), Some(record(&["second"])));
    }

    #[tokio::test]
    async fn overlapping_settles_all_return() {
        let backend = MemoryBackend::new().with_delay(Duration::from_millis(20));
        let store = ChatStore::new(backend, &config(1));
        for id in 1..=4 {
            store.write(ChatId(id), record(&["s"]));
        }

        let settled = tokio::time::timeout(Duration::from_secs(5), async {
            tokio::join!(store.settle(), store.settle(), store.settle());
        })
        .await;
        assert!(settled.is_ok());

        // The tracker is open again, so later evictions are still awaited.
        store.write(ChatId(5), record(&["s"]));
        store.settle().await;
        assert_eq!(store.len(), 1);
        assert_eq!(store.resident_ids(), vec![ChatId(5)]);
    }

    #[tokio::test]
    async fn reclaim_pass_does_not_disturb_contents() {
        let config = StoreConfig {
            cache_capacity: 2,
            reclaim_after_evictions: 1,
            ..StoreConfig::default()
        };
        let store = ChatStore::new(MemoryBackend::new(), &config);
        for id in 1..=6 {
            store.write(ChatId(id), record(&["z"]));
            store.settle().await;
        }
        assert_eq!(store.eviction_count(), 4);
        assert_eq!(store.resident_ids(), vec![ChatId(5), ChatId(6)]);
    }
}
