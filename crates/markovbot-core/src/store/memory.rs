//! In-memory [`ChainBackend`] for tests and embedding.
//!
//! Keeps records in a map instead of files. Writes can be made to fail or
//! slowed down on their own, and every call can be slowed down, which is what the cache and manager tests
//! use to exercise eviction failures, timeouts and interleavings.

use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use markovbot_types::chain::ChainRecord;
use markovbot_types::chat::ChatId;
use markovbot_types::error::StoreError;

use super::backend::ChainBackend;

/// Map-backed chain storage.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    records: Mutex<HashMap<ChatId, ChainRecord>>,
    corrupt: Mutex<HashSet<ChatId>>,
    delay: Mutex<Duration>,
    write_delay: Mutex<Duration>,
    fail_writes: AtomicBool,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep for `delay` at the start of every read and write.
    pub fn with_delay(self, delay: Duration) -> Self {
        *self.delay.lock().expect("memory backend lock poisoned") = delay;
        self
    }

    /// Extra sleep before every write, on top of the shared delay.
    pub fn set_write_delay(&self, delay: Duration) {
        *self.write_delay.lock().expect("memory backend lock poisoned") = delay;
    }

    /// Make subsequent writes fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make the next read of `chat_id` fail as if its stored bytes were
    /// unparseable (the bad bytes are then considered moved aside).
    pub fn mark_corrupt(&self, chat_id: ChatId) {
        self.corrupt
            .lock()
            .expect("memory backend lock poisoned")
            .insert(chat_id);
    }

    /// Seed a stored record directly, bypassing the cache.
    pub fn insert(&self, chat_id: ChatId, record: ChainRecord) {
        self.records
            .lock()
            .expect("memory backend lock poisoned")
            .insert(chat_id, record);
    }

    /// The stored record for `chat_id`, if one exists.
    pub fn stored(&self, chat_id: ChatId) -> Option<ChainRecord> {
        self.records
            .lock()
            .expect("memory backend lock poisoned")
            .get(&chat_id)
            .cloned()
    }

    /// Number of completed `read` calls.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of successful `write` calls.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    async fn pause(&self, delay: &Mutex<Duration>) {
        let delay = *delay.lock().expect("memory backend lock poisoned");
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

impl ChainBackend for MemoryBackend {
    async fn ensure_ready(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn ensure_record(&self, chat_id: ChatId) -> Result<(), StoreError> {
        self.records
            .lock()
            .expect("memory backend lock poisoned")
            .entry(chat_id)
            .or_default();
        Ok(())
    }

    async fn read(&self, chat_id: ChatId) -> Result<ChainRecord, StoreError> {
        self.pause(&self.delay).await;
        if self
            .corrupt
            .lock()
            .expect("memory backend lock poisoned")
            .remove(&chat_id)
        {
            self.records
                .lock()
                .expect("memory backend lock poisoned")
                .remove(&chat_id);
            return Err(StoreError::Corrupt {
                chat_id,
                reason: "injected corruption".to_string(),
            });
        }
        self.ensure_record(chat_id).await?;
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.stored(chat_id).unwrap_or_default())
    }

    async fn write(&self, chat_id: ChatId, record: &ChainRecord) -> Result<(), StoreError> {
        self.pause(&self.delay).await;
        self.pause(&self.write_delay).await;
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::io(
                format!("memory://chat_{chat_id}"),
                io::Error::new(io::ErrorKind::Other, "injected write failure"),
            ));
        }
        self.insert(chat_id, record.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn list_chats(&self) -> Result<Vec<ChatId>, StoreError> {
        let mut ids: Vec<ChatId> = self
            .records
            .lock()
            .expect("memory backend lock poisoned")
            .keys()
            .copied()
            .collect();
        ids.sort();
        Ok(ids)
    }
}
