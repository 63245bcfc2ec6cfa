//! JSON-file chain backend.
//!
//! Implements `ChainBackend` from `markovbot-core` with one pretty-printed
//! JSON file per chat. Writes go to a temporary file in the data directory
//! which is then renamed over the target, so a crash never leaves a
//! half-written chain file behind.
//!
//! A file that is not JSON at all is renamed to
//! `chat_<id>.json.corrupt-<timestamp>` and reported as
//! [`StoreError::Corrupt`]; the next read starts from a fresh empty record.
//! A file that is JSON but not a valid chain record is read as empty and left
//! in place until the next write replaces it. Repeated words and transition
//! sources missing from `words` are repaired on read, not rejected.
//!
//! Writes to one chat are applied in call order. The blocking persist keeps
//! the chat's write lock until the rename lands, even when the caller gave up
//! waiting, so a stale snapshot can never replace a newer one.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use markovbot_core::store::ChainBackend;
use markovbot_types::chain::{ChainRecord, EMPTY_RECORD_JSON};
use markovbot_types::chat::ChatId;
use markovbot_types::error::StoreError;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::{chat_path, parse_chat_file_name};

/// Chain storage in `{data_dir}/chat_<id>.json` files.
#[derive(Debug, Clone)]
pub struct JsonFileBackend {
    data_dir: PathBuf,
    /// Per-chat write locks, shared between clones.
    write_locks: Arc<DashMap<ChatId, Arc<Mutex<()>>>>,
    /// Held by tests to stall writes just before the rename.
    #[cfg(test)]
    persist_gate: Arc<std::sync::Mutex<()>>,
}

impl JsonFileBackend {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            write_locks: Arc::new(DashMap::new()),
            #[cfg(test)]
            persist_gate: Arc::new(std::sync::Mutex::new(())),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Path of the chain file for `chat_id`.
    pub fn chat_path(&self, chat_id: ChatId) -> PathBuf {
        chat_path(&self.data_dir, chat_id)
    }

    /// Move an unparseable chain file out of the way.
    async fn quarantine(&self, path: &Path) -> Option<PathBuf> {
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3fZ");
        let mut target = path.as_os_str().to_owned();
        target.push(format!(".corrupt-{stamp}"));
        let target = PathBuf::from(target);

        match tokio::fs::rename(path, &target).await {
            Ok(()) => Some(target),
            Err(err) => {
                tracing::warn!("Failed to move corrupt file {} aside: {err}", path.display());
                None
            }
        }
    }

    /// Make sure the data directory exists, creating it if missing. The full
    /// access check is [`ChainBackend::ensure_ready`].
    async fn ensure_dir(&self) -> Result<(), StoreError> {
        match tokio::fs::metadata(&self.data_dir).await {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(StoreError::NotADirectory(self.data_dir.clone())),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tokio::fs::create_dir_all(&self.data_dir)
                    .await
                    .map_err(|e| StoreError::io(&self.data_dir, e))?;
                tracing::info!("Created data directory {}", self.data_dir.display());
                Ok(())
            }
            Err(err) => Err(StoreError::io(&self.data_dir, err)),
        }
    }

    /// Create then remove a temporary file to prove the directory is writable.
    async fn probe_writable(&self) -> Result<(), StoreError> {
        let dir = self.data_dir.clone();
        tokio::task::spawn_blocking(move || match NamedTempFile::new_in(&dir) {
            Ok(_probe) => Ok(()),
            Err(err) => Err(StoreError::io(dir, err)),
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

impl ChainBackend for JsonFileBackend {
    async fn ensure_ready(&self) -> Result<(), StoreError> {
        self.ensure_dir().await?;
        let mut entries = tokio::fs::read_dir(&self.data_dir)
            .await
            .map_err(|e| StoreError::io(&self.data_dir, e))?;
        entries
            .next_entry()
            .await
            .map_err(|e| StoreError::io(&self.data_dir, e))?;
        self.probe_writable().await
    }

    async fn ensure_record(&self, chat_id: ChatId) -> Result<(), StoreError> {
        let path = self.chat_path(chat_id);
        let opened = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await;

        let mut file = match opened {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => return Ok(()),
            Err(err) => return Err(StoreError::io(path, err)),
        };
        file.write_all(EMPTY_RECORD_JSON.as_bytes())
            .await
            .map_err(|e| StoreError::io(&path, e))?;
        file.flush().await.map_err(|e| StoreError::io(&path, e))?;
        tracing::debug!(%chat_id, "Created chain file {}", path.display());
        Ok(())
    }

    async fn read(&self, chat_id: ChatId) -> Result<ChainRecord, StoreError> {
        self.ensure_dir().await?;
        self.ensure_record(chat_id).await?;
        let path = self.chat_path(chat_id);
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| StoreError::io(&path, e))?;

        let value: serde_json::Value = match serde_json::from_slice(&bytes) {
            Ok(value) => value,
            Err(err) => {
                let moved = self.quarantine(&path).await;
                tracing::warn!(
                    %chat_id,
                    moved_to = ?moved,
                    "Chain file {} is not valid JSON: {err}",
                    path.display()
                );
                return Err(StoreError::Corrupt {
                    chat_id,
                    reason: err.to_string(),
                });
            }
        };

        match ChainRecord::from_value(value) {
            Ok(record) => Ok(record),
            Err(err) => {
                tracing::debug!(%chat_id, "Treating chain file {} as empty: {err}", path.display());
                Ok(ChainRecord::new())
            }
        }
    }

    async fn write(&self, chat_id: ChatId, record: &ChainRecord) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(record).map_err(|e| StoreError::Serialize(e.to_string()))?;
        self.ensure_dir().await?;
        let dir = self.data_dir.clone();
        let path = self.chat_path(chat_id);

        let lock = Arc::clone(self.write_locks.entry(chat_id).or_default().value());
        let guard = lock.lock_owned().await;
        let locks = Arc::clone(&self.write_locks);
        #[cfg(test)]
        let gate = Arc::clone(&self.persist_gate);

        // The guard moves into the blocking task so it outlives a cancelled caller.
        tokio::task::spawn_blocking(move || {
            let result = (|| -> std::io::Result<()> {
                let mut tmp = NamedTempFile::new_in(&dir)?;
                tmp.write_all(&bytes)?;
                tmp.as_file().sync_all()?;
                #[cfg(test)]
                let _gate = gate.lock();
                tmp.persist(&path).map_err(|e| e.error)?;
                Ok(())
            })();
            drop(guard);
            locks.remove_if(&chat_id, |_, lock| Arc::strong_count(lock) == 1);
            result.map_err(|e| StoreError::io(path, e))
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))??;

        tracing::debug!(%chat_id, "Saved chain file");
        Ok(())
    }

    async fn list_chats(&self) -> Result<Vec<ChatId>, StoreError> {
        let mut entries = tokio::fs::read_dir(&self.data_dir)
            .await
            .map_err(|e| StoreError::io(&self.data_dir, e))?;

        let mut ids = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::io(&self.data_dir, e))?
        {
            if let Some(chat_id) = entry.file_name().to_str().and_then(parse_chat_file_name) {
                ids.push(chat_id);
            }
        }
        ids.sort();
        Ok(ids)
    }
}
