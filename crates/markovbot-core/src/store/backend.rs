//! Persistence backend trait.
//!
//! Defines the interface the chat store uses to load and save chain records.
//! Implementations live in markovbot-infra.

use std::future::Future;

use markovbot_types::chain::ChainRecord;
use markovbot_types::chat::ChatId;
use markovbot_types::error::StoreError;

/// Durable one-record-per-chat storage.
///
/// Uses RPITIT (native async fn in traits, Rust 2024 edition). The chat
/// store is the only caller; every call it makes is bounded by a timeout.
pub trait ChainBackend: Send + Sync + 'static {
    /// Make sure the storage location exists and is usable, creating it if
    /// it is missing.
    fn ensure_ready(&self) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Make sure a record exists for `chat_id`, creating an empty one if not.
    fn ensure_record(&self, chat_id: ChatId) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Load the record for `chat_id`, creating it first if needed.
    ///
    /// A record that parses but fails validation is returned as an empty
    /// record. A record that cannot be parsed at all is a
    /// [`StoreError::Corrupt`].
    fn read(&self, chat_id: ChatId) -> impl Future<Output = Result<ChainRecord, StoreError>> + Send;

    /// Replace the stored record for `chat_id`.
    fn write(
        &self,
        chat_id: ChatId,
        record: &ChainRecord,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Every chat id that currently has a stored record.
    fn list_chats(&self) -> impl Future<Output = Result<Vec<ChatId>, StoreError>> + Send;
}
