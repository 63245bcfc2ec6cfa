//! Filesystem layout for markovbot.
//!
//! Every chat's chain lives in its own `chat_<id>.json` file directly under
//! the data directory. [`JsonFileBackend`] implements the `ChainBackend`
//! port from `markovbot-core` on top of that layout.

pub mod chain_file;

use std::path::{Path, PathBuf};

use markovbot_types::chat::ChatId;

pub use chain_file::JsonFileBackend;

/// File name prefix shared by all chain files.
pub const CHAT_FILE_PREFIX: &str = "chat_";

/// Directory name used under the working directory when no data directory is
/// configured.
pub const DEFAULT_DATA_DIR_NAME: &str = "markov2";

/// `chat_<id>.json`
pub fn chat_file_name(chat_id: ChatId) -> String {
    format!("{CHAT_FILE_PREFIX}{chat_id}.json")
}

/// `{data_dir}/chat_<id>.json`
pub fn chat_path(data_dir: &Path, chat_id: ChatId) -> PathBuf {
    data_dir.join(chat_file_name(chat_id))
}

/// Recover the chat id from a chain file name. Anything else (temp files,
/// quarantined files, config) yields `None`.
pub fn parse_chat_file_name(name: &str) -> Option<ChatId> {
    name.strip_prefix(CHAT_FILE_PREFIX)?
        .strip_suffix(".json")?
        .parse()
        .ok()
}

/// Resolve the data directory from environment or the working directory.
///
/// Priority:
/// 1. `MARKOVBOT_DATA_DIR` environment variable
/// 2. `./markov2` relative to the current working directory
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("MARKOVBOT_DATA_DIR") {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }

    match std::env::current_dir() {
        Ok(cwd) => cwd.join(DEFAULT_DATA_DIR_NAME),
        Err(_) => PathBuf::from(DEFAULT_DATA_DIR_NAME),
    }
}
