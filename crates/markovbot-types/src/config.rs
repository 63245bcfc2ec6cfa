//! Store configuration types for markovbot.
//!
//! `StoreConfig` represents the optional `config.toml` in the data directory
//! that tunes the chat cache and persistence timeouts.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tuning knobs for the chat store. All fields have sensible defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Maximum number of chains kept resident in memory.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    /// Evictions between memory reclamation passes (0 disables them).
    #[serde(default = "default_reclaim_after_evictions")]
    pub reclaim_after_evictions: u32,

    /// Upper bound on a single persistence operation, in milliseconds.
    #[serde(default = "default_io_timeout_ms")]
    pub io_timeout_ms: u64,

    /// Default token limit for generated messages.
    #[serde(default = "default_max_message_tokens")]
    pub max_message_tokens: usize,
}

fn default_cache_capacity() -> usize {
    10
}

fn default_reclaim_after_evictions() -> u32 {
    30
}

fn default_io_timeout_ms() -> u64 {
    5_000
}

fn default_max_message_tokens() -> usize {
    100
}

impl StoreConfig {
    /// `io_timeout_ms` as a `Duration`.
    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            cache_capacity: default_cache_capacity(),
            reclaim_after_evictions: default_reclaim_after_evictions(),
            io_timeout_ms: default_io_timeout_ms(),
            max_message_tokens: default_max_message_tokens(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_config_default_values() {
        let config = StoreConfig::default();
        assert_eq!(config.cache_capacity, 10);
        assert_eq!(config.reclaim_after_evictions, 30);
        assert_eq!(config.io_timeout(), Duration::from_secs(5));
        assert_eq!(config.max_message_tokens, 100);
    }

    #[test]
    fn test_store_config_deserialize_with_defaults() {
        let config: StoreConfig = toml::from_str("").unwrap();
        assert_eq!(config, StoreConfig::default());
    }

    #[test]
    fn test_store_config_deserialize_with_values() {
        let toml_str = r#"
cache_capacity = 3
io_timeout_ms = 250
"#;
        let config: StoreConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.cache_capacity, 3);
        assert_eq!(config.io_timeout(), Duration::from_millis(250));
        assert_eq!(config.reclaim_after_evictions, 30);
    }

    #[test]
    fn test_store_config_serde_roundtrip() {
        let config = StoreConfig {
            cache_capacity: 64,
            reclaim_after_evictions: 0,
            io_timeout_ms: 1_000,
            max_message_tokens: 20,
        };
        let json = serde_json::to_string(&config).unwrap();
        let parsed: StoreConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }
}
