//! Store configuration loader for markovbot.
//!
//! Reads `config.toml` from the data directory and deserializes it into
//! [`StoreConfig`]. Falls back to defaults when the file is missing or
//! malformed, so a bad config never keeps the bot from starting.

use std::path::Path;

use markovbot_types::config::StoreConfig;

/// Load store configuration from `{data_dir}/config.toml`.
///
/// - If the file does not exist, returns [`StoreConfig::default()`].
/// - If the file exists but fails to parse, logs a warning and returns the default.
/// - A zero `cache_capacity` or `io_timeout_ms` is raised to one.
pub async fn load_store_config(data_dir: &Path) -> StoreConfig {
    let config_path = data_dir.join("config.toml");

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", config_path.display());
            return StoreConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return StoreConfig::default();
        }
    };

    match toml::from_str::<StoreConfig>(&content) {
        Ok(mut config) => {
            config.cache_capacity = config.cache_capacity.max(1);
            config.io_timeout_ms = config.io_timeout_ms.max(1);
            config
        }
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            StoreConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn load_store_config_missing_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config = load_store_config(tmp.path()).await;
        assert_eq!(config, StoreConfig::default());
        assert_eq!(config.cache_capacity, 10);
    }

    #[tokio::test]
    async fn load_store_config_valid_toml_returns_parsed() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(
            tmp.path().join("config.toml"),
            r#"
cache_capacity = 3
io_timeout_ms = 250
"#,
        )
        .await
        .unwrap();

        let config = load_store_config(tmp.path()).await;
        assert_eq!(config.cache_capacity, 3);
        assert_eq!(config.io_timeout_ms, 250);
        assert_eq!(config.max_message_tokens, 100);
        assert_eq!(config.reclaim_after_evictions, 30);
    }

    #[tokio::test]
    async fn load_store_config_invalid_toml_returns_default() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(tmp.path().join("config.toml"), "cache_capacity = \"ten\"")
            .await
            .unwrap();

        let config = load_store_config(tmp.path()).await;
        assert_eq!(config, StoreConfig::default());
    }

    #[tokio::test]
    async fn load_store_config_raises_zero_capacity() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(tmp.path().join("config.toml"), "cache_capacity = 0")
            .await
            .unwrap();

        assert_eq!(load_store_config(tmp.path()).await.cache_capacity, 1);
    }
}
