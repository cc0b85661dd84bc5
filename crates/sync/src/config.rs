//! Session settings: client configuration plus debounce windows and
//! cache behaviour, all overridable from the environment.

use std::time::Duration;

use adcanvas_client::config::env_or;
use adcanvas_client::{ClientConfig, ConfigError};
use adcanvas_core::EntityId;

use crate::cache::{CacheConfig, DEFAULT_DEDUP_INTERVAL};
use crate::manager::PersistenceConfig;
use crate::middleware::{CANVAS_DEBOUNCE, CHAT_DEBOUNCE};

/// Settings for a persistence session loaded from environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncSettings {
    pub client: ClientConfig,
    pub chat_debounce: Duration,
    pub canvas_debounce: Duration,
    pub cache: CacheConfig,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            client: ClientConfig::default(),
            chat_debounce: CHAT_DEBOUNCE,
            canvas_debounce: CANVAS_DEBOUNCE,
            cache: CacheConfig::default(),
        }
    }
}

impl SyncSettings {
    /// Load settings from environment variables with defaults.
    ///
    /// Client variables are documented on [`ClientConfig::from_env`].
    ///
    /// | Env Var                         | Default |
    /// |---------------------------------|---------|
    /// | `CHAT_DEBOUNCE_MS`              | `500`   |
    /// | `CANVAS_DEBOUNCE_MS`            | `100`   |
    /// | `CACHE_DEDUP_INTERVAL_MS`       | `2000`  |
    /// | `CACHE_REVALIDATE_ON_FOCUS`     | `true`  |
    /// | `CACHE_REVALIDATE_ON_RECONNECT` | `true`  |
    pub fn from_env() -> Result<Self, ConfigError> {
        let client = ClientConfig::from_env()?;

        let chat_debounce_ms = env_or("CHAT_DEBOUNCE_MS", CHAT_DEBOUNCE.as_millis() as u64, "a valid u64")?;
        let canvas_debounce_ms = env_or("CANVAS_DEBOUNCE_MS", CANVAS_DEBOUNCE.as_millis() as u64, "a valid u64")?;
        let dedup_ms = env_or(
            "CACHE_DEDUP_INTERVAL_MS",
            DEFAULT_DEDUP_INTERVAL.as_millis() as u64,
            "a valid u64",
        )?;
        let revalidate_on_focus = env_or("CACHE_REVALIDATE_ON_FOCUS", true, "true or false")?;
        let revalidate_on_reconnect = env_or("CACHE_REVALIDATE_ON_RECONNECT", true, "true or false")?;

        Ok(Self {
            client,
            chat_debounce: Duration::from_millis(chat_debounce_ms),
            canvas_debounce: Duration::from_millis(canvas_debounce_ms),
            cache: CacheConfig {
                dedup_interval: Duration::from_millis(dedup_ms),
                revalidate_on_focus,
                revalidate_on_reconnect,
            },
        })
    }

    /// Manager configuration for a session on `project_id`.
    pub fn persistence_config(&self, project_id: Option<EntityId>) -> PersistenceConfig {
        PersistenceConfig {
            project_id,
            enabled: true,
            chat_debounce: self.chat_debounce,
            canvas_debounce: self.canvas_debounce,
            cache: self.cache.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let settings = SyncSettings::default();
        assert_eq!(settings.chat_debounce, Duration::from_millis(500));
        assert_eq!(settings.canvas_debounce, Duration::from_millis(100));
        assert_eq!(settings.cache.dedup_interval, Duration::from_secs(2));
        assert!(settings.cache.revalidate_on_focus);
        assert!(settings.cache.revalidate_on_reconnect);
    }

    #[test]
    fn persistence_config_carries_windows() {
        let project = uuid::Uuid::new_v4();
        let config = SyncSettings::default().persistence_config(Some(project));
        assert_eq!(config.project_id, Some(project));
        assert!(config.enabled);
        assert_eq!(config.chat_debounce, Duration::from_millis(500));
    }
}
