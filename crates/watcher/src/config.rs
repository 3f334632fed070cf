//! Watcher configuration, deserializable from the CLI's YAML file.

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_EVENT_AGE: Duration = Duration::from_secs(5);
pub const DEFAULT_CACHE_SIZE: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct WatcherConfig {
    /// Namespace to watch; `None` or empty watches all namespaces.
    pub namespace: Option<String>,
    #[serde(rename = "maxEventAgeSeconds", with = "secs")]
    pub max_event_age: Duration,
    /// Skip involved-object lookups entirely.
    pub omit_lookup: bool,
    pub cache_size: usize,
    pub cluster_name: Option<String>,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            max_event_age: DEFAULT_MAX_EVENT_AGE,
            omit_lookup: false,
            cache_size: DEFAULT_CACHE_SIZE,
            cluster_name: None,
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("cacheSize must be at least 1 when lookups are enabled")]
    ZeroCacheSize,
}

impl WatcherConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache_size == 0 && !self.omit_lookup {
            return Err(ConfigError::ZeroCacheSize);
        }
        Ok(())
    }
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}
