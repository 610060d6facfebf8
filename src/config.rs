//! Cache Configuration
//!
//! Policy knobs consumed by the cache implementations. Values come either
//! from persistence-unit properties (`datanucleus.cache.*` keys) or from a
//! YAML document.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const PROP_L2_TYPE: &str = "datanucleus.cache.level2.type";
const PROP_L2_NAME: &str = "datanucleus.cache.level2.cachename";
const PROP_L2_MAX_SIZE: &str = "datanucleus.cache.level2.maxsize";
const PROP_L2_CLEAR_AT_CLOSE: &str = "datanucleus.cache.level2.clearatclose";
const PROP_L2_EXPIRY: &str = "datanucleus.cache.level2.expirymillis";
const PROP_L2_CACHE_EMBEDDED: &str = "datanucleus.cache.level2.cacheembedded";
const PROP_L2_SOFT_IDLE: &str = "datanucleus.cache.level2.softidlemillis";
const PROP_L2_RECLAIM_INTERVAL: &str = "datanucleus.cache.level2.reclaiminterval";
const PROP_L1_TYPE: &str = "datanucleus.cache.level1.type";

/// Level-2 cache implementation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level2CacheType {
    /// Caching disabled
    None,
    #[default]
    Soft,
    Weak,
    Strong,
    /// Delegate to an external cache provider
    Provider,
}

impl FromStr for Level2CacheType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "none" => Ok(Level2CacheType::None),
            "soft" => Ok(Level2CacheType::Soft),
            "weak" => Ok(Level2CacheType::Weak),
            "strong" => Ok(Level2CacheType::Strong),
            "provider" | "javax.cache" => Ok(Level2CacheType::Provider),
            other => Err(Error::Config(format!("unknown level2 cache type: {}", other))),
        }
    }
}

impl std::fmt::Display for Level2CacheType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Level2CacheType::None => write!(f, "none"),
            Level2CacheType::Soft => write!(f, "soft"),
            Level2CacheType::Weak => write!(f, "weak"),
            Level2CacheType::Strong => write!(f, "strong"),
            Level2CacheType::Provider => write!(f, "provider"),
        }
    }
}

/// Level-1 (per-session) cache implementation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level1CacheType {
    #[default]
    Soft,
    Weak,
    Strong,
}

impl FromStr for Level1CacheType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "soft" => Ok(Level1CacheType::Soft),
            "weak" => Ok(Level1CacheType::Weak),
            "strong" => Ok(Level1CacheType::Strong),
            other => Err(Error::Config(format!("unknown level1 cache type: {}", other))),
        }
    }
}

/// Cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub level2_type: Level2CacheType,
    pub level1_type: Level1CacheType,
    /// Store name (used by provider-backed caches)
    pub cache_name: String,
    /// Hard cap on the number of cached objects; `None` = unbounded
    pub max_size: Option<usize>,
    /// Evict everything when the cache is closed
    pub clear_at_close: bool,
    /// Entry lifetime for provider-backed caches
    pub expiry_millis: Option<u64>,
    /// Cache embedded and serialized objects as nested snapshots
    pub cache_embedded: bool,
    /// Idle time after which soft entries become reclaimable
    pub soft_idle_millis: u64,
    /// Puts between opportunistic reclaim sweeps
    pub reclaim_interval: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            level2_type: Level2CacheType::default(),
            level1_type: Level1CacheType::default(),
            cache_name: "nucleus".to_string(),
            max_size: None,
            clear_at_close: true,
            expiry_millis: None,
            cache_embedded: true,
            soft_idle_millis: 5 * 60 * 1000, // 5 minutes
            reclaim_interval: 1024,
        }
    }
}

impl CacheConfig {
    /// Build from persistence properties. Keys are matched case-insensitively;
    /// unrelated keys are ignored.
    pub fn from_properties(props: &HashMap<String, String>) -> Result<Self> {
        let mut config = Self::default();

        for (key, value) in props {
            let value = value.trim();
            match key.to_lowercase().as_str() {
                PROP_L2_TYPE => config.level2_type = value.parse()?,
                PROP_L1_TYPE => config.level1_type = value.parse()?,
                PROP_L2_NAME => config.cache_name = value.to_string(),
                PROP_L2_MAX_SIZE => {
                    let size: i64 = parse_number(key, value)?;
                    config.max_size = if size < 0 { None } else { Some(size as usize) };
                }
                PROP_L2_CLEAR_AT_CLOSE => config.clear_at_close = parse_bool(key, value)?,
                PROP_L2_EXPIRY => {
                    let millis: i64 = parse_number(key, value)?;
                    config.expiry_millis = if millis <= 0 { None } else { Some(millis as u64) };
                }
                PROP_L2_CACHE_EMBEDDED => config.cache_embedded = parse_bool(key, value)?,
                PROP_L2_SOFT_IDLE => config.soft_idle_millis = parse_number(key, value)?,
                PROP_L2_RECLAIM_INTERVAL => config.reclaim_interval = parse_number(key, value)?,
                _ => {}
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Parse a YAML document
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml(&yaml)
    }

    /// Reject inconsistent settings
    pub fn validate(&self) -> Result<()> {
        if self.reclaim_interval == 0 {
            return Err(Error::Config("reclaim_interval must be positive".to_string()));
        }
        if self.level2_type == Level2CacheType::Provider && self.cache_name.trim().is_empty() {
            return Err(Error::Config(
                "provider-backed level2 cache requires a cache name".to_string(),
            ));
        }
        Ok(())
    }

    pub fn expiry_timeout(&self) -> Option<Duration> {
        self.expiry_millis.map(Duration::from_millis)
    }

    pub fn soft_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.soft_idle_millis)
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_lowercase().as_str() {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        _ => Err(Error::Config(format!("{}: expected boolean, got '{}'", key, value))),
    }
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::Config(format!("{}: expected number, got '{}'", key, value)))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn props(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.level2_type, Level2CacheType::Soft);
        assert_eq!(config.max_size, None);
        assert!(config.clear_at_close);
        assert!(config.cache_embedded);
        assert_eq!(config.expiry_timeout(), None);
    }

    #[test]
    fn test_from_properties() {
        let config = CacheConfig::from_properties(&props(&[
            ("datanucleus.cache.level2.type", "weak"),
            ("datanucleus.cache.level2.maxSize", "100"),
            ("datanucleus.cache.level2.cacheEmbedded", "false"),
            ("datanucleus.cache.level2.expiryMillis", "2500"),
            ("datanucleus.cache.level1.type", "strong"),
            ("datanucleus.ConnectionURL", "mem:"),
        ]))
        .unwrap();

        assert_eq!(config.level2_type, Level2CacheType::Weak);
        assert_eq!(config.level1_type, Level1CacheType::Strong);
        assert_eq!(config.max_size, Some(100));
        assert!(!config.cache_embedded);
        assert_eq!(config.expiry_timeout(), Some(Duration::from_millis(2500)));
    }

    #[test]
    fn test_negative_max_size_is_unbounded() {
        let config =
            CacheConfig::from_properties(&props(&[("datanucleus.cache.level2.maxSize", "-1")]))
                .unwrap();
        assert_eq!(config.max_size, None);
    }

    #[test]
    fn test_invalid_properties() {
        let err = CacheConfig::from_properties(&props(&[("datanucleus.cache.level2.type", "lru")]))
            .unwrap_err();
        assert_matches!(err, Error::Config(_));

        let err = CacheConfig::from_properties(&props(&[(
            "datanucleus.cache.level2.clearAtClose",
            "maybe",
        )]))
        .unwrap_err();
        assert_matches!(err, Error::Config(_));
    }

    #[test]
    fn test_provider_requires_name() {
        let err = CacheConfig::from_properties(&props(&[
            ("datanucleus.cache.level2.type", "provider"),
            ("datanucleus.cache.level2.cacheName", "  "),
        ]))
        .unwrap_err();
        assert_matches!(err, Error::Config(_));
    }

    #[test]
    fn test_from_yaml() {
        let yaml = r#"
level2_type: strong
max_size: 10
cache_embedded: false
"#;
        let config = CacheConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.level2_type, Level2CacheType::Strong);
        assert_eq!(config.max_size, Some(10));
        assert!(!config.cache_embedded);
        assert_eq!(config.cache_name, "nucleus");
    }

    #[test]
    fn test_from_file() {
        let path = std::env::temp_dir().join(format!("nucleus-{}.yaml", uuid::Uuid::new_v4()));
        std::fs::write(&path, "level2_type: weak\nmax_size: 3\n").unwrap();
        let config = CacheConfig::from_file(&path);
        std::fs::remove_file(&path).unwrap();

        let config = config.unwrap();
        assert_eq!(config.level2_type, Level2CacheType::Weak);
        assert_eq!(config.max_size, Some(3));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let path = std::env::temp_dir().join(format!("nucleus-{}.yaml", uuid::Uuid::new_v4()));
        let err = CacheConfig::from_file(&path).unwrap_err();
        assert_matches!(err, Error::Io(_));
    }
}
