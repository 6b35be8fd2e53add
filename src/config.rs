//! Configuration for the cache layer.
//!
//! # Example
//!
//! ```
//! use tagcache::CacheConfig;
//!
//! // Minimal config (uses defaults)
//! let config = CacheConfig::default();
//! assert_eq!(config.num_shards, 256);
//! assert_eq!(config.prefix, "supercache:");
//!
//! // Full config
//! let config = CacheConfig {
//!     redis_url: "redis://localhost:6379".into(),
//!     num_shards: 64,
//!     advanced_mode: true,
//!     batch_size: 100,
//!     time_threshold_secs: 1,
//!     ..Default::default()
//! };
//! assert!(!config.is_cluster());
//! ```

use serde::Deserialize;

use crate::error::CacheError;

/// Configuration for the cache layer.
///
/// Constructed once at startup and injected into every component; no
/// component reads ambient configuration at runtime.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Redis connection string (e.g., "redis://localhost:6379")
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Cluster node connection strings. Empty means standalone.
    #[serde(default)]
    pub cluster_urls: Vec<String>,

    /// Prefix for every key this layer owns (entries, shard sets, tag
    /// indexes, locks).
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Store-level prefix another client stack prepends to all key names
    /// on this connection. Empty when this crate is the only writer.
    ///
    /// Expiry events and SCAN results carry this prefix, and server-side
    /// scripts must re-add it when touching keys directly, so it is part
    /// of the key-composition contract rather than an opaque detail.
    #[serde(default)]
    pub connection_prefix: String,

    /// Number of shard sets each tag's membership is split across.
    #[serde(default = "default_num_shards")]
    pub num_shards: u32,

    /// Append a hashed `ns<i>` suffix to final keys to spread ownership
    /// of logically related keys.
    #[serde(default)]
    pub use_namespace: bool,

    /// Number of namespace buckets when `use_namespace` is on.
    #[serde(default = "default_num_namespaces")]
    pub num_namespaces: u32,

    /// Listener batch size threshold (events per reconciliation flush).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Listener time threshold in seconds, measured from the previous flush.
    #[serde(default = "default_time_threshold_secs")]
    pub time_threshold_secs: u64,

    /// Advanced mode gates tag-index maintenance: per-key tag sets,
    /// listener-driven reconciliation, and tag cleanup on `forget`.
    ///
    /// With advanced mode off, `forget` deletes only the entry and leaves
    /// shard membership stale until the orphan cleaner sweeps it: fewer
    /// round trips on the delete path, temporary staleness in the shards.
    #[serde(default)]
    pub advanced_mode: bool,
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}
fn default_prefix() -> String {
    "supercache:".to_string()
}
fn default_num_shards() -> u32 {
    256
}
fn default_num_namespaces() -> u32 {
    16
}
fn default_batch_size() -> usize {
    100
}
fn default_time_threshold_secs() -> u64 {
    1
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            redis_url: default_redis_url(),
            cluster_urls: Vec::new(),
            prefix: default_prefix(),
            connection_prefix: String::new(),
            num_shards: default_num_shards(),
            use_namespace: false,
            num_namespaces: default_num_namespaces(),
            batch_size: default_batch_size(),
            time_threshold_secs: default_time_threshold_secs(),
            advanced_mode: false,
        }
    }
}

impl CacheConfig {
    /// Whether this configuration targets a Redis cluster.
    #[must_use]
    pub fn is_cluster(&self) -> bool {
        !self.cluster_urls.is_empty()
    }

    /// Reject configurations that cannot produce a working key layout.
    pub fn validate(&self) -> Result<(), CacheError> {
        if self.prefix.is_empty() {
            return Err(CacheError::Config(
                "prefix must be non-empty: it is what the expiry listener \
                 uses to recognize its own keys"
                    .to_string(),
            ));
        }
        if self.num_shards == 0 {
            return Err(CacheError::Config("num_shards must be >= 1".to_string()));
        }
        if self.use_namespace && self.num_namespaces == 0 {
            return Err(CacheError::Config(
                "num_namespaces must be >= 1 when use_namespace is on".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(CacheError::Config("batch_size must be >= 1".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = CacheConfig::default();
        assert_eq!(config.prefix, "supercache:");
        assert_eq!(config.num_shards, 256);
        assert_eq!(config.num_namespaces, 16);
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.time_threshold_secs, 1);
        assert!(!config.use_namespace);
        assert!(!config.advanced_mode);
        assert!(!config.is_cluster());
    }

    #[test]
    fn test_deserialize_partial() {
        let config: CacheConfig =
            serde_json::from_str(r#"{"num_shards": 8, "advanced_mode": true}"#).unwrap();
        assert_eq!(config.num_shards, 8);
        assert!(config.advanced_mode);
        // Untouched fields fall back to defaults
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.connection_prefix, "");
    }

    #[test]
    fn test_validate_rejects_degenerate_layouts() {
        assert!(CacheConfig::default().validate().is_ok());

        let bad = CacheConfig {
            num_shards: 0,
            ..Default::default()
        };
        assert!(matches!(bad.validate(), Err(crate::CacheError::Config(_))));

        let bad = CacheConfig {
            prefix: String::new(),
            ..Default::default()
        };
        assert!(bad.validate().is_err());

        // Namespace count only matters when namespaces are on
        let ok = CacheConfig {
            num_namespaces: 0,
            ..Default::default()
        };
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn test_cluster_detection() {
        let config = CacheConfig {
            cluster_urls: vec![
                "redis://10.0.0.1:7000".into(),
                "redis://10.0.0.2:7000".into(),
            ],
            ..Default::default()
        };
        assert!(config.is_cluster());
    }
}
