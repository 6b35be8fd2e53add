// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The cache engine: the primary read/write/invalidate API.
//!
//! Owns the tag-index write/read protocol and the pipelining policy:
//! on a standalone store multi-step mutations go out as one pipelined
//! batch (single round trip, best-effort atomicity — pipelining is not a
//! transaction); on a cluster they are issued sequentially, since shard
//! sets may hash to different nodes than the entry itself, and a crash
//! mid-sequence is repaired later by the orphan cleaner.
//!
//! Values are stored as JSON. A numeric value serializes to its bare
//! decimal form, which is exactly what `INCRBY`/`DECRBY` operate on, so
//! counters created through [`CacheEngine::increment`] read back through
//! [`CacheEngine::get`] without a special case.
//!
//! # Example
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! # use tagcache::{CacheConfig, CacheEngine, RedisConnector};
//! # async fn example() -> Result<(), tagcache::CacheError> {
//! let config = CacheConfig { advanced_mode: true, ..Default::default() };
//! let connector = Arc::new(RedisConnector::connect(&config).await?);
//! let engine = CacheEngine::new(connector, &config);
//!
//! engine.put("session:1", &"abc", Some(60)).await?;
//! let cached: Option<String> = engine.get("session:1").await?;
//! assert_eq!(cached.as_deref(), Some("abc"));
//! # Ok(())
//! # }
//! ```

mod locks;
mod tags;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::config::CacheConfig;
use crate::connector::RedisConnector;
use crate::error::CacheError;
use crate::keys::KeySpace;
use crate::metrics;

/// Options for [`CacheEngine::forget`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ForgetOptions {
    /// `key` is already a composed final key (as found in shard sets and
    /// listener batches) rather than an original caller key.
    pub is_final_key: bool,
    /// Remove only shard memberships and the tag index, leaving the entry
    /// untouched — the listener's path, where the entry already expired.
    pub only_tags: bool,
}

impl ForgetOptions {
    /// Forget a key that is already a final key.
    #[must_use]
    pub fn final_key() -> Self {
        Self {
            is_final_key: true,
            only_tags: false,
        }
    }

    /// Clean tag state for an already-expired final key.
    #[must_use]
    pub fn tags_only() -> Self {
        Self {
            is_final_key: true,
            only_tags: true,
        }
    }
}

/// The engine's interface, for substituting alternate backends or mocks.
///
/// Works on [`serde_json::Value`]; the typed convenience methods live on
/// [`CacheEngine`] itself and delegate to the same machinery.
#[async_trait]
pub trait TagCache: Send + Sync {
    async fn put_value(&self, key: &str, value: &Value, ttl: Option<u64>)
        -> Result<(), CacheError>;
    async fn put_value_with_tags(
        &self,
        key: &str,
        value: &Value,
        tags: &[String],
        ttl: Option<u64>,
    ) -> Result<(), CacheError>;
    async fn get_value(&self, key: &str) -> Result<Option<Value>, CacheError>;
    async fn forget(&self, key: &str, opts: ForgetOptions) -> Result<(), CacheError>;
    async fn flush_by_tags(&self, tags: &[String]) -> Result<(), CacheError>;
    async fn has(&self, key: &str) -> Result<bool, CacheError>;
    async fn increment(&self, key: &str, delta: i64) -> Result<i64, CacheError>;
    async fn decrement(&self, key: &str, delta: i64) -> Result<i64, CacheError>;
    async fn tags_of_key(&self, key: &str) -> Result<Vec<String>, CacheError>;
    async fn keys_of_tag(&self, tag: &str) -> Result<Vec<String>, CacheError>;
    async fn flush(&self) -> Result<(), CacheError>;
}

/// Tag-aware cache engine over one connection.
///
/// Explicitly constructed and injected; a process talking to several
/// logical connections builds one engine per [`RedisConnector`].
pub struct CacheEngine {
    connector: Arc<RedisConnector>,
    keys: KeySpace,
    advanced_mode: bool,
}

impl CacheEngine {
    #[must_use]
    pub fn new(connector: Arc<RedisConnector>, config: &CacheConfig) -> Self {
        Self {
            connector,
            keys: KeySpace::from_config(config),
            advanced_mode: config.advanced_mode,
        }
    }

    /// The key-composition contract this engine writes under.
    #[must_use]
    pub fn keys(&self) -> &KeySpace {
        &self.keys
    }

    #[must_use]
    pub fn connector(&self) -> &Arc<RedisConnector> {
        &self.connector
    }

    /// Whether tag-index maintenance is active.
    #[must_use]
    pub fn is_advanced(&self) -> bool {
        self.advanced_mode
    }

    /// Final key (without the store-level prefix) for a caller key.
    #[must_use]
    pub fn final_key(&self, key: &str) -> String {
        self.keys.final_key(key)
    }

    fn wire_key(&self, name: &str) -> String {
        self.keys.absolute(name)
    }

    fn encode<T: Serialize + ?Sized>(value: &T) -> Result<String, CacheError> {
        Ok(serde_json::to_string(value)?)
    }

    fn decode<T: DeserializeOwned>(raw: &str) -> Result<T, CacheError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Store a value without tags. With a TTL the write and expiry are one
    /// atomic `SETEX`; without, a plain `SET`.
    pub async fn put<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<u64>,
    ) -> Result<(), CacheError> {
        let outcome: Result<(), CacheError> = async {
            let wire = self.wire_key(&self.keys.final_key(key));
            let payload = Self::encode(value)?;
            let mut conn = self.connector.connection();
            match ttl {
                Some(secs) => {
                    let _: () = conn.set_ex(&wire, payload, secs).await?;
                }
                None => {
                    let _: () = conn.set(&wire, payload).await?;
                }
            }
            Ok(())
        }
        .await;
        metrics::record_outcome("put", &outcome);
        outcome
    }

    /// Fetch and decode a value; `None` for a missing key.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        let outcome: Result<Option<T>, CacheError> = async {
            let wire = self.wire_key(&self.keys.final_key(key));
            let mut conn = self.connector.connection();
            let raw: Option<String> = conn.get(&wire).await?;
            match raw {
                Some(raw) => Ok(Some(Self::decode(&raw)?)),
                None => Ok(None),
            }
        }
        .await;
        metrics::record_outcome("get", &outcome);
        outcome
    }

    /// Whether a key exists, without fetching its value.
    pub async fn has(&self, key: &str) -> Result<bool, CacheError> {
        let wire = self.wire_key(&self.keys.final_key(key));
        let mut conn = self.connector.connection();
        Ok(conn.exists(&wire).await?)
    }

    /// Remaining TTL in seconds (-1 without expiry, -2 when missing).
    pub async fn ttl_of(&self, key: &str) -> Result<i64, CacheError> {
        let wire = self.wire_key(&self.keys.final_key(key));
        let mut conn = self.connector.connection();
        Ok(conn.ttl(&wire).await?)
    }

    /// Atomic numeric adjust; creates the key at `delta` when absent.
    /// Returns the new value.
    pub async fn increment(&self, key: &str, delta: i64) -> Result<i64, CacheError> {
        let wire = self.wire_key(&self.keys.final_key(key));
        let mut conn = self.connector.connection();
        Ok(conn.incr(&wire, delta).await?)
    }

    /// Atomic numeric adjust downwards; creates the key at `-delta` when
    /// absent. Returns the new value.
    pub async fn decrement(&self, key: &str, delta: i64) -> Result<i64, CacheError> {
        let wire = self.wire_key(&self.keys.final_key(key));
        let mut conn = self.connector.connection();
        Ok(conn.decr(&wire, delta).await?)
    }

    /// Incremental cursor-based pattern scan.
    ///
    /// Patterns match raw store keys (so `*product:*` finds prefixed and
    /// namespaced entries); results are keyed by original key. Skipped:
    /// this layer's own bookkeeping keys (a tag index embeds the entry
    /// name and would match entry-shaped patterns), keys that disappear
    /// between the scan and the read, and foreign non-string keys.
    pub async fn get_keys(
        &self,
        patterns: &[String],
    ) -> Result<HashMap<String, Value>, CacheError> {
        let mut conn = self.connector.connection();
        let mut results = HashMap::new();

        for pattern in patterns {
            let wire_pattern = self.wire_key(pattern);
            let mut cursor = 0u64;
            loop {
                let (next_cursor, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(&wire_pattern)
                    .arg("COUNT")
                    .arg(20)
                    .query_async(&mut conn)
                    .await?;

                for raw_key in batch {
                    if self.keys.is_internal(&raw_key) {
                        continue;
                    }
                    let original = self.keys.original_key(&raw_key);
                    let value = match self.get_value(&original).await {
                        Ok(value) => value,
                        // GET against someone else's set or hash
                        Err(CacheError::Connection(e))
                            if e.kind() == redis::ErrorKind::TypeError =>
                        {
                            continue
                        }
                        Err(e) => return Err(e),
                    };
                    if let Some(value) = value {
                        results.insert(original, value);
                    }
                }

                cursor = next_cursor;
                if cursor == 0 {
                    break;
                }
            }
        }

        debug!(keys = results.len(), "Pattern scan complete");
        Ok(results)
    }

    /// Unconditional full wipe of the connection's database. Destructive.
    pub async fn flush(&self) -> Result<(), CacheError> {
        let mut conn = self.connector.connection();
        let outcome: Result<(), CacheError> = async {
            let _: () = redis::cmd("FLUSHALL").query_async(&mut conn).await?;
            Ok(())
        }
        .await;
        metrics::record_outcome("flush", &outcome);
        outcome
    }
}

#[async_trait]
impl TagCache for CacheEngine {
    async fn put_value(
        &self,
        key: &str,
        value: &Value,
        ttl: Option<u64>,
    ) -> Result<(), CacheError> {
        self.put(key, value, ttl).await
    }

    async fn put_value_with_tags(
        &self,
        key: &str,
        value: &Value,
        tags: &[String],
        ttl: Option<u64>,
    ) -> Result<(), CacheError> {
        self.put_with_tags(key, value, tags, ttl).await
    }

    async fn get_value(&self, key: &str) -> Result<Option<Value>, CacheError> {
        self.get(key).await
    }

    async fn forget(&self, key: &str, opts: ForgetOptions) -> Result<(), CacheError> {
        CacheEngine::forget(self, key, opts).await
    }

    async fn flush_by_tags(&self, tags: &[String]) -> Result<(), CacheError> {
        CacheEngine::flush_by_tags(self, tags).await
    }

    async fn has(&self, key: &str) -> Result<bool, CacheError> {
        CacheEngine::has(self, key).await
    }

    async fn increment(&self, key: &str, delta: i64) -> Result<i64, CacheError> {
        CacheEngine::increment(self, key, delta).await
    }

    async fn decrement(&self, key: &str, delta: i64) -> Result<i64, CacheError> {
        CacheEngine::decrement(self, key, delta).await
    }

    async fn tags_of_key(&self, key: &str) -> Result<Vec<String>, CacheError> {
        CacheEngine::tags_of_key(self, key).await
    }

    async fn keys_of_tag(&self, tag: &str) -> Result<Vec<String>, CacheError> {
        CacheEngine::keys_of_tag(self, tag).await
    }

    async fn flush(&self) -> Result<(), CacheError> {
        CacheEngine::flush(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forget_options_defaults() {
        let opts = ForgetOptions::default();
        assert!(!opts.is_final_key);
        assert!(!opts.only_tags);
    }

    #[test]
    fn test_forget_options_builders() {
        assert!(ForgetOptions::final_key().is_final_key);
        assert!(!ForgetOptions::final_key().only_tags);
        let tags_only = ForgetOptions::tags_only();
        assert!(tags_only.is_final_key && tags_only.only_tags);
    }

    #[test]
    fn test_tag_cache_is_object_safe() {
        fn assert_usable(_cache: &dyn TagCache) {}
        let _ = assert_usable;
    }

    #[test]
    fn test_encode_numeric_is_bare_decimal() {
        // INCRBY-compatible: numbers are stored verbatim
        assert_eq!(CacheEngine::encode(&42i64).unwrap(), "42");
        assert_eq!(CacheEngine::encode(&-7i64).unwrap(), "-7");
        // Everything else is JSON
        assert_eq!(CacheEngine::encode("abc").unwrap(), "\"abc\"");
    }

    #[test]
    fn test_decode_counter_value() {
        // A value INCRBY left behind parses as a JSON number
        let value: i64 = CacheEngine::decode("8").unwrap();
        assert_eq!(value, 8);
        let value: serde_json::Value = CacheEngine::decode("8").unwrap();
        assert_eq!(value, serde_json::json!(8));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let result: Result<i64, _> = CacheEngine::decode("not json");
        assert!(matches!(result, Err(CacheError::Serialization(_))));
    }
}
