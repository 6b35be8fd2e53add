//! Key, shard and namespace composition.
//!
//! Every name this layer writes to Redis is composed here, and only here.
//! The writer ([`CacheEngine`](crate::CacheEngine)), the expiry listener and
//! the orphan cleaner must agree byte-for-byte on how the store-level
//! connection prefix, the cache prefix and the namespace suffix combine —
//! a mismatch silently drops events or orphans entries instead of erroring,
//! so the composition is a single tested contract rather than string
//! concatenation scattered across components.
//!
//! Name shapes:
//!
//! ```text
//! entry       {prefix}{key}[:ns<i>]                  ("final key")
//! shard set   {prefix}tag:{tag}:shard:{index}
//! tag index   {prefix}tags:{final key}
//! lock        {final key of name}:semaphore
//! ```
//!
//! All of the above are additionally prefixed with the store-level
//! connection prefix when commands hit the wire (see [`KeySpace::absolute`]).

use crate::config::CacheConfig;

/// Stable 32-bit hash used for shard and namespace selection.
///
/// Deterministic across processes and releases: the listener precomputes
/// this hash and threads it through to the reconciliation script as data
/// (the script cannot recompute it server-side), and the cleaner relies on
/// members landing in the shard this function selected at write time.
#[must_use]
pub fn stable_hash(key: &str) -> u32 {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(key.as_bytes());
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

/// Value object holding the key-composition rules for one connection.
///
/// Cheap to clone; derived once from [`CacheConfig`] and injected into each
/// component.
#[derive(Debug, Clone)]
pub struct KeySpace {
    prefix: String,
    store_prefix: String,
    num_shards: u32,
    use_namespace: bool,
    num_namespaces: u32,
}

impl KeySpace {
    #[must_use]
    pub fn from_config(config: &CacheConfig) -> Self {
        Self {
            prefix: config.prefix.clone(),
            store_prefix: config.connection_prefix.clone(),
            num_shards: config.num_shards.max(1),
            use_namespace: config.use_namespace,
            num_namespaces: config.num_namespaces.max(1),
        }
    }

    #[must_use]
    pub fn num_shards(&self) -> u32 {
        self.num_shards
    }

    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    #[must_use]
    pub fn store_prefix(&self) -> &str {
        &self.store_prefix
    }

    #[must_use]
    pub fn use_namespace(&self) -> bool {
        self.use_namespace
    }

    /// Namespace suffix for a key: `ns<i>`, `i = stable_hash(key) % num_namespaces`.
    #[must_use]
    pub fn namespace_for(&self, key: &str) -> String {
        format!("ns{}", stable_hash(key) % self.num_namespaces)
    }

    /// Compose the final key for an entry: prefix + key, plus the namespace
    /// suffix when namespace distribution is enabled.
    #[must_use]
    pub fn final_key(&self, key: &str) -> String {
        if self.use_namespace {
            format!("{}{}:{}", self.prefix, key, self.namespace_for(key))
        } else {
            format!("{}{}", self.prefix, key)
        }
    }

    /// Inverse of [`final_key`](Self::final_key): strips the store-level
    /// connection prefix, the cache prefix, and (when namespaces are
    /// enabled) a trailing `:ns<digits>` suffix.
    ///
    /// Only a true inverse for keys that do not themselves contain the
    /// internal separator sequences (`:ns<digits>` tails, the configured
    /// prefixes) — a documented limitation.
    #[must_use]
    pub fn original_key(&self, raw: &str) -> String {
        let stripped = raw.strip_prefix(&self.store_prefix).unwrap_or(raw);
        let stripped = stripped.strip_prefix(&self.prefix).unwrap_or(stripped);
        if !self.use_namespace {
            return stripped.to_string();
        }
        match stripped.rfind(":ns") {
            Some(pos) => {
                let digits = &stripped[pos + 3..];
                if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
                    stripped[..pos].to_string()
                } else {
                    stripped.to_string()
                }
            }
            None => stripped.to_string(),
        }
    }

    /// Shard index a final key hashes into.
    #[must_use]
    pub fn shard_index(&self, final_key: &str) -> u32 {
        stable_hash(final_key) % self.num_shards
    }

    /// Shard-set name for a (tag, shard index) pair.
    #[must_use]
    pub fn shard_set_name(&self, tag: &str, index: u32) -> String {
        format!("{}tag:{}:shard:{}", self.prefix, tag, index)
    }

    /// Shard-set name a final key belongs to for the given tag.
    ///
    /// This is the core correctness invariant of the whole system: writer,
    /// listener and cleaner all reference the shard through this function,
    /// with the hash of the *final* key (never the original key).
    #[must_use]
    pub fn shard_for(&self, tag: &str, final_key: &str) -> String {
        self.shard_set_name(tag, self.shard_index(final_key))
    }

    /// SCAN pattern matching every tag's shard set at one shard index.
    #[must_use]
    pub fn shard_scan_pattern(&self, index: u32) -> String {
        format!("{}tag:*:shard:{}", self.prefix, index)
    }

    /// Per-key tag index set name (advanced mode only).
    #[must_use]
    pub fn tag_index_key(&self, final_key: &str) -> String {
        format!("{}tags:{}", self.prefix, final_key)
    }

    /// Lock entry name for a logical lock name.
    #[must_use]
    pub fn lock_key(&self, name: &str) -> String {
        format!("{}:semaphore", self.final_key(name))
    }

    /// Prepend the store-level connection prefix. Applied at the command
    /// boundary; shard members and tag-index contents stay unprefixed.
    #[must_use]
    pub fn absolute(&self, name: &str) -> String {
        if self.store_prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}{}", self.store_prefix, name)
        }
    }

    /// Whether a raw store key names one of this layer's bookkeeping
    /// structures (shard set, tag index, lock) rather than a cache entry.
    ///
    /// Pattern scans use this to keep bookkeeping keys out of
    /// caller-facing results; a tag index in particular embeds the entry's
    /// own name and would otherwise match entry-shaped patterns.
    #[must_use]
    pub fn is_internal(&self, raw: &str) -> bool {
        let stripped = raw.strip_prefix(&self.store_prefix).unwrap_or(raw);
        let Some(rest) = stripped.strip_prefix(&self.prefix) else {
            return false;
        };
        rest.starts_with("tags:")
            || (rest.starts_with("tag:") && rest.contains(":shard:"))
            || rest.ends_with(":semaphore")
    }

    /// Filter an expiry-event key down to the final key this layer owns.
    ///
    /// Strips cluster hash-tag braces, requires the composed
    /// `store_prefix + prefix`, and when namespace distribution is on and
    /// this listener instance was pinned to a namespace, requires the
    /// matching `ns<id>` suffix. Returns the final key with the store-level
    /// prefix stripped, ready for shard/tag-index composition.
    #[must_use]
    pub fn expired_event_key(&self, raw: &str, namespace_id: Option<u32>) -> Option<String> {
        let cleaned: String = raw.chars().filter(|c| *c != '{' && *c != '}').collect();

        let composed_prefix = format!("{}{}", self.store_prefix, self.prefix);
        if !cleaned.starts_with(&composed_prefix) {
            return None;
        }

        if self.use_namespace {
            if let Some(id) = namespace_id {
                if !cleaned.ends_with(&format!("ns{id}")) {
                    return None;
                }
            }
        }

        Some(cleaned[self.store_prefix.len()..].to_string())
    }
}
