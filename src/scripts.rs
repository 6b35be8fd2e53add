//! Server-side Lua scripts, wrapped as typed invocations.
//!
//! EVAL is the only portable way to get multi-key atomicity out of Redis,
//! so the three mutations that must not interleave with other clients live
//! here: lock acquire, lock release, and batch expiry reconciliation. Each
//! script is a [`redis::Script`] (EVALSHA with automatic EVAL fallback)
//! behind a function with an explicit key/argument list and a documented
//! return contract — never an inline string template at a call site.

use once_cell::sync::Lazy;
use redis::aio::ConnectionLike;
use redis::Script;

use crate::error::CacheError;
use crate::keys::KeySpace;
use crate::listener::ExpiredKey;

static ACQUIRE_LOCK: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
if redis.call('SET', KEYS[1], ARGV[2], 'NX', 'EX', tonumber(ARGV[1])) then
    return 1
else
    return 0
end
"#,
    )
});

static RELEASE_LOCK: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
return redis.call('DEL', KEYS[1])
"#,
    )
});

// Per batched key: re-verify the entry is actually gone (a re-write may
// have raced the expiry event), then drop it from every tagged shard and
// delete its tag index. The shard index is recomputed from the hash the
// listener precomputed client-side - the script has no equivalent hash
// primitive, so the hash travels as data. The greedy match splits each
// entry at its LAST '|', so keys containing the separator stay intact;
// an unparseable entry is skipped rather than poisoning the batch.
static RECONCILE_EXPIRED: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
local cache_prefix = ARGV[1]
local store_prefix = ARGV[2]
local shard_count = tonumber(ARGV[3])
for i = 4, #ARGV do
    local final_key, hash = string.match(ARGV[i], '^(.*)|(%d+)$')
    if final_key then
        local entry_key = store_prefix .. final_key
        if redis.call('EXISTS', entry_key) == 0 then
            local tags_key = store_prefix .. cache_prefix .. 'tags:' .. final_key
            local tags = redis.call('SMEMBERS', tags_key)
            local shard_index = tonumber(hash) % shard_count
            for _, tag in ipairs(tags) do
                local shard_key = store_prefix .. cache_prefix .. 'tag:' .. tag .. ':shard:' .. shard_index
                redis.call('SREM', shard_key, final_key)
            end
            redis.call('DEL', tags_key)
        end
    end
end
return 'OK'
"#,
    )
});

/// Atomically acquire a lock: `SET key value NX EX ttl`.
///
/// KEYS: the lock entry. ARGV: ttl seconds, holder value.
/// Returns `true` when acquired, `false` when already held.
pub async fn acquire_lock<C: ConnectionLike + Send>(
    conn: &mut C,
    lock_key: &str,
    ttl_secs: u64,
    value: &str,
) -> Result<bool, CacheError> {
    let acquired: i64 = ACQUIRE_LOCK
        .key(lock_key)
        .arg(ttl_secs)
        .arg(value)
        .invoke_async(conn)
        .await
        .map_err(|e| CacheError::Script {
            message: e.to_string(),
        })?;
    Ok(acquired == 1)
}

/// Unconditionally release a lock.
///
/// KEYS: the lock entry. Returns the number of keys removed (0 when the
/// lock had already expired), which callers are free to ignore.
pub async fn release_lock<C: ConnectionLike + Send>(
    conn: &mut C,
    lock_key: &str,
) -> Result<i64, CacheError> {
    RELEASE_LOCK
        .key(lock_key)
        .invoke_async(conn)
        .await
        .map_err(|e| CacheError::Script {
            message: e.to_string(),
        })
}

/// Atomically reconcile a batch of expired keys against the tag index.
///
/// KEYS: none. ARGV: cache prefix, store-level prefix, shard count, then
/// one `final_key|hash` entry per expired key. Returns `"OK"`; any script
/// error surfaces as [`CacheError::Script`] and the caller's batch is
/// cleared regardless (a failed batch is picked up by the orphan cleaner).
pub async fn reconcile_expired<C: ConnectionLike + Send>(
    conn: &mut C,
    keys: &KeySpace,
    batch: &[ExpiredKey],
) -> Result<(), CacheError> {
    let mut invocation = RECONCILE_EXPIRED.prepare_invoke();
    invocation
        .arg(keys.prefix())
        .arg(keys.store_prefix())
        .arg(keys.num_shards());
    for entry in batch {
        invocation.arg(pack(entry));
    }

    let status: String = invocation
        .invoke_async(conn)
        .await
        .map_err(|e| CacheError::Script {
            message: e.to_string(),
        })?;

    if status != "OK" {
        return Err(CacheError::Script { message: status });
    }
    Ok(())
}

/// `final_key|hash` — Lua receives flat strings, not nested arrays. The
/// hash sits after the last `|`, so keys containing the separator survive
/// the script-side split.
fn pack(entry: &ExpiredKey) -> String {
    format!("{}|{}", entry.final_key, entry.hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_joins_key_and_hash() {
        let entry = ExpiredKey {
            final_key: "supercache:product:1".into(),
            hash: 12345,
        };
        assert_eq!(pack(&entry), "supercache:product:1|12345");
    }

    #[test]
    fn test_pack_splits_at_last_separator() {
        // Mirrors the greedy script-side match: everything before the
        // last '|' is the key, even when the key itself contains one
        let entry = ExpiredKey {
            final_key: "supercache:a|b:1".into(),
            hash: 7,
        };
        let packed = pack(&entry);
        assert_eq!(packed, "supercache:a|b:1|7");

        let (key, hash) = packed.rsplit_once('|').unwrap();
        assert_eq!(key, "supercache:a|b:1");
        assert_eq!(hash.parse::<u32>().unwrap(), 7);
    }

    #[test]
    fn test_scripts_compile_lazily() {
        // Force evaluation; a syntactically broken script would still load
        // here, but at least the hashes must be stable across invocations.
        assert_eq!(
            ACQUIRE_LOCK.get_hash().to_string(),
            ACQUIRE_LOCK.get_hash().to_string()
        );
        assert!(!RECONCILE_EXPIRED.get_hash().is_empty());
        assert!(!RELEASE_LOCK.get_hash().is_empty());
    }
}
