//! Property-based tests for key composition.
//!
//! The writer, the expiry listener and the orphan cleaner only stay
//! consistent if key composition is invertible and shard selection is
//! deterministic, so those contracts get hammered with random inputs here.
//!
//! Run with: `cargo test --test proptest_keys`

use proptest::prelude::*;

use tagcache::{stable_hash, CacheConfig, KeySpace};

// =============================================================================
// Strategies for generating test data
// =============================================================================

/// Caller keys without the internal separator sequences, for which
/// composition is documented to be invertible.
fn caller_key_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_.-]{1,32}"
}

fn keyspace(use_namespace: bool, num_shards: u32) -> KeySpace {
    KeySpace::from_config(&CacheConfig {
        use_namespace,
        num_shards,
        ..Default::default()
    })
}

fn prefixed_keyspace(use_namespace: bool) -> KeySpace {
    KeySpace::from_config(&CacheConfig {
        connection_prefix: "laravel_database_".to_string(),
        use_namespace,
        ..Default::default()
    })
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    /// stable_hash is a pure function of its input.
    #[test]
    fn prop_stable_hash_deterministic(key in any::<String>()) {
        prop_assert_eq!(stable_hash(&key), stable_hash(&key));
    }

    /// Composition then decomposition returns the caller's key, with and
    /// without namespace distribution.
    #[test]
    fn prop_final_original_round_trip(key in caller_key_strategy()) {
        for use_namespace in [false, true] {
            let keys = keyspace(use_namespace, 256);
            let final_key = keys.final_key(&key);
            prop_assert_eq!(keys.original_key(&final_key), key.clone());
        }
    }

    /// The store-level connection prefix is transparent to decomposition.
    #[test]
    fn prop_round_trip_survives_store_prefix(key in caller_key_strategy()) {
        for use_namespace in [false, true] {
            let keys = prefixed_keyspace(use_namespace);
            let wire = keys.absolute(&keys.final_key(&key));
            prop_assert_eq!(keys.original_key(&wire), key.clone());
        }
    }

    /// Shard selection is deterministic and always lands inside the
    /// configured shard count.
    #[test]
    fn prop_shard_index_in_range(
        key in caller_key_strategy(),
        num_shards in 1u32..=1024,
    ) {
        let keys = keyspace(false, num_shards);
        let final_key = keys.final_key(&key);
        let index = keys.shard_index(&final_key);
        prop_assert!(index < num_shards);
        prop_assert_eq!(index, keys.shard_index(&final_key));
        prop_assert_eq!(
            keys.shard_for("tag", &final_key),
            keys.shard_set_name("tag", index)
        );
    }

    /// Every key the layer writes is accepted back by the expiry-event
    /// filter, with the store-level prefix stripped, even when the event
    /// payload carries cluster hash-tag braces.
    #[test]
    fn prop_expiry_filter_accepts_own_keys(key in caller_key_strategy()) {
        for use_namespace in [false, true] {
            let keys = prefixed_keyspace(use_namespace);
            let final_key = keys.final_key(&key);
            let event = keys.absolute(&final_key);

            prop_assert_eq!(
                keys.expired_event_key(&event, None),
                Some(final_key.clone())
            );
            prop_assert_eq!(
                keys.expired_event_key(&format!("{{{event}}}"), None),
                Some(final_key)
            );
        }
    }

    /// Keys outside the composed prefix are never accepted.
    #[test]
    fn prop_expiry_filter_rejects_foreign_keys(key in "[a-zA-Z0-9_.-]{1,32}") {
        let keys = prefixed_keyspace(false);
        // No store prefix at all: someone else's keyspace
        prop_assert_eq!(keys.expired_event_key(&key, None), None);
    }
}
