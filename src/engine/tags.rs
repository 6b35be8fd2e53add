// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Tagged writes, tag-driven invalidation, and tag introspection.
//!
//! Tag membership lives in sharded sets (`tag:{tag}:shard:{index}`, index
//! derived from the hash of the final key) so that a hot tag never becomes
//! one giant set on one node. Advanced mode additionally maintains a
//! reverse index per entry (`tags:{final key}`), which is what makes
//! per-key [`forget`](super::CacheEngine::forget) able to clean shard
//! membership without scanning.

use std::future::Future;

use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::{CacheEngine, ForgetOptions};
use crate::error::CacheError;
use crate::metrics;

impl CacheEngine {
    /// Store a value under one or more tags.
    ///
    /// Standalone: entry write, shard memberships and (in advanced mode)
    /// the reverse index go out as a single pipeline. Cluster: the same
    /// commands are issued sequentially, since each name may live on a
    /// different node.
    pub async fn put_with_tags<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        tags: &[String],
        ttl: Option<u64>,
    ) -> Result<(), CacheError> {
        let outcome = self.put_with_tags_inner(key, value, tags, ttl).await;
        metrics::record_outcome("put_with_tags", &outcome);
        outcome
    }

    async fn put_with_tags_inner<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        tags: &[String],
        ttl: Option<u64>,
    ) -> Result<(), CacheError> {
        let final_key = self.keys().final_key(key);
        let payload = Self::encode(value)?;
        let mut conn = self.connector().connection();

        if self.connector().is_cluster() {
            match ttl {
                Some(secs) => {
                    let _: () = conn.set_ex(self.wire_key(&final_key), &payload, secs).await?;
                }
                None => {
                    let _: () = conn.set(self.wire_key(&final_key), &payload).await?;
                }
            }
            for tag in tags {
                let shard = self.keys().shard_for(tag, &final_key);
                let _: () = conn.sadd(self.wire_key(&shard), &final_key).await?;
            }
            if self.is_advanced() && !tags.is_empty() {
                let index = self.keys().tag_index_key(&final_key);
                let _: () = conn.sadd(self.wire_key(&index), tags).await?;
            }
        } else {
            let mut pipe = redis::pipe();
            match ttl {
                Some(secs) => {
                    pipe.cmd("SETEX")
                        .arg(self.wire_key(&final_key))
                        .arg(secs)
                        .arg(&payload)
                        .ignore();
                }
                None => {
                    pipe.set(self.wire_key(&final_key), &payload).ignore();
                }
            }
            for tag in tags {
                let shard = self.keys().shard_for(tag, &final_key);
                pipe.sadd(self.wire_key(&shard), &final_key).ignore();
            }
            if self.is_advanced() && !tags.is_empty() {
                let index = self.keys().tag_index_key(&final_key);
                pipe.sadd(self.wire_key(&index), tags).ignore();
            }
            let _: () = pipe.query_async(&mut conn).await?;
        }

        Ok(())
    }

    /// Read-through helper: return the cached value when present, otherwise
    /// run `producer`, store its result under `tags`, and return it. The
    /// producer is not invoked on a cache hit.
    pub async fn remember_with_tags<T, F, Fut>(
        &self,
        key: &str,
        tags: &[String],
        ttl: Option<u64>,
        producer: F,
    ) -> Result<T, CacheError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, CacheError>>,
    {
        if let Some(cached) = self.get(key).await? {
            return Ok(cached);
        }
        let value = producer().await?;
        self.put_with_tags(key, &value, tags, ttl).await?;
        Ok(value)
    }

    /// Remove an entry and whatever tag state is reachable for it.
    ///
    /// In advanced mode the reverse index names exactly the shard sets that
    /// hold the key, so membership is cleaned surgically. Without it only
    /// the entry itself can be deleted here; its shard memberships linger
    /// until the orphan cleaner reaps them (and `only_tags` has nothing to
    /// act on at all).
    pub async fn forget(&self, key: &str, opts: ForgetOptions) -> Result<(), CacheError> {
        let outcome = self.forget_inner(key, opts).await;
        metrics::record_outcome("forget", &outcome);
        outcome
    }

    async fn forget_inner(&self, key: &str, opts: ForgetOptions) -> Result<(), CacheError> {
        let final_key = if opts.is_final_key {
            key.to_string()
        } else {
            self.keys().final_key(key)
        };
        let mut conn = self.connector().connection();

        if !self.is_advanced() {
            if !opts.only_tags {
                let _: () = conn.del(self.wire_key(&final_key)).await?;
            }
            return Ok(());
        }

        let index = self.keys().tag_index_key(&final_key);
        let tags: Vec<String> = conn.smembers(self.wire_key(&index)).await?;

        if self.connector().is_cluster() {
            for tag in &tags {
                let shard = self.keys().shard_for(tag, &final_key);
                let _: () = conn.srem(self.wire_key(&shard), &final_key).await?;
            }
            let _: () = conn.del(self.wire_key(&index)).await?;
            if !opts.only_tags {
                let _: () = conn.del(self.wire_key(&final_key)).await?;
            }
        } else {
            let mut pipe = redis::pipe();
            for tag in &tags {
                let shard = self.keys().shard_for(tag, &final_key);
                pipe.srem(self.wire_key(&shard), &final_key).ignore();
            }
            pipe.del(self.wire_key(&index)).ignore();
            if !opts.only_tags {
                pipe.del(self.wire_key(&final_key)).ignore();
            }
            let _: () = pipe.query_async(&mut conn).await?;
        }

        Ok(())
    }

    /// Invalidate every entry carrying any of `tags`.
    ///
    /// Enumeration has to complete before removal starts (the shard sets
    /// are both the iteration source and a deletion target), so this is a
    /// read phase followed by per-key forgets rather than one pipeline.
    pub async fn flush_by_tags(&self, tags: &[String]) -> Result<(), CacheError> {
        let outcome = self.flush_by_tags_inner(tags).await;
        metrics::record_outcome("flush_by_tags", &outcome);
        outcome
    }

    async fn flush_by_tags_inner(&self, tags: &[String]) -> Result<(), CacheError> {
        let mut conn = self.connector().connection();
        let mut flushed = 0usize;

        for tag in tags {
            let members = self.keys_of_tag(tag).await?;
            for member in &members {
                self.forget(member, ForgetOptions::final_key()).await?;
                if !self.is_advanced() {
                    // No reverse index to clean the membership through
                    let shard = self.keys().shard_for(tag, member);
                    let _: () = conn.srem(self.wire_key(&shard), member).await?;
                }
            }
            flushed += members.len();
        }

        debug!(tags = tags.len(), keys = flushed, "Flushed by tags");
        Ok(())
    }

    /// Tags recorded for a key (advanced mode; otherwise always empty).
    pub async fn tags_of_key(&self, key: &str) -> Result<Vec<String>, CacheError> {
        let final_key = self.keys().final_key(key);
        let index = self.keys().tag_index_key(&final_key);
        let mut conn = self.connector().connection();
        Ok(conn.smembers(self.wire_key(&index)).await?)
    }

    /// Final keys currently recorded under a tag, across all of its shards.
    ///
    /// Standalone batches the shard reads into one pipeline; cluster walks
    /// them one by one.
    pub async fn keys_of_tag(&self, tag: &str) -> Result<Vec<String>, CacheError> {
        let mut conn = self.connector().connection();
        let num_shards = self.keys().num_shards();

        if self.connector().is_cluster() {
            let mut members = Vec::new();
            for index in 0..num_shards {
                let shard = self.keys().shard_set_name(tag, index);
                let batch: Vec<String> = conn.smembers(self.wire_key(&shard)).await?;
                members.extend(batch);
            }
            Ok(members)
        } else {
            let mut pipe = redis::pipe();
            for index in 0..num_shards {
                let shard = self.keys().shard_set_name(tag, index);
                pipe.smembers(self.wire_key(&shard));
            }
            let shards: Vec<Vec<String>> = pipe.query_async(&mut conn).await?;
            Ok(shards.into_iter().flatten().collect())
        }
    }
}
