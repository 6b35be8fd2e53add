// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Orphan cleaner: the safety net under the expiry listener.
//!
//! Shard sets accumulate dead members whenever a listener was down, a
//! reconciliation batch failed, or a non-advanced deployment forgot keys
//! without cleaning memberships. The cleaner sweeps every shard set,
//! checks each member for liveness, and removes the dead ones together
//! with their tag indexes.
//!
//! Runs under a best-effort distributed lock so overlapping schedules
//! (cron on several hosts) collapse to one sweep; a held lock is a skip,
//! not an error. On a cluster, SCAN only sees keys owned by the contacted
//! node, so the sweep fans out over every master via per-node connections
//! while liveness checks go through the cluster-aware connection.

use std::sync::Arc;

use redis::aio::ConnectionLike;
use redis::AsyncCommands;
use tracing::{debug, info, warn};

use crate::config::CacheConfig;
use crate::connector::RedisConnector;
use crate::engine::CacheEngine;
use crate::error::CacheError;
use crate::keys::KeySpace;
use crate::metrics;
use crate::topology;

const LOCK_NAME: &str = "clean_orphans";

/// Outcome of one completed sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanReport {
    pub shard_sets_scanned: u64,
    pub orphans_removed: u64,
}

/// Sweeps shard sets for members whose entries no longer exist.
pub struct OrphanCleaner {
    connector: Arc<RedisConnector>,
    engine: Arc<CacheEngine>,
    keys: KeySpace,
    lock_ttl_secs: u64,
}

impl OrphanCleaner {
    #[must_use]
    pub fn new(
        connector: Arc<RedisConnector>,
        engine: Arc<CacheEngine>,
        config: &CacheConfig,
    ) -> Self {
        Self {
            connector,
            engine,
            keys: KeySpace::from_config(config),
            lock_ttl_secs: 300,
        }
    }

    /// Cap how long the sweep lock is held before it self-expires.
    #[must_use]
    pub fn with_lock_ttl(mut self, secs: u64) -> Self {
        self.lock_ttl_secs = secs;
        self
    }

    /// Run one sweep. Returns `None` when another cleaner holds the lock.
    ///
    /// The lock is released even when the sweep fails; release failures
    /// are logged and swallowed (the TTL bounds the damage).
    pub async fn run(&self) -> Result<Option<CleanReport>, CacheError> {
        if !self
            .engine
            .lock(LOCK_NAME, self.lock_ttl_secs, "orphan-cleaner")
            .await?
        {
            debug!("Sweep already in progress elsewhere, skipping");
            metrics::record_cleaner_skipped();
            return Ok(None);
        }

        let result = self.sweep().await;

        if let Err(e) = self.engine.unlock(LOCK_NAME).await {
            warn!(error = %e, "Failed to release sweep lock, it will expire on its own");
        }

        let report = result?;
        metrics::record_orphans_removed(report.orphans_removed);
        info!(
            shard_sets = report.shard_sets_scanned,
            orphans = report.orphans_removed,
            "Orphan sweep complete"
        );
        Ok(Some(report))
    }

    async fn sweep(&self) -> Result<CleanReport, CacheError> {
        if self.connector.is_cluster() {
            self.sweep_cluster().await
        } else {
            let mut conn = self.connector.connection();
            self.sweep_node(&mut conn).await
        }
    }

    /// Sweep every shard index through one connection's keyspace view.
    async fn sweep_node<C>(&self, scan_conn: &mut C) -> Result<CleanReport, CacheError>
    where
        C: ConnectionLike + Send,
    {
        let mut report = CleanReport::default();
        for index in 0..self.keys.num_shards() {
            let pattern = self.keys.absolute(&self.keys.shard_scan_pattern(index));
            let mut cursor = 0u64;
            loop {
                let (next_cursor, shard_sets): (u64, Vec<String>) = redis::cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(&pattern)
                    .arg("COUNT")
                    .arg(100)
                    .query_async(scan_conn)
                    .await?;

                for shard_set in &shard_sets {
                    report.shard_sets_scanned += 1;
                    report.orphans_removed += self.reap_shard(scan_conn, shard_set).await?;
                }

                cursor = next_cursor;
                if cursor == 0 {
                    break;
                }
            }
        }
        Ok(report)
    }

    /// One sweep per master node; each node only surfaces the shard sets
    /// it owns, and per-node connections are dropped as soon as the node
    /// is done.
    async fn sweep_cluster(&self) -> Result<CleanReport, CacheError> {
        let nodes = topology::master_nodes(&self.connector).await?;
        if nodes.is_empty() {
            let mut conn = self.connector.connection();
            return self.sweep_node(&mut conn).await;
        }

        let mut report = CleanReport::default();
        for node in &nodes {
            debug!(node = %node, "Sweeping cluster node");
            let client = self.connector.native_client(Some(node))?;
            let mut node_conn = client.get_multiplexed_async_connection().await?;
            let node_report = self.sweep_node(&mut node_conn).await?;
            report.shard_sets_scanned += node_report.shard_sets_scanned;
            report.orphans_removed += node_report.orphans_removed;
        }
        Ok(report)
    }

    /// Remove dead members from one shard set.
    ///
    /// `shard_set` arrives as a raw store name (SCAN output). Membership
    /// mutations go through the connection that found the set; liveness
    /// checks and tag-index deletions go through the shared connection,
    /// which routes correctly on a cluster.
    async fn reap_shard<C>(&self, set_conn: &mut C, shard_set: &str) -> Result<u64, CacheError>
    where
        C: ConnectionLike + Send,
    {
        let members: Vec<String> = set_conn.smembers(shard_set).await?;
        let mut main_conn = self.connector.connection();
        let mut removed = 0u64;

        for member in members {
            let alive: bool = main_conn.exists(self.keys.absolute(&member)).await?;
            if alive {
                continue;
            }
            let _: () = set_conn.srem(shard_set, &member).await?;
            let index = self.keys.tag_index_key(&member);
            let _: () = main_conn.del(self.keys.absolute(&index)).await?;
            removed += 1;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_report_defaults_to_zero() {
        let report = CleanReport::default();
        assert_eq!(report.shard_sets_scanned, 0);
        assert_eq!(report.orphans_removed, 0);
    }
}
