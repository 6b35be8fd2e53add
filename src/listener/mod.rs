// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Expiry-event listener: keeps the tag index consistent with TTL expiry.
//!
//! Redis deletes an expired entry but knows nothing about the shard sets
//! and reverse indexes this layer built around it. The listener subscribes
//! to `__keyevent@<db>__:expired`, filters events down to keys this layer
//! owns, accumulates them in an [`ExpiryBatch`], and reconciles each
//! drained batch — atomically via a server-side script on standalone, as
//! per-key forgets on cluster (where the affected names span nodes).
//!
//! Reconciliation failures are logged and the batch is dropped; the orphan
//! cleaner repairs whatever was missed. One listener per master node on a
//! cluster (expiry events are node-local), optionally pinned to a single
//! namespace so several processes can split the event stream.

mod batch;

pub use batch::{ExpiredKey, ExpiryBatch, FlushReason};

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use tracing::{debug, info, warn};

use crate::config::CacheConfig;
use crate::connector::{RedisConnector, StoreConnection};
use crate::engine::{CacheEngine, ForgetOptions};
use crate::error::CacheError;
use crate::keys::{stable_hash, KeySpace};
use crate::metrics;
use crate::scripts;
use crate::topology::NodeAddr;

/// Where the listener is in its lifecycle, for health reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Idle,
    Subscribed,
    Flushing,
    Failed,
}

/// Subscribes to expiry events and reconciles the tag index.
pub struct ExpiryListener {
    connector: Arc<RedisConnector>,
    engine: Arc<CacheEngine>,
    keys: KeySpace,
    batch: ExpiryBatch,
    namespace_id: Option<u32>,
    node: Option<NodeAddr>,
    check_notifications: bool,
    advanced_mode: bool,
    state: ListenerState,
}

impl ExpiryListener {
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
            batch: ExpiryBatch::new(
                config.batch_size,
                Duration::from_secs(config.time_threshold_secs),
            ),
            namespace_id: None,
            node: None,
            check_notifications: true,
            advanced_mode: config.advanced_mode,
            state: ListenerState::Idle,
        }
    }

    /// Only handle events for keys in namespace `id`; everything else is
    /// left for the listeners pinned to the other namespaces.
    #[must_use]
    pub fn with_namespace(mut self, id: u32) -> Self {
        self.namespace_id = Some(id);
        self
    }

    /// Subscribe against a specific cluster node instead of the seed.
    #[must_use]
    pub fn on_node(mut self, node: NodeAddr) -> Self {
        self.node = Some(node);
        self
    }

    /// Skip the `notify-keyspace-events` pre-flight check, for stores that
    /// reject CONFIG (managed offerings often do).
    #[must_use]
    pub fn without_notification_check(mut self) -> Self {
        self.check_notifications = false;
        self
    }

    #[must_use]
    pub fn state(&self) -> ListenerState {
        self.state
    }

    /// Subscribe and process events until the connection drops.
    ///
    /// Returns `Ok(())` when the message stream ends cleanly, draining any
    /// still-batched events first; the caller owns the resubscribe policy.
    /// A no-op (with a warning) when `advanced_mode` is off, since there
    /// is no tag index to maintain.
    pub async fn run(&mut self) -> Result<(), CacheError> {
        let result = self.run_inner().await;
        if result.is_err() {
            self.state = ListenerState::Failed;
        }
        result
    }

    async fn run_inner(&mut self) -> Result<(), CacheError> {
        if !self.advanced_mode {
            warn!("advanced_mode is off, there is no tag index to reconcile");
            return Ok(());
        }

        if self.check_notifications && !self.notifications_enabled().await? {
            warn!(
                "notify-keyspace-events does not include expiry events ('Ex'); \
                 no events will arrive until the server is reconfigured"
            );
        }

        let client = self.connector.native_client(self.node.as_ref())?;
        let mut pubsub = client.get_async_pubsub().await?;
        let channel = format!("__keyevent@{}__:expired", self.connector.db());
        pubsub.psubscribe(&channel).await?;
        self.state = ListenerState::Subscribed;
        info!(
            channel = %channel,
            node = ?self.node,
            namespace = ?self.namespace_id,
            "Expiry listener subscribed"
        );

        // Reconciliation runs on the shared connection; the pub/sub
        // connection cannot issue commands while subscribed.
        let mut flush_conn = self.connector.connection();
        let mut stream = pubsub.on_message();

        while let Some(message) = stream.next().await {
            let payload: String = message.get_payload()?;
            match self.keys.expired_event_key(&payload, self.namespace_id) {
                Some(final_key) => {
                    metrics::record_expiry_event(true);
                    let hash = stable_hash(&final_key);
                    if let Some(reason) = self.batch.push(ExpiredKey { final_key, hash }) {
                        self.flush(&mut flush_conn, reason).await;
                    }
                }
                None => metrics::record_expiry_event(false),
            }

            if self.batch.should_flush_by_time(Instant::now()) {
                self.flush(&mut flush_conn, FlushReason::Time).await;
            }
        }

        // Stream ended cleanly: drain whatever is still batched instead
        // of leaving it to the orphan cleaner
        if !self.batch.is_empty() {
            self.flush(&mut flush_conn, FlushReason::Shutdown).await;
        }

        self.state = ListenerState::Idle;
        Ok(())
    }

    /// Drain the batch and reconcile it. Failures are logged, not
    /// propagated: the entries are gone from the batch either way and the
    /// orphan cleaner picks up the slack.
    async fn flush(&mut self, conn: &mut StoreConnection, reason: FlushReason) {
        self.state = ListenerState::Flushing;
        let entries = self.batch.take(Instant::now());
        if entries.is_empty() {
            self.state = ListenerState::Subscribed;
            return;
        }
        metrics::record_batch_flush(reason.as_str(), entries.len());

        if self.connector.is_cluster() {
            for entry in &entries {
                if let Err(e) = self
                    .engine
                    .forget(&entry.final_key, ForgetOptions::tags_only())
                    .await
                {
                    warn!(key = %entry.final_key, error = %e, "Expired-key cleanup failed");
                }
            }
        } else if let Err(e) = scripts::reconcile_expired(conn, &self.keys, &entries).await {
            metrics::record_script_failure("reconcile_expired");
            warn!(
                error = %e,
                keys = entries.len(),
                "Batch reconciliation failed; orphan cleaner will repair"
            );
        }

        debug!(keys = entries.len(), reason = reason.as_str(), "Batch flushed");
        self.state = ListenerState::Subscribed;
    }

    /// Whether the server is configured to publish expiry events.
    async fn notifications_enabled(&self) -> Result<bool, CacheError> {
        let mut conn = self.connector.connection();
        let config: std::collections::HashMap<String, String> = redis::cmd("CONFIG")
            .arg("GET")
            .arg("notify-keyspace-events")
            .query_async(&mut conn)
            .await?;
        let flags = config
            .get("notify-keyspace-events")
            .map(String::as_str)
            .unwrap_or("");
        Ok(expiry_notifications_active(flags))
    }
}

/// `notify-keyspace-events` must carry `E` (keyevent channel) plus either
/// `x` (expired) or `A` (all classes).
fn expiry_notifications_active(flags: &str) -> bool {
    flags.contains('E') && (flags.contains('x') || flags.contains('A'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_flags() {
        assert!(expiry_notifications_active("Ex"));
        assert!(expiry_notifications_active("xE"));
        assert!(expiry_notifications_active("AKE"));
        assert!(expiry_notifications_active("gxE"));
        assert!(!expiry_notifications_active(""));
        assert!(!expiry_notifications_active("Kx")); // keyspace channel only
        assert!(!expiry_notifications_active("Eg")); // no expired class
    }

    #[test]
    fn test_flush_reason_labels() {
        assert_eq!(FlushReason::Count.as_str(), "count");
        assert_eq!(FlushReason::Time.as_str(), "time");
        assert_eq!(FlushReason::Shutdown.as_str(), "shutdown");
    }
}
