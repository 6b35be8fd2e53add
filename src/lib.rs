//! # Tagcache
//!
//! A tag-aware cache invalidation layer on top of Redis (standalone or
//! cluster). Values are stored under arbitrary tags and can later be
//! invalidated per tag without scanning the keyspace.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       CacheEngine                           │
//! │  • put / put_with_tags / get / forget / flush_by_tags      │
//! │  • Writes entry + shard memberships + per-key tag index    │
//! │  • Pipelined on standalone, sequential on cluster          │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                   (native TTL expiry in Redis)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      ExpiryListener                         │
//! │  • PSUBSCRIBE __keyevent@<db>__:expired                    │
//! │  • Batches events under size/time thresholds               │
//! │  • Atomic Lua reconciliation of the tag index              │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                     (missed events, crashes)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      OrphanCleaner                          │
//! │  • Global lock, per-shard SCAN + SMEMBERS + EXISTS         │
//! │  • Per-node local scans on cluster topologies              │
//! │  • Sole guarantee of eventual index consistency            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Tag membership is sharded: a popular tag's member set is split across
//! `num_shards` independent Redis sets, selected by a stable hash of the
//! final key. The same hash drives writer, listener and cleaner — drift in
//! that choice silently orphans entries, so it lives in one place
//! ([`KeySpace`]).
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tagcache::{CacheConfig, CacheEngine, RedisConnector};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = CacheConfig {
//!         redis_url: "redis://localhost:6379".into(),
//!         advanced_mode: true,
//!         ..Default::default()
//!     };
//!
//!     let connector = Arc::new(RedisConnector::connect(&config).await.unwrap());
//!     let engine = CacheEngine::new(connector, &config);
//!
//!     engine
//!         .put_with_tags("product:1", &serde_json::json!({"name": "apple"}),
//!             &["fruit".into(), "fresh".into()], Some(3600))
//!         .await
//!         .unwrap();
//!
//!     engine.flush_by_tags(&["fruit".into()]).await.unwrap();
//! }
//! ```
//!
//! ## Modules
//!
//! - [`engine`]: the main [`CacheEngine`] read/write/invalidate API
//! - [`listener`]: expiry-event reconciliation listener
//! - [`cleaner`]: distributed orphan-cleanup job
//! - [`keys`]: key/shard/namespace composition ([`KeySpace`])
//! - [`connector`]: standalone/cluster connection handling
//! - [`topology`]: cluster master-node enumeration
//! - [`scripts`]: server-side Lua scripts with typed invocations

pub mod cleaner;
pub mod config;
pub mod connector;
pub mod engine;
pub mod error;
pub mod keys;
pub mod listener;
pub mod metrics;
pub mod retry;
pub mod scripts;
pub mod topology;

pub use cleaner::{CleanReport, OrphanCleaner};
pub use config::CacheConfig;
pub use connector::{RedisConnector, StoreConnection};
pub use engine::{CacheEngine, ForgetOptions, TagCache};
pub use error::CacheError;
pub use keys::{stable_hash, KeySpace};
pub use listener::{ExpiredKey, ExpiryBatch, ExpiryListener, FlushReason, ListenerState};
pub use retry::RetryConfig;
pub use topology::NodeAddr;
