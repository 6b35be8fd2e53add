//! Connection handling for standalone and cluster deployments.
//!
//! [`RedisConnector`] owns one shared multiplexed connection (a
//! [`ConnectionManager`] on standalone, a [`ClusterConnection`] on cluster)
//! and hands out cheap clones of it behind the [`StoreConnection`] enum.
//! It also produces *native* per-node clients, needed where multiplexing
//! does not work: the listener's blocking PSUBSCRIBE and the cleaner's
//! node-local SCANs (which only see keys owned by the contacted node).

use redis::aio::{ConnectionLike, ConnectionManager};
use redis::cluster::ClusterClient;
use redis::cluster_async::ClusterConnection;
use redis::{Client, Cmd, Pipeline, RedisFuture, Value};

use crate::config::CacheConfig;
use crate::error::CacheError;
use crate::retry::{retry, RetryConfig};
use crate::topology::NodeAddr;

/// A cloneable async connection to either a standalone Redis or a cluster.
///
/// Implements [`ConnectionLike`], so commands, pipelines and scripts run
/// against it uniformly; components that care about topology branch on
/// [`RedisConnector::is_cluster`] instead of on the connection type.
#[derive(Clone)]
pub enum StoreConnection {
    Standalone(ConnectionManager),
    Cluster(ClusterConnection),
}

impl ConnectionLike for StoreConnection {
    fn req_packed_command<'a>(&'a mut self, cmd: &'a Cmd) -> RedisFuture<'a, Value> {
        match self {
            Self::Standalone(conn) => conn.req_packed_command(cmd),
            Self::Cluster(conn) => conn.req_packed_command(cmd),
        }
    }

    fn req_packed_commands<'a>(
        &'a mut self,
        cmd: &'a Pipeline,
        offset: usize,
        count: usize,
    ) -> RedisFuture<'a, Vec<Value>> {
        match self {
            Self::Standalone(conn) => conn.req_packed_commands(cmd, offset, count),
            Self::Cluster(conn) => conn.req_packed_commands(cmd, offset, count),
        }
    }

    fn get_db(&self) -> i64 {
        match self {
            Self::Standalone(conn) => conn.get_db(),
            Self::Cluster(_) => 0,
        }
    }
}

/// Acquires and shares connections to the configured store.
pub struct RedisConnector {
    client: Client,
    connection: StoreConnection,
    cluster: bool,
    db: i64,
}

impl RedisConnector {
    /// Connect to the store described by `config`.
    ///
    /// Uses startup retry semantics: fail after a handful of attempts so a
    /// bad URL surfaces quickly instead of hanging forever.
    pub async fn connect(config: &CacheConfig) -> Result<Self, CacheError> {
        config.validate()?;
        if config.is_cluster() {
            let cluster_client = ClusterClient::new(config.cluster_urls.clone())?;
            let connection = retry("redis_cluster_connect", &RetryConfig::startup(), || {
                let client = cluster_client.clone();
                async move { client.get_async_connection().await }
            })
            .await?;

            // Native client against the first seed node, for pub/sub and
            // topology introspection. Clusters only serve database 0.
            let client = Client::open(config.cluster_urls[0].as_str())?;
            Ok(Self {
                client,
                connection: StoreConnection::Cluster(connection),
                cluster: true,
                db: 0,
            })
        } else {
            let client = Client::open(config.redis_url.as_str())?;
            let connection = retry("redis_connect", &RetryConfig::startup(), || {
                let client = client.clone();
                async move { ConnectionManager::new(client).await }
            })
            .await?;

            let db = client.get_connection_info().redis.db;
            Ok(Self {
                client,
                connection: StoreConnection::Standalone(connection),
                cluster: false,
                db,
            })
        }
    }

    /// Clone of the shared multiplexed connection.
    #[must_use]
    pub fn connection(&self) -> StoreConnection {
        self.connection.clone()
    }

    #[must_use]
    pub fn is_cluster(&self) -> bool {
        self.cluster
    }

    /// Logical database index (always 0 on cluster). Part of the expiry
    /// channel name: `__keyevent@<db>__:expired`.
    #[must_use]
    pub fn db(&self) -> i64 {
        self.db
    }

    /// A raw client for blocking subscriptions and node-local commands.
    ///
    /// With `node` set, the client targets that cluster node directly;
    /// otherwise it targets the configured (seed) address. Callers own the
    /// connections they open from it and drop them when done.
    pub fn native_client(&self, node: Option<&NodeAddr>) -> Result<Client, CacheError> {
        match node {
            Some(addr) => Ok(Client::open(format!("redis://{}:{}", addr.host, addr.port))?),
            None => Ok(self.client.clone()),
        }
    }
}
