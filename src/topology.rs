//! Cluster topology introspection.
//!
//! The listener and the orphan cleaner fan node-local operations (SCAN,
//! PSUBSCRIBE) out to every master, because those commands only see keys
//! owned by the contacted node. Masters are enough: replicas hold copies of
//! master-owned slots and do not emit their own expiry events.

use serde::Serialize;
use tracing::warn;

use crate::connector::RedisConnector;
use crate::error::CacheError;

/// Address of one cluster node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeAddr {
    pub host: String,
    pub port: u16,
}

impl std::fmt::Display for NodeAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Master nodes composing the cluster, or empty for a standalone store.
///
/// Errors from a standalone node rejecting `CLUSTER NODES` are treated as
/// "not a cluster", not as failures.
pub async fn master_nodes(connector: &RedisConnector) -> Result<Vec<NodeAddr>, CacheError> {
    let mut conn = connector.connection();
    let raw: String = match redis::cmd("CLUSTER")
        .arg("NODES")
        .query_async(&mut conn)
        .await
    {
        Ok(raw) => raw,
        Err(e) => {
            warn!(error = %e, "CLUSTER NODES unavailable, treating store as standalone");
            return Ok(Vec::new());
        }
    };

    Ok(parse_cluster_nodes(&raw))
}

/// Parse the line-oriented `CLUSTER NODES` output down to master addresses.
///
/// Each line: `<id> <host:port@cport> <flags> ...`. Failed masters are
/// skipped; a shard set living on a dead master is repaired on a later run
/// once the cluster has promoted a replica.
#[must_use]
pub fn parse_cluster_nodes(raw: &str) -> Vec<NodeAddr> {
    let mut nodes = Vec::new();
    for line in raw.lines() {
        let mut fields = line.split_whitespace();
        let Some(_id) = fields.next() else { continue };
        let Some(addr) = fields.next() else { continue };
        let Some(flags) = fields.next() else { continue };

        if !flags.split(',').any(|f| f == "master") || flags.contains("fail") {
            continue;
        }

        // "host:port@cport" — the cluster bus port after '@' is not ours
        let addr = addr.split('@').next().unwrap_or(addr);
        let Some((host, port)) = addr.rsplit_once(':') else { continue };
        let Ok(port) = port.parse::<u16>() else { continue };

        nodes.push(NodeAddr {
            host: host.to_string(),
            port,
        });
    }
    nodes
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
07c37dfeb235213a872192d90877d0cd55635b91 127.0.0.1:30004@31004 slave e7d1eecce10fd6bb5eb35b9f99a514335d9ba9ca 0 1426238317239 4 connected
67ed2db8d677e59ec4a4cefb06858cf2a1a89fa1 127.0.0.1:30002@31002 master - 0 1426238316232 2 connected 5461-10922
292f8b365bb7edb5e285caf0b7e6ddc7265d2f4f 127.0.0.1:30003@31003 master - 0 1426238318243 3 connected 10923-16383
6ec23923021cf3ffec47632106199cb7f496ce01 127.0.0.1:30005@31005 slave 67ed2db8d677e59ec4a4cefb06858cf2a1a89fa1 0 1426238316232 5 connected
824fe116063bc5fcf9f4ffd895bc17aee7731ac3 127.0.0.1:30006@31006 slave 292f8b365bb7edb5e285caf0b7e6ddc7265d2f4f 0 1426238317741 6 connected
e7d1eecce10fd6bb5eb35b9f99a514335d9ba9ca 127.0.0.1:30001@31001 myself,master - 0 0 1 connected 0-5460
";

    #[test]
    fn test_parse_masters_only() {
        let nodes = parse_cluster_nodes(SAMPLE);
        assert_eq!(nodes.len(), 3);
        assert!(nodes.iter().all(|n| n.host == "127.0.0.1"));
        let ports: Vec<u16> = nodes.iter().map(|n| n.port).collect();
        assert!(ports.contains(&30001)); // "myself,master" still counts
        assert!(ports.contains(&30002));
        assert!(ports.contains(&30003));
    }

    #[test]
    fn test_parse_skips_failed_masters() {
        let raw = "abc 10.0.0.1:7000@17000 master,fail - 0 0 1 connected\n";
        assert!(parse_cluster_nodes(raw).is_empty());
    }

    #[test]
    fn test_parse_tolerates_garbage() {
        assert!(parse_cluster_nodes("").is_empty());
        assert!(parse_cluster_nodes("not a nodes dump").is_empty());
        assert!(parse_cluster_nodes("id hostport master - 0").is_empty());
    }

    #[test]
    fn test_node_addr_display_and_json() {
        let node = NodeAddr {
            host: "10.0.0.1".into(),
            port: 6379,
        };
        assert_eq!(node.to_string(), "10.0.0.1:6379");
        assert_eq!(
            serde_json::to_string(&vec![node]).unwrap(),
            r#"[{"host":"10.0.0.1","port":6379}]"#
        );
    }
}
