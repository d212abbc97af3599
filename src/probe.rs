//! Leader discovery by polling each MDS node's HTTP status endpoint.

use crate::error::{merge_except_success, CmdError, Result};
use crate::rpc::LeaderResolver;
use crate::types::MdsNode;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// Path of the status variable on a node's dummy address.
pub const STATUS_PATH: &str = "vars/mds_status";

/// Role an MDS node reports on its status endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Leader,
    Follower,
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeRole::Leader => write!(f, "leader"),
            NodeRole::Follower => write!(f, "follower"),
        }
    }
}

/// Parse the body of a status response.
pub fn parse_role(body: &str) -> Option<NodeRole> {
    if body.contains("leader") {
        Some(NodeRole::Leader)
    } else if body.contains("follower") {
        Some(NodeRole::Follower)
    } else {
        None
    }
}

/// Resolves the leader over HTTP using each node's dummy address.
pub struct HttpLeaderProbe {
    client: reqwest::Client,
    /// rpc address -> dummy address
    dummy_addrs: RwLock<HashMap<String, String>>,
}

impl HttpLeaderProbe {
    pub fn new(nodes: &[MdsNode], timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .map_err(|e| CmdError::internal(format!("failed to build http client: {}", e)))?;

        let probe = Self {
            client,
            dummy_addrs: RwLock::new(HashMap::new()),
        };
        probe.set_nodes(nodes);
        Ok(probe)
    }

    /// Whether any node has a status address to poll.
    pub fn has_nodes(&self) -> bool {
        !self.dummy_addrs.read().is_empty()
    }

    /// Replace the known nodes, e.g. after listing the cluster.
    pub fn set_nodes(&self, nodes: &[MdsNode]) {
        *self.dummy_addrs.write() = nodes
            .iter()
            .filter_map(|n| n.dummy_addr.clone().map(|d| (n.addr.clone(), d)))
            .collect();
    }

    /// Ask one node for its role.
    pub async fn role(&self, dummy_addr: &str) -> Result<NodeRole> {
        let url = format!("http://{}/{}", dummy_addr, STATUS_PATH);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| CmdError::http_transport(dummy_addr, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CmdError::http_result(
                status.as_u16(),
                format!("GET {} returned {}", url, status),
            ));
        }

        let body = response
            .text()
            .await
            .map_err(|e| CmdError::http_transport(dummy_addr, e))?;
        parse_role(&body)
            .ok_or_else(|| CmdError::internal(format!("unrecognized status from {}: {}", url, body.trim())))
    }
}

#[async_trait]
impl LeaderResolver for HttpLeaderProbe {
    async fn resolve_leader(&self, addrs: &[String]) -> Result<String> {
        let mut errors = Vec::new();
        for addr in addrs {
            let Some(dummy) = self.dummy_addrs.read().get(addr).cloned() else {
                continue;
            };
            match self.role(&dummy).await {
                Ok(NodeRole::Leader) => {
                    debug!(addr = %addr, "Resolved MDS leader");
                    return Ok(addr.clone());
                }
                Ok(NodeRole::Follower) => {}
                Err(e) => errors.push(e),
            }
        }

        errors.push(CmdError::internal(format!(
            "no leader among {}",
            addrs.join(",")
        )));
        Err(merge_except_success(&errors))
    }
}
