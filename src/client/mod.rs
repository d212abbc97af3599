//! Metadata client for one command invocation.
//!
//! [`MdsClient`] owns everything an invocation shares: the connection pool,
//! the dispatcher, the per-filesystem routers and a cache of filesystem
//! descriptors. Nothing is process-global; dropping the client drops it all.
//!
//! Cluster-level calls (node listing, filesystem info, quotas) go to the
//! configured MDS addresses, leader first. Inode and dentry calls go to the
//! single node that owns the identifier according to the filesystem's
//! partition policy.

mod tree;

pub use self::tree::{FsTree, RemoveVisitor, UsageVisitor};

use crate::config::ClientConfig;
use crate::error::{CmdError, Result, CODE_RPC_RESULT};
use crate::messages::*;
use crate::observability::record_walk_error;
use crate::pool::ConnectionPool;
use crate::probe::{HttpLeaderProbe, NodeRole};
use crate::router::{RouterRegistry, ShardRouter};
use crate::rpc::{DispatchMode, RpcCallSpec, RpcDispatcher};
use crate::status::{MdsStatus, StatusCode};
use crate::transport::{MdsChannel, TcpConnector};
use crate::types::{Dentry, Epoch, FsId, FsInfo, InodeAttr, InodeId, MdsNode, Quota, ROOT_INODE};
use crate::walker::{TraversalSummary, TreeWalker, WalkError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Page size for directory listings.
pub const LIST_PAGE_SIZE: u32 = 1024;

/// Role report for one node.
#[derive(Debug, Clone)]
pub struct NodeStatus {
    pub node: MdsNode,
    pub role: Result<NodeRole>,
}

/// Per-invocation metadata client. Cheap to clone.
#[derive(Clone)]
pub struct MdsClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: ClientConfig,
    dispatcher: RpcDispatcher<TcpConnector>,
    probe: Arc<HttpLeaderProbe>,
    routers: RouterRegistry,
    nodes: RwLock<Option<Vec<MdsNode>>>,
    fs_infos: RwLock<HashMap<FsId, FsInfo>>,
}

impl MdsClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let probe = Arc::new(HttpLeaderProbe::new(&[], config.timeout)?);
        let pool = Arc::new(ConnectionPool::new(TcpConnector));
        let dispatcher = RpcDispatcher::new(pool).with_resolver(probe.clone());

        Ok(Self {
            inner: Arc::new(ClientInner {
                config,
                dispatcher,
                probe,
                routers: RouterRegistry::new(),
                nodes: RwLock::new(None),
                fs_infos: RwLock::new(HashMap::new()),
            }),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn dispatcher(&self) -> &RpcDispatcher<TcpConnector> {
        &self.inner.dispatcher
    }

    /// Send one request with the given call parameters.
    async fn call<M: RpcMethod>(&self, spec: &RpcCallSpec, request: &M) -> Result<M::Response> {
        if spec.mode == DispatchMode::LeaderFirst {
            self.load_nodes().await;
        }
        self.send(spec, request).await
    }

    async fn send<M: RpcMethod>(&self, spec: &RpcCallSpec, request: &M) -> Result<M::Response> {
        self.inner
            .dispatcher
            .call(spec, move |mut conn: MdsChannel| async move {
                let result = conn.call(request).await;
                (conn, result)
            })
            .await
    }

    fn cluster_spec<M: RpcMethod>(&self) -> RpcCallSpec {
        self.inner.config.call_spec(M::NAME)
    }

    // ------------------------------------------------------------------
    // Cluster
    // ------------------------------------------------------------------

    /// MDS nodes of the cluster, fetched once per invocation.
    pub async fn list_mds(&self) -> Result<Vec<MdsNode>> {
        if let Some(nodes) = self.inner.nodes.read().clone() {
            return Ok(nodes);
        }

        let spec = self
            .cluster_spec::<ListMdsRequest>()
            .with_mode(DispatchMode::Failover);
        let reply = self
            .send(&spec, &ListMdsRequest::default())
            .await
            .map_err(|e| e.context("list mds"))?;

        debug!(count = reply.nodes.len(), "Listed MDS nodes");
        self.inner.probe.set_nodes(&reply.nodes);
        *self.inner.nodes.write() = Some(reply.nodes.clone());
        Ok(reply.nodes)
    }

    /// Make sure the leader probe knows the cluster before a leader-first
    /// call. Without a node list the call keeps the configured order.
    async fn load_nodes(&self) {
        if self.inner.nodes.read().is_some() {
            return;
        }
        if let Err(e) = self.list_mds().await {
            debug!(code = e.code(), error = %e, "Node list unavailable, leader unknown");
        }
    }

    /// Role of every node, probed concurrently over HTTP.
    pub async fn mds_status(&self) -> Result<Vec<NodeStatus>> {
        let nodes = self.list_mds().await?;
        let probes = nodes.into_iter().map(|node| async move {
            let role = match &node.dummy_addr {
                Some(dummy) => self.inner.probe.role(dummy).await,
                None => Err(CmdError::internal(format!("mds {} has no status address", node.id))),
            };
            NodeStatus { node, role }
        });
        Ok(futures::future::join_all(probes).await)
    }

    // ------------------------------------------------------------------
    // Filesystems
    // ------------------------------------------------------------------

    /// Filesystem descriptor, cached for the invocation.
    pub async fn fs_info(&self, fs_id: FsId) -> Result<FsInfo> {
        if let Some(info) = self.inner.fs_infos.read().get(&fs_id).cloned() {
            return Ok(info);
        }
        let request = GetFsInfoRequest {
            fs_id: Some(fs_id),
            fs_name: None,
        };
        self.fetch_fs_info(request)
            .await
            .map_err(|e| e.context(format!("get fs info of fsid {}", fs_id)))
    }

    /// Filesystem descriptor looked up by name.
    pub async fn fs_info_by_name(&self, name: &str) -> Result<FsInfo> {
        let request = GetFsInfoRequest {
            fs_id: None,
            fs_name: Some(name.to_string()),
        };
        self.fetch_fs_info(request)
            .await
            .map_err(|e| e.context(format!("get fs info of {}", name)))
    }

    async fn fetch_fs_info(&self, request: GetFsInfoRequest) -> Result<FsInfo> {
        let reply = self.call(&self.cluster_spec::<GetFsInfoRequest>(), &request).await?;
        let info = reply
            .info
            .ok_or_else(|| CmdError::internal("fs info reply carries no descriptor"))?;
        self.inner.fs_infos.write().insert(info.fs_id, info.clone());
        Ok(info)
    }

    /// Descriptors for several filesystems, fetched concurrently. Results
    /// come back in input order.
    pub async fn fs_infos(&self, fs_ids: &[FsId]) -> Vec<Result<FsInfo>> {
        self.load_nodes().await;
        let spec = self.cluster_spec::<GetFsInfoRequest>();
        let specs = vec![spec; fs_ids.len()];
        let requests: Arc<Vec<GetFsInfoRequest>> = Arc::new(
            fs_ids
                .iter()
                .map(|id| GetFsInfoRequest {
                    fs_id: Some(*id),
                    fs_name: None,
                })
                .collect(),
        );

        let replies = self
            .inner
            .dispatcher
            .call_many(specs, move |index, mut conn: MdsChannel| {
                let requests = Arc::clone(&requests);
                async move {
                    let result = conn.call(&requests[index]).await;
                    (conn, result)
                }
            })
            .await;

        replies
            .into_iter()
            .zip(fs_ids)
            .map(|(reply, fs_id)| -> Result<FsInfo> {
                let info = reply
                    .and_then(|r| {
                        r.info
                            .ok_or_else(|| CmdError::internal("fs info reply carries no descriptor"))
                    })
                    .map_err(|e| e.context(format!("get fs info of fsid {}", fs_id)))?;
                self.inner.fs_infos.write().insert(info.fs_id, info.clone());
                Ok(info)
            })
            .collect()
    }

    /// Drop the cached descriptor and router of a filesystem.
    pub fn invalidate(&self, fs_id: FsId) {
        self.inner.fs_infos.write().remove(&fs_id);
        self.inner.routers.invalidate(fs_id);
    }

    /// Router for a filesystem at its current epoch.
    pub async fn router(&self, fs_id: FsId) -> Result<(Epoch, Arc<ShardRouter>)> {
        let info = self.fs_info(fs_id).await?;
        let nodes = self.list_mds().await?;
        let router = self
            .inner
            .routers
            .ensure(fs_id, info.epoch, &nodes, &info.partition_policy)
            .map_err(|e| e.context(format!("build router of fsid {}", fs_id)))?;
        Ok((info.epoch, router))
    }

    /// Node owning `id` in a filesystem.
    pub async fn route(&self, fs_id: FsId, id: InodeId) -> Result<(Epoch, MdsNode)> {
        let (epoch, router) = self.router(fs_id).await?;
        let node = router
            .route(id)
            .ok_or_else(|| CmdError::internal(format!("no mds owns {} in fsid {}", id, fs_id)))?;
        Ok((epoch, node))
    }

    /// Call the owner of `id`. A stale epoch is not retried on the node; it
    /// drops the cached descriptor and the call is repeated once against the
    /// refreshed routing.
    async fn shard_call<M, B>(&self, fs_id: FsId, id: InodeId, build: B) -> Result<M::Response>
    where
        M: RpcMethod,
        B: Fn(Epoch) -> M,
    {
        let stale = StatusCode::Mds(MdsStatus::EpochMismatch);
        let epoch_mismatch = CODE_RPC_RESULT + stale.value();

        let mut refreshed = false;
        loop {
            let (epoch, node) = self.route(fs_id, id).await?;
            let spec = self
                .cluster_spec::<M>()
                .retarget(M::NAME, vec![node.addr.clone()])
                .with_mode(DispatchMode::SingleNode)
                .stop_on(stale);

            match self.call(&spec, &build(epoch)).await {
                Err(e) if e.code() == epoch_mismatch && !refreshed => {
                    info!(fs_id, epoch, "Epoch changed, refreshing routing");
                    self.invalidate(fs_id);
                    refreshed = true;
                }
                other => return other,
            }
        }
    }

    // ------------------------------------------------------------------
    // Inodes and dentries
    // ------------------------------------------------------------------

    pub async fn get_inode(&self, fs_id: FsId, inode: InodeId) -> Result<InodeAttr> {
        let reply = self
            .shard_call(fs_id, inode, |epoch| GetInodeRequest {
                fs_id,
                epoch,
                inode,
            })
            .await
            .map_err(|e| e.context(format!("get inode {}", inode)))?;
        reply
            .attr
            .ok_or_else(|| CmdError::internal(format!("inode {} reply carries no attributes", inode)))
    }

    /// Every entry of a directory, following pagination.
    pub async fn list_dentry(&self, fs_id: FsId, parent: InodeId) -> Result<Vec<Dentry>> {
        let mut entries = Vec::new();
        let mut last: Option<String> = None;
        loop {
            let reply = self
                .shard_call(fs_id, parent, |epoch| ListDentryRequest {
                    fs_id,
                    epoch,
                    parent,
                    last: last.clone(),
                    limit: LIST_PAGE_SIZE,
                })
                .await
                .map_err(|e| e.context(format!("list dentry of {}", parent)))?;

            let page_len = reply.dentries.len();
            last = reply.dentries.last().map(|d| d.name.clone());
            entries.extend(reply.dentries);
            if page_len < LIST_PAGE_SIZE as usize {
                return Ok(entries);
            }
        }
    }

    pub async fn get_dentry(&self, fs_id: FsId, parent: InodeId, name: &str) -> Result<Dentry> {
        let reply = self
            .shard_call(fs_id, parent, |epoch| GetDentryRequest {
                fs_id,
                epoch,
                parent,
                name: name.to_string(),
            })
            .await
            .map_err(|e| e.context(format!("get dentry {}/{}", parent, name)))?;
        reply
            .dentry
            .ok_or_else(|| CmdError::internal(format!("dentry {}/{} reply is empty", parent, name)))
    }

    /// Resolve an absolute path to its dentry. `/` is the root directory.
    pub async fn lookup_path(&self, fs_id: FsId, path: &str) -> Result<Dentry> {
        let mut current = Dentry::directory(ROOT_INODE, ROOT_INODE);
        current.name = "/".to_string();
        for component in path.split('/').filter(|c| !c.is_empty()) {
            if !current.is_dir() {
                return Err(CmdError::internal(format!(
                    "{}: '{}' is not a directory",
                    path, current.name
                )));
            }
            current = self.get_dentry(fs_id, current.inode, component).await?;
        }
        Ok(current)
    }

    pub async fn unlink(&self, fs_id: FsId, parent: InodeId, name: &str) -> Result<()> {
        self.shard_call(fs_id, parent, |epoch| UnlinkRequest {
            fs_id,
            epoch,
            parent,
            name: name.to_string(),
        })
        .await
        .map_err(|e| e.context(format!("unlink {}/{}", parent, name)))?;
        Ok(())
    }

    pub async fn remove_directory(&self, fs_id: FsId, parent: InodeId, name: &str) -> Result<()> {
        self.shard_call(fs_id, parent, |epoch| RemoveDirectoryRequest {
            fs_id,
            epoch,
            parent,
            name: name.to_string(),
        })
        .await
        .map_err(|e| e.context(format!("remove directory {}/{}", parent, name)))?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Quota
    // ------------------------------------------------------------------

    pub async fn fs_quota(&self, fs_id: FsId) -> Result<Quota> {
        let reply = self
            .call(&self.cluster_spec::<GetFsQuotaRequest>(), &GetFsQuotaRequest { fs_id })
            .await
            .map_err(|e| e.context(format!("get quota of fsid {}", fs_id)))?;
        Ok(reply.quota.unwrap_or_default())
    }

    pub async fn set_fs_quota(
        &self,
        fs_id: FsId,
        max_bytes: Option<u64>,
        max_inodes: Option<u64>,
    ) -> Result<()> {
        let request = SetFsQuotaRequest {
            fs_id,
            max_bytes,
            max_inodes,
        };
        self.call(&self.cluster_spec::<SetFsQuotaRequest>(), &request)
            .await
            .map_err(|e| e.context(format!("set quota of fsid {}", fs_id)))?;
        Ok(())
    }

    pub async fn dir_quota(&self, fs_id: FsId, inode: InodeId) -> Result<Quota> {
        let request = GetDirQuotaRequest { fs_id, inode };
        let reply = self
            .call(&self.cluster_spec::<GetDirQuotaRequest>(), &request)
            .await
            .map_err(|e| e.context(format!("get quota of directory {}", inode)))?;
        Ok(reply.quota.unwrap_or_default())
    }

    pub async fn set_dir_quota(
        &self,
        fs_id: FsId,
        inode: InodeId,
        max_bytes: Option<u64>,
        max_inodes: Option<u64>,
    ) -> Result<()> {
        let request = SetDirQuotaRequest {
            fs_id,
            inode,
            max_bytes,
            max_inodes,
        };
        self.call(&self.cluster_spec::<SetDirQuotaRequest>(), &request)
            .await
            .map_err(|e| e.context(format!("set quota of directory {}", inode)))?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Tree operations
    // ------------------------------------------------------------------

    /// Total length and entry count under `path`.
    pub async fn usage(
        &self,
        fs_id: FsId,
        path: &str,
        dedup_hard_links: bool,
    ) -> std::result::Result<TraversalSummary, WalkError> {
        let root = self.lookup_path(fs_id, path).await.map_err(no_progress)?;
        if !root.is_dir() {
            let attr = self.get_inode(fs_id, root.inode).await.map_err(no_progress)?;
            return Ok(TraversalSummary {
                length: attr.length,
                entries: 1,
            });
        }

        let mut walker = TreeWalker::new(self.inner.config.max_concurrency).dedup_hard_links(dedup_hard_links);
        let result = walker
            .walk(
                Arc::new(FsTree::new(self.clone(), fs_id)),
                Arc::new(UsageVisitor::new(self.clone(), fs_id)),
                root,
            )
            .await;
        if result.is_err() {
            record_walk_error("usage");
        }
        result
    }

    /// Remove `path` and everything under it. Children go before their
    /// parent directory. The filesystem root cannot be removed.
    pub async fn remove_recursive(
        &self,
        fs_id: FsId,
        path: &str,
    ) -> std::result::Result<TraversalSummary, WalkError> {
        let root = self.lookup_path(fs_id, path).await.map_err(no_progress)?;
        if root.inode == ROOT_INODE {
            return Err(no_progress(CmdError::internal("refusing to remove the filesystem root")));
        }
        if !root.is_dir() {
            self.unlink(fs_id, root.parent, &root.name)
                .await
                .map_err(no_progress)?;
            return Ok(TraversalSummary {
                length: 0,
                entries: 1,
            });
        }

        let mut walker = TreeWalker::new(self.inner.config.max_concurrency);
        let result = walker
            .walk(
                Arc::new(FsTree::new(self.clone(), fs_id)),
                Arc::new(RemoveVisitor::new(self.clone(), fs_id)),
                root,
            )
            .await;
        if result.is_err() {
            record_walk_error("remove");
        }
        result
    }
}

fn no_progress(error: CmdError) -> WalkError {
    WalkError {
        error,
        partial: TraversalSummary::default(),
    }
}
