//! Common test utilities for integration tests.
//!
//! [`MockCluster`] runs a handful of in-process MDS nodes on loopback
//! sockets. They share one in-memory filesystem tree and speak the framed
//! JSON protocol from `mdsctl::transport`; each node also serves the HTTP
//! status page the leader probe reads.

#![allow(dead_code)]

use mdsctl::config::ClientConfig;
use mdsctl::messages::*;
use mdsctl::status::{MdsStatus, MetaStatus, TopoStatus};
use mdsctl::transport::{read_frame, write_frame, RpcFrame};
use mdsctl::types::{
    Dentry, FileType, FsId, FsInfo, InodeAttr, InodeId, MdsId, MdsNode, PartitionPolicy, Quota,
    ROOT_INODE,
};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

pub const TEST_FS_ID: FsId = 1;
pub const TEST_FS_NAME: &str = "testfs";

/// Find an available port for testing.
pub fn find_available_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("Failed to bind to port");
    listener.local_addr().unwrap().port()
}

/// Client configuration pointed at `addrs` with short timeouts.
pub fn test_config(addrs: Vec<String>) -> ClientConfig {
    ClientConfig {
        mds_addrs: addrs,
        timeout: Duration::from_secs(2),
        retry_times: 1,
        retry_delay: Duration::from_millis(10),
        max_concurrency: 4,
        ..ClientConfig::default()
    }
}

/// Shared state of the mock cluster.
#[derive(Default)]
pub struct ClusterState {
    pub nodes: Vec<MdsNode>,
    pub info: Option<FsInfo>,
    pub leader: MdsId,
    pub inodes: HashMap<InodeId, InodeAttr>,
    pub dentries: BTreeMap<(InodeId, String), Dentry>,
    pub fs_quota: Quota,
    pub dir_quotas: HashMap<InodeId, Quota>,
    /// Names removed by Unlink or RemoveDirectory, in order.
    pub removed: Vec<String>,
    /// Requests seen per node, as (node id, method).
    pub calls: Vec<(MdsId, String)>,
    /// Shard requests that reached a node not owning the id.
    pub misroutes: u64,
    /// Remaining GetFsInfo replies to answer with NotServing, per node.
    pub not_serving: HashMap<MdsId, u32>,
}

impl ClusterState {
    fn owner(&self, id: InodeId) -> Option<MdsId> {
        match &self.info.as_ref()?.partition_policy {
            PartitionPolicy::Mono { mds_id } => Some(*mds_id),
            PartitionPolicy::ParentIdHash {
                bucket_num,
                distributions,
            } => {
                let bucket = id % bucket_num;
                distributions
                    .iter()
                    .find(|(_, buckets)| buckets.contains(&bucket))
                    .map(|(mds_id, _)| *mds_id)
            }
        }
    }

    fn epoch(&self) -> u64 {
        self.info.as_ref().map(|i| i.epoch).unwrap_or_default()
    }

    /// Epoch and ownership checks shared by every shard request.
    fn check_shard(&mut self, node: MdsId, epoch: u64, id: InodeId) -> MdsStatus {
        if epoch != self.epoch() {
            return MdsStatus::EpochMismatch;
        }
        if self.owner(id) != Some(node) {
            self.misroutes += 1;
            return MdsStatus::ParamError;
        }
        MdsStatus::Ok
    }

    fn children(&self, parent: InodeId) -> impl Iterator<Item = &Dentry> {
        self.dentries
            .range((parent, String::new())..)
            .take_while(move |((p, _), _)| *p == parent)
            .map(|(_, d)| d)
    }
}

/// A set of mock MDS nodes sharing one filesystem.
pub struct MockCluster {
    pub state: Arc<Mutex<ClusterState>>,
    pub addrs: Vec<String>,
    handles: Vec<JoinHandle<()>>,
}

impl MockCluster {
    /// Start `node_count` nodes. Bucket `b` of the hash layout belongs to
    /// node `b % node_count + 1`; node 1 is the leader.
    pub async fn start(node_count: usize, bucket_num: u64) -> Self {
        let state = Arc::new(Mutex::new(ClusterState::default()));
        let mut handles = Vec::new();
        let mut nodes = Vec::new();

        for index in 0..node_count {
            let id = index as MdsId + 1;
            let rpc = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let http = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let mut node = MdsNode::new(id, rpc.local_addr().unwrap().to_string());
            node.dummy_addr = Some(http.local_addr().unwrap().to_string());
            nodes.push(node);

            handles.push(tokio::spawn(serve_rpc(id, rpc, state.clone())));
            handles.push(tokio::spawn(serve_status(id, http, state.clone())));
        }

        let mut distributions: HashMap<MdsId, BTreeSet<u64>> = HashMap::new();
        for bucket in 0..bucket_num {
            let owner = bucket % node_count as u64 + 1;
            distributions.entry(owner).or_default().insert(bucket);
        }

        let addrs = nodes.iter().map(|n| n.addr.clone()).collect();
        {
            let mut s = state.lock();
            s.nodes = nodes;
            s.leader = 1;
            s.info = Some(FsInfo {
                fs_id: TEST_FS_ID,
                fs_name: TEST_FS_NAME.to_string(),
                epoch: 1,
                partition_policy: PartitionPolicy::ParentIdHash {
                    bucket_num,
                    distributions,
                },
                capacity: 0,
                owner: "test".to_string(),
            });
            s.inodes.insert(ROOT_INODE, attr(ROOT_INODE, FileType::Directory, 0, 2));
        }

        Self {
            state,
            addrs,
            handles,
        }
    }

    pub fn config(&self) -> ClientConfig {
        test_config(self.addrs.clone())
    }

    pub fn add_dir(&self, parent: InodeId, inode: InodeId, name: &str) {
        let mut s = self.state.lock();
        s.inodes.insert(inode, attr(inode, FileType::Directory, 0, 2));
        s.dentries.insert(
            (parent, name.to_string()),
            Dentry {
                parent,
                name: name.to_string(),
                inode,
                file_type: FileType::Directory,
            },
        );
    }

    pub fn add_file(&self, parent: InodeId, inode: InodeId, name: &str, length: u64) {
        let mut s = self.state.lock();
        let entry = s
            .inodes
            .entry(inode)
            .or_insert_with(|| attr(inode, FileType::File, length, 0));
        entry.nlink += 1;
        entry.parents.push(parent);
        s.dentries.insert(
            (parent, name.to_string()),
            Dentry {
                parent,
                name: name.to_string(),
                inode,
                file_type: FileType::File,
            },
        );
    }

    pub fn set_leader(&self, id: MdsId) {
        self.state.lock().leader = id;
    }

    /// Move the filesystem to a new epoch without changing its layout.
    pub fn bump_epoch(&self) {
        if let Some(info) = self.state.lock().info.as_mut() {
            info.epoch += 1;
        }
    }

    pub fn fail_fs_info(&self, node: MdsId, times: u32) {
        self.state.lock().not_serving.insert(node, times);
    }

    pub fn removed(&self) -> Vec<String> {
        self.state.lock().removed.clone()
    }

    pub fn misroutes(&self) -> u64 {
        self.state.lock().misroutes
    }

    pub fn calls_to(&self, node: MdsId, method: &str) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|(id, m)| *id == node && m == method)
            .count()
    }

    pub fn entry_count(&self) -> usize {
        self.state.lock().dentries.len()
    }
}

impl Drop for MockCluster {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

fn attr(inode: InodeId, file_type: FileType, length: u64, nlink: u32) -> InodeAttr {
    InodeAttr {
        inode,
        file_type,
        length,
        nlink,
        mode: 0o644,
        uid: 0,
        gid: 0,
        parents: Vec::new(),
    }
}

async fn serve_rpc(node: MdsId, listener: TcpListener, state: Arc<Mutex<ClusterState>>) {
    while let Ok((stream, _)) = listener.accept().await {
        tokio::spawn(serve_connection(node, stream, state.clone()));
    }
}

async fn serve_connection(node: MdsId, mut stream: TcpStream, state: Arc<Mutex<ClusterState>>) {
    while let Ok(request) = read_frame(&mut stream).await {
        let Ok(frame) = serde_json::from_slice::<RpcFrame>(&request) else {
            return;
        };
        let reply = handle(node, frame, &mut state.lock());
        if write_frame(&mut stream, &reply).await.is_err() {
            return;
        }
    }
}

fn body<T: DeserializeOwned>(frame: &RpcFrame) -> T {
    serde_json::from_value(frame.body.clone()).unwrap()
}

fn encode<T: Serialize>(reply: T) -> Vec<u8> {
    serde_json::to_vec(&reply).unwrap()
}

fn handle(node: MdsId, frame: RpcFrame, s: &mut ClusterState) -> Vec<u8> {
    s.calls.push((node, frame.method.clone()));

    match frame.method.as_str() {
        "ListMds" => encode(ListMdsResponse {
            status: TopoStatus::Ok,
            nodes: s.nodes.clone(),
        }),
        "GetFsInfo" => {
            let req: GetFsInfoRequest = body(&frame);
            if let Some(left) = s.not_serving.get_mut(&node).filter(|n| **n > 0) {
                *left -= 1;
                return encode(GetFsInfoResponse {
                    status: MdsStatus::NotServing,
                    info: None,
                });
            }
            let info = s.info.clone().filter(|info| {
                req.fs_id == Some(info.fs_id) || req.fs_name.as_deref() == Some(info.fs_name.as_str())
            });
            encode(GetFsInfoResponse {
                status: if info.is_some() {
                    MdsStatus::Ok
                } else {
                    MdsStatus::FsNotFound
                },
                info,
            })
        }
        "GetInode" => {
            let req: GetInodeRequest = body(&frame);
            let mut status = s.check_shard(node, req.epoch, req.inode);
            let attr = match status {
                MdsStatus::Ok => s.inodes.get(&req.inode).cloned(),
                _ => None,
            };
            if status == MdsStatus::Ok && attr.is_none() {
                status = MdsStatus::InodeNotFound;
            }
            encode(GetInodeResponse { status, attr })
        }
        "ListDentry" => {
            let req: ListDentryRequest = body(&frame);
            let status = s.check_shard(node, req.epoch, req.parent);
            let dentries = match status {
                MdsStatus::Ok => s
                    .children(req.parent)
                    .filter(|d| req.last.as_ref().map_or(true, |last| d.name > *last))
                    .take(req.limit as usize)
                    .cloned()
                    .collect(),
                _ => Vec::new(),
            };
            encode(ListDentryResponse { status, dentries })
        }
        "GetDentry" => {
            let req: GetDentryRequest = body(&frame);
            let mut status = s.check_shard(node, req.epoch, req.parent);
            let dentry = match status {
                MdsStatus::Ok => s.dentries.get(&(req.parent, req.name)).cloned(),
                _ => None,
            };
            if status == MdsStatus::Ok && dentry.is_none() {
                status = MdsStatus::DentryNotFound;
            }
            encode(GetDentryResponse { status, dentry })
        }
        "Unlink" => {
            let req: UnlinkRequest = body(&frame);
            let mut status = s.check_shard(node, req.epoch, req.parent);
            if status == MdsStatus::Ok {
                match s.dentries.remove(&(req.parent, req.name.clone())) {
                    Some(_) => s.removed.push(req.name),
                    None => status = MdsStatus::DentryNotFound,
                }
            }
            encode(UnlinkResponse { status })
        }
        "RemoveDirectory" => {
            let req: RemoveDirectoryRequest = body(&frame);
            let mut status = s.check_shard(node, req.epoch, req.parent);
            if status == MdsStatus::Ok {
                let key = (req.parent, req.name.clone());
                match s.dentries.get(&key).map(|d| d.inode) {
                    None => status = MdsStatus::DentryNotFound,
                    Some(inode) if s.children(inode).next().is_some() => {
                        status = MdsStatus::DirNotEmpty
                    }
                    Some(_) => {
                        s.dentries.remove(&key);
                        s.removed.push(req.name);
                    }
                }
            }
            encode(RemoveDirectoryResponse { status })
        }
        "GetFsQuota" => encode(GetFsQuotaResponse {
            status: MetaStatus::Ok,
            quota: Some(s.fs_quota),
        }),
        "SetFsQuota" => {
            let req: SetFsQuotaRequest = body(&frame);
            apply_limits(&mut s.fs_quota, req.max_bytes, req.max_inodes);
            encode(SetFsQuotaResponse {
                status: MetaStatus::Ok,
            })
        }
        "GetDirQuota" => {
            let req: GetDirQuotaRequest = body(&frame);
            let quota = s.dir_quotas.get(&req.inode).copied();
            encode(GetDirQuotaResponse {
                status: if quota.is_some() {
                    MetaStatus::Ok
                } else {
                    MetaStatus::NotFound
                },
                quota,
            })
        }
        "SetDirQuota" => {
            let req: SetDirQuotaRequest = body(&frame);
            let quota = s.dir_quotas.entry(req.inode).or_default();
            apply_limits(quota, req.max_bytes, req.max_inodes);
            encode(SetDirQuotaResponse {
                status: MetaStatus::Ok,
            })
        }
        other => panic!("mock mds got unknown method {}", other),
    }
}

fn apply_limits(quota: &mut Quota, max_bytes: Option<u64>, max_inodes: Option<u64>) {
    if let Some(max_bytes) = max_bytes {
        quota.max_bytes = max_bytes;
    }
    if let Some(max_inodes) = max_inodes {
        quota.max_inodes = max_inodes;
    }
}

/// Minimal HTTP responder for `/vars/mds_status`.
async fn serve_status(node: MdsId, listener: TcpListener, state: Arc<Mutex<ClusterState>>) {
    while let Ok((mut stream, _)) = listener.accept().await {
        let state = state.clone();
        tokio::spawn(async move {
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf).await;
            let role = if state.lock().leader == node {
                "leader"
            } else {
                "follower"
            };
            let response = format!(
                "HTTP/1.1 200 OK\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                role.len(),
                role
            );
            let _ = stream.write_all(response.as_bytes()).await;
            let _ = stream.shutdown().await;
        });
    }
}
