//! Request and response bodies for every call the client makes.
//!
//! Node listing answers with a topology status, filesystem, inode and
//! dentry calls with an MDS status, and quota calls with the status of the
//! metaserver that keeps the quota.
//!
//! Each request implements [`RpcMethod`], which names the method on the wire
//! and fixes the response type. Every response carries exactly one status
//! field and exposes it through [`RetryStatus`] so the dispatcher can
//! classify it without knowing the concrete message.

use crate::status::{MdsStatus, MetaStatus, RetryStatus, StatusCode, TopoStatus};
use crate::types::{Dentry, Epoch, FsId, FsInfo, InodeAttr, InodeId, MdsNode, Quota};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A request type and the response it expects.
pub trait RpcMethod: Serialize + Send + Sync {
    /// Method name carried in the frame header.
    const NAME: &'static str;
    type Response: DeserializeOwned + RetryStatus + Send + 'static;
}

macro_rules! rpc_method {
    ($req:ty => $resp:ty, $name:literal) => {
        impl RpcMethod for $req {
            const NAME: &'static str = $name;
            type Response = $resp;
        }
    };
}

macro_rules! status_of {
    ($resp:ty, $variant:ident) => {
        impl RetryStatus for $resp {
            fn status(&self) -> StatusCode {
                StatusCode::$variant(self.status)
            }
        }
    };
}

// ============================================================================
// Topology
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListMdsRequest {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListMdsResponse {
    pub status: TopoStatus,
    #[serde(default)]
    pub nodes: Vec<MdsNode>,
}

rpc_method!(ListMdsRequest => ListMdsResponse, "ListMds");
status_of!(ListMdsResponse, Topology);

// ============================================================================
// Filesystem
// ============================================================================

/// Looks a filesystem up by id, or by name when `fs_id` is absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetFsInfoRequest {
    pub fs_id: Option<FsId>,
    pub fs_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetFsInfoResponse {
    pub status: MdsStatus,
    pub info: Option<FsInfo>,
}

rpc_method!(GetFsInfoRequest => GetFsInfoResponse, "GetFsInfo");
status_of!(GetFsInfoResponse, Mds);

// ============================================================================
// Inodes and dentries
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetInodeRequest {
    pub fs_id: FsId,
    pub epoch: Epoch,
    pub inode: InodeId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetInodeResponse {
    pub status: MdsStatus,
    pub attr: Option<InodeAttr>,
}

rpc_method!(GetInodeRequest => GetInodeResponse, "GetInode");
status_of!(GetInodeResponse, Mds);

/// One page of a directory listing, starting after `last`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListDentryRequest {
    pub fs_id: FsId,
    pub epoch: Epoch,
    pub parent: InodeId,
    pub last: Option<String>,
    pub limit: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListDentryResponse {
    pub status: MdsStatus,
    #[serde(default)]
    pub dentries: Vec<Dentry>,
}

rpc_method!(ListDentryRequest => ListDentryResponse, "ListDentry");
status_of!(ListDentryResponse, Mds);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetDentryRequest {
    pub fs_id: FsId,
    pub epoch: Epoch,
    pub parent: InodeId,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetDentryResponse {
    pub status: MdsStatus,
    pub dentry: Option<Dentry>,
}

rpc_method!(GetDentryRequest => GetDentryResponse, "GetDentry");
status_of!(GetDentryResponse, Mds);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnlinkRequest {
    pub fs_id: FsId,
    pub epoch: Epoch,
    pub parent: InodeId,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnlinkResponse {
    pub status: MdsStatus,
}

rpc_method!(UnlinkRequest => UnlinkResponse, "Unlink");
status_of!(UnlinkResponse, Mds);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveDirectoryRequest {
    pub fs_id: FsId,
    pub epoch: Epoch,
    pub parent: InodeId,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveDirectoryResponse {
    pub status: MdsStatus,
}

rpc_method!(RemoveDirectoryRequest => RemoveDirectoryResponse, "RemoveDirectory");
status_of!(RemoveDirectoryResponse, Mds);

// ============================================================================
// Quota
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetFsQuotaRequest {
    pub fs_id: FsId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetFsQuotaResponse {
    pub status: MetaStatus,
    pub quota: Option<Quota>,
}

rpc_method!(GetFsQuotaRequest => GetFsQuotaResponse, "GetFsQuota");
status_of!(GetFsQuotaResponse, MetaServer);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetFsQuotaRequest {
    pub fs_id: FsId,
    pub max_bytes: Option<u64>,
    pub max_inodes: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetFsQuotaResponse {
    pub status: MetaStatus,
}

rpc_method!(SetFsQuotaRequest => SetFsQuotaResponse, "SetFsQuota");
status_of!(SetFsQuotaResponse, MetaServer);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetDirQuotaRequest {
    pub fs_id: FsId,
    pub inode: InodeId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetDirQuotaResponse {
    pub status: MetaStatus,
    pub quota: Option<Quota>,
}

rpc_method!(GetDirQuotaRequest => GetDirQuotaResponse, "GetDirQuota");
status_of!(GetDirQuotaResponse, MetaServer);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetDirQuotaRequest {
    pub fs_id: FsId,
    pub inode: InodeId,
    pub max_bytes: Option<u64>,
    pub max_inodes: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetDirQuotaResponse {
    pub status: MetaStatus,
}

rpc_method!(SetDirQuotaRequest => SetDirQuotaResponse, "SetDirQuota");
status_of!(SetDirQuotaResponse, MetaServer);
