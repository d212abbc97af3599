//! Core type definitions shared by the client, router and walker.
//!
//! # Key Types
//!
//! - [`MdsNode`]: one metadata-server node and where to reach it
//! - [`FsInfo`]: filesystem descriptor, including its [`PartitionPolicy`]
//! - [`Dentry`]: a directory entry as returned by a listing
//! - [`InodeAttr`]: attributes of one inode
//!
//! # Type Aliases
//!
//! - [`InodeId`] = `u64`: inode number
//! - [`FsId`] = `u32`: filesystem identifier
//! - [`MdsId`] = `u64`: metadata-server node identifier
//! - [`Epoch`] = `u64`: partition-policy version token

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Unique identifier for an inode.
pub type InodeId = u64;

/// Identifier of one logical filesystem hosted by the cluster.
pub type FsId = u32;

/// Identifier of a metadata-server node.
pub type MdsId = u64;

/// Partition-policy version; changes whenever the policy is reconfigured.
pub type Epoch = u64;

/// Inode number of every filesystem's root directory.
pub const ROOT_INODE: InodeId = 1;

/// File type enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileType {
    File,
    Directory,
    Symlink,
}

/// One metadata-server node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MdsNode {
    pub id: MdsId,
    /// RPC address (`host:port`).
    pub addr: String,
    /// HTTP status address (`host:port`).
    #[serde(default)]
    pub dummy_addr: Option<String>,
}

impl MdsNode {
    pub fn new(id: MdsId, addr: impl Into<String>) -> Self {
        Self {
            id,
            addr: addr.into(),
            dummy_addr: None,
        }
    }
}

/// How a filesystem's inodes are spread over the MDS nodes.
///
/// Externally tagged on the wire (`{"parent_id_hash": {...}}`), so the
/// numeric node ids used as `distributions` keys decode straight from JSON
/// object keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionPolicy {
    /// Every inode lives on one node.
    Mono { mds_id: MdsId },
    /// `bucket = id % bucket_num`; each node owns a set of buckets.
    ParentIdHash {
        bucket_num: u64,
        distributions: HashMap<MdsId, BTreeSet<u64>>,
    },
}

impl PartitionPolicy {
    pub fn name(&self) -> &'static str {
        match self {
            PartitionPolicy::Mono { .. } => "mono",
            PartitionPolicy::ParentIdHash { .. } => "hash",
        }
    }
}

/// Filesystem descriptor as returned by `GetFsInfo`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsInfo {
    pub fs_id: FsId,
    pub fs_name: String,
    pub epoch: Epoch,
    pub partition_policy: PartitionPolicy,
    #[serde(default)]
    pub capacity: u64,
    #[serde(default)]
    pub owner: String,
}

/// Directory entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dentry {
    pub parent: InodeId,
    pub name: String,
    pub inode: InodeId,
    pub file_type: FileType,
}

impl Dentry {
    pub fn is_dir(&self) -> bool {
        self.file_type == FileType::Directory
    }

    /// Synthetic entry standing for a directory the caller names by id.
    pub fn directory(parent: InodeId, inode: InodeId) -> Self {
        Self {
            parent,
            name: String::new(),
            inode,
            file_type: FileType::Directory,
        }
    }
}

/// Inode attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InodeAttr {
    pub inode: InodeId,
    pub file_type: FileType,
    pub length: u64,
    pub nlink: u32,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    #[serde(default)]
    pub parents: Vec<InodeId>,
}

/// Capacity and inode limits for a filesystem or directory.
///
/// A limit of 0 means unlimited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quota {
    pub max_bytes: u64,
    pub max_inodes: u64,
    pub used_bytes: i64,
    pub used_inodes: i64,
}
